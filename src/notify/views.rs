use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::clock::remaining;
use crate::store::{ElevationRequest, ElevationSession};

/// What one caller should currently see. Every remaining-time field is
/// computed on the server at `generated_at`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElevationState {
    pub pending_request_for_me: Option<PendingRequestView>,
    pub outgoing_requests: Vec<PendingRequestView>,
    pub active_session_involving_me: Option<SessionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequestView {
    pub request_id: Uuid,
    pub admin_email: String,
    pub target_email: String,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<ConsentPrompt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// The caller is the operator using the account.
    Admin,
    /// The caller owns the account being used.
    Target,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub request_id: Uuid,
    pub role: SessionRole,
    pub admin_email: String,
    pub target_email: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub banner: Banner,
}

/// Consent UI shown to the target of a pending request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentPrompt {
    pub title: String,
    pub body: String,
    pub countdown: String,
}

/// Persistent banner shown to both parties while a session is open.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Banner {
    pub message: String,
    pub countdown: String,
}

/// `m:ss` countdown text.
pub fn format_countdown(left: Duration) -> String {
    let secs = left.num_seconds().max(0);
    format!("{}:{:02}", secs / 60, secs % 60)
}

impl PendingRequestView {
    /// `None` once the approval window has elapsed at `now`.
    pub fn build(request: &ElevationRequest, window: Duration, viewer: Uuid, now: DateTime<Utc>) -> Option<Self> {
        if request.window_elapsed(window, now) {
            return None;
        }
        let expires_at = request.approval_deadline(window);
        let left = remaining(expires_at, now);
        let prompt = (viewer == request.target_user_id).then(|| ConsentPrompt {
            title: "Support access request".to_string(),
            body: match &request.reason {
                Some(reason) => format!(
                    "{} is asking for temporary access to your account: {}",
                    request.admin_email, reason
                ),
                None => format!("{} is asking for temporary access to your account.", request.admin_email),
            },
            countdown: format_countdown(left),
        });

        Some(Self {
            request_id: request.id,
            admin_email: request.admin_email.clone(),
            target_email: request.target_email.clone(),
            reason: request.reason.clone(),
            requested_at: request.requested_at,
            expires_at,
            remaining_seconds: left.num_seconds(),
            prompt,
        })
    }
}

impl SessionView {
    /// `None` if the viewer is not a party or the session is no longer live at `now`.
    pub fn build(session: &ElevationSession, viewer: Uuid, now: DateTime<Utc>) -> Option<Self> {
        if !session.is_live(now) {
            return None;
        }
        let role = if viewer == session.target_user_id {
            SessionRole::Target
        } else if viewer == session.admin_id {
            SessionRole::Admin
        } else {
            return None;
        };
        let left = remaining(session.expires_at, now);
        let message = match role {
            SessionRole::Admin => format!("You are viewing {}'s account.", session.target_email),
            SessionRole::Target => format!("{} from support is viewing your account.", session.admin_email),
        };

        Some(Self {
            session_id: session.id,
            request_id: session.request_id,
            role,
            admin_email: session.admin_email.clone(),
            target_email: session.target_email.clone(),
            started_at: session.started_at,
            expires_at: session.expires_at,
            remaining_seconds: left.num_seconds(),
            banner: Banner { message, countdown: format_countdown(left) },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(now: DateTime<Utc>) -> ElevationRequest {
        ElevationRequest::pending(
            Uuid::new_v4(),
            "ops@example.com",
            Uuid::new_v4(),
            "user@example.com",
            Some("billing ticket #42".to_string()),
            now,
        )
    }

    #[test]
    fn countdown_formats_minutes_and_seconds() {
        assert_eq!(format_countdown(Duration::seconds(299)), "4:59");
        assert_eq!(format_countdown(Duration::seconds(5)), "0:05");
        assert_eq!(format_countdown(Duration::seconds(-5)), "0:00");
    }

    #[test]
    fn only_target_gets_consent_prompt() {
        let t0 = Utc::now();
        let request = request(t0);
        let window = Duration::minutes(5);
        let now = t0 + Duration::minutes(1);

        let target_view = PendingRequestView::build(&request, window, request.target_user_id, now).unwrap();
        assert_eq!(target_view.remaining_seconds, 240);
        assert!(target_view.prompt.unwrap().body.contains("billing ticket #42"));

        let admin_view = PendingRequestView::build(&request, window, request.admin_id, now).unwrap();
        assert!(admin_view.prompt.is_none());
    }

    #[test]
    fn elapsed_request_is_not_shown() {
        let t0 = Utc::now();
        let request = request(t0);
        let late = t0 + Duration::minutes(5) + Duration::seconds(1);
        assert!(PendingRequestView::build(&request, Duration::minutes(5), request.target_user_id, late).is_none());
    }

    #[test]
    fn banner_depends_on_role_and_disappears_at_expiry() {
        let t0 = Utc::now();
        let request = request(t0);
        let session = ElevationSession::start(&request, t0, Duration::minutes(30));

        let admin = SessionView::build(&session, session.admin_id, t0 + Duration::minutes(10)).unwrap();
        assert_eq!(admin.role, SessionRole::Admin);
        assert_eq!(admin.banner.message, "You are viewing user@example.com's account.");
        assert_eq!(admin.remaining_seconds, 20 * 60);

        let target = SessionView::build(&session, session.target_user_id, t0).unwrap();
        assert_eq!(target.role, SessionRole::Target);

        assert!(SessionView::build(&session, Uuid::new_v4(), t0).is_none());
        assert!(SessionView::build(&session, session.admin_id, t0 + Duration::minutes(30)).is_none());
    }
}
