mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{data, spawn_server, Harness};

#[tokio::test]
async fn health_and_root_are_public() -> Result<()> {
    let h = Harness::new();
    let server = spawn_server(&h).await?;
    let client = reqwest::Client::new();

    let res = client.get(format!("{}/health", server.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(data(&body)["status"], "ok");

    let res = client.get(format!("{}/", server.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() -> Result<()> {
    let h = Harness::new();
    let server = spawn_server(&h).await?;
    let client = reqwest::Client::new();

    let res = client.get(format!("{}/api/elevation-state", server.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "UNAUTHORIZED");

    let res = client
        .get(format!("{}/api/elevation-state", server.base_url))
        .bearer_auth("not-a-jwt")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn request_approve_and_end_over_http() -> Result<()> {
    let h = Harness::new();
    let server = spawn_server(&h).await?;
    let client = reqwest::Client::new();
    let admin = h.token_for(&h.admin);
    let user = h.token_for(&h.user);

    let res = client
        .post(format!("{}/api/elevation-requests", server.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "targetEmail": "user@example.com", "reason": "ticket #123" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let location = res
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body: Value = res.json().await?;
    let request_id = data(&body)["requestId"].as_str().unwrap_or_default().to_string();
    assert!(!request_id.is_empty());
    assert_eq!(location, format!("/api/elevation-requests/{}", request_id));
    assert!(data(&body)["expiresAt"].is_string());

    // Duplicate while pending
    let res = client
        .post(format!("{}/api/elevation-requests", server.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "targetEmail": "user@example.com" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "ALREADY_PENDING");

    // Target sees the consent prompt
    let res = client
        .get(format!("{}/api/elevation-state", server.base_url))
        .bearer_auth(&user)
        .send()
        .await?;
    let body: Value = res.json().await?;
    assert_eq!(data(&body)["pendingRequestForMe"]["requestId"], request_id.as_str());
    assert!(data(&body)["pendingRequestForMe"]["prompt"]["body"].is_string());

    // The admin cannot approve their own request
    let res = client
        .post(format!("{}/api/elevation-requests/{}/approve", server.base_url, request_id))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(format!("{}/api/elevation-requests/{}/approve", server.base_url, request_id))
        .bearer_auth(&user)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    let session_id = data(&body)["sessionId"].as_str().unwrap_or_default().to_string();

    let res = client
        .post(format!("{}/api/elevation-requests/{}/reject", server.base_url, request_id))
        .bearer_auth(&user)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "ALREADY_DECIDED");

    let res = client
        .get(format!("{}/api/elevation-sessions/{}", server.base_url, session_id))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let end = |token: String| {
        let client = client.clone();
        let url = format!("{}/api/elevation-sessions/{}/end", server.base_url, session_id);
        async move { client.post(url).bearer_auth(token).send().await }
    };
    let body: Value = end(user.clone()).await?.json().await?;
    assert_eq!(data(&body)["ended"], true);
    let body: Value = end(admin.clone()).await?.json().await?;
    assert_eq!(data(&body)["ended"], false);
    assert_eq!(data(&body)["endReason"], "ended_by_user");
    Ok(())
}

#[tokio::test]
async fn late_approval_returns_gone() -> Result<()> {
    let h = Harness::new();
    let server = spawn_server(&h).await?;
    let client = reqwest::Client::new();

    let request = h.broker.create_request(&h.admin, "user@example.com", None).await?;
    h.advance(chrono::Duration::minutes(6));

    let res = client
        .post(format!("{}/api/elevation-requests/{}/approve", server.base_url, request.id))
        .bearer_auth(h.token_for(&h.user))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::GONE);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "EXPIRED");
    Ok(())
}

#[tokio::test]
async fn error_statuses_for_bad_input() -> Result<()> {
    let h = Harness::new();
    let server = spawn_server(&h).await?;
    let client = reqwest::Client::new();
    let admin = h.token_for(&h.admin);

    let res = client
        .post(format!("{}/api/elevation-requests", server.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "targetEmail": "ghost@example.com" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(format!("{}/api/elevation-requests", server.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "reason": "missing target" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "INVALID_JSON");

    // Members cannot request elevation
    let res = client
        .post(format!("{}/api/elevation-requests", server.base_url))
        .bearer_auth(h.token_for(&h.user))
        .json(&json!({ "targetEmail": "ops@example.com" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(format!("{}/api/elevation-requests/{}", server.base_url, uuid::Uuid::new_v4()))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn audit_endpoint_lists_history_for_operators() -> Result<()> {
    let h = Harness::new();
    let server = spawn_server(&h).await?;
    let client = reqwest::Client::new();
    let request = h.broker.create_request(&h.admin, "user@example.com", None).await?;

    let res = client
        .get(format!(
            "{}/api/elevation-audit?subjectType=request&subjectId={}",
            server.base_url, request.id
        ))
        .bearer_auth(h.token_for(&h.admin))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(data(&body)[0]["transition"], "request_created");

    let res = client
        .get(format!("{}/api/elevation-audit", server.base_url))
        .bearer_auth(h.token_for(&h.user))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(format!("{}/api/elevation-audit?subjectType=request", server.base_url))
        .bearer_auth(h.token_for(&h.admin))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn whoami_and_sign_out_hook() -> Result<()> {
    let h = Harness::new();
    let server = spawn_server(&h).await?;
    let client = reqwest::Client::new();
    let user = h.token_for(&h.user);

    let res = client
        .get(format!("{}/api/auth/whoami", server.base_url))
        .bearer_auth(h.token_for(&h.admin))
        .send()
        .await?;
    let body: Value = res.json().await?;
    assert_eq!(data(&body)["operator"], true);
    assert_eq!(data(&body)["email"], "ops@example.com");

    let request = h.broker.create_request(&h.admin, "user@example.com", None).await?;
    h.broker
        .decide(&h.user, request.id, support_access_broker::types::Decision::Approve)
        .await?;

    let res = client
        .delete(format!("{}/api/auth/session", server.base_url))
        .bearer_auth(&user)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(data(&body)["sessionsEnded"], 1);
    Ok(())
}

#[tokio::test]
async fn state_stream_pushes_snapshot_on_connect() -> Result<()> {
    let h = Harness::new();
    let server = spawn_server(&h).await?;
    let client = reqwest::Client::new();
    h.broker.create_request(&h.admin, "user@example.com", None).await?;

    let mut res = client
        .get(format!("{}/api/elevation-state/stream", server.base_url))
        .bearer_auth(h.token_for(&h.user))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let content_type = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), res.chunk())
        .await??
        .unwrap_or_default();
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: state"));
    assert!(text.contains("pendingRequestForMe"));
    Ok(())
}
