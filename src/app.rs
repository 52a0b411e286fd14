use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::broker::Broker;
use crate::config::AppConfig;
use crate::directory::AccountDirectory;
use crate::handlers::{protected, public};
use crate::middleware::jwt_auth_middleware;

/// Shared handler state. Cloned per request; everything inside is shared.
#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub directory: Arc<dyn AccountDirectory>,
    pub jwt_secret: Arc<str>,
    /// How often the state stream re-pushes a snapshot without any event.
    pub state_refresh: Duration,
}

impl AppState {
    pub fn new(broker: Broker, directory: Arc<dyn AccountDirectory>, jwt_secret: &str) -> Self {
        let state_refresh = broker.config().state_refresh();
        Self {
            broker,
            directory,
            jwt_secret: Arc::from(jwt_secret),
            state_refresh,
        }
    }
}

/// Routes without the outer HTTP layers (CORS, request tracing).
pub fn router(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        // Protected API
        .merge(protected_routes(state.clone()))
        .with_state(state)
}

/// Full application router as served by the binary.
pub fn app(state: AppState, config: &AppConfig) -> Router {
    let mut app = router(state);
    if config.security.enable_cors {
        app = app.layer(cors_layer(&config.security.cors_origins));
    }
    if config.server.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    app
}

fn protected_routes(state: AppState) -> Router<AppState> {
    use protected::{auth, elevation};

    Router::new()
        .route("/api/elevation-requests", post(elevation::requests::create))
        .route("/api/elevation-requests/:id", get(elevation::requests::get))
        .route("/api/elevation-requests/:id/approve", post(elevation::requests::approve))
        .route("/api/elevation-requests/:id/reject", post(elevation::requests::reject))
        .route("/api/elevation-sessions/:id", get(elevation::sessions::get))
        .route("/api/elevation-sessions/:id/end", post(elevation::sessions::end))
        .route("/api/elevation-state", get(elevation::state::get))
        .route("/api/elevation-state/stream", get(elevation::state::stream))
        .route("/api/elevation-audit", get(elevation::audit::list))
        .route("/api/auth/whoami", get(auth::session_whoami))
        .route("/api/auth/session", delete(auth::session_logout))
        .route_layer(from_fn_with_state(state, jwt_auth_middleware))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    CorsLayer::permissive().allow_origin(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::clock::SystemClock;
    use crate::config::ElevationConfig;
    use crate::directory::StaticDirectory;
    use crate::notify::StateHub;
    use crate::store::MemoryStore;

    fn state() -> AppState {
        let directory = Arc::new(StaticDirectory::new());
        let broker = Broker::new(
            Arc::new(MemoryStore::new()),
            directory.clone(),
            Arc::new(SystemClock),
            StateHub::default(),
            ElevationConfig::default(),
        );
        AppState::new(broker, directory, "unit-secret")
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn elevation_routes_need_a_bearer_token() {
        let response = router(state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/elevation-requests")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
