#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use support_access_broker::app::{self, AppState};
use support_access_broker::auth::{generate_jwt, Claims};
use support_access_broker::broker::{Broker, Caller};
use support_access_broker::clock::ManualClock;
use support_access_broker::config::ElevationConfig;
use support_access_broker::directory::{AccountRole, StaticDirectory};
use support_access_broker::notify::StateHub;
use support_access_broker::store::MemoryStore;

pub const JWT_SECRET: &str = "test-secret";

/// In-process broker over the memory store, a static directory and a
/// hand-driven clock. Starts with one operator and one member.
pub struct Harness {
    pub broker: Broker,
    pub store: Arc<MemoryStore>,
    pub directory: Arc<StaticDirectory>,
    pub clock: ManualClock,
    pub start: DateTime<Utc>,
    pub admin: Caller,
    pub user: Caller,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ElevationConfig) -> Self {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().unwrap_or_else(Utc::now);
        let clock = ManualClock::new(start);
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(StaticDirectory::new());

        let admin_id = directory.add("ops@example.com", AccountRole::Operator);
        let user_id = directory.add("user@example.com", AccountRole::Member);

        let broker = Broker::new(
            store.clone(),
            directory.clone(),
            Arc::new(clock.clone()),
            StateHub::default(),
            config,
        );

        Self {
            broker,
            store,
            directory,
            clock,
            start,
            admin: Caller::new(admin_id, "ops@example.com"),
            user: Caller::new(user_id, "user@example.com"),
        }
    }

    pub fn add_operator(&self, email: &str) -> Caller {
        Caller::new(self.directory.add(email, AccountRole::Operator), email)
    }

    pub fn add_member(&self, email: &str) -> Caller {
        Caller::new(self.directory.add(email, AccountRole::Member), email)
    }

    /// Move the broker's clock only (timers are not touched).
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn token_for(&self, caller: &Caller) -> String {
        generate_jwt(&Claims::new(caller.account_id, caller.email.clone(), 1), JWT_SECRET)
            .unwrap_or_else(|e| panic!("failed to mint token: {}", e))
    }
}

pub fn test_config() -> ElevationConfig {
    ElevationConfig {
        store_retry_backoff_ms: 1,
        ..ElevationConfig::default()
    }
}

/// Move both the tokio clock (timers) and the broker clock, then let
/// woken timer tasks run.
pub async fn advance_both(harness: &Harness, by: Duration) {
    harness.clock.advance(by);
    tokio::time::advance(by.to_std().unwrap_or_default()).await;
    settle().await;
}

/// Give spawned tasks a chance to run (and register their sleeps).
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Serve the broker's router on an ephemeral local port.
pub struct TestServer {
    pub base_url: String,
}

pub async fn spawn_server(harness: &Harness) -> Result<TestServer> {
    let state = AppState::new(harness.broker.clone(), harness.directory.clone(), JWT_SECRET);
    let router = app::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind test listener")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            eprintln!("test server stopped: {}", e);
        }
    });

    Ok(TestServer { base_url: format!("http://{}", addr) })
}

/// `data` out of a success envelope.
pub fn data(body: &Value) -> &Value {
    &body["data"]
}
