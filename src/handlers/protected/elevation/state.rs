use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::app::AppState;
use crate::broker::{Broker, Caller};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::notify::{ElevationEvent, ElevationState};

/// GET /api/elevation-state - Snapshot for the caller
pub async fn get(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<ElevationState> {
    let snapshot = state.broker.state_for(&user.caller()).await?;
    Ok(ApiResponse::success(snapshot))
}

/// GET /api/elevation-state/stream - Server-sent `state` events
///
/// A snapshot is pushed on connect, whenever a lifecycle event touches the
/// caller, and on a fixed refresh so countdowns stay server-computed.
pub async fn stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let period = state.state_refresh;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let feed = Feed {
        events: state.broker.hub().subscribe(),
        broker: state.broker.clone(),
        caller: user.caller(),
        ticker,
        primed: false,
    };
    tracing::debug!("{} subscribed to elevation state", user.email);

    Sse::new(stream::unfold(feed, next_snapshot)).keep_alive(KeepAlive::default())
}

struct Feed {
    broker: Broker,
    caller: Caller,
    events: Receiver<ElevationEvent>,
    ticker: Interval,
    primed: bool,
}

async fn next_snapshot(mut feed: Feed) -> Option<(Result<Event, Infallible>, Feed)> {
    if feed.primed {
        loop {
            tokio::select! {
                received = feed.events.recv() => match received {
                    Ok(event) if event.involves(feed.caller.account_id) => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!("State stream for {} lagged by {} event(s)", feed.caller.email, missed);
                        break;
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = feed.ticker.tick() => break,
            }
        }
    }
    feed.primed = true;

    let event = match feed.broker.state_for(&feed.caller).await {
        Ok(snapshot) => Event::default()
            .event("state")
            .json_data(&snapshot)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
        Err(e) => {
            tracing::warn!("State snapshot for {} failed: {}", feed.caller.email, e);
            Event::default().event("error").data(e.to_string())
        }
    };
    Some((Ok(event), feed))
}
