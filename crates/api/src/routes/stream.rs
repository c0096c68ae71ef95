//! Server-Sent Events push channel.
//!
//! On connect the caller gets a `connected` handshake, then every pending
//! notification (newest first), then live notifications as they are
//! dispatched. A second connection for the same identity takes over; the
//! older stream receives `superseded` and ends.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::RecordView;
use herald_engine::registry::{ConnectionRegistry, PushChannel, PushEvent};

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

/// Reconnect delay suggested to a superseded EventSource client.
const SUPERSEDED_RETRY: Duration = Duration::from_secs(60 * 60);

pub fn router() -> Router<AppState> {
    Router::new().route("/api/notifications/stream", get(notification_stream))
}

/// Removes the registry entry when the stream is dropped, unless a newer
/// connection already owns it.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    identity: String,
    channel: PushChannel,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.identity, &self.channel);
        tracing::info!(
            identity = %self.identity,
            connection_id = %self.channel.connection_id(),
            "Push channel closed"
        );
    }
}

/// Live half of a stream, read after the replay.
struct LiveFeed {
    receiver: mpsc::Receiver<PushEvent>,
    registration: Registration,
    /// Records already sent by the replay; their queued copies are skipped.
    replayed: HashSet<Uuid>,
}

impl LiveFeed {
    /// Next event to emit, or `None` once the channel is gone.
    async fn next_event(&mut self) -> Option<PushEvent> {
        loop {
            tokio::select! {
                biased;
                _ = self.registration.channel.superseded() => {
                    return Some(PushEvent::Superseded {
                        connection_id: self.registration.channel.connection_id(),
                    });
                }
                event = self.receiver.recv() => {
                    let event = event?;
                    if let PushEvent::Notification(view) = &event {
                        if self.replayed.remove(&view.id) {
                            continue;
                        }
                    }
                    return Some(event);
                }
            }
        }
    }
}

/// Render a push event as an SSE frame. The payload is the event's serde `data`.
fn to_sse(event: &PushEvent) -> Event {
    let frame = serde_json::to_value(event)
        .map(|mut value| {
            value
                .get_mut("data")
                .map(serde_json::Value::take)
                .unwrap_or_default()
        })
        .map_err(axum::Error::new)
        .and_then(|data| Event::default().event(event.name()).json_data(data));

    let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, event = event.name(), "Failed to encode push event");
            return Event::default().comment("encoding error");
        }
    };

    match event {
        PushEvent::Notification(view) => frame.id(view.id.to_string()),
        PushEvent::Superseded { .. } => frame.retry(SUPERSEDED_RETRY),
        PushEvent::Connected { .. } => frame,
    }
}

/// GET /api/notifications/stream — Open the caller's push channel.
async fn notification_stream(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let identity = auth.identity;
    let (channel, receiver) = PushChannel::with_capacity(state.config.push_queue_capacity);
    let connected = PushEvent::Connected {
        connection_id: channel.connection_id(),
        identity: identity.clone(),
        timestamp: Utc::now(),
    };

    if let Some(previous) = state.registry.register(&identity, channel.clone()) {
        tracing::info!(
            identity = %identity,
            connection_id = %previous.connection_id(),
            "Superseding previous push channel"
        );
        previous.supersede();
    }

    let registration = Registration {
        registry: state.registry.clone(),
        identity: identity.clone(),
        channel: channel.clone(),
    };

    // Registered first so nothing dispatched during this query is missed.
    // Whatever it queues meanwhile is emitted after the replay.
    let pending = state.store.list_pending(&identity).await?;
    let replayed: HashSet<Uuid> = pending.iter().map(|record| record.record_id).collect();

    tracing::info!(
        identity = %identity,
        connection_id = %channel.connection_id(),
        replayed = replayed.len(),
        "Push channel opened"
    );

    let backlog = std::iter::once(connected).chain(
        pending
            .into_iter()
            .map(|record| PushEvent::Notification(RecordView::from(record))),
    );

    let live = futures::stream::unfold(
        Some(LiveFeed {
            receiver,
            registration,
            replayed,
        }),
        |slot| async move {
            let mut feed = slot?;
            let event = feed.next_event().await?;
            // A superseded stream ends after telling the client why.
            let next = match event {
                PushEvent::Superseded { .. } => None,
                _ => Some(feed),
            };
            Some((event, next))
        },
    );

    let stream = futures::stream::iter(backlog)
        .chain(live)
        .map(|event| Ok::<_, Infallible>(to_sse(&event)))
        .take_until(state.shutdown.clone().cancelled_owned());

    let keep_alive =
        KeepAlive::new().interval(Duration::from_secs(state.config.sse_keepalive_secs.max(1)));
    Ok(Sse::new(stream).keep_alive(keep_alive))
}
