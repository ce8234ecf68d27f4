//! WebSocket event stream.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;
use vigil_trace::EventFilter;

use crate::state::AppState;

/// Query parameters for the event stream.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only events of this run.
    pub run_id: Option<Uuid>,
}

/// Live trace events as JSON text frames.
pub async fn event_stream(
    ws: WebSocketUpgrade,
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Response {
    let filter = EventFilter {
        run_id: query.run_id,
        ..Default::default()
    };
    ws.on_upgrade(move |socket| handle_event_stream(socket, filter, state))
}

async fn handle_event_stream(mut socket: WebSocket, filter: EventFilter, state: AppState) {
    let mut subscription = state.engine.subscribe(filter).await;
    let hello = serde_json::json!({
        "type": "connected",
        "subscription": subscription.id,
        "runId": subscription.filter.run_id,
    });
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        state.engine.hub().unsubscribe(subscription.id).await;
        return;
    }

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        debug!("Skipping unserializable event: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    state.engine.hub().unsubscribe(subscription.id).await;
    debug!("Event stream {} closed", subscription.id);
}
