//! `GET /feed/ws`: pushes the whole ordered deal list on connect and again
//! after every applied snapshot.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::routes::ApiState;
use crate::feed::{FeedState, FeedStatus};
use crate::types::Deal;

/// One frame per republished feed state. Always carries the full list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedFrame {
    pub revision: u64,
    pub status: FeedStatus,
    pub deals: Vec<Deal>,
}

impl From<&FeedState> for FeedFrame {
    fn from(state: &FeedState) -> Self {
        Self {
            revision: state.revision,
            status: state.status.clone(),
            deals: state.deals.to_vec(),
        }
    }
}

pub async fn feed_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    let view = state.feed.view();
    ws.on_upgrade(move |socket| stream_feed(socket, view))
}

async fn stream_feed(socket: WebSocket, mut view: watch::Receiver<FeedState>) {
    let (mut sink, mut stream) = socket.split();
    debug!("Feed socket opened");

    // Current state first, then one frame per change.
    let mut frame = encode(&view.borrow_and_update());
    loop {
        if let Some(text) = frame.take() {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }

        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                frame = encode(&view.borrow_and_update());
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("Feed socket read error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Feed socket closed");
}

fn encode(state: &FeedState) -> Option<String> {
    match serde_json::to_string(&FeedFrame::from(state)) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Feed frame encode failed: {e}");
            None
        }
    }
}
