//! Adapter from an upgraded axum WebSocket to the framer's byte sink/stream.
//!
//! Only binary messages carry frames. Text, ping and pong messages are
//! skipped; a close message ends the stream as a graceful close.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::error::Error as StdError;
use tokio_tungstenite::tungstenite::Error as WsError;
use wterm_core::{WtermError, WtermResult};

/// Split a WebSocket into a frame sink and a frame stream.
pub fn split_socket(
    socket: WebSocket,
) -> (
    impl Sink<Vec<u8>, Error = WtermError> + Send + Unpin + 'static,
    impl Stream<Item = WtermResult<Vec<u8>>> + Send + Unpin + 'static,
) {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(ws_error)
        .with(|bytes: Vec<u8>| future::ready(Ok::<_, WtermError>(Message::Binary(bytes))));

    let stream = stream.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Binary(bytes)) => Some(Ok(bytes)),
            Ok(Message::Close(_)) => Some(Err(WtermError::ConnectionClosed)),
            Ok(_) => None,
            Err(e) => Some(Err(ws_error(e))),
        })
    });

    (sink, Box::pin(stream))
}

/// Map a WebSocket error, keeping resets and already-closed sockets
/// recognizable as graceful closes.
fn ws_error(e: axum::Error) -> WtermError {
    let mut source: Option<&(dyn StdError + 'static)> = Some(&e as &(dyn StdError + 'static));
    while let Some(err) = source {
        if let Some(ws) = err.downcast_ref::<WsError>() {
            match ws {
                WsError::ConnectionClosed | WsError::AlreadyClosed => {
                    return WtermError::ConnectionClosed;
                }
                WsError::Io(io) => return io_error(io),
                _ => {}
            }
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return io_error(io);
        }
        source = err.source();
    }
    WtermError::Transport(format!("websocket: {e}"))
}

fn io_error(io: &std::io::Error) -> WtermError {
    WtermError::Io(std::io::Error::new(io.kind(), io.to_string()))
}
