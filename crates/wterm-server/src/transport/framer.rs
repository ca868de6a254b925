//! Frame reader/writer for one connection.
//!
//! All outbound frames go through a single writer task so concurrent
//! producers (shell relays, FS replies, auth questions) never interleave.
//! A dedicated reader task decodes inbound frames in arrival order and hands
//! them to the dispatcher. Both sides share a [`CloseSignal`].

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wterm_core::{ClientMessage, Frame, ServerMessage, WtermError, WtermResult};

/// Bound on frames queued between the socket and the dispatcher.
const INBOUND_CAPACITY: usize = 64;
/// Bound on frames queued for the writer task.
const OUTBOUND_CAPACITY: usize = 64;

/// Idempotent "connection closed" flag that can be awaited.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Mark the connection closed. Returns `true` only for the call that
    /// performed the transition; later calls are no-ops.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Resolve once the connection is closed (immediately if it already is).
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// One decoded client frame.
#[derive(Debug)]
pub struct Inbound {
    pub session_id: u16,
    pub message: ClientMessage,
}

type Outbound = (Vec<u8>, oneshot::Sender<WtermResult<()>>);

/// Cloneable handle for sending frames through the writer task.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Outbound>,
    closed: CloseSignal,
}

impl FrameSender {
    /// Encode and send one message, waiting until it has been written.
    pub async fn send(&self, session_id: u16, msg: &ServerMessage) -> WtermResult<()> {
        let bytes = msg.encode(session_id)?.encode();
        self.send_raw(bytes).await
    }

    async fn send_raw(&self, bytes: Vec<u8>) -> WtermResult<()> {
        if self.closed.is_closed() {
            return Err(WtermError::ConnectionClosed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((bytes, ack_tx))
            .await
            .map_err(|_| WtermError::ConnectionClosed)?;
        ack_rx.await.map_err(|_| WtermError::ConnectionClosed)?
    }

    pub fn close_signal(&self) -> &CloseSignal {
        &self.closed
    }
}

/// Reader and writer task handles, released at connection teardown.
#[derive(Debug)]
pub struct FramerTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    closed: CloseSignal,
}

impl FramerTasks {
    /// Close the connection (if not already), stop the reader and wait for
    /// the writer to flush its queue and close the socket.
    pub async fn release(self) {
        self.closed.close();
        self.reader.abort();
        if let Err(e) = self.writer.await {
            warn!(error = %e, "writer task failed");
        }
    }
}

/// Start the reader and writer tasks over a message-oriented socket.
///
/// `sink` receives whole encoded frames; `stream` yields whole inbound
/// messages, ending (or yielding a closed error) when the peer goes away.
pub fn spawn<Si, St>(sink: Si, stream: St) -> (FrameSender, mpsc::Receiver<Inbound>, FramerTasks)
where
    Si: Sink<Vec<u8>, Error = WtermError> + Send + Unpin + 'static,
    St: Stream<Item = WtermResult<Vec<u8>>> + Send + Unpin + 'static,
{
    let closed = CloseSignal::new();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);

    let writer = tokio::spawn(write_loop(sink, out_rx, closed.clone()));
    let reader = tokio::spawn(read_loop(stream, in_tx, closed.clone()));

    let sender = FrameSender {
        tx: out_tx,
        closed: closed.clone(),
    };
    let tasks = FramerTasks {
        reader,
        writer,
        closed,
    };
    (sender, in_rx, tasks)
}

async fn write_loop<Si>(mut sink: Si, mut rx: mpsc::Receiver<Outbound>, closed: CloseSignal)
where
    Si: Sink<Vec<u8>, Error = WtermError> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            item = rx.recv() => {
                let Some((bytes, ack)) = item else { break };
                let result = if closed.is_closed() {
                    Err(WtermError::ConnectionClosed)
                } else {
                    match sink.send(bytes).await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            if e.is_connection_closed() && closed.close() {
                                debug!("peer closed during write");
                            }
                            Err(e)
                        }
                    }
                };
                let _ = ack.send(result);
            }
            _ = closed.closed() => break,
        }
    }

    // Fail anyone still queued, then close the socket.
    rx.close();
    while let Ok((_, ack)) = rx.try_recv() {
        let _ = ack.send(Err(WtermError::ConnectionClosed));
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "socket close failed");
    }
}

async fn read_loop<St>(mut stream: St, tx: mpsc::Sender<Inbound>, closed: CloseSignal)
where
    St: Stream<Item = WtermResult<Vec<u8>>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.closed() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(bytes)) => {
                let frame = match Frame::decode(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed frame");
                        continue;
                    }
                };
                match ClientMessage::decode(&frame) {
                    Ok(Some(message)) => {
                        let inbound = Inbound {
                            session_id: frame.session_id,
                            message,
                        };
                        if tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(opcode = frame.opcode, "ignoring frame with unhandled opcode");
                    }
                    Err(e) => {
                        warn!(
                            opcode = frame.opcode,
                            session_id = frame.session_id,
                            error = %e,
                            "dropping undecodable frame"
                        );
                    }
                }
            }
            Some(Err(e)) if e.is_connection_closed() => {
                debug!("peer closed the socket");
                break;
            }
            Some(Err(e)) => {
                if !closed.is_closed() {
                    warn!(error = %e, "socket read failed");
                }
                break;
            }
            None => {
                debug!("socket stream ended");
                break;
            }
        }
    }
    closed.close();
}
