//! Connection drivers.
//!
//! One driver per connection owns the framed transport and multiplexes
//! calls over it by request id. The server driver spawns one task per
//! accepted call (the interceptor chain runs inside that task) and routes
//! stream frames to their sessions; the client driver keeps registries of
//! pending replies and open streams. Everything either side wants to put on
//! the wire funnels through a single unbounded event queue, so no handler
//! or session can deadlock the read path.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use tint_session::{CallContext, CallKind, CancelFlag, Dispatcher, Inbound, Outbound, SessionState, StreamSession};
use tint_wire::{decode_reply, encode_reply_err, Message, Metadata, Status};

use crate::framing::LengthPrefixedFramed;
use crate::handshake::ConnectionError;

/// Inbound buffer for one stream call on the client side.
pub(crate) const CLIENT_STREAM_BUFFER: usize = 64;

fn transport_status(e: &std::io::Error) -> Status {
    Status::cancelled(format!("transport error: {e}"))
}

fn closed_status() -> Status {
    Status::cancelled("connection closed")
}

// ============================================================================
// Server side
// ============================================================================

enum ServerEvent {
    /// Put a message on the wire.
    Outgoing(Message),
    /// A call task finished; answer it and forget it.
    CallDone {
        request_id: u64,
        result: Result<Vec<u8>, Status>,
    },
}

struct SessionEntry {
    inbound: mpsc::Sender<Inbound>,
    state: SessionState,
}

/// Server end of one accepted connection.
pub struct ServerConnection<S> {
    io: LengthPrefixedFramed<S>,
    dispatcher: Arc<Dispatcher>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    in_flight: HashMap<u64, CancelFlag>,
    sessions: HashMap<u64, SessionEntry>,
}

impl<S> ServerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: LengthPrefixedFramed<S>, dispatcher: Arc<Dispatcher>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            io,
            dispatcher,
            events_tx,
            events_rx,
            in_flight: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    /// Drive the connection until the peer goes away or the transport fails.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let result = self.drive().await;
        let status = match &result {
            Ok(()) => closed_status(),
            Err(ConnectionError::Io(e)) => transport_status(e),
            Err(e) => Status::cancelled(format!("connection error: {e}")),
        };
        // Fail both directions of every open session; their loops observe
        // the close state and stop without further wire traffic.
        for (_, entry) in self.sessions.drain() {
            entry.state.close(Some(status.clone()));
        }
        for (_, cancel) in self.in_flight.drain() {
            cancel.cancel();
        }
        result
    }

    async fn drive(&mut self) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    // The driver holds a sender, so the queue never closes.
                    let event = event.expect("event queue closed");
                    self.handle_event(event).await?;
                }
                frame = self.io.recv() => match frame {
                    Ok(Some(msg)) => {
                        if self.handle_message(msg).await? {
                            return Ok(());
                        }
                    }
                    Ok(None) => return Ok(()),
                    Err(e) => return Err(ConnectionError::Io(e)),
                },
            }
        }
    }

    async fn handle_event(&mut self, event: ServerEvent) -> Result<(), ConnectionError> {
        match event {
            ServerEvent::Outgoing(msg) => self.io.send(&msg).await?,
            ServerEvent::CallDone { request_id, result } => {
                self.in_flight.remove(&request_id);
                self.sessions.remove(&request_id);
                let payload = match result {
                    Ok(bytes) => bytes,
                    Err(status) => encode_reply_err(&status)
                        .map_err(|e| ConnectionError::Dispatch(format!("encode reply: {e}")))?,
                };
                self.io
                    .send(&Message::Response {
                        request_id,
                        metadata: Metadata::new(),
                        payload,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Handle one inbound message. Returns `true` on clean teardown.
    async fn handle_message(&mut self, msg: Message) -> Result<bool, ConnectionError> {
        match msg {
            Message::Request {
                request_id,
                method_id,
                metadata,
                payload,
            } => self.handle_request(request_id, method_id, metadata, payload).await?,
            Message::Data { request_id, payload } => {
                // A session that already ended may still see late frames from
                // the peer; they are dropped, not a connection error.
                match self.sessions.get(&request_id) {
                    Some(entry) => {
                        let _ = entry.inbound.send(Inbound::Element(payload)).await;
                    }
                    None => debug!(request_id, "data for unknown call, dropping"),
                }
            }
            Message::CloseSend { request_id } => match self.sessions.get(&request_id) {
                Some(entry) => {
                    let _ = entry.inbound.send(Inbound::End).await;
                }
                None => debug!(request_id, "close-send for unknown call, dropping"),
            },
            Message::Cancel { request_id } => {
                if let Some(cancel) = self.in_flight.get(&request_id) {
                    cancel.cancel();
                }
            }
            Message::Goodbye { reason } => {
                info!(%reason, "peer said goodbye");
                return Ok(true);
            }
            Message::Hello { .. } | Message::HelloYourself { .. } => {
                debug!("duplicate handshake message after exchange, ignoring");
            }
            Message::Response { .. } => {
                debug!("unexpected Response on server connection, ignoring");
            }
        }
        Ok(false)
    }

    async fn handle_request(
        &mut self,
        request_id: u64,
        method_id: u64,
        metadata: Metadata,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError> {
        if self.in_flight.contains_key(&request_id) {
            let _ = self
                .io
                .send(&Message::Goodbye {
                    reason: "duplicate in-flight request id".into(),
                })
                .await;
            return Err(ConnectionError::ProtocolViolation {
                reason: "duplicate in-flight request id",
                context: format!("request_id {request_id}"),
            });
        }

        let Some(method) = self.dispatcher.method(method_id) else {
            warn!(request_id, method_id, "request for unknown method");
            let payload = encode_reply_err(&Status::invalid_argument("unknown method"))
                .map_err(|e| ConnectionError::Dispatch(format!("encode reply: {e}")))?;
            self.io
                .send(&Message::Response {
                    request_id,
                    metadata: Metadata::new(),
                    payload,
                })
                .await?;
            return Ok(());
        };

        let ctx = CallContext::new(method, request_id, metadata);
        self.in_flight.insert(request_id, ctx.cancel_flag().clone());
        let events = self.events_tx.clone();
        let dispatcher = self.dispatcher.clone();

        match method.kind {
            CallKind::Unary => {
                tokio::spawn(async move {
                    let result = dispatcher.dispatch_unary(ctx, payload).await;
                    let _ = events.send(ServerEvent::CallDone { request_id, result });
                });
            }
            CallKind::BidiStream => {
                let (inbound_tx, inbound_rx) = mpsc::channel(1);
                let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(1);
                let state = SessionState::new();
                self.sessions.insert(
                    request_id,
                    SessionEntry {
                        inbound: inbound_tx,
                        state: state.clone(),
                    },
                );

                // Forward session output onto the wire queue in order.
                let forward_events = self.events_tx.clone();
                tokio::spawn(async move {
                    while let Some(out) = outbound_rx.recv().await {
                        let msg = match out {
                            Outbound::Element(payload) => Message::Data { request_id, payload },
                            Outbound::End => Message::CloseSend { request_id },
                        };
                        if forward_events.send(ServerEvent::Outgoing(msg)).is_err() {
                            break;
                        }
                    }
                });

                let session = StreamSession::new(request_id, inbound_rx, outbound_tx, state);
                tokio::spawn(async move {
                    let result = dispatcher.dispatch_stream(ctx, session).await;
                    let _ = events.send(ServerEvent::CallDone { request_id, result });
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Client side
// ============================================================================

pub(crate) enum ClientEvent {
    Unary {
        request_id: u64,
        method_id: u64,
        metadata: Metadata,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<u8>, Status>>,
    },
    OpenStream {
        request_id: u64,
        method_id: u64,
        metadata: Metadata,
        inbound: mpsc::Sender<Inbound>,
        done: oneshot::Sender<Result<(), Status>>,
    },
    StreamData {
        request_id: u64,
        payload: Vec<u8>,
    },
    StreamCloseSend {
        request_id: u64,
    },
    Cancel {
        request_id: u64,
    },
}

struct ClientStreamEntry {
    inbound: mpsc::Sender<Inbound>,
    done: oneshot::Sender<Result<(), Status>>,
}

/// Client end of one connection; owned by the driver task spawned in
/// [`crate::client::connect`].
pub(crate) struct ClientDriver<S> {
    io: LengthPrefixedFramed<S>,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    pending: HashMap<u64, oneshot::Sender<Result<Vec<u8>, Status>>>,
    streams: HashMap<u64, ClientStreamEntry>,
}

impl<S> ClientDriver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        io: LengthPrefixedFramed<S>,
        events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    ) -> Self {
        Self {
            io,
            events_rx,
            pending: HashMap::new(),
            streams: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), ConnectionError> {
        let result = self.drive().await;
        let status = match &result {
            Ok(()) => closed_status(),
            Err(ConnectionError::Io(e)) => transport_status(e),
            Err(e) => Status::cancelled(format!("connection error: {e}")),
        };
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(status.clone()));
        }
        for (_, entry) in self.streams.drain() {
            // Dropping the inbound sender ends recv() after the buffered
            // elements; the final outcome travels via `done`.
            let _ = entry.inbound.try_send(Inbound::Error(status.clone()));
            let _ = entry.done.send(Err(status.clone()));
        }
        result
    }

    async fn drive(&mut self) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    // Every user handle is gone; leave politely.
                    None => {
                        let _ = self.io.send(&Message::Goodbye { reason: "client done".into() }).await;
                        return Ok(());
                    }
                    Some(event) => self.handle_event(event).await?,
                },
                frame = self.io.recv() => match frame {
                    Ok(Some(msg)) => {
                        if self.handle_message(msg).await? {
                            return Ok(());
                        }
                    }
                    Ok(None) => return Ok(()),
                    Err(e) => return Err(ConnectionError::Io(e)),
                },
            }
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) -> Result<(), ConnectionError> {
        match event {
            ClientEvent::Unary {
                request_id,
                method_id,
                metadata,
                payload,
                reply,
            } => {
                self.pending.insert(request_id, reply);
                self.io
                    .send(&Message::Request {
                        request_id,
                        method_id,
                        metadata,
                        payload,
                    })
                    .await?;
            }
            ClientEvent::OpenStream {
                request_id,
                method_id,
                metadata,
                inbound,
                done,
            } => {
                self.streams
                    .insert(request_id, ClientStreamEntry { inbound, done });
                self.io
                    .send(&Message::Request {
                        request_id,
                        method_id,
                        metadata,
                        payload: Vec::new(),
                    })
                    .await?;
            }
            ClientEvent::StreamData {
                request_id,
                payload,
            } => {
                self.io.send(&Message::Data { request_id, payload }).await?;
            }
            ClientEvent::StreamCloseSend { request_id } => {
                self.io.send(&Message::CloseSend { request_id }).await?;
            }
            ClientEvent::Cancel { request_id } => {
                self.io.send(&Message::Cancel { request_id }).await?;
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, msg: Message) -> Result<bool, ConnectionError> {
        match msg {
            Message::Response {
                request_id,
                payload,
                ..
            } => {
                if let Some(reply) = self.pending.remove(&request_id) {
                    let _ = reply.send(Ok(payload));
                } else if let Some(entry) = self.streams.remove(&request_id) {
                    let outcome = decode_reply::<()>(&payload);
                    // The server's CloseSend and Response travel through
                    // different tasks and may arrive in either order; deliver
                    // the terminal stream event here so recv() always sees a
                    // clean end or the aborting status. Sent off the driver
                    // task: delivery must not stall the read loop.
                    let terminal = match &outcome {
                        Ok(()) => Inbound::End,
                        Err(status) => Inbound::Error(status.clone()),
                    };
                    let inbound = entry.inbound.clone();
                    tokio::spawn(async move {
                        let _ = inbound.send(terminal).await;
                    });
                    let _ = entry.done.send(outcome);
                } else {
                    debug!(request_id, "response for unknown call, dropping");
                }
            }
            Message::Data {
                request_id,
                payload,
            } => match self.streams.get(&request_id) {
                Some(entry) => {
                    let _ = entry.inbound.send(Inbound::Element(payload)).await;
                }
                None => debug!(request_id, "data for unknown call, dropping"),
            },
            Message::CloseSend { request_id } => match self.streams.get(&request_id) {
                Some(entry) => {
                    let _ = entry.inbound.send(Inbound::End).await;
                }
                None => debug!(request_id, "close-send for unknown call, dropping"),
            },
            Message::Goodbye { reason } => {
                info!(%reason, "peer said goodbye");
                return Ok(true);
            }
            Message::Hello { .. } | Message::HelloYourself { .. } => {
                debug!("duplicate handshake message after exchange, ignoring");
            }
            Message::Request { .. } | Message::Cancel { .. } => {
                debug!("unexpected caller-side message on client connection, ignoring");
            }
        }
        Ok(false)
    }
}
