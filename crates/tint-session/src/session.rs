//! Bidirectional stream sessions.
//!
//! A [`StreamSession`] owns exactly one call's bidirectional exchange. Two
//! loops run concurrently: the receive loop pulls inbound frames from the
//! connection driver, and the process-and-send loop applies the per-element
//! transform and pushes results outbound. The loops share nothing but the
//! [`SessionState`], whose close transition is single-writer and idempotent.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, OnceLock};

use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use tint_wire::Status;

/// Frame delivered to a session by the connection driver.
#[derive(Debug)]
pub enum Inbound {
    /// One encoded stream element.
    Element(Vec<u8>),
    /// The peer closed its sending direction; no more elements will arrive.
    End,
    /// The transport failed; both directions are dead.
    Error(Status),
}

/// Frame emitted by a session for the connection driver to put on the wire.
#[derive(Debug)]
pub enum Outbound {
    Element(Vec<u8>),
    End,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionPhase {
    /// Accepted, loops not yet running.
    Open = 0,
    /// Both loops running.
    Active = 1,
    /// One direction has signalled end-of-stream.
    Closing = 2,
    /// Both directions terminated.
    Closed = 3,
}

impl SessionPhase {
    fn from_u8(v: u8) -> SessionPhase {
        match v {
            0 => SessionPhase::Open,
            1 => SessionPhase::Active,
            2 => SessionPhase::Closing,
            _ => SessionPhase::Closed,
        }
    }
}

struct StateInner {
    phase: AtomicU8,
    error: OnceLock<Status>,
    closed: Notify,
}

/// Shared close-state of one session. Transitions are monotonic; the first
/// error recorded wins.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<StateInner>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                phase: AtomicU8::new(SessionPhase::Open as u8),
                error: OnceLock::new(),
                closed: Notify::new(),
            }),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.inner.phase.load(Ordering::SeqCst))
    }

    fn advance(&self, to: SessionPhase) {
        self.inner.phase.fetch_max(to as u8, Ordering::SeqCst);
    }

    pub(crate) fn activate(&self) {
        self.advance(SessionPhase::Active);
    }

    /// One direction finished cleanly; the session is draining.
    pub fn begin_close(&self) {
        self.advance(SessionPhase::Closing);
    }

    /// Terminate the session. Idempotent; only the first recorded error is
    /// kept. Wakes everything waiting on [`SessionState::closed`].
    pub fn close(&self, error: Option<Status>) {
        if let Some(status) = error {
            let _ = self.inner.error.set(status);
        }
        self.advance(SessionPhase::Closed);
        self.inner.closed.notify_waiters();
    }

    /// The error that terminated the session, if any.
    pub fn error(&self) -> Option<Status> {
        self.inner.error.get().cloned()
    }

    /// Resolves once the session reaches `Closed`.
    pub async fn closed(&self) {
        while self.phase() != SessionPhase::Closed {
            let notified = self.inner.closed.notified();
            if self.phase() == SessionPhase::Closed {
                return;
            }
            notified.await;
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-side container for one bidirectional exchange.
pub struct StreamSession {
    request_id: u64,
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<Outbound>,
    state: SessionState,
}

impl StreamSession {
    pub fn new(
        request_id: u64,
        inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::Sender<Outbound>,
        state: SessionState,
    ) -> Self {
        Self {
            request_id,
            inbound,
            outbound,
            state,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the session as a per-element transform pipeline.
    ///
    /// Elements come out in arrival order; the hop between the two loops
    /// holds at most one in-flight element. A clean peer close drains the
    /// pipeline and succeeds; any error (transport, undecodable element)
    /// aborts the whole session; there is no per-element recovery.
    pub async fn transform<T, F>(self, apply: F) -> Result<(), Status>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(T) -> T + Send + 'static,
    {
        let StreamSession {
            request_id,
            mut inbound,
            outbound,
            state,
        } = self;
        state.activate();

        let (hop_tx, mut hop_rx) = mpsc::channel::<Vec<u8>>(1);

        // Receive loop: forward elements until end-of-input, failure, or the
        // session closing underneath it.
        let recv_state = state.clone();
        let receiver = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = inbound.recv() => match frame {
                        Some(Inbound::Element(bytes)) => {
                            if hop_tx.send(bytes).await.is_err() {
                                // Transform side is gone; it owns the outcome.
                                break;
                            }
                        }
                        Some(Inbound::End) => {
                            recv_state.begin_close();
                            break;
                        }
                        Some(Inbound::Error(status)) => {
                            recv_state.close(Some(status));
                            break;
                        }
                        None => {
                            recv_state.close(Some(Status::cancelled("transport closed")));
                            break;
                        }
                    },
                    () = recv_state.closed() => break,
                }
            }
        });

        // Process-and-send loop, on this task.
        let outcome = loop {
            match hop_rx.recv().await {
                Some(bytes) => {
                    let element: T = match postcard::from_bytes(&bytes) {
                        Ok(v) => v,
                        Err(e) => {
                            break Err(Status::invalid_argument(format!(
                                "malformed stream element: {e}"
                            )));
                        }
                    };
                    let transformed = apply(element);
                    let bytes = match postcard::to_allocvec(&transformed) {
                        Ok(b) => b,
                        Err(e) => {
                            break Err(Status::internal(format!("encode stream element: {e}")));
                        }
                    };
                    if outbound.send(Outbound::Element(bytes)).await.is_err() {
                        break Err(Status::cancelled("transport closed"));
                    }
                }
                None => {
                    // Receive loop finished: clean end or recorded error.
                    break match state.error() {
                        Some(status) => Err(status),
                        None => Ok(()),
                    };
                }
            }
        };

        if outcome.is_ok() {
            let _ = outbound.send(Outbound::End).await;
        }
        // Close the shared state before joining: the receive loop observes it
        // and unblocks, whatever it was waiting on.
        state.close(outcome.clone().err());
        drop(hop_rx);
        let _ = receiver.await;
        debug!(request_id, ok = outcome.is_ok(), "stream session closed");
        outcome
    }
}
