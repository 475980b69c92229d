use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

use tint_wire::{Metadata, MetadataValue, KEY_TIMEOUT_MS};

use crate::dispatch::MethodDescriptor;

/// What shape of exchange a method is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    BidiStream,
}

/// Verified-identity facts attached to a call by the authentication
/// interceptor. A call that reaches its handler either carries one of these
/// or the dispatcher had no authenticator installed.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The bearer token that passed verification, prefix stripped.
    pub token: String,
}

/// Single-assignment cancellation signal, observable by any number of
/// concurrent waiters. `cancel` is idempotent.
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set. Safe against the signal firing between
    /// the check and the wait.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

struct CallInner {
    method: &'static MethodDescriptor,
    request_id: u64,
    metadata: Metadata,
    deadline: Option<Instant>,
    cancel: CancelFlag,
    auth: OnceLock<AuthContext>,
}

/// Context for one logical call, shared between the connection driver, the
/// interceptor chain, and the handler. Cloning is cheap.
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<CallInner>,
}

impl CallContext {
    /// Build a context for an accepted call. A `timeout-ms` metadata entry,
    /// if present, becomes an absolute deadline measured from now.
    pub fn new(method: &'static MethodDescriptor, request_id: u64, metadata: Metadata) -> Self {
        let deadline = metadata
            .get(KEY_TIMEOUT_MS)
            .and_then(MetadataValue::as_u64)
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        Self {
            inner: Arc::new(CallInner {
                method,
                request_id,
                metadata,
                deadline,
                cancel: CancelFlag::new(),
                auth: OnceLock::new(),
            }),
        }
    }

    pub fn method(&self) -> &'static MethodDescriptor {
        self.inner.method
    }

    pub fn kind(&self) -> CallKind {
        self.inner.method.kind
    }

    /// Correlation identifier for logging; the wire request id.
    pub fn request_id(&self) -> u64 {
        self.inner.request_id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.inner.cancel
    }

    /// Attach verified identity. The first writer wins; later attempts are
    /// ignored and reported as `false`.
    pub fn authenticate(&self, auth: AuthContext) -> bool {
        self.inner.auth.set(auth).is_ok()
    }

    pub fn auth(&self) -> Option<&AuthContext> {
        self.inner.auth.get()
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("method", &self.inner.method.path())
            .field("request_id", &self.inner.request_id)
            .field("deadline", &self.inner.deadline)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}
