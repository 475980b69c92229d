//! Method descriptors and the closed dispatch table.
//!
//! Dispatch is a tagged table from method id to handler, built once at
//! startup and checked for completeness against the service descriptor:
//! every described method has exactly one handler of the right shape, and
//! no handler targets a method outside the descriptor.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use tint_wire::{encode_reply_ok, method_id, Status};

use crate::context::{CallContext, CallKind};
use crate::interceptor::{HandlerFn, InterceptFuture, Interceptor, InterceptorStack};
use crate::session::StreamSession;

/// Static descriptor for a single RPC method.
#[derive(Debug)]
pub struct MethodDescriptor {
    /// Hash of `"<service>/<method>"`; what goes on the wire.
    pub id: u64,
    pub service: &'static str,
    pub name: &'static str,
    pub kind: CallKind,
}

impl MethodDescriptor {
    pub const fn new(service: &'static str, name: &'static str, kind: CallKind) -> Self {
        Self {
            id: method_id(service, name),
            service,
            name,
            kind,
        }
    }

    /// `"<service>/<method>"`, for logs.
    pub fn path(&self) -> String {
        format!("{}/{}", self.service, self.name)
    }
}

/// Static descriptor for a service: its name and all of its methods.
#[derive(Debug)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    pub methods: &'static [&'static MethodDescriptor],
}

impl ServiceDescriptor {
    pub fn by_id(&self, id: u64) -> Option<&'static MethodDescriptor> {
        self.methods.iter().find(|m| m.id == id).copied()
    }
}

pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = Result<T, Status>> + Send>>;

/// Type-erased unary handler: encoded request in, encoded reply out.
pub trait UnaryHandler: Send + Sync + 'static {
    fn call(&self, ctx: CallContext, payload: Vec<u8>) -> HandlerFuture<Vec<u8>>;
}

/// Type-erased stream handler: drives one session to completion.
pub trait StreamHandler: Send + Sync + 'static {
    fn run(&self, ctx: CallContext, session: StreamSession) -> HandlerFuture<()>;
}

struct UnaryFn<Req, Resp, F> {
    f: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F, Fut> UnaryHandler for UnaryFn<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    fn call(&self, ctx: CallContext, payload: Vec<u8>) -> HandlerFuture<Vec<u8>> {
        let request: Req = match postcard::from_bytes(&payload) {
            Ok(request) => request,
            Err(e) => {
                return Box::pin(std::future::ready(Err(Status::invalid_argument(format!(
                    "malformed request payload: {e}"
                )))));
            }
        };
        let fut = (self.f)(ctx, request);
        Box::pin(async move {
            let response = fut.await?;
            encode_reply_ok(&response)
                .map_err(|e| Status::internal(format!("encode response: {e}")))
        })
    }
}

/// Wrap a typed async function as a [`UnaryHandler`], with postcard
/// decode/encode at the boundary. A payload that does not parse becomes
/// `InvalidArgument` before the function runs.
pub fn unary<Req, Resp, F, Fut>(f: F) -> Arc<dyn UnaryHandler>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    Arc::new(UnaryFn {
        f,
        _marker: PhantomData,
    })
}

struct TransformFn<T, F> {
    apply: F,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, F> StreamHandler for TransformFn<T, F>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(T) -> T + Clone + Send + Sync + 'static,
{
    fn run(&self, _ctx: CallContext, session: StreamSession) -> HandlerFuture<()> {
        let apply = self.apply.clone();
        Box::pin(session.transform::<T, F>(apply))
    }
}

/// Wrap a pure per-element function as a [`StreamHandler`]: every inbound
/// element is decoded, transformed, and sent back in arrival order.
pub fn transform<T, F>(apply: F) -> Arc<dyn StreamHandler>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(T) -> T + Clone + Send + Sync + 'static,
{
    Arc::new(TransformFn {
        apply,
        _marker: PhantomData,
    })
}

/// Error from building a [`Dispatcher`].
#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    /// A described method has no registered handler.
    MissingHandler { method: String },
    /// A handler was registered for a method outside the descriptor.
    UnknownMethod { method: String },
    /// A handler's shape does not match the method's kind.
    KindMismatch { method: String },
    /// Two handlers registered for the same method.
    DuplicateHandler { method: String },
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::MissingHandler { method } => {
                write!(f, "no handler registered for {method}")
            }
            BuildError::UnknownMethod { method } => {
                write!(f, "handler registered for unknown method {method}")
            }
            BuildError::KindMismatch { method } => {
                write!(f, "handler shape does not match call kind of {method}")
            }
            BuildError::DuplicateHandler { method } => {
                write!(f, "duplicate handler for {method}")
            }
        }
    }
}

impl std::error::Error for BuildError {}

enum Handler {
    Unary(Arc<dyn UnaryHandler>),
    Stream(Arc<dyn StreamHandler>),
}

/// Builder for a [`Dispatcher`]. Registration order of interceptors is
/// execution order (first registered runs outermost).
pub struct DispatcherBuilder {
    service: &'static ServiceDescriptor,
    handlers: Vec<(&'static MethodDescriptor, Handler)>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl DispatcherBuilder {
    pub fn new(service: &'static ServiceDescriptor) -> Self {
        Self {
            service,
            handlers: Vec::new(),
            interceptors: Vec::new(),
        }
    }

    pub fn intercept<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn unary(mut self, method: &'static MethodDescriptor, handler: Arc<dyn UnaryHandler>) -> Self {
        self.handlers.push((method, Handler::Unary(handler)));
        self
    }

    pub fn stream(
        mut self,
        method: &'static MethodDescriptor,
        handler: Arc<dyn StreamHandler>,
    ) -> Self {
        self.handlers.push((method, Handler::Stream(handler)));
        self
    }

    /// Check the table against the descriptor and freeze it.
    pub fn build(self) -> Result<Dispatcher, BuildError> {
        let mut table: HashMap<u64, Handler> = HashMap::new();

        for (method, handler) in self.handlers {
            if self.service.by_id(method.id).is_none() {
                return Err(BuildError::UnknownMethod {
                    method: method.path(),
                });
            }
            let matches = match (&handler, method.kind) {
                (Handler::Unary(_), CallKind::Unary) => true,
                (Handler::Stream(_), CallKind::BidiStream) => true,
                _ => false,
            };
            if !matches {
                return Err(BuildError::KindMismatch {
                    method: method.path(),
                });
            }
            if table.insert(method.id, handler).is_some() {
                return Err(BuildError::DuplicateHandler {
                    method: method.path(),
                });
            }
        }

        for method in self.service.methods {
            if !table.contains_key(&method.id) {
                return Err(BuildError::MissingHandler {
                    method: method.path(),
                });
            }
        }

        Ok(Dispatcher {
            service: self.service,
            table,
            stack: InterceptorStack::new(self.interceptors),
        })
    }
}

/// Closed table binding inbound calls to handlers, with the interceptor
/// chain applied around every dispatch.
pub struct Dispatcher {
    service: &'static ServiceDescriptor,
    table: HashMap<u64, Handler>,
    stack: InterceptorStack,
}

impl Dispatcher {
    pub fn builder(service: &'static ServiceDescriptor) -> DispatcherBuilder {
        DispatcherBuilder::new(service)
    }

    pub fn service(&self) -> &'static ServiceDescriptor {
        self.service
    }

    /// Look up the descriptor for an inbound method id.
    pub fn method(&self, id: u64) -> Option<&'static MethodDescriptor> {
        self.service.by_id(id)
    }

    /// Run a unary call through the interceptor chain and its handler.
    pub fn dispatch_unary(&self, ctx: CallContext, payload: Vec<u8>) -> InterceptFuture {
        let Some(Handler::Unary(handler)) = self.table.get(&ctx.method().id) else {
            return Box::pin(std::future::ready(Err(Status::invalid_argument(
                "unknown method",
            ))));
        };
        let handler = handler.clone();
        let payload = Mutex::new(Some(payload));
        let bound: HandlerFn = Arc::new(move |ctx| {
            let payload = payload
                .lock()
                .expect("payload slot mutex poisoned")
                .take()
                .unwrap_or_default();
            handler.call(ctx, payload)
        });
        self.stack.run(ctx, bound)
    }

    /// Run a stream call through the interceptor chain and its handler.
    ///
    /// The chain's reply payload is the encoded `Ok(())` produced after the
    /// session closes cleanly; an aborting status travels out as the error.
    pub fn dispatch_stream(&self, ctx: CallContext, session: StreamSession) -> InterceptFuture {
        let Some(Handler::Stream(handler)) = self.table.get(&ctx.method().id) else {
            return Box::pin(std::future::ready(Err(Status::invalid_argument(
                "unknown method",
            ))));
        };
        let handler = handler.clone();
        let session = Mutex::new(Some(session));
        let bound: HandlerFn = Arc::new(move |ctx| {
            let Some(session) = session
                .lock()
                .expect("session slot mutex poisoned")
                .take()
            else {
                return Box::pin(std::future::ready(Err(Status::internal(
                    "stream session already consumed",
                ))));
            };
            let fut = handler.run(ctx, session);
            Box::pin(async move {
                fut.await?;
                encode_reply_ok(&()).map_err(|e| Status::internal(format!("encode reply: {e}")))
            })
        });
        self.stack.run(ctx, bound)
    }
}
