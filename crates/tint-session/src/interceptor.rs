//! Interceptors wrapping call execution.
//!
//! An [`Interceptor`] may inspect the call, short-circuit with a [`Status`],
//! or invoke the rest of the chain via [`Next`] and post-process the result.
//! The chain is an explicit ordered list composed by [`InterceptorStack`];
//! the innermost stage is the handler itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, error, warn};

use tint_wire::{MetadataValue, Status, KEY_AUTHORIZATION};

use crate::context::{AuthContext, CallContext};

/// Result of running the rest of the chain: an encoded reply payload, or the
/// status that aborted the call.
pub type InterceptFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, Status>> + Send>>;

/// The innermost stage of a chain: the bound handler for one call.
pub type HandlerFn = Arc<dyn Fn(CallContext) -> InterceptFuture + Send + Sync>;

pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, ctx: CallContext, next: Next) -> InterceptFuture;
}

/// Continuation of an interceptor chain. Consuming `run` invokes the
/// remaining layers in order, then the handler.
pub struct Next {
    layers: Arc<[Arc<dyn Interceptor>]>,
    index: usize,
    handler: HandlerFn,
}

impl Next {
    pub fn run(mut self, ctx: CallContext) -> InterceptFuture {
        match self.layers.get(self.index).cloned() {
            Some(layer) => {
                self.index += 1;
                layer.intercept(ctx, self)
            }
            None => (self.handler)(ctx),
        }
    }
}

/// An ordered list of interceptors applied to every call.
#[derive(Clone, Default)]
pub struct InterceptorStack {
    layers: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorStack {
    pub fn new(layers: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            layers: layers.into(),
        }
    }

    /// Run the chain around `handler` for one call.
    pub fn run(&self, ctx: CallContext, handler: HandlerFn) -> InterceptFuture {
        Next {
            layers: self.layers.clone(),
            index: 0,
            handler,
        }
        .run(ctx)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Records call start and completion. Purely observational: the result
/// passes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn intercept(&self, ctx: CallContext, next: Next) -> InterceptFuture {
        Box::pin(async move {
            let method = ctx.method().path();
            let request_id = ctx.request_id();
            debug!(request_id, %method, "call started");
            let result = next.run(ctx).await;
            match &result {
                Ok(_) => debug!(request_id, %method, "call completed"),
                Err(status) => warn!(
                    request_id,
                    %method,
                    code = status.code.as_str(),
                    message = %status.message,
                    "call failed"
                ),
            }
            result
        })
    }
}

const BEARER_PREFIX: &str = "Bearer ";

/// Verifies the bearer token on every call before the handler runs.
///
/// On success the verified token is attached to the call as [`AuthContext`];
/// on any failure the chain short-circuits with `Unauthenticated`.
pub struct AuthInterceptor {
    secret: String,
}

impl AuthInterceptor {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn verify(&self, ctx: &CallContext) -> Result<AuthContext, Status> {
        let value = ctx
            .metadata()
            .get(KEY_AUTHORIZATION)
            .ok_or_else(|| Status::unauthenticated("missing authorization metadata"))?;
        let value = value
            .as_str()
            .ok_or_else(|| Status::unauthenticated("authorization must be a string"))?;
        let token = value
            .strip_prefix(BEARER_PREFIX)
            .ok_or_else(|| Status::unauthenticated("invalid authorization format"))?;
        if token == self.secret {
            Ok(AuthContext {
                token: token.to_owned(),
            })
        } else {
            Err(Status::unauthenticated("invalid token"))
        }
    }
}

impl Interceptor for AuthInterceptor {
    fn intercept(&self, ctx: CallContext, next: Next) -> InterceptFuture {
        match self.verify(&ctx) {
            Ok(auth) => {
                ctx.authenticate(auth);
                next.run(ctx)
            }
            Err(status) => Box::pin(std::future::ready(Err(status))),
        }
    }
}

/// Attach a bearer token to outgoing-call metadata, mirrored by what
/// [`AuthInterceptor`] strips on the receiving side.
pub fn bearer_value(token: &str) -> MetadataValue {
    MetadataValue::String(format!("{BEARER_PREFIX}{token}"))
}

/// Races the rest of the chain against the call's deadline and cancel flag.
///
/// The inner stage is spawned, not polled inline: when the watcher wins, the
/// caller gets the timeout status immediately and the handler is abandoned
/// mid-flight. The cancel flag is still set so a handler that checks it can
/// stop early, but nothing forces it to.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlineInterceptor;

impl Interceptor for DeadlineInterceptor {
    fn intercept(&self, ctx: CallContext, next: Next) -> InterceptFuture {
        Box::pin(async move {
            let deadline = ctx.deadline();
            let cancel = ctx.cancel_flag().clone();
            let mut inner = tokio::spawn(next.run(ctx));

            let expired = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                result = &mut inner => match result {
                    Ok(outcome) => outcome,
                    Err(join_error) => {
                        error!(%join_error, "handler task failed");
                        Err(Status::internal("handler task failed"))
                    }
                },
                () = cancel.cancelled() => {
                    Err(Status::cancelled("Client cancelled, abandoning."))
                }
                () = expired => {
                    cancel.cancel();
                    Err(Status::deadline_exceeded("deadline exceeded"))
                }
            }
        })
    }
}
