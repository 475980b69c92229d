#![deny(unsafe_code)]

//! Call-handling pipeline for tint RPC.
//!
//! An accepted call flows through an ordered [`Interceptor`] chain into a
//! handler looked up in a closed [`Dispatcher`] table. Unary handlers
//! compute one reply; stream handlers drive a [`StreamSession`] whose two
//! directional loops run concurrently until both terminate.

mod context;
mod dispatch;
mod interceptor;
mod session;

pub use context::{AuthContext, CallContext, CallKind, CancelFlag};
pub use dispatch::{
    transform, unary, BuildError, Dispatcher, DispatcherBuilder, MethodDescriptor,
    ServiceDescriptor, StreamHandler, UnaryHandler,
};
pub use interceptor::{
    bearer_value, AuthInterceptor, DeadlineInterceptor, HandlerFn, InterceptFuture, Interceptor,
    InterceptorStack, LoggingInterceptor, Next,
};
pub use session::{Inbound, Outbound, SessionPhase, SessionState, StreamSession};
