#![deny(unsafe_code)]

//! tint - streaming pixel-transform RPC.
//!
//! This crate provides a unified API for the tint protocol stack plus the
//! built-in `Transform` service: a greeting call, an error-simulation call,
//! and a bidirectional pixel stream that zeroes the red channel of every
//! element. Depend on this crate rather than the component crates.

pub mod config;
pub mod service;

pub use config::{ServeError, TintConfig};
pub use service::{dispatcher, red_zero, serve, SAY_HELLO, SIMULATE_ERROR, TRANSFORM, TRANSFORM_SERVICE};

// Wire model.
pub use tint_wire::{
    Code, Color, EchoRequest, EchoResponse, FieldViolation, HelloRequest, HelloResponse, Metadata,
    MetadataValue, Pixel, Point, Status, StatusDetail,
};

// Call pipeline.
pub use tint_session::{
    transform, unary, AuthContext, AuthInterceptor, CallContext, CallKind, DeadlineInterceptor,
    Dispatcher, Interceptor, LoggingInterceptor, MethodDescriptor, ServiceDescriptor,
};

// Transport.
pub use tint_stream::{
    bind, connect, CallStream, Certificate, Client, ClientConfig, ClientTlsConfig, ConnectError,
    HandshakeConfig, Identity, Server, ServerConfig, ServerTlsConfig,
};
