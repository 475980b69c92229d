//! The built-in `Transform` service.
//!
//! Three methods: a greeting, an error simulation exercising the status
//! taxonomy, and the bidirectional pixel stream. The dispatch table is
//! checked for completeness when the dispatcher is built.

use std::time::Duration;

use tint_session::{
    transform, unary, AuthInterceptor, BuildError, CallKind, DeadlineInterceptor, Dispatcher,
    LoggingInterceptor, MethodDescriptor, ServiceDescriptor,
};
use tint_stream::Server;
use tint_wire::{
    Color, EchoRequest, EchoResponse, FieldViolation, HelloRequest, HelloResponse, Pixel, Status,
    StatusDetail,
};

use crate::config::{ServeError, TintConfig};

pub static SAY_HELLO: MethodDescriptor =
    MethodDescriptor::new("Transform", "SayHello", CallKind::Unary);
pub static SIMULATE_ERROR: MethodDescriptor =
    MethodDescriptor::new("Transform", "SimulateError", CallKind::Unary);
pub static TRANSFORM: MethodDescriptor =
    MethodDescriptor::new("Transform", "Transform", CallKind::BidiStream);

pub static TRANSFORM_SERVICE: ServiceDescriptor = ServiceDescriptor {
    name: "Transform",
    methods: &[&SAY_HELLO, &SIMULATE_ERROR, &TRANSFORM],
};

/// The per-element transform: force the red channel to zero, leave
/// everything else untouched.
pub fn red_zero(pixel: Pixel) -> Pixel {
    Pixel {
        color: Color {
            r: 0.0,
            ..pixel.color
        },
        point: pixel.point,
    }
}

async fn say_hello(request: HelloRequest) -> Result<HelloResponse, Status> {
    Ok(HelloResponse {
        message: format!("Hello {}", request.name),
    })
}

async fn simulate_error(request: EchoRequest, delay: Duration) -> Result<EchoResponse, Status> {
    match request.message.as_str() {
        "invalid argument" => Err(Status::invalid_argument("Max num of characters exceed")),
        "detail" => Err(Status::invalid_argument("invalid username").with_detail(
            StatusDetail::BadRequest {
                violations: vec![FieldViolation {
                    field: "message".into(),
                    description: "The message must only contain alphanumeric characters".into(),
                }],
            },
        )),
        message => {
            if message == "timeout" {
                tokio::time::sleep(delay).await;
            }
            Ok(EchoResponse {
                message: format!("Testing error code : {message}"),
            })
        }
    }
}

/// Build the service dispatcher: logging wraps everything, authentication
/// (when a token is configured) precedes the deadline race, and the handlers
/// run innermost.
pub fn dispatcher(config: &TintConfig) -> Result<Dispatcher, BuildError> {
    let delay = config.simulated_delay;

    let mut builder = Dispatcher::builder(&TRANSFORM_SERVICE).intercept(LoggingInterceptor);
    if let Some(token) = &config.token {
        builder = builder.intercept(AuthInterceptor::new(token.clone()));
    }
    builder
        .intercept(DeadlineInterceptor)
        .unary(
            &SAY_HELLO,
            unary(|_ctx, request: HelloRequest| say_hello(request)),
        )
        .unary(
            &SIMULATE_ERROR,
            unary(move |_ctx, request: EchoRequest| simulate_error(request, delay)),
        )
        .stream(&TRANSFORM, transform::<Pixel, _>(red_zero))
        .build()
}

/// Bind the configured address and serve forever.
pub async fn serve(config: TintConfig) -> Result<(), ServeError> {
    let dispatcher = dispatcher(&config)?;
    let server_config = config.server_config()?;
    let listener = tint_stream::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");
    Server::new(dispatcher, server_config)
        .serve(listener)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tint_wire::{Code, Point};

    #[test]
    fn red_zero_clears_only_red() {
        let pixel = Pixel {
            color: Color {
                r: 0.9,
                g: 0.4,
                b: 0.2,
                a: 1.0,
            },
            point: Point { x: 11, y: 4 },
        };
        let out = red_zero(pixel);
        assert_eq!(out.color.r, 0.0);
        assert_eq!(out.color.g, 0.4);
        assert_eq!(out.color.b, 0.2);
        assert_eq!(out.color.a, 1.0);
        assert_eq!(out.point, pixel.point);
    }

    #[tokio::test]
    async fn simulate_error_fixed_mappings() {
        let err = simulate_error(
            EchoRequest {
                message: "invalid argument".into(),
            },
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert_eq!(err.message, "Max num of characters exceed");
        assert!(err.details.is_empty());

        let err = simulate_error(
            EchoRequest {
                message: "detail".into(),
            },
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert_eq!(err.message, "invalid username");
        let violations: Vec<_> = err.field_violations().collect();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "message");
        assert_eq!(
            violations[0].description,
            "The message must only contain alphanumeric characters"
        );

        let ok = simulate_error(
            EchoRequest {
                message: "anything-else".into(),
            },
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert_eq!(ok.message, "Testing error code : anything-else");
    }

    #[tokio::test]
    async fn say_hello_greets() {
        let response = say_hello(HelloRequest {
            name: "Huda testing".into(),
        })
        .await
        .unwrap();
        assert_eq!(response.message, "Hello Huda testing");
    }

    #[test]
    fn dispatcher_builds_with_and_without_auth() {
        assert!(dispatcher(&TintConfig::default()).is_ok());
        let mut config = TintConfig::default();
        config.token = Some("contoh_token".into());
        assert!(dispatcher(&config).is_ok());
    }
}
