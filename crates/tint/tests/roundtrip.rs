//! End-to-end round trips over loopback TCP.

use std::time::Duration;

use tint::{
    connect, dispatcher, Client, Code, Color, EchoRequest, EchoResponse, HelloRequest,
    HelloResponse, Pixel, Point, Server, TintConfig,
};

/// Bind a random port, spawn the server, and connect a client.
async fn start(config: TintConfig) -> Client {
    let dispatcher = dispatcher(&config).unwrap();
    let server_config = config.server_config().unwrap();
    let listener = tint::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let _ = Server::new(dispatcher, server_config).serve(listener).await;
    });

    connect(&addr, config.client_config().unwrap()).await.unwrap()
}

fn pixel(x: i32, y: i32) -> Pixel {
    Pixel {
        color: Color {
            r: 0.8,
            g: 0.1 + x as f32,
            b: 0.2 + y as f32,
            a: 1.0,
        },
        point: Point { x, y },
    }
}

#[tokio::test]
async fn say_hello_roundtrip() {
    let client = start(TintConfig::default()).await;
    let response: HelloResponse = client
        .call(
            &tint::SAY_HELLO,
            &HelloRequest {
                name: "Huda testing".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(response.message, "Hello Huda testing");
}

#[tokio::test]
async fn simulate_error_invalid_argument() {
    let client = start(TintConfig::default()).await;
    let err = client
        .call::<_, EchoResponse>(
            &tint::SIMULATE_ERROR,
            &EchoRequest {
                message: "invalid argument".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::InvalidArgument);
    assert_eq!(err.message, "Max num of characters exceed");
}

#[tokio::test]
async fn simulate_error_detail_enumerates_violations() {
    let client = start(TintConfig::default()).await;
    let err = client
        .call::<_, EchoResponse>(
            &tint::SIMULATE_ERROR,
            &EchoRequest {
                message: "detail".into(),
            },
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
}

#[tokio::test]
async fn simulate_error_echoes_everything_else() {
    let client = start(TintConfig::default()).await;
    let response: EchoResponse = client
        .call(
            &tint::SIMULATE_ERROR,
            &EchoRequest {
                message: "anything-else".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(response.message, "Testing error code : anything-else");
}

#[tokio::test]
async fn transform_preserves_order_and_zeroes_red() {
    let client = start(TintConfig::default()).await;
    let mut stream = client.open_stream::<Pixel>(&tint::TRANSFORM).unwrap();

    let inputs: Vec<Pixel> = (0..5)
        .flat_map(|y| (0..5).map(move |x| pixel(x, y)))
        .collect();
    for p in &inputs {
        stream.send(p).unwrap();
    }
    stream.close_send().unwrap();

    let mut outputs = Vec::new();
    while let Some(p) = stream.recv().await.unwrap() {
        outputs.push(p);
    }
    stream.finish().await.unwrap();

    assert_eq!(outputs.len(), inputs.len());
    for (input, output) in inputs.iter().zip(&outputs) {
        assert_eq!(output.point, input.point);
        assert_eq!(output.color.r, 0.0);
        assert_eq!(output.color.g, input.color.g);
        assert_eq!(output.color.b, input.color.b);
        assert_eq!(output.color.a, input.color.a);
    }
}

#[tokio::test]
async fn empty_transform_stream_closes_cleanly() {
    let client = start(TintConfig::default()).await;
    let mut stream = client.open_stream::<Pixel>(&tint::TRANSFORM).unwrap();
    stream.close_send().unwrap();
    assert!(stream.recv().await.unwrap().is_none());
    stream.finish().await.unwrap();
}

#[tokio::test]
async fn slow_handler_is_cut_off_at_the_deadline() {
    let mut config = TintConfig::default();
    config.simulated_delay = Duration::from_millis(800);
    config.call_timeout = Some(Duration::from_millis(100));
    let client = start(config).await;

    let started = std::time::Instant::now();
    let err = client
        .call::<_, EchoResponse>(
            &tint::SIMULATE_ERROR,
            &EchoRequest {
                message: "timeout".into(),
            },
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        err.code == Code::DeadlineExceeded || err.code == Code::Cancelled,
        "unexpected code: {:?}",
        err.code
    );
    assert!(
        elapsed < Duration::from_millis(700),
        "timeout arrived after the handler would have finished: {elapsed:?}"
    );
}

#[tokio::test]
async fn generous_deadline_lets_the_call_through() {
    let mut config = TintConfig::default();
    config.simulated_delay = Duration::from_millis(50);
    config.call_timeout = Some(Duration::from_secs(5));
    let client = start(config).await;

    let response: EchoResponse = client
        .call(
            &tint::SIMULATE_ERROR,
            &EchoRequest {
                message: "timeout".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(response.message, "Testing error code : timeout");
}

mod auth {
    use super::*;

    async fn start_with_secret(client_token: Option<&str>) -> Client {
        let mut server_config = TintConfig::default();
        server_config.token = Some("contoh_token".into());

        let dispatcher = dispatcher(&server_config).unwrap();
        let listener = tint::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server_tls = server_config.server_config().unwrap();
        tokio::spawn(async move {
            let _ = Server::new(dispatcher, server_tls)
                .serve(listener)
                .await;
        });

        let mut client_config = server_config.client_config().unwrap();
        client_config.token = client_token.map(str::to_owned);
        connect(&addr, client_config).await.unwrap()
    }

    #[tokio::test]
    async fn matching_token_passes() {
        let client = start_with_secret(Some("contoh_token")).await;
        let response: HelloResponse = client
            .call(&tint::SAY_HELLO, &HelloRequest { name: "a".into() })
            .await
            .unwrap();
        assert_eq!(response.message, "Hello a");
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let client = start_with_secret(Some("wrong_token")).await;
        let err = client
            .call::<_, HelloResponse>(&tint::SAY_HELLO, &HelloRequest { name: "a".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let client = start_with_secret(None).await;
        let err = client
            .call::<_, HelloResponse>(&tint::SAY_HELLO, &HelloRequest { name: "a".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);
    }

    #[tokio::test]
    async fn streams_are_authenticated_too() {
        let client = start_with_secret(Some("wrong_token")).await;
        let mut stream = client.open_stream::<Pixel>(&tint::TRANSFORM).unwrap();
        stream.close_send().unwrap();
        let err = loop {
            match stream.recv().await {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("stream closed cleanly despite bad token"),
                Err(err) => break err,
            }
        };
        assert_eq!(err.code, Code::Unauthenticated);
    }
}
