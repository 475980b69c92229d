//! Transport-security round trip: server presents its certificate, the
//! client verifies it against the trust root and pins the server name.

use std::path::PathBuf;

use tint::{connect, dispatcher, Code, HelloRequest, HelloResponse, Server, TintConfig};

fn testdata(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../tint-stream/testdata")
        .join(file)
}

fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn tls_config() -> TintConfig {
    let mut config = TintConfig::default();
    config.tls_cert = Some(testdata("cert.pem"));
    config.tls_key = Some(testdata("key.pem"));
    config.tls_ca = Some(testdata("cert.pem"));
    config.server_name = "localhost".into();
    config
}

#[tokio::test]
async fn encrypted_roundtrip() {
    install_crypto_provider();
    let config = tls_config();

    let dispatcher = dispatcher(&config).unwrap();
    let listener = tint::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn({
        let server_config = config.server_config().unwrap();
        async move {
            let _ = Server::new(dispatcher, server_config).serve(listener).await;
        }
    });

    let client = connect(&addr, config.client_config().unwrap())
        .await
        .unwrap();
    let response: HelloResponse = client
        .call(
            &tint::SAY_HELLO,
            &HelloRequest {
                name: "secure".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(response.message, "Hello secure");
}

#[tokio::test]
async fn wrong_pinned_name_fails_before_any_call() {
    install_crypto_provider();
    let config = tls_config();

    let dispatcher = dispatcher(&config).unwrap();
    let listener = tint::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn({
        let server_config = config.server_config().unwrap();
        async move {
            let _ = Server::new(dispatcher, server_config).serve(listener).await;
        }
    });

    let mut client_config = config.client_config().unwrap();
    client_config.tls.as_mut().unwrap().server_name = "not-the-server".into();

    // Connection establishment fails; the error never surfaces per-call.
    assert!(connect(&addr, client_config).await.is_err());
}

#[tokio::test]
async fn auth_composes_with_tls() {
    install_crypto_provider();
    let mut config = tls_config();
    config.token = Some("contoh_token".into());

    let dispatcher = dispatcher(&config).unwrap();
    let listener = tint::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn({
        let server_config = config.server_config().unwrap();
        async move {
            let _ = Server::new(dispatcher, server_config).serve(listener).await;
        }
    });

    // Right token over TLS: accepted.
    let client = connect(&addr, config.client_config().unwrap())
        .await
        .unwrap();
    let response: HelloResponse = client
        .call(&tint::SAY_HELLO, &HelloRequest { name: "a".into() })
        .await
        .unwrap();
    assert_eq!(response.message, "Hello a");

    // Bad token over TLS: the transport connects, the call is rejected.
    let mut bad = config.client_config().unwrap();
    bad.token = Some("wrong".into());
    let client = connect(&addr, bad).await.unwrap();
    let err = client
        .call::<_, HelloResponse>(&tint::SAY_HELLO, &HelloRequest { name: "a".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::Unauthenticated);
}
