use gateway_lib::app::{connect, run};
use gateway_lib::config::{Backend, GatewayConfig, ServeArgs};
use gateway_lib::{BrokerClient, Error};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[tokio::test]
async fn unreachable_kafka_fails_within_startup_timeout() {
    let config = GatewayConfig::from_toml_str(
        r#"
        [broker]
        brokers = "127.0.0.1:1"
        startup_timeout_ms = 300
        "#,
    )
    .unwrap();

    let started = Instant::now();
    let result = connect(&config).await;
    let elapsed = started.elapsed();

    match result {
        Err(Error::Connection(e)) => assert_eq!(e.brokers, "127.0.0.1:1"),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("connected to a closed port"),
    }
    // One metadata request alone may block for 5 s
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
}

#[tokio::test]
async fn memory_backend_always_connects() {
    let mut config = GatewayConfig::default();
    config.broker.backend = Backend::Memory;

    let broker = connect(&config).await.ok().expect("memory backend failed");
    assert_eq!(broker.name(), "memory");
}

#[tokio::test]
async fn missing_config_file_is_a_config_error() {
    let err = run(ServeArgs {
        config: Some(PathBuf::from("/nonexistent/gateway.toml")),
        ..ServeArgs::default()
    })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Config { context: "read", .. }));
}
