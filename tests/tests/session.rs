mod utils;
#[allow(unused)]
use utils::*;

use mock_service::MockConfig;
use std::time::Duration;
use surge::error::{ConnectionError, RpcError, StateError};
use surge::grpc::Client;
use surge::ConnectOptions;
use tonic::Code;

#[tokio::test]
async fn connect_invoke_close() -> anyhow::Result<()> {
    init();
    let server = mock_service::spawn(MockConfig::default()).await?;

    let mut client = Client::new();
    client
        .connect(&server.address(), &ConnectOptions::plaintext())
        .await?;
    assert!(client.is_connected());
    assert_eq!(client.target(), Some(server.address().as_str()));

    let response = client
        .invoke::<_, HelloRequest>("HelloService/SayHello", hello("jamie"))
        .await?;
    assert_eq!(response.status, Code::Ok);
    assert_eq!(response.message.name, "jamie");

    // Leading slash is accepted too.
    client
        .invoke::<_, HelloRequest>("/HelloService/SayHello", hello("again"))
        .await?;
    assert_eq!(server.service.calls(), 2);

    client.close();
    let err = client
        .invoke::<_, HelloRequest>("HelloService/SayHello", hello("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::State(StateError::Closed)));
    assert_eq!(server.service.calls(), 2);

    server.stop().await
}

#[tokio::test]
async fn connecting_twice_is_rejected() -> anyhow::Result<()> {
    init();
    let server = mock_service::spawn(MockConfig::default()).await?;
    let options = ConnectOptions::plaintext();

    let mut client = Client::new();
    client.connect(&server.address(), &options).await?;
    let err = client
        .connect(&server.address(), &options)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::AlreadyConnected(addr) if addr == server.address()));

    client.close();
    server.stop().await
}

#[tokio::test]
async fn application_errors_carry_their_status() -> anyhow::Result<()> {
    init();
    let server = mock_service::spawn(MockConfig::default()).await?;

    let mut client = Client::new();
    client
        .connect(&server.address(), &ConnectOptions::plaintext())
        .await?;

    let err = client
        .invoke::<_, HelloRequest>("HelloService/SayHello", hello("fail"))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Status { code: Code::Internal, .. }));

    let err = client
        .invoke::<_, HelloRequest>("HelloService/Missing", hello("jamie"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);

    client.close();
    server.stop().await
}

#[tokio::test]
async fn slow_calls_time_out() -> anyhow::Result<()> {
    init();
    let server = mock_service::spawn(MockConfig::default()).await?;

    let mut client = Client::new().with_timeout(Duration::from_millis(100));
    client
        .connect(&server.address(), &ConnectOptions::plaintext())
        .await?;

    let err = client
        .invoke::<_, HelloRequest>("HelloService/SayHello", hello("slow:2000"))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { timeout, .. } if timeout == Duration::from_millis(100)));

    // The session stays usable.
    let response = client
        .invoke::<_, HelloRequest>("HelloService/SayHello", hello("jamie"))
        .await?;
    assert_eq!(response.message.name, "jamie");

    client.close();
    server.stop().await
}

#[tokio::test]
#[ntest::timeout(10_000)]
async fn unreachable_addresses_fail_to_connect() {
    init();
    let mut client = Client::new();
    let err = client
        .connect(
            "127.0.0.1:1",
            &ConnectOptions::plaintext().timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::Transport { .. } | ConnectionError::Timeout { .. }
    ));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn unavailable_services_surface_as_resets() -> anyhow::Result<()> {
    init();
    let server = mock_service::spawn(MockConfig::default().unavailable()).await?;

    let mut client = Client::new();
    client
        .connect(&server.address(), &ConnectOptions::plaintext())
        .await?;
    let err = client
        .invoke::<_, HelloRequest>("HelloService/SayHello", hello("jamie"))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Reset { .. }));

    client.close();
    server.stop().await
}
