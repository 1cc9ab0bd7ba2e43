mod utils;
#[allow(unused)]
use utils::*;

use mock_service::MockConfig;
use std::time::Duration;
use surge::error::IterationError;
use surge::prelude::*;
use surge::Tags;

#[scenario]
async fn say_hello() -> Result<(), IterationError> {
    let mut client = Client::new();
    client.connect_to_target().await?;

    let response = client
        .invoke::<_, HelloRequest>("HelloService/SayHello", hello("jamie"))
        .await?;
    let report = Checks::on(&response)
        .check("status is OK", |r| r.status == tonic::Code::Ok)
        .finish();
    tracing::debug!("{}", response.message.name);

    client.close();
    report.into_result()?;
    Ok(())
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn short_ramp_up_and_down() {
    init();
    let server = mock_service::spawn(MockConfig::default().delay(Duration::from_millis(10)))
        .await
        .unwrap();

    let stats = say_hello()
        .target(&server.address())
        .plaintext()
        .stage(Duration::from_secs(1), 2)
        .stage(Duration::from_secs(1), 0)
        .iteration_pause(Duration::from_millis(100))
        .threshold("checks{check:status is OK}", "rate==1")
        .threshold("grpc_req_duration", "p(95)<1000")
        .await
        .unwrap();

    // 2 VU-seconds of load at roughly 0.11s per iteration.
    assert!(
        (8..=24).contains(&stats.iterations),
        "iterations={}",
        stats.iterations
    );
    assert_eq!(stats.failed_iterations, 0);
    assert_eq!(stats.checks_failed, 0);
    assert_eq!(stats.checks_passed, stats.iterations);
    assert_eq!(stats.max_vus, 2);
    assert_eq!(server.service.calls(), stats.iterations);
    assert!(stats.passed(), "{stats}");

    let reqs = stats
        .metrics
        .iter()
        .find(|m| m.name == "grpc_reqs" && m.tags.get("status") == Some("Ok"))
        .unwrap();
    assert_eq!(reqs.sum as u64, stats.iterations);

    server.stop().await.unwrap();
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn unreachable_target_fails_iterations_without_stopping_the_run() {
    init();

    let stats = say_hello()
        .target("127.0.0.1:1")
        .plaintext()
        .stage(Duration::ZERO, 1)
        .stage(Duration::from_secs(1), 1)
        .iteration_pause(Duration::from_millis(200))
        .threshold("iteration_failed", "rate<0.5")
        .await
        .unwrap();

    assert!(stats.iterations >= 2, "iterations={}", stats.iterations);
    assert_eq!(stats.failed_iterations, stats.iterations);
    assert!(!stats.passed());
    assert_eq!(stats.exit_code(), 99);

    let connection_errors = stats
        .metrics
        .iter()
        .find(|m| m.name == "iteration_errors" && m.tags == Tags::new().with("kind", "connection"))
        .unwrap();
    assert_eq!(connection_errors.sum as u64, stats.iterations);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn retired_users_finish_their_call() {
    init();
    let server = mock_service::spawn(MockConfig::default()).await.unwrap();

    let stats = slow_hello()
        .target(&server.address())
        .plaintext()
        .stage(Duration::ZERO, 1)
        .stage(Duration::from_millis(300), 1)
        .iteration_pause(Duration::from_secs(5))
        .await
        .unwrap();

    // Retired at ~300ms, mid-call; the call still completes and is checked.
    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.failed_iterations, 0);
    assert_eq!(stats.checks_passed, 1);
    assert!(stats.duration >= Duration::from_millis(800));
    assert!(stats.duration < Duration::from_secs(5));

    server.stop().await.unwrap();
}

#[scenario]
async fn slow_hello() -> Result<(), IterationError> {
    let mut client = Client::new();
    client.connect_to_target().await?;
    let response = client
        .invoke::<_, HelloRequest>("HelloService/SayHello", hello("slow:800"))
        .await?;
    check(&response, "status is OK", |r| r.status == tonic::Code::Ok);
    client.close();
    Ok(())
}

#[cfg(feature = "integration")]
#[tokio::test]
async fn full_ramp_up_and_down() {
    init();
    let server = mock_service::spawn(
        MockConfig::default()
            .delay(Duration::from_millis(20))
            .jitter(Duration::from_millis(10)),
    )
    .await
    .unwrap();

    let stats = say_hello()
        .target(&server.address())
        .plaintext()
        .stage(Duration::from_secs(10), 2)
        .stage(Duration::from_secs(10), 0)
        .threshold("checks", "rate>0.99")
        .await
        .unwrap();

    println!("{stats}");
    // 20 VU-seconds at a little over one second per iteration.
    assert!((14..=22).contains(&stats.iterations));
    assert_eq!(stats.failed_iterations, 0);
    assert!(stats.passed());

    server.stop().await.unwrap();
}
