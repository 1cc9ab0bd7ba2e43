//! Starts an in-process mock `HelloService` and runs a short 0 -> 2 -> 0 ramp against it,
//! printing the summary as JSON.
use mock_service::{proto::HelloRequest, MockConfig};
use std::time::Duration;
use surge::error::IterationError;
use surge::prelude::*;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("surge=debug,mock_service=info")
        .init();

    let server = mock_service::spawn(
        MockConfig::default()
            .delay(Duration::from_millis(20))
            .jitter(Duration::from_millis(10)),
    )
    .await?;

    let stats = ramp()
        .target(&server.address())
        .plaintext()
        .stage(Duration::from_secs(10), 2)
        .stage(Duration::from_secs(10), 0)
        .summary_interval(Duration::from_secs(2))
        .threshold("grpc_req_duration", "p(95)<200")
        .threshold("iteration_failed", "rate<0.01")
        .await?;

    println!("{stats}");
    println!("{}", serde_json::to_string_pretty(&stats)?);

    server.stop().await?;
    std::process::exit(stats.exit_code());
}

#[scenario]
async fn ramp() -> Result<(), IterationError> {
    let mut client = Client::new();
    client.connect_to_target().await?;

    let vu = surge::vu::id().unwrap_or_default();
    let response = client
        .invoke::<_, HelloRequest>(
            "HelloService/SayHello",
            HelloRequest {
                name: format!("vu-{vu}"),
            },
        )
        .await?;

    Checks::on(&response)
        .check("status is OK", |r| r.status == tonic::Code::Ok)
        .check("echoes the name", |r| r.message.name.starts_with("vu-"))
        .finish();

    client.close();
    Ok(())
}
