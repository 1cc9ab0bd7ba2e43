//! Ramps to 400 virtual users calling `HelloService/SayHello`, holds for almost four hours,
//! then ramps back down.
//!
//! ```sh
//! cargo run -p mock-service &
//! cargo run -p demos --example grpc-hello -- --stage 10s:2 --stage 10s:0
//! ```
use metrics_exporter_prometheus::PrometheusBuilder;
use mock_service::proto::HelloRequest;
use std::time::Duration;
use surge::error::IterationError;
use surge::prelude::*;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("surge=info,grpc_hello=info")
        .init();

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], 8002))
        .install()?;

    let res = say_hello()
        .target("localhost:3000")
        .plaintext()
        .stage(Duration::from_secs(2 * 60), 400)
        .stage(Duration::from_secs(3 * 60 * 60 + 56 * 60), 400)
        .stage(Duration::from_secs(2 * 60), 0)
        .threshold("checks{check:status is OK}", "rate>0.99")
        .with_args()
        .await;

    let stats = match res {
        Ok(stats) => stats,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    println!("{stats}");
    std::process::exit(stats.exit_code());
}

#[scenario]
async fn say_hello() -> Result<(), IterationError> {
    let mut client = Client::new();
    client.connect_to_target().await?;

    let request = HelloRequest {
        name: "jamie".to_string(),
    };
    let response = client
        .invoke::<_, HelloRequest>("HelloService/SayHello", request)
        .await?;

    check(&response, "status is OK", |r| r.status == tonic::Code::Ok);
    info!("{}", response.message.name);

    client.close();
    Ok(())
}
