use metrics_exporter_prometheus::PrometheusBuilder;
use mock_service::MockConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mock_service=info".parse()?))
        .init();

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], 9002))
        .install()?;

    let addr: SocketAddr = std::env::var("MOCK_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()?;
    let config = MockConfig::default()
        .delay(Duration::from_millis(10))
        .jitter(Duration::from_millis(5));

    let server = mock_service::serve(addr, config).await?;
    tracing::info!("HelloService listening on {}", server.addr);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down after {} calls", server.service.calls());
    server.stop().await
}
