use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub use mock_service::proto::HelloRequest;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        // A global subscriber may already be installed.
        let _ = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_env_filter("surge=debug,mock_service=debug")
            .with_test_writer()
            .try_init();
    });
}

#[allow(unused)]
pub fn hello(name: &str) -> HelloRequest {
    HelloRequest {
        name: name.to_string(),
    }
}
