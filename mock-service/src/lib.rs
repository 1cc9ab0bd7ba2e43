//! A `HelloService` gRPC server with knobs for latency and failures.
//!
//! The request name doubles as a control channel:
//! - `fail...` answers with `INTERNAL`
//! - `slow:<ms>` sleeps `<ms>` milliseconds before answering
//!
//! Anything else is echoed back after the configured latency.
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand_distr::{Distribution, SkewNormal};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codegen::{http, Body, BoxFuture, Service, StdError};
use tonic::{Request, Response, Status};
use tracing::debug;

pub const SAY_HELLO_PATH: &str = "/HelloService/SayHello";

pub mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct HelloRequest {
        #[prost(string, tag = "1")]
        pub name: String,
    }
}

use proto::HelloRequest;

#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    /// Mean response latency.
    pub delay: Duration,
    /// Standard deviation of the latency; zero for a fixed delay.
    pub jitter: Duration,
    /// Fail every call with `UNAVAILABLE`.
    pub unavailable: bool,
}

impl MockConfig {
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    fn sample_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        match SkewNormal::new(self.delay.as_secs_f64(), self.jitter.as_secs_f64(), 20.) {
            Ok(dist) => Duration::from_secs_f64(dist.sample(&mut rand::thread_rng()).max(0.)),
            Err(_) => self.delay,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockHello {
    config: MockConfig,
    calls: AtomicU64,
}

impl MockHello {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub async fn say_hello(&self, request: Request<HelloRequest>) -> Result<Response<HelloRequest>, Status> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        counter!("mock-service.calls").increment(1);

        let request = request.into_inner();
        debug!("SayHello name={}", request.name);

        if self.config.unavailable {
            return Err(Status::unavailable("mock service is unavailable"));
        }
        if request.name.starts_with("fail") {
            return Err(Status::internal(format!("requested failure: {}", request.name)));
        }

        let delay = match request.name.strip_prefix("slow:") {
            Some(ms) => ms
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| Status::invalid_argument("slow:<ms> expects a number"))?,
            None => self.config.sample_delay(),
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(Response::new(request))
    }
}

/// Hand-written equivalent of a generated `HelloService` server.
#[derive(Debug)]
pub struct HelloServiceServer {
    inner: Arc<MockHello>,
}

impl HelloServiceServer {
    pub fn new(inner: Arc<MockHello>) -> Self {
        Self { inner }
    }
}

impl Clone for HelloServiceServer {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl tonic::server::NamedService for HelloServiceServer {
    const NAME: &'static str = "HelloService";
}

struct SayHelloSvc(Arc<MockHello>);

impl tonic::server::UnaryService<HelloRequest> for SayHelloSvc {
    type Response = HelloRequest;
    type Future = BoxFuture<Response<Self::Response>, Status>;

    fn call(&mut self, request: Request<HelloRequest>) -> Self::Future {
        let inner = Arc::clone(&self.0);
        Box::pin(async move { inner.say_hello(request).await })
    }
}

impl<B> Service<http::Request<B>> for HelloServiceServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        match req.uri().path() {
            SAY_HELLO_PATH => Box::pin(async move {
                let codec = tonic::codec::ProstCodec::default();
                let mut grpc = tonic::server::Grpc::new(codec);
                Ok(grpc.unary(SayHelloSvc(inner), req).await)
            }),
            path => {
                let status = Status::unimplemented(format!("unknown method {path}"));
                Box::pin(async move { Ok(status.to_http()) })
            }
        }
    }
}

/// A server running in the background. Shuts down when dropped.
pub struct MockServer {
    pub addr: SocketAddr,
    pub service: Arc<MockHello>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl MockServer {
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.handle).await??;
        Ok(())
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Starts a server on an ephemeral localhost port.
pub async fn spawn(config: MockConfig) -> anyhow::Result<MockServer> {
    serve(([127, 0, 0, 1], 0).into(), config).await
}

pub async fn serve(addr: SocketAddr, config: MockConfig) -> anyhow::Result<MockServer> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let service = Arc::new(MockHello::new(config));
    let (tx, rx) = oneshot::channel::<()>();

    let server = tonic::transport::Server::builder()
        .add_service(HelloServiceServer::new(service.clone()))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
            let _ = rx.await;
        });
    let handle = tokio::spawn(server);
    debug!("Mock HelloService listening on {addr}");

    Ok(MockServer {
        addr,
        service,
        shutdown: Some(tx),
        handle,
    })
}
