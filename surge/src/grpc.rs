//! A minimal unary gRPC client session.
//!
//! ```rust,no_run
//! # use surge::grpc::Client;
//! # use surge::ConnectOptions;
//! # #[derive(Clone, PartialEq, prost::Message)]
//! # struct HelloRequest { #[prost(string, tag = "1")] name: String }
//! # async fn run() -> Result<(), surge::error::IterationError> {
//! let mut client = Client::new();
//! client.connect("localhost:3000", &ConnectOptions::plaintext()).await?;
//!
//! let request = HelloRequest { name: "jamie".into() };
//! let response = client
//!     .invoke::<_, HelloRequest>("HelloService/SayHello", request)
//!     .await?;
//! println!("{}", response.message.name);
//!
//! client.close();
//! # Ok(())
//! # }
//! ```
use crate::error::{ConnectionError, RpcError, StateError};
use crate::vu;
use std::time::Duration;
use surge_core::metric_names::{GRPC_REQS, GRPC_REQ_DURATION};
use surge_core::{validate_address, ConnectOptions, MetricSample, Tags, DEFAULT_RPC_TIMEOUT};
use tokio::time::Instant;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Status};
#[allow(unused)]
use tracing::{debug, error, trace, warn};

/// A successful unary response.
#[derive(Debug)]
pub struct RpcResponse<T> {
    pub status: Code,
    pub message: T,
    pub headers: MetadataMap,
    pub elapsed: Duration,
}

enum State {
    Idle,
    Connected { address: String, channel: Channel },
    Closed,
}

/// One client-side connection and its lifecycle: connect once, invoke any number of times,
/// close.
pub struct Client {
    state: State,
    timeout: Duration,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Uses the running scenario's call timeout when created inside a virtual user.
    pub fn new() -> Self {
        let timeout = vu::config()
            .map(|config| config.rpc_timeout)
            .unwrap_or(DEFAULT_RPC_TIMEOUT);
        Self {
            state: State::Idle,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected { .. })
    }

    pub fn target(&self) -> Option<&str> {
        match &self.state {
            State::Connected { address, .. } => Some(address),
            _ => None,
        }
    }

    pub async fn connect(
        &mut self,
        address: &str,
        options: &ConnectOptions,
    ) -> Result<(), ConnectionError> {
        match &self.state {
            State::Idle => {}
            State::Connected { address, .. } => {
                return Err(ConnectionError::AlreadyConnected(address.clone()))
            }
            State::Closed => return Err(StateError::Closed.into()),
        }

        validate_address(address)?;
        let transport_err = |source| ConnectionError::Transport {
            address: address.to_string(),
            source,
        };

        let uri = if address.contains("://") {
            address.to_string()
        } else if options.plaintext {
            format!("http://{address}")
        } else {
            format!("https://{address}")
        };

        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(transport_err)?
            .connect_timeout(options.timeout);
        if !options.plaintext {
            let mut tls = ClientTlsConfig::new();
            if let Some(authority) = &options.authority {
                tls = tls.domain_name(authority.clone());
            }
            endpoint = endpoint.tls_config(tls).map_err(transport_err)?;
        }

        debug!("Connecting to {address}");
        let channel = tokio::time::timeout(options.timeout, endpoint.connect())
            .await
            .map_err(|_| ConnectionError::Timeout {
                address: address.to_string(),
                timeout: options.timeout,
            })?
            .map_err(transport_err)?;

        self.state = State::Connected {
            address: address.to_string(),
            channel,
        };
        Ok(())
    }

    /// Connects to the running scenario's configured target.
    pub async fn connect_to_target(&mut self) -> Result<(), ConnectionError> {
        let config = vu::config().ok_or(ConnectionError::NoTarget)?;
        let target = config.target.as_deref().ok_or(ConnectionError::NoTarget)?;
        self.connect(target, &config.connect).await
    }

    /// Sends one unary call. `method` is `Service/Method` or `/package.Service/Method`.
    pub async fn invoke<Req, Resp>(
        &mut self,
        method: &str,
        payload: Req,
    ) -> Result<RpcResponse<Resp>, RpcError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let channel = match &self.state {
            State::Connected { channel, .. } => channel.clone(),
            State::Idle => return Err(StateError::NotConnected.into()),
            State::Closed => return Err(StateError::Closed.into()),
        };

        let method = normalize_method(method);
        let path = PathAndQuery::try_from(method.as_str())
            .map_err(|_| RpcError::InvalidMethod(method.clone()))?;

        let start = Instant::now();
        let res = tokio::time::timeout(self.timeout, unary::<Req, Resp>(channel, path, payload)).await;
        let elapsed = start.elapsed();

        let res = match res {
            Err(_) => Err(RpcError::Timeout {
                method: method.clone(),
                timeout: self.timeout,
            }),
            Ok(Err(status)) => Err(classify(&method, status, self.timeout)),
            Ok(Ok(response)) => {
                let (headers, message, _) = response.into_parts();
                Ok(RpcResponse {
                    status: Code::Ok,
                    message,
                    headers,
                    elapsed,
                })
            }
        };

        let code = match &res {
            Ok(_) => Code::Ok,
            Err(err) => err.code(),
        };
        let tags = Tags::new()
            .with("method", method.as_str())
            .with("status", format!("{code:?}"));
        vu::emit(
            MetricSample::trend(GRPC_REQ_DURATION, elapsed.as_secs_f64() * 1_000.)
                .tags(tags.clone()),
        );
        vu::emit(MetricSample::counter(GRPC_REQS, 1.).tags(tags));

        if let Err(err) = &res {
            debug!("{err}");
        }
        res
    }

    /// Releases the connection. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let State::Connected { address, .. } = &self.state {
            trace!("Closing connection to {address}");
        }
        self.state = State::Closed;
    }
}

async fn unary<Req, Resp>(
    channel: Channel,
    path: PathAndQuery,
    payload: Req,
) -> Result<tonic::Response<Resp>, Status>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|err| Status::unavailable(format!("Service was not ready: {err}")))?;

    let codec: ProstCodec<Req, Resp> = ProstCodec::default();
    grpc.unary(tonic::Request::new(payload), path, codec).await
}

fn normalize_method(method: &str) -> String {
    format!("/{}", method.trim_start_matches('/'))
}

/// Server-side deadline errors are reported against the client's own call timeout.
fn classify(method: &str, status: Status, timeout: Duration) -> RpcError {
    match status.code() {
        Code::DeadlineExceeded => RpcError::Timeout {
            method: method.to_string(),
            timeout,
        },
        Code::Unavailable | Code::Cancelled => RpcError::Reset {
            method: method.to_string(),
            message: status.message().to_string(),
        },
        code => RpcError::Status {
            method: method.to_string(),
            code,
            message: status.message().to_string(),
        },
    }
}
