#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use grpc_server::GrpcConfig;
use http::uri::PathAndQuery;
use http_body::Body;
use lifecycle::{Orchestrator, ServerError, ServerHandle};
use tokio::task::JoinHandle;
use tonic::body::BoxBody;
use tonic::codec::{ProstCodec, Streaming};
use tonic::codegen::{BoxFuture, StdError};
use tonic::server::{Grpc, NamedService, ServerStreamingService, UnaryService};
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tonic_health::pb::health_client::HealthClient;
use tower::Service;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Echo service
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct EchoRequest {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(uint32, tag = "2")]
    pub count: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EchoReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// `Say` echoes, `Fail` answers NotFound, `Count` streams `count` replies, `Hang`
/// opens a stream that never yields.
#[derive(Clone, Default)]
pub struct EchoServer;

impl NamedService for EchoServer {
    const NAME: &'static str = "echo.Echo";
}

struct Say;

impl UnaryService<EchoRequest> for Say {
    type Response = EchoReply;
    type Future = BoxFuture<Response<EchoReply>, Status>;

    fn call(&mut self, request: Request<EchoRequest>) -> Self::Future {
        Box::pin(async move {
            Ok(Response::new(EchoReply {
                message: request.into_inner().message,
            }))
        })
    }
}

struct Fail;

impl UnaryService<EchoRequest> for Fail {
    type Response = EchoReply;
    type Future = BoxFuture<Response<EchoReply>, Status>;

    fn call(&mut self, _request: Request<EchoRequest>) -> Self::Future {
        Box::pin(async { Err(Status::not_found("nothing here")) })
    }
}

struct Count;

impl ServerStreamingService<EchoRequest> for Count {
    type Response = EchoReply;
    type ResponseStream = BoxStream<'static, Result<EchoReply, Status>>;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<EchoRequest>) -> Self::Future {
        Box::pin(async move {
            let count = request.into_inner().count;
            let replies = stream::iter((0..count).map(|i| {
                Ok(EchoReply {
                    message: i.to_string(),
                })
            }));
            Ok(Response::new(replies.boxed()))
        })
    }
}

struct Hang;

impl ServerStreamingService<EchoRequest> for Hang {
    type Response = EchoReply;
    type ResponseStream = BoxStream<'static, Result<EchoReply, Status>>;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, _request: Request<EchoRequest>) -> Self::Future {
        Box::pin(async { Ok(Response::new(stream::pending().boxed())) })
    }
}

impl<B> Service<http::Request<B>> for EchoServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        match request.uri().path() {
            "/echo.Echo/Say" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.unary(Say, request).await)
            }),
            "/echo.Echo/Fail" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.unary(Fail, request).await)
            }),
            "/echo.Echo/Count" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.server_streaming(Count, request).await)
            }),
            "/echo.Echo/Hang" => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::default());
                Ok(grpc.server_streaming(Hang, request).await)
            }),
            _ => Box::pin(async { Ok(Status::unimplemented("no such method").into_http()) }),
        }
    }
}

pub async fn channel(addr: SocketAddr) -> Channel {
    Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap()
}

pub async fn health_client(addr: SocketAddr) -> HealthClient<Channel> {
    HealthClient::new(channel(addr).await)
}

pub struct EchoClient {
    inner: tonic::client::Grpc<Channel>,
}

impl EchoClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel(addr).await),
        }
    }

    pub async fn unary(&mut self, path: &'static str, message: &str) -> Result<EchoReply, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(e.to_string()))?;
        let request = Request::new(EchoRequest {
            message: message.to_string(),
            count: 0,
        });
        let codec: ProstCodec<EchoRequest, EchoReply> = ProstCodec::default();
        self.inner
            .unary(request, PathAndQuery::from_static(path), codec)
            .await
            .map(Response::into_inner)
    }

    /// Opens `Hang` and returns once the response headers are in.
    pub async fn hang(&mut self) -> Result<Streaming<EchoReply>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(e.to_string()))?;
        let request = Request::new(EchoRequest::default());
        let codec: ProstCodec<EchoRequest, EchoReply> = ProstCodec::default();
        self.inner
            .server_streaming(request, PathAndQuery::from_static("/echo.Echo/Hang"), codec)
            .await
            .map(Response::into_inner)
    }

    pub async fn count(&mut self, count: u32) -> Result<Vec<String>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(e.to_string()))?;
        let request = Request::new(EchoRequest {
            message: String::new(),
            count,
        });
        let codec: ProstCodec<EchoRequest, EchoReply> = ProstCodec::default();
        let mut replies: Streaming<EchoReply> = self
            .inner
            .server_streaming(request, PathAndQuery::from_static("/echo.Echo/Count"), codec)
            .await?
            .into_inner();

        let mut messages = Vec::new();
        while let Some(reply) = replies.message().await? {
            messages.push(reply.message);
        }
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Ephemeral ports on loopback, short shutdown timeout.
pub fn test_config(namespace: &str) -> GrpcConfig {
    GrpcConfig {
        api_host: "127.0.0.1:0".to_string(),
        metrics_host: "127.0.0.1:0".to_string(),
        shutdown_timeout_ms: 2000,
        namespace: namespace.to_string(),
        ..GrpcConfig::default()
    }
}

pub struct RunningServer {
    pub handle: ServerHandle,
    pub task: JoinHandle<Result<(), ServerError>>,
    pub grpc: SocketAddr,
    pub metrics: SocketAddr,
}

impl RunningServer {
    pub async fn start(server: Orchestrator) -> Self {
        let handle = server.handle();
        let task = tokio::spawn(server.run_until(std::future::pending()));
        let running = tokio::time::timeout(TEST_TIMEOUT, handle.running())
            .await
            .expect("server did not start in time");
        assert!(running, "server stopped before it was running");

        Self {
            grpc: handle.local_addr("grpc").unwrap(),
            metrics: handle.local_addr("metrics").unwrap(),
            handle,
            task,
        }
    }

    pub async fn scrape(&self) -> String {
        reqwest::get(format!("http://{}/metrics", self.metrics))
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    }

    pub async fn stop(self) -> Result<(), ServerError> {
        self.handle.shutdown();
        tokio::time::timeout(TEST_TIMEOUT, self.task)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Value of the exposition sample `name{...}` carrying every `(label, value)` pair.
pub fn sample(exposition: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    exposition
        .lines()
        .filter(|line| line.starts_with(&format!("{name}{{")))
        .find(|line| {
            labels
                .iter()
                .all(|(key, value)| line.contains(&format!("{key}=\"{value}\"")))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}
