use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use common_metrics::{CallRecorder, MetricSet};
use http::{HeaderMap, Request, Response};
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use tonic::body::BoxBody;
use tonic::{Code, Status};
use tower::{Layer, Service};
use tracing::warn;

use crate::method::extract_service_method;

/// Tower layer recording RED metrics for every gRPC call, unary or streaming.
///
/// The request is counted when the call starts. The duration and the error code
/// are recorded once the response body is finished or dropped, so a stream is
/// timed over its whole lifetime and its trailing status is what gets counted.
#[derive(Clone)]
pub struct RedLayer {
    metrics: MetricSet,
}

impl RedLayer {
    pub fn new(metrics: MetricSet) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for RedLayer {
    type Service = RedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RedService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RedService<S> {
    inner: S,
    metrics: MetricSet,
}

impl<S, ReqBody> Service<Request<ReqBody>> for RedService<S>
where
    S: Service<Request<ReqBody>, Response = Response<BoxBody>>,
{
    type Response = Response<RedBody<BoxBody>>;
    type Error = S::Error;
    type Future = RedFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let call = match extract_service_method(request.uri().path()) {
            Ok((service, method)) => self
                .metrics
                .start_call(&[service, method], &[service, method]),
            Err(e) => {
                warn!(path = request.uri().path(), error = %e, "rejecting call");
                return RedFuture::Rejected {
                    status: Some(Status::invalid_argument(e.to_string())),
                };
            }
        };

        RedFuture::Call {
            inner: self.inner.call(request),
            call: Some(call),
        }
    }
}

#[pin_project(project = RedFutureProj)]
pub enum RedFuture<F> {
    Call {
        #[pin]
        inner: F,
        call: Option<CallRecorder>,
    },
    Rejected {
        status: Option<Status>,
    },
}

impl<F, E> Future for RedFuture<F>
where
    F: Future<Output = Result<Response<BoxBody>, E>>,
{
    type Output = Result<Response<RedBody<BoxBody>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            RedFutureProj::Call { inner, call } => {
                let result = ready!(inner.poll(cx));
                let mut call = call.take();
                match result {
                    Ok(response) => {
                        // Trailers-only responses carry their status in the headers.
                        if let Some(call) = call.as_mut() {
                            observe_status(call, response.headers());
                        }
                        Poll::Ready(Ok(response.map(|body| RedBody::new(body, call))))
                    }
                    Err(e) => {
                        if let Some(call) = call.as_mut() {
                            call.set_error_code(code_name(Code::Unknown));
                        }
                        Poll::Ready(Err(e))
                    }
                }
            }
            RedFutureProj::Rejected { status } => {
                let status = status
                    .take()
                    .unwrap_or_else(|| Status::internal("call polled after completion"));
                Poll::Ready(Ok(status.into_http().map(RedBody::untracked)))
            }
        }
    }
}

/// Response body that finishes the call's metrics when the last frame has been
/// sent, or when it is dropped early.
pub struct RedBody<B> {
    inner: B,
    call: Option<CallRecorder>,
}

impl<B> RedBody<B> {
    fn new(inner: B, call: Option<CallRecorder>) -> Self {
        Self { inner, call }
    }

    fn untracked(inner: B) -> Self {
        Self { inner, call: None }
    }

    fn finish(&mut self) {
        if let Some(call) = self.call.take() {
            call.fin();
        }
    }
}

impl<B> Body for RedBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));

        match &frame {
            Some(Ok(frame)) => {
                if let (Some(trailers), Some(call)) = (frame.trailers_ref(), this.call.as_mut()) {
                    observe_status(call, trailers);
                }
            }
            Some(Err(_)) => {
                if let Some(call) = this.call.as_mut() {
                    call.set_error_code(code_name(Code::Internal));
                }
                this.finish();
            }
            None => this.finish(),
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for RedBody<B> {
    fn drop(&mut self) {
        // Dropped before any status was seen: the peer went away.
        if let Some(call) = self.call.as_mut() {
            if !call.has_outcome() {
                call.set_error_code(code_name(Code::Cancelled));
            }
        }
        self.finish();
    }
}

fn observe_status(call: &mut CallRecorder, headers: &HeaderMap) {
    if let Some(status) = Status::from_header_map(headers) {
        let code = status.code();
        call.set_outcome(code_name(code), code != Code::Ok);
    }
}

/// Canonical gRPC code names, as they appear in the `error` label.
pub fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "Canceled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
        #[allow(unreachable_patterns)]
        _ => "Unknown",
    }
}
