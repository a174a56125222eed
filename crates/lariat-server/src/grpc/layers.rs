use crate::identity::Identity;
use futures::future::BoxFuture;
use futures::FutureExt;
use lariat_core::OwnerId;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};
use std::time::Instant;
use tonic::body::Body as GrpcBody;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tower::{Layer, Service};
use tracing::{error, info};

/// Reads the `user-id` metadata entry and, when present and non-blank,
/// injects the identity into the request extensions.
///
/// Rejection is left to the methods: `Redirect` and `Ping` never look at
/// the identity, every other method answers `UNAUTHENTICATED` when it is
/// absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityInterceptor;

impl Interceptor for IdentityInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let owner = request
            .metadata()
            .get("user-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(OwnerId::new);
        if let Some(owner) = owner {
            request.extensions_mut().insert(Identity(owner));
        }
        Ok(request)
    }
}

/// Catches panics escaping a handler and turns them into a trailers-only
/// `INTERNAL` response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryLayer;

impl<S> Layer<S> for RecoveryLayer {
    type Service = Recovery<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recovery { inner }
    }
}

#[derive(Debug, Clone)]
pub struct Recovery<S> {
    inner: S,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for Recovery<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<GrpcBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let method = request.uri().path().to_owned();
        let fut = self.inner.call(request);
        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!(method = %method, "panic in rpc handler");
                    Ok(internal_error_response())
                }
            }
        })
    }
}

/// A trailers-only gRPC response carrying `INTERNAL`.
fn internal_error_response() -> http::Response<GrpcBody> {
    http::Response::builder()
        .status(http::StatusCode::OK)
        .header("content-type", "application/grpc")
        .header("grpc-status", "13")
        .header("grpc-message", "internal error")
        .body(GrpcBody::empty())
        .expect("static response parts are valid")
}

/// Logs every unary call: method, gRPC status code, elapsed milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLogLayer;

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLog { inner }
    }
}

#[derive(Debug, Clone)]
pub struct AccessLog<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for AccessLog<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let method = request.uri().path().to_owned();
        let start = Instant::now();
        let fut = self.inner.call(request);
        Box::pin(async move {
            let result = fut.await;
            if let Ok(response) = &result {
                // Trailers-only errors carry the status in the headers;
                // successful unary responses put it in the trailers, so the
                // absent case logs as OK.
                let code = response
                    .headers()
                    .get("grpc-status")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("0");
                info!(
                    method = %method,
                    code = %code,
                    elapsed_ms = %start.elapsed().as_millis(),
                    "rpc"
                );
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    #[test]
    fn interceptor_injects_a_trimmed_identity() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("user-id", MetadataValue::from_static("  user42  "));

        let request = IdentityInterceptor.call(request).unwrap();
        let identity = request.extensions().get::<Identity>().unwrap();
        assert_eq!(identity.0.as_str(), "user42");
    }

    #[test]
    fn missing_or_blank_metadata_injects_nothing() {
        let request = IdentityInterceptor.call(Request::new(())).unwrap();
        assert!(request.extensions().get::<Identity>().is_none());

        let mut blank = Request::new(());
        blank
            .metadata_mut()
            .insert("user-id", MetadataValue::from_static("   "));
        let blank = IdentityInterceptor.call(blank).unwrap();
        assert!(blank.extensions().get::<Identity>().is_none());
    }

    #[test]
    fn internal_error_response_is_trailers_only() {
        let response = internal_error_response();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.headers().get("grpc-status").unwrap(), "13");
    }
}
