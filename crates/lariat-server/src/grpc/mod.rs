pub mod layers;
pub mod server;

pub use server::ShortenerGrpcServer;

use crate::grpc::layers::{AccessLogLayer, IdentityInterceptor, RecoveryLayer};
use lariat_proto_schema::v1::shortener_service_server::ShortenerServiceServer;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tower::ServiceBuilder;

/// Serves the RPC surface until the shutdown token fires.
///
/// Layer chain, outermost first: panic recovery, access log; identity
/// resolution runs as a tonic interceptor under both.
pub async fn serve(
    service: ShortenerGrpcServer,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let layers = ServiceBuilder::new()
        .layer(RecoveryLayer)
        .layer(AccessLogLayer)
        .into_inner();

    Server::builder()
        .layer(layers)
        .add_service(ShortenerServiceServer::with_interceptor(
            service,
            IdentityInterceptor,
        ))
        .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
        .await
}
