use crate::codec::gzip_codec;
use crate::handlers;
use crate::identity::{identity_middleware, IdentityKeys};
use crate::subnet::TrustedSubnet;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use lariat_core::{DeleteTask, Storage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use typed_builder::TypedBuilder;

/// Shared state behind the HTTP surface.
#[derive(Clone, TypedBuilder)]
pub struct AppState {
    /// The storage realisation selected by the supervisor.
    storage: Arc<dyn Storage>,
    /// The base URL issued short links are rendered against.
    base_url: String,
    /// Cookie signing keys for the identity layer.
    identity: IdentityKeys,
    /// The CIDR gate for the internal stats endpoint.
    trusted_subnet: TrustedSubnet,
    /// Producer side of the deletion worker's queue.
    delete_queue: mpsc::Sender<DeleteTask>,
    /// The supervisor's shutdown token, threaded into storage calls.
    shutdown: CancellationToken,
}

impl AppState {
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn identity(&self) -> &IdentityKeys {
        &self.identity
    }

    pub fn trusted_subnet(&self) -> &TrustedSubnet {
        &self.trusted_subnet
    }

    pub fn delete_queue(&self) -> &mpsc::Sender<DeleteTask> {
        &self.delete_queue
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

pub struct App {}

impl App {
    /// Assembles the HTTP surface.
    ///
    /// Middleware order, outermost first: access log, identity, codec —
    /// identity cookies are minted even on requests the codec rejects, and
    /// every exchange is logged.
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/", post(handlers::create_short_url))
            .route("/ping", get(handlers::ping))
            .route("/{id}", get(handlers::redirect))
            .route("/api/shorten", post(handlers::api_shorten))
            .route("/api/shorten/batch", post(handlers::api_shorten_batch))
            .route(
                "/api/user/urls",
                get(handlers::list_user_urls).delete(handlers::delete_user_urls),
            )
            .route("/api/internal/stats", get(handlers::internal_stats))
            .layer(middleware::from_fn(gzip_codec))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                identity_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
