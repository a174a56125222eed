use crate::handlers::is_valid_original;
use crate::identity::Identity;
use crate::subnet::TrustedSubnet;
use lariat_core::{last_path_segment, DeleteTask, OwnerId, ShortId, Storage};
use lariat_proto_schema::v1 as proto;
use lariat_proto_schema::v1::shortener_service_server::ShortenerService;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::error;

/// The RPC rendition of the shortener, semantically equivalent to the HTTP
/// surface and sharing its storage and deletion queue.
pub struct ShortenerGrpcServer {
    storage: Arc<dyn Storage>,
    base_url: String,
    trusted_subnet: TrustedSubnet,
    delete_queue: mpsc::Sender<DeleteTask>,
    shutdown: CancellationToken,
}

impl ShortenerGrpcServer {
    pub fn new(
        storage: Arc<dyn Storage>,
        base_url: String,
        trusted_subnet: TrustedSubnet,
        delete_queue: mpsc::Sender<DeleteTask>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            storage,
            base_url,
            trusted_subnet,
            delete_queue,
            shutdown,
        }
    }

    fn short_url(&self, id: &ShortId) -> String {
        id.to_url(&self.base_url)
    }

    /// The identity injected by the interceptor, or `UNAUTHENTICATED` for
    /// the methods that require one.
    fn require_identity<T>(request: &Request<T>) -> Result<OwnerId, Status> {
        request
            .extensions()
            .get::<Identity>()
            .map(|identity| identity.0.clone())
            .filter(|owner| !owner.is_empty())
            .ok_or_else(|| Status::unauthenticated("missing user-id"))
    }
}

#[tonic::async_trait]
impl ShortenerService for ShortenerGrpcServer {
    async fn shorten(
        &self,
        request: Request<proto::ShortenRequest>,
    ) -> Result<Response<proto::ShortenResponse>, Status> {
        let owner = Self::require_identity(&request)?;
        let original = request.into_inner().original_url.trim().to_string();
        if !is_valid_original(&original) {
            return Err(Status::invalid_argument("invalid url"));
        }

        match self.storage.save(&self.shutdown, &original, &owner).await {
            Ok(id) => Ok(Response::new(proto::ShortenResponse {
                short_url: self.short_url(&id),
                already_exists: false,
            })),
            Err(lariat_core::StorageError::AlreadyExists(id)) => {
                Ok(Response::new(proto::ShortenResponse {
                    short_url: self.short_url(&id),
                    already_exists: true,
                }))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn shorten_batch(
        &self,
        request: Request<proto::ShortenBatchRequest>,
    ) -> Result<Response<proto::ShortenBatchResponse>, Status> {
        let owner = Self::require_identity(&request)?;
        let items = request.into_inner().items;
        if items.is_empty() {
            return Err(Status::invalid_argument("empty batch"));
        }

        let mut originals = Vec::with_capacity(items.len());
        for item in &items {
            let original = item.original_url.trim();
            if !is_valid_original(original) {
                return Err(Status::invalid_argument("invalid url"));
            }
            originals.push(original.to_string());
        }

        let ids = match self
            .storage
            .save_batch(&self.shutdown, &originals, &owner)
            .await
        {
            Ok(ids) => ids,
            Err(lariat_core::StorageError::AlreadyExists(_)) => {
                // The batch is committed; answer with the stored mappings.
                let mut ids = Vec::with_capacity(originals.len());
                for original in &originals {
                    let id = self
                        .storage
                        .find_by_original(&self.shutdown, original, &owner)
                        .await
                        .map_err(Status::from)?
                        .ok_or_else(|| Status::internal("batch save failed"))?;
                    ids.push(id);
                }
                ids
            }
            Err(err) => return Err(err.into()),
        };
        if ids.len() != items.len() {
            return Err(Status::internal("batch size mismatch"));
        }

        let items = items
            .iter()
            .zip(&ids)
            .map(|(item, id)| proto::ShortenBatchResponseItem {
                correlation_id: item.correlation_id.clone(),
                short_url: self.short_url(id),
            })
            .collect();
        Ok(Response::new(proto::ShortenBatchResponse { items }))
    }

    async fn redirect(
        &self,
        request: Request<proto::RedirectRequest>,
    ) -> Result<Response<proto::RedirectResponse>, Status> {
        let short_id = request.into_inner().short_id.trim().to_string();
        if short_id.is_empty() {
            return Err(Status::invalid_argument("empty short_id"));
        }
        // A malformed id can never be stored, so reject it before the
        // lookup instead of reporting it as missing.
        let short_id = ShortId::parse(short_id)
            .map_err(|_| Status::invalid_argument("invalid short_id"))?;

        let original = self
            .storage
            .get(&self.shutdown, &short_id)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(proto::RedirectResponse {
            original_url: original,
        }))
    }

    async fn list_user_urls(
        &self,
        request: Request<proto::ListUserUrlsRequest>,
    ) -> Result<Response<proto::ListUserUrlsResponse>, Status> {
        let owner = Self::require_identity(&request)?;

        let urls = self
            .storage
            .list_owner(&self.shutdown, &owner)
            .await
            .map_err(Status::from)?;
        let items = urls
            .into_iter()
            .map(|(id, original)| proto::ListUserUrlsResponseItem {
                short_url: self.short_url(&id),
                original_url: original,
            })
            .collect();
        Ok(Response::new(proto::ListUserUrlsResponse { items }))
    }

    async fn delete_user_urls(
        &self,
        request: Request<proto::DeleteUserUrlsRequest>,
    ) -> Result<Response<proto::DeleteUserUrlsResponse>, Status> {
        let owner = Self::require_identity(&request)?;
        let short_urls = request.into_inner().short_urls;
        if short_urls.is_empty() {
            return Err(Status::invalid_argument("empty items"));
        }

        // Accept either bare ids or full short URLs; whatever remains after
        // the last path segment must still be shaped like a short id.
        let mut short_ids = Vec::with_capacity(short_urls.len());
        for url in &short_urls {
            let id = ShortId::parse(last_path_segment(url))
                .map_err(|_| Status::invalid_argument("invalid short id"))?;
            short_ids.push(id);
        }

        if self
            .delete_queue
            .send(DeleteTask { owner, short_ids })
            .await
            .is_err()
        {
            error!("delete queue is closed");
            return Err(Status::internal("delete failed"));
        }
        Ok(Response::new(proto::DeleteUserUrlsResponse {}))
    }

    async fn ping(
        &self,
        _request: Request<proto::PingRequest>,
    ) -> Result<Response<proto::PingResponse>, Status> {
        self.storage
            .ping(&self.shutdown)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(proto::PingResponse {}))
    }

    async fn stats(
        &self,
        request: Request<proto::StatsRequest>,
    ) -> Result<Response<proto::StatsResponse>, Status> {
        let allowed = request
            .remote_addr()
            .map(|addr| addr.ip())
            .is_some_and(|ip| self.trusted_subnet.allows(ip));
        if !allowed {
            return Err(Status::permission_denied("forbidden by trusted subnet"));
        }

        let users = self
            .storage
            .count_distinct_owners(&self.shutdown)
            .await
            .map_err(Status::from)?;
        let urls = self
            .storage
            .count_live_urls(&self.shutdown)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(proto::StatsResponse { urls, users }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker;
    use lariat_core::StorageError;
    use lariat_storage::MemoryStorage;
    use std::time::Duration;
    use tonic::Code;

    fn server_with(storage: Arc<dyn Storage>) -> (ShortenerGrpcServer, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (delete_queue, _handle) = worker::spawn(storage.clone(), shutdown.clone());
        let server = ShortenerGrpcServer::new(
            storage,
            "http://localhost:8080".to_string(),
            TrustedSubnet::none(),
            delete_queue,
            shutdown.clone(),
        );
        (server, shutdown)
    }

    fn authed<T>(message: T, owner: &str) -> Request<T> {
        let mut request = Request::new(message);
        request
            .extensions_mut()
            .insert(Identity(OwnerId::new(owner)));
        request
    }

    #[tokio::test]
    async fn shorten_requires_identity() {
        let (server, _shutdown) = server_with(Arc::new(MemoryStorage::new()));
        let err = server
            .shorten(Request::new(proto::ShortenRequest {
                original_url: "https://example.com/".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn shorten_round_trips_and_flags_duplicates() {
        let (server, _shutdown) = server_with(Arc::new(MemoryStorage::new()));

        let first = server
            .shorten(authed(
                proto::ShortenRequest {
                    original_url: "https://example.com/".to_string(),
                },
                "user1",
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(!first.already_exists);
        assert!(first.short_url.starts_with("http://localhost:8080/"));

        let second = server
            .shorten(authed(
                proto::ShortenRequest {
                    original_url: "https://example.com/".to_string(),
                },
                "user1",
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(second.already_exists);
        assert_eq!(second.short_url, first.short_url);
    }

    #[tokio::test]
    async fn shorten_rejects_invalid_urls() {
        let (server, _shutdown) = server_with(Arc::new(MemoryStorage::new()));
        let err = server
            .shorten(authed(
                proto::ShortenRequest {
                    original_url: "not a url".to_string(),
                },
                "user1",
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn redirect_maps_the_storage_sentinels() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let (server, shutdown) = server_with(storage.clone());

        let err = server
            .redirect(Request::new(proto::RedirectRequest {
                short_id: "missing0".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);

        let owner = OwnerId::new("user1");
        let id = storage
            .save(&shutdown, "https://example.com/", &owner)
            .await
            .unwrap();
        let resolved = server
            .redirect(Request::new(proto::RedirectRequest {
                short_id: id.as_str().to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resolved.original_url, "https://example.com/");

        storage
            .mark_deleted(&shutdown, &[id.clone()], &owner)
            .await
            .unwrap();
        let err = server
            .redirect(Request::new(proto::RedirectRequest {
                short_id: id.as_str().to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn redirect_rejects_malformed_ids() {
        let (server, _shutdown) = server_with(Arc::new(MemoryStorage::new()));
        for bad in ["short", "way-too-long-for-an-id", "abc/EF12"] {
            let err = server
                .redirect(Request::new(proto::RedirectRequest {
                    short_id: bad.to_string(),
                }))
                .await
                .unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument);
        }
    }

    #[tokio::test]
    async fn delete_rejects_malformed_ids() {
        let (server, _shutdown) = server_with(Arc::new(MemoryStorage::new()));
        let err = server
            .delete_user_urls(authed(
                proto::DeleteUserUrlsRequest {
                    short_urls: vec!["http://localhost:8080/not!valid".to_string()],
                },
                "user1",
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn batch_echoes_correlation_ids() {
        let (server, _shutdown) = server_with(Arc::new(MemoryStorage::new()));

        let response = server
            .shorten_batch(authed(
                proto::ShortenBatchRequest {
                    items: vec![
                        proto::ShortenBatchRequestItem {
                            correlation_id: "a".to_string(),
                            original_url: "https://x.test/".to_string(),
                        },
                        proto::ShortenBatchRequestItem {
                            correlation_id: "b".to_string(),
                            original_url: "https://y.test/".to_string(),
                        },
                    ],
                },
                "user1",
            ))
            .await
            .unwrap()
            .into_inner();

        let ids: Vec<&str> = response
            .items
            .iter()
            .map(|item| item.correlation_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn replayed_batch_answers_the_stored_mappings() {
        let (server, _shutdown) = server_with(Arc::new(MemoryStorage::new()));
        let request = || {
            authed(
                proto::ShortenBatchRequest {
                    items: vec![proto::ShortenBatchRequestItem {
                        correlation_id: "a".to_string(),
                        original_url: "https://x.test/".to_string(),
                    }],
                },
                "user1",
            )
        };

        let first = server.shorten_batch(request()).await.unwrap().into_inner();
        let replay = server.shorten_batch(request()).await.unwrap().into_inner();
        assert_eq!(first.items[0].short_url, replay.items[0].short_url);
    }

    #[tokio::test]
    async fn delete_accepts_full_short_urls_and_drains() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let (server, shutdown) = server_with(storage.clone());
        let owner = OwnerId::new("user1");

        let id = storage
            .save(&shutdown, "https://example.com/", &owner)
            .await
            .unwrap();
        server
            .delete_user_urls(authed(
                proto::DeleteUserUrlsRequest {
                    short_urls: vec![format!("http://localhost:8080/{}", id.as_str())],
                },
                "user1",
            ))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if storage.get(&shutdown, &id).await == Err(StorageError::Deleted) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "worker did not drain");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn stats_without_a_peer_address_is_denied() {
        let (server, _shutdown) = server_with(Arc::new(MemoryStorage::new()));
        let err = server
            .stats(Request::new(proto::StatsRequest {}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
    }
}
