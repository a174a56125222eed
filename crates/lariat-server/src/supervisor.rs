use crate::app::{App, AppState};
use crate::config::{self, Config};
use crate::grpc::{self, ShortenerGrpcServer};
use crate::identity::IdentityKeys;
use crate::subnet::{InvalidSubnet, TrustedSubnet};
use crate::tls::{TlsError, TlsMaterial};
use crate::worker;
use lariat_core::{Storage, StorageError};
use lariat_storage::{FileStorage, MemoryStorage, PostgresStorage};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Deadline both servers get to finish in-flight work after the shutdown
/// signal.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address: {0}")]
    Addr(#[from] std::net::AddrParseError),
    #[error(transparent)]
    Subnet(#[from] InvalidSubnet),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("storage initialisation failed: {0}")]
    Storage(#[from] StorageError),
    #[error("http server failed: {0}")]
    Http(#[from] std::io::Error),
    #[error("grpc server failed: {0}")]
    Grpc(#[from] tonic::transport::Error),
    #[error("{0} stopped unexpectedly")]
    Stopped(&'static str),
}

/// Runs the service until an interrupt or terminate signal arrives, then
/// shuts everything down gracefully.
pub async fn run(config: Config) -> Result<(), ServerError> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting lariat");

    let trusted_subnet = TrustedSubnet::from_config(config.trusted_subnet.as_deref())?;

    // Termination is delegated to the fronting collaborator; loading the
    // material here makes a misconfigured deployment fail before any
    // listener binds.
    if config.enable_https {
        let _material = TlsMaterial::load(&config.cert_file, &config.key_file).await?;
        info!(cert = %config.cert_file, key = %config.key_file, "loaded TLS material");
    }

    // File storage wins over the database when both are configured.
    let mut database: Option<Arc<PostgresStorage>> = None;
    let storage: Arc<dyn Storage> = if let Some(path) = &config.file_storage_path {
        info!(path = %path, "using file storage");
        Arc::new(FileStorage::open(path).await?)
    } else if let Some(dsn) = &config.database_dsn {
        info!("using postgresql storage");
        let postgres = Arc::new(PostgresStorage::connect(dsn).await?);
        database = Some(postgres.clone());
        postgres
    } else {
        info!("using in-memory storage");
        Arc::new(MemoryStorage::new())
    };

    let shutdown = CancellationToken::new();
    let (delete_queue, worker_handle) = worker::spawn(storage.clone(), shutdown.clone());

    let state = AppState::builder()
        .storage(storage.clone())
        .base_url(config.base_url.clone())
        .identity(IdentityKeys::new(config.secret_key.clone()))
        .trusted_subnet(trusted_subnet.clone())
        .delete_queue(delete_queue.clone())
        .shutdown(shutdown.clone())
        .build();

    let http_addr = config::bind_addr(&config.listen_addr)?;
    let grpc_addr = config::bind_addr(&config.grpc_addr)?;

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    info!(listen_addr = %listener.local_addr()?, "starting http server");
    let router = App::router(state);
    let http_shutdown = shutdown.clone();
    let mut http_task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await
    });

    info!(listen_addr = %grpc_addr, "starting grpc server");
    let grpc_service = ShortenerGrpcServer::new(
        storage,
        config.base_url.clone(),
        trusted_subnet,
        delete_queue,
        shutdown.clone(),
    );
    let mut grpc_task = tokio::spawn(grpc::serve(grpc_service, grpc_addr, shutdown.clone()));

    let result = tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
        result = &mut http_task => match result {
            Ok(Ok(())) => Err(ServerError::Stopped("http server")),
            Ok(Err(err)) => Err(ServerError::Http(err)),
            Err(_) => Err(ServerError::Stopped("http server")),
        },
        result = &mut grpc_task => match result {
            Ok(Ok(())) => Err(ServerError::Stopped("grpc server")),
            Ok(Err(err)) => Err(ServerError::Grpc(err)),
            Err(_) => Err(ServerError::Stopped("grpc server")),
        },
    };

    // Cancel the root token: handlers observe it through storage calls, the
    // servers leave their accept loops, the worker stops consuming.
    shutdown.cancel();
    stop_within_deadline(http_task, "http server").await;
    stop_within_deadline(grpc_task, "grpc server").await;
    let _ = worker_handle.await;

    if let Some(postgres) = database {
        postgres.close().await;
        info!("database connection closed");
    }

    if result.is_ok() {
        info!("shutdown complete");
    }
    result
}

/// Waits for a server task up to the shutdown deadline, then aborts it,
/// forcing the remaining connections closed.
async fn stop_within_deadline<E>(mut task: JoinHandle<Result<(), E>>, name: &'static str) {
    if tokio::time::timeout(SHUTDOWN_DEADLINE, &mut task).await.is_err() {
        warn!(server = name, "did not stop within the shutdown deadline; aborting");
        task.abort();
    }
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt =
            signal(SignalKind::interrupt()).expect("interrupt handler installs on unix");
        let mut terminate =
            signal(SignalKind::terminate()).expect("terminate handler installs on unix");
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
