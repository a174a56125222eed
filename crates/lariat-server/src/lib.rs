//! The Lariat URL-shortening service.
//!
//! Wires the storage realisations behind two request surfaces — a REST+JSON
//! HTTP surface and a semantically equivalent gRPC surface — plus the
//! identity layer, the request codec, the deletion worker and the
//! supervisor that coordinates startup and graceful shutdown.

pub mod app;
pub mod codec;
pub mod config;
pub mod error;
pub mod grpc;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod subnet;
pub mod supervisor;
pub mod tls;
pub mod worker;

pub use supervisor::{run, ServerError};
