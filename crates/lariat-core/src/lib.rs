//! Core types and the storage contract for the Lariat URL shortener.
//!
//! This crate provides the identifiers, record shapes, error taxonomy and
//! the [`Storage`] contract shared by the storage realisations and both
//! request surfaces.

pub mod error;
pub mod owner;
pub mod record;
pub mod short_id;
pub mod storage;
pub mod tasks;

pub use error::{Result, StorageError};
pub use owner::OwnerId;
pub use record::UrlRecord;
pub use short_id::{last_path_segment, InvalidShortId, ShortId};
pub use storage::Storage;
pub use tasks::DeleteTask;
