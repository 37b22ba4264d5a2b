//! Applicant-tracking core: countries, tags, candidates, job requisitions and
//! applications kept in a document store, served from in-memory caches.
//!
//! Applications are the authoritative relation between candidates and
//! requisitions. Both parents carry a mirror of their applications
//! (`JobsApplied`, `Applicants`) that the [`Engine`] keeps in step.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod memory;
pub mod models;
mod saga;
pub mod store;
mod tags;
pub mod validation;

pub use cache::EntityCache;
pub use config::Config;
pub use engine::{CacheStatus, Cached, Crud, Engine};
pub use error::{Error, Result, StoreError};
pub use ids::IdAllocator;
pub use memory::{MemoryStore, StoreOp};
pub use models::{Application, Candidate, Country, Document, EntityKind, JobRequisition, Tag};
pub use store::{DocumentStore, Filter, Patch, SqliteStore};
pub use validation::Mode;
