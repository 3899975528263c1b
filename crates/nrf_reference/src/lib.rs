//! Reference store access layer.
//!
//! Assessments read reference layers and lookup tables only through
//! [`ReferenceStore::execute`] with a declarative [`Query`]. Each job wraps
//! the shared store in a [`JobSession`] so every source is read at one pinned
//! version, and large layers are bounded by a [`scope::ScopeStrategy`] before
//! they are loaded.

pub mod error;
pub mod memory;
pub mod query;
pub mod scope;
pub mod session;
pub mod sqlite;
mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryReferenceStore;
pub use query::{
    AttributeFilter, LayerKind, Output, Projection, Query, QueryResult, Row, Source,
    SpatialPredicate, VersionPin,
};
pub use scope::{load_scoped, BufferedBoundaryScope, LocatorScope, Scope, ScopeStrategy, ScopedLoad};
pub use session::JobSession;
pub use sqlite::SqliteReferenceStore;
pub use store::ReferenceStore;
