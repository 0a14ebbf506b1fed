//! `db` crate — the run state store.
//!
//! Holds mutable per-run state behind one lock per run and exposes atomic
//! read-modify-write transitions keyed by run id.  The store knows nothing
//! about workflows; the `engine` crate decides what a run's state looks like.

pub mod error;
pub mod store;

pub use error::DbError;
pub use store::RunStore;
