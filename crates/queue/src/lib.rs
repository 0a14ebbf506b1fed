//! `queue` crate — the worker-facing step dispatcher.
//!
//! Ready steps from every run wait in one FIFO [`ReadyQueue`].  Workers pull
//! from it through [`Dispatcher::poll`]; each pull is re-checked and leased
//! inside the owning run's transition, so a step is handed out at most once
//! per attempt.  [`LeaseSweeper`] reclaims leases whose holders went quiet.

pub mod dispatcher;
pub mod ready;
pub mod sweeper;

pub use dispatcher::{Dispatcher, SweepReport};
pub use ready::{ReadyEntry, ReadyQueue};
pub use sweeper::LeaseSweeper;
