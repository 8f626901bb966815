//! # PostgreSQL Conflux Backend
//!
//! PostgreSQL-backed implementations of the `conflux` crate's storage traits:
//! [`PgEventStore`], [`PgLivenessStore`], [`PgSubscriptionStateStore`], and
//! [`PgLockManager`]. [`Migrator`] creates the tables they need.
mod error;
mod event_store;
mod liveness;
mod lock;
mod migrator;
mod subscription_state;

pub use crate::event_store::{database_now, PgEventStore};
pub use crate::liveness::PgLivenessStore;
pub use crate::lock::PgLockManager;
pub use crate::migrator::Migrator;
pub use crate::subscription_state::PgSubscriptionStateStore;
pub use error::Error;
