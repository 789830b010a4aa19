//! autoscaler-state — embedded state store for the scaling engine.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for scaling policies, the scaling history audit trail, cooldown
//! expiries, and both views of the active schedules (the scaling engine's own
//! records and the scheduler's authoritative view).
//!
//! # Architecture
//!
//! Domain types are JSON-serialized into redb's `&[u8]` value columns.
//! History keys are `{app_id}/{timestamp}-{seq}` with a zero-padded
//! timestamp, so a range scan over one app returns records in time order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.
//!
//! # Single writer process
//!
//! redb holds an exclusive lock on its file for as long as a `Database` is
//! open. Only the process that opened a store can read or write it, and a
//! second `open` of the same path fails, even from the same process. The
//! scaling engine daemon therefore owns all three of its databases: the
//! policy and scheduler views in `policy_db` and `scheduler_db` must be
//! written by code running inside that process (or while it is stopped),
//! not by a separate policy or scheduler service.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
