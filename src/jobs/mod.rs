//! Background job tracking
//!
//! Long-running Docker operations (image pulls, tracked execs) are recorded
//! as jobs in a [`ProgressStore`]. Callers get a [`JobRef`] back right away
//! and follow the job through a [`Subscription`].

pub mod store;
pub mod types;

pub use store::{JobSignal, ProgressStore, StoreError, Subscription, DEFAULT_JOB_TTL};
pub use types::*;
