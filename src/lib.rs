#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! A time-of-day reminder engine.
//!
//! Triggers are polled once a second by a [`Scheduler`]; when one comes due
//! it is handed to a [`NotificationSink`].

pub mod config;
pub mod scheduler;
/// where fired triggers are delivered
pub mod sink;
pub mod store;
pub mod trigger;

pub use scheduler::{LoadReport, RunState, Scheduler, SchedulerError};
pub use sink::{NotificationSink, SinkResult};
pub use store::{JsonFileStore, LoadWarning, MemoryStore, RecordPolicy, Store};
pub use trigger::{parse_time_str, NewTrigger, Trigger, TriggerEdit, TriggerId};
