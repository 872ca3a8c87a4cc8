//! Recurring alarm schedules.
//!
//! This crate provides:
//! - [`ScheduleDocument`]: the JSON schedule file schema
//! - [`RuleSet`]: a compiled recurrence definition answering "next occurrence
//!   at or after this instant", honouring exclusion rules and dates
//! - [`ScheduleStore`]: a content-addressed cache that only recompiles the
//!   schedule when the file's SHA-256 changes

pub mod document;
pub mod error;
pub mod recurrence;
pub mod store;

pub use document::ScheduleDocument;
pub use error::{Result, ScheduleError};
pub use recurrence::{Occurrence, OccurrenceSource, RuleSet, Schedule};
pub use store::{ScheduleStore, StoreStatus};
