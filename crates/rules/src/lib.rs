//! Condition language and alarm parameter bundles.
//!
//! This crate provides:
//! - [`ConditionExpression`]: OR-of-AND clauses over tagged predicates
//! - [`ConditionEvaluator`]: total evaluation against time and button history
//! - [`AlarmParameters`] / [`AlarmSettings`]: the override bundles carried by
//!   schedule entries and alarm definitions

pub mod error;
pub mod evaluator;
pub mod params;
pub mod schema;

pub use error::EvalError;
pub use evaluator::{ConditionEvaluator, EvalContext};
pub use params::{AlarmParameters, AlarmSettings, RestingState};
pub use schema::{ConditionExpression, Predicate};
