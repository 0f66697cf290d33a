//! Pass/fail criteria for Volley load runs
//!
//! Thresholds are declared as a metric selector plus a predicate string and
//! compiled once, before a run starts. Evaluation is a pure function of the
//! current metric sink contents.

pub mod error;
pub mod evaluator;
pub mod expr;
pub mod threshold;

pub use error::ThresholdError;
pub use evaluator::{ThresholdEvaluator, ThresholdResult};
pub use expr::{Comparator, Statistic, ThresholdExpr};
pub use threshold::{MetricSelector, Threshold};
