//! # Stepflow
//!
//! Ordered step pipelines for imperative workflows.
//!
//! ## Core Concepts
//!
//! - **Step**: a labeled function over a shared context
//! - **Pipeline**: an ordered list of steps; order is the dependency declaration
//! - **Retry**: exponential backoff for operations that converge eventually
//!
//! A pipeline runs its steps strictly in order. The first failure stops it
//! and is returned wrapped as `failed to <label>: <cause>`; nothing is
//! rolled back.
//!
//! ## Example
//!
//! ```
//! use stepflow::Pipeline;
//!
//! struct Ctx;
//!
//! let pipeline = Pipeline::new("install")
//!     .step("install prerequisites", |_: &Ctx| Ok(()))
//!     .step("deploy CA", |_: &Ctx| anyhow::bail!("no space left on device"));
//!
//! let err = pipeline.execute(&Ctx).unwrap_err();
//! assert_eq!(format!("{err:#}"), "failed to deploy CA: no space left on device");
//! ```
//!
//! ## Provider Traits
//!
//! - [`ProgressCallback`]: receives step start/complete/failure updates
//! - [`RetryCallback`]: receives retry notifications
//!
//! This keeps the crate free of any terminal UI dependency.

pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod types;

// Re-export main types at crate root
pub use pipeline::{Pipeline, Step, StepFn};
pub use progress::{LogProgress, NoProgress, ProgressCallback};
pub use retry::{LogCallback, NoCallback, RetryCallback, with_retry, with_retry_simple};
pub use types::RetryConfig;
