//! Virtual-user load generation engine
//!
//! A [`RunController`] ramps virtual users up and down following a staged
//! profile, each one repeatedly executing a user-supplied [`Workload`].
//! Iterations and requests stream into a shared metric sink, and thresholds
//! are evaluated against it while the run is in progress to decide its
//! verdict or end it early.
//!
//! ```ignore
//! let controller = RunController::new(config, workload_fn(|ctx| async move {
//!     let res = ctx.get("/").await;
//!     ctx.check("status is 200", res.status == 200);
//!     Ok(())
//! }))?;
//! controller.cancel_on_ctrl_c();
//! let result = controller.run().await;
//! ```

pub mod controller;
pub mod error;
pub mod executor;
pub mod pool;
pub mod result;
pub mod scheduler;
pub mod state;
pub mod workload;

pub use controller::RunController;
pub use error::{EngineError, EngineResult};
pub use executor::{IterationOutcome, WorkloadExecutor, INTERRUPTED};
pub use pool::{DrainReport, PoolSettings, PoolStats, VirtualUserPool};
pub use result::{Evaluation, RunResult};
pub use scheduler::{stage_trend, target_at, SchedulerState, StageScheduler, StageTrend, StateSpan, Tick};
pub use state::{RunPhase, RunState, Verdict};
pub use workload::{workload_fn, FnWorkload, IterationContext, Workload};
