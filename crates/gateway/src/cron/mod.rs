//! Scheduled jobs: the cron data model, the 5-field evaluator, the
//! persisted job store, and the runner that drives due jobs through the
//! same session/loop machinery as interactive traffic.

pub mod model;
pub mod runner;
pub mod schedule;
pub mod store;

pub use model::{CleanupPolicy, CronJob, CronRun, NotifyTarget, PayloadType, RunOutcome};
pub use runner::CronRunner;
pub use schedule::CronExpr;
pub use store::CronStore;
