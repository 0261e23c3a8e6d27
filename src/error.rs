//! Error taxonomy for the scheduler's synchronous failure modes:
//! dependency cycles and deadlocks. Task execution failures and runnability
//! exceptions are not represented here — they are absorbed into `HasRun`
//! and the driver's `error` list, never returned from `start()`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Task dependency cycle found: {0}")]
    Cycle(String),

    #[error("Deadlock detected: {0}")]
    Deadlock(String),
}
