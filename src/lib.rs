#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod error;
mod handle;
mod scheduler;
mod task;

pub use crate::error::{ExecuteError, ResultError, ScheduleError, TaskError};
pub use crate::handle::{Dependencies, FutureResult};
pub use crate::scheduler::{Scheduler, TaskBinder, TaskDef};
pub use crate::task::{Dynamic, TaskId};

/// Initializes a global tracing subscriber honoring `RUST_LOG`. Call once,
/// early; library code itself only emits events and never installs one.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt, registry};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}
