use std::sync::Arc;

use thiserror::Error;

use crate::task::TaskId;

/// A failure produced by a task callable, cached alongside successful
/// results. Cloning is cheap; every later pull of the same task returns a
/// clone of the original error without re-invoking the callable.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct TaskError(#[from] pub(crate) Arc<anyhow::Error>);

impl TaskError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(e: anyhow::Error) -> Self {
        TaskError(Arc::new(e))
    }
}

/// Errors raised while registering a task. A failed registration leaves the
/// scheduler exactly as it was; no task is stored and no id is consumed.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("dependency task {0} not found")]
    DependencyNotFound(TaskId),

    #[error("dependency task {id} produces `{declared}`, but the handle expects `{expected}`")]
    DependencyTypeMismatch {
        id: TaskId,
        expected: &'static str,
        declared: &'static str,
    },

    #[error("cycle detected in task dependencies")]
    CycleDetected,
}

/// Errors raised while pulling a single task result.
#[derive(Debug, Error)]
pub enum ResultError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("type mismatch: requested `{requested}`, task '{name}' produces `{declared}`")]
    TypeMismatch {
        name: String,
        requested: &'static str,
        declared: &'static str,
    },

    #[error("invalid future handle: the owning scheduler no longer exists")]
    InvalidHandle,

    #[error("task '{0}': {1}")]
    Task(String, TaskError),
}

/// Errors raised by the batch executor.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The post-execution scan found an unexecuted task. Unreachable as long
    /// as the registration-time acyclicity invariant holds.
    #[error("cycle detected during execution")]
    CycleDetected,

    #[error(transparent)]
    Result(#[from] ResultError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_is_clonable() {
        let err = TaskError::new(anyhow::anyhow!("boom"));
        let clone = err.clone();
        assert_eq!(err.to_string(), clone.to_string());
    }

    #[test]
    fn display_names_the_offending_task() {
        let err = ResultError::Task("div".to_string(), TaskError::new(anyhow::anyhow!("boom")));
        assert_eq!(err.to_string(), "task 'div': boom");
    }
}
