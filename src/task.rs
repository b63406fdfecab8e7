//! All the generic task-related abstractions.
use std::any::{Any, TypeId};
use std::sync::Arc;

use petgraph::graph::NodeIndex;

/// A type-erased, thread-safe container for a task result.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// An opaque identifier assigned to a task at registration.
///
/// Ids are unique and strictly increasing for the lifetime of a scheduler;
/// there is no removal API, so an id is never reused. An id is only handed
/// out once registration has fully succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) NodeIndex);

impl TaskId {
    /// Returns the underlying index of the task in the graph.
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0.index())
    }
}

pub(crate) trait TypedTask: Send + Sync {
    /// The concrete output type of this task.
    type Output: Send + Sync + 'static;

    fn name(&self) -> String;
    fn dependencies(&self) -> Vec<TaskId>;
    fn execute(&self, dependencies: &[Dynamic]) -> anyhow::Result<Self::Output>;
}

/// The type-erased foundation that allows the scheduler to hold tasks with
/// different output types in one graph. Users never implement this; they go
/// through the typed [`Scheduler::task`](crate::Scheduler::task) builder.
pub(crate) trait Task: Send + Sync {
    fn name(&self) -> String;
    fn dependencies(&self) -> Vec<TaskId>;
    fn result_type(&self) -> TypeId;
    fn result_type_name(&self) -> &'static str;
    fn execute(&self, dependencies: &[Dynamic]) -> anyhow::Result<Dynamic>;
}

// A blanket implementation to automatically bridge the two. This is where the
// type erasure actually happens.
impl<T> Task for T
where
    T: TypedTask + 'static,
{
    fn name(&self) -> String {
        T::name(self)
    }

    fn dependencies(&self) -> Vec<TaskId> {
        T::dependencies(self)
    }

    fn result_type(&self) -> TypeId {
        TypeId::of::<T::Output>()
    }

    fn result_type_name(&self) -> &'static str {
        std::any::type_name::<T::Output>()
    }

    fn execute(&self, dependencies: &[Dynamic]) -> anyhow::Result<Dynamic> {
        // Call the typed method, then erase the result.
        Ok(Arc::new(T::execute(self, dependencies)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Answer;

    impl TypedTask for Answer {
        type Output = i32;

        fn name(&self) -> String {
            "answer".to_string()
        }

        fn dependencies(&self) -> Vec<TaskId> {
            vec![]
        }

        fn execute(&self, _: &[Dynamic]) -> anyhow::Result<i32> {
            Ok(42)
        }
    }

    #[test]
    fn bridge_erases_the_output_type() {
        let task: Arc<dyn Task> = Arc::new(Answer);

        assert_eq!(task.result_type(), TypeId::of::<i32>());
        assert_eq!(task.result_type_name(), "i32");

        let output = task.execute(&[]).unwrap();
        assert_eq!(*output.downcast_ref::<i32>().unwrap(), 42);
    }
}
