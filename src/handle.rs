//! Typed handles to not-yet-computed task results.
use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::{RwLock, Weak};

use crate::error::ResultError;
use crate::scheduler::{self, Inner};
use crate::task::{Dynamic, TaskId};

/// A type-safe reference to a task's eventual result.
///
/// A `FutureResult<T>` is a lightweight token obtained from
/// [`Scheduler::future`](crate::Scheduler::future). It is used in two ways:
///
/// * as a dependency declaration, passed to
///   [`TaskDef::depends_on`](crate::TaskDef::depends_on), wiring the new task
///   after the one the handle points to;
/// * as a lazy accessor, [`get`](FutureResult::get) forces the task (and,
///   recursively, exactly the tasks it depends on) and returns the cached
///   value.
///
/// The handle holds a weak reference to the scheduler that created it.
/// Forcing a handle that outlived its scheduler reports
/// [`ResultError::InvalidHandle`] rather than anything worse.
pub struct FutureResult<T> {
    pub(crate) id: TaskId,
    pub(crate) inner: Weak<RwLock<Inner>>,
    _phantom: PhantomData<T>,
}

impl<T> FutureResult<T> {
    pub(crate) fn new(id: TaskId, inner: Weak<RwLock<Inner>>) -> Self {
        Self {
            id,
            inner,
            _phantom: PhantomData,
        }
    }

    /// The id of the task this handle points to.
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T> FutureResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Forces the referenced task and returns a clone of its cached result.
    ///
    /// The callable runs at most once; later calls return the memoized value
    /// (or the memoized failure). Dependencies are forced recursively, so a
    /// single `get` may cascade into an arbitrary chain of ancestor tasks —
    /// but never into sibling branches the task does not depend on.
    pub fn get(&self) -> Result<T, ResultError> {
        let inner = self.inner.upgrade().ok_or(ResultError::InvalidHandle)?;
        scheduler::pull::<T>(&inner, self.id)
    }
}

impl<T> Clone for FutureResult<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: self.inner.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for FutureResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FutureResult<{}>({})", std::any::type_name::<T>(), self.id)
    }
}

/// What a single handle declares about its dependency: which task, and which
/// output type the handle was created with.
pub struct DependencySpec {
    pub(crate) id: TaskId,
    pub(crate) output_type: TypeId,
    pub(crate) output_type_name: &'static str,
}

impl<T: 'static> FutureResult<T> {
    pub(crate) fn spec(&self) -> DependencySpec {
        DependencySpec {
            id: self.id,
            output_type: TypeId::of::<T>(),
            output_type_name: std::any::type_name::<T>(),
        }
    }
}

/// A trait that enables handles to be used as dependencies for a task.
///
/// Implemented for `()`, a bare [`FutureResult<T>`], and tuples of handles up
/// to two elements. Tasks are capped at two upstream results; the cap is a
/// definition-time constraint, there is simply no implementation for larger
/// tuples.
pub trait Dependencies {
    /// The resulting type when all dependencies are resolved. For a tuple of
    /// handles this is a tuple of `&'a T`s.
    type Output<'a>;

    /// Returns the declaration for each dependency, in positional order.
    fn specs(&self) -> Vec<DependencySpec>;

    /// Takes a slice of type-erased dependency outputs and resolves them into
    /// a concrete `Output` type.
    ///
    /// # Panics
    /// Panics if an output cannot be downcast to its expected concrete type.
    /// Registration verifies every handle against the dependency's declared
    /// output type, so this path is unreachable through the public API.
    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a>;
}

impl Dependencies for () {
    type Output<'a> = ();

    fn specs(&self) -> Vec<DependencySpec> {
        vec![]
    }

    fn resolve<'a>(&self, _outputs: &'a [Dynamic]) -> Self::Output<'a> {}
}

impl<T: Send + Sync + 'static> Dependencies for FutureResult<T> {
    type Output<'a> = &'a T;

    fn specs(&self) -> Vec<DependencySpec> {
        vec![self.spec()]
    }

    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
        outputs[0].downcast_ref::<T>().unwrap_or_else(|| {
            panic!(
                "expected {} but got something else",
                std::any::type_name::<T>()
            )
        })
    }
}

macro_rules! impl_deps {
    ($($T:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($T: Send + Sync + 'static),*> Dependencies for ($(FutureResult<$T>,)*) {
            type Output<'a> = ($(&'a $T,)*);

            fn specs(&self) -> Vec<DependencySpec> {
                let ($($T,)*) = self;
                vec![$($T.spec()),*]
            }

            fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
                let mut iter = outputs.iter();
                ($({
                    let out = iter.next().unwrap();
                    out.downcast_ref::<$T>().unwrap_or_else(|| {
                        panic!(
                            "expected {} but got something else",
                            std::any::type_name::<$T>()
                        )
                    })
                },)*)
            }
        }
    };
}

impl_deps!(A);
impl_deps!(A, B);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use petgraph::graph::NodeIndex;

    use super::*;

    fn handle<T>(index: usize) -> FutureResult<T> {
        FutureResult::new(TaskId(NodeIndex::new(index)), Weak::new())
    }

    #[test]
    fn specs_preserve_positional_order() {
        let deps = (handle::<i32>(0), handle::<String>(1));
        let specs = deps.specs();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].id.index(), 0);
        assert_eq!(specs[0].output_type, TypeId::of::<i32>());
        assert_eq!(specs[1].id.index(), 1);
        assert_eq!(specs[1].output_type, TypeId::of::<String>());
    }

    #[test]
    fn resolve_downcasts_in_order() {
        let deps = (handle::<i32>(0), handle::<String>(1));
        let outputs: Vec<Dynamic> = vec![Arc::new(7_i32), Arc::new("seven".to_string())];

        let (a, b) = deps.resolve(&outputs);
        assert_eq!(*a, 7);
        assert_eq!(b, "seven");
    }

    #[test]
    fn get_after_scheduler_drop_reports_invalid_handle() {
        let stale = handle::<i32>(0);
        assert!(matches!(stale.get(), Err(ResultError::InvalidHandle)));
    }
}
