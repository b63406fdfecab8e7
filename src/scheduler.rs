//! Task registration and the scheduler engine.
use std::any::TypeId;
use std::borrow::Cow;
use std::collections::{HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use petgraph::Direction;
use petgraph::graph::{Graph, NodeIndex};
use tracing::Level;

use crate::error::{ExecuteError, ResultError, ScheduleError, TaskError};
use crate::handle::{Dependencies, DependencySpec, FutureResult};
use crate::task::{Dynamic, Task, TaskId, TypedTask};

const LOCK: &str = "scheduler lock poisoned";

pub(crate) struct Slot {
    task: Arc<dyn Task>,
    /// Outcome of the single execution, cached forever. `None` means the
    /// callable has not been invoked yet.
    cache: Option<Result<Dynamic, TaskError>>,
}

pub(crate) struct Inner {
    pub(crate) graph: Graph<Slot, ()>,
}

/// A lazy task scheduler.
///
/// Tasks are registered through the [`task`](Scheduler::task) builder and
/// wired together with [`FutureResult`] handles; the handles passed to
/// [`depends_on`](TaskDef::depends_on) *are* the dependency declaration,
/// there is no separate wiring step. Results are pulled lazily through
/// [`result`](Scheduler::result) / [`FutureResult::get`], or the whole graph
/// is driven at once by [`execute_all`](Scheduler::execute_all).
///
/// Every callable runs at most once per scheduler; both values and failures
/// are memoized. All calls are expected to originate from a single logical
/// thread of control; the scheduler does not serialize concurrent mutation.
///
/// # Example
///
/// ```
/// use tsumugi::Scheduler;
///
/// # fn main() -> anyhow::Result<()> {
/// let scheduler = Scheduler::new();
///
/// let a = scheduler.task().name("a").run(|| Ok(2))?;
/// let b = scheduler.task().name("b").run(|| Ok(3))?;
/// let sum = scheduler
///     .task()
///     .name("sum")
///     .depends_on((scheduler.future::<i32>(a), scheduler.future::<i32>(b)))
///     .run(|(a, b)| Ok(a + b))?;
///
/// scheduler.execute_all()?;
/// assert_eq!(scheduler.result::<i32>(sum)?, 5);
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    inner: Arc<RwLock<Inner>>,
}

impl Scheduler {
    /// Creates a new, empty scheduler.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                graph: Graph::new(),
            })),
        }
    }

    /// The entry point for registering a task. Starts in the "empty" state;
    /// chain [`name`](TaskDef::name) and [`depends_on`](TaskDef::depends_on)
    /// before finishing with `run`.
    pub fn task(&self) -> TaskDef<'_> {
        TaskDef {
            scheduler: self,
            name: None,
        }
    }

    /// Returns a typed handle to the eventual result of `id`.
    ///
    /// Never fails eagerly; existence and the type parameter are validated
    /// only when the handle is forced or used as a dependency.
    pub fn future<T>(&self, id: TaskId) -> FutureResult<T> {
        FutureResult::new(id, Arc::downgrade(&self.inner))
    }

    /// Forces the task `id` and returns a clone of its cached result.
    ///
    /// The declared result type is checked *before* execution; a mismatch
    /// reports [`ResultError::TypeMismatch`] without invoking the callable.
    /// Forcing recurses into the task's dependency closure only — sibling
    /// branches of the graph are left untouched.
    pub fn result<T>(&self, id: TaskId) -> Result<T, ResultError>
    where
        T: Clone + Send + Sync + 'static,
    {
        pull::<T>(&self.inner, id)
    }

    /// Executes every registered task in dependency order.
    ///
    /// Tasks with no outstanding dependencies enter a ready queue; draining
    /// the queue decrements the counters of each finished task's dependents
    /// through the reverse adjacency, which is recomputed on every run.
    /// Already-executed tasks are skipped, so calling this again after full
    /// completion performs no callable invocations and cannot fail.
    pub fn execute_all(&self) -> Result<(), ExecuteError> {
        let (indices, mut outstanding) = {
            let inner = self.inner.read().expect(LOCK);
            let indices: Vec<NodeIndex> = inner.graph.node_indices().collect();
            let outstanding: Vec<usize> = indices
                .iter()
                .map(|&index| {
                    inner
                        .graph
                        .neighbors_directed(index, Direction::Incoming)
                        .count()
                })
                .collect();
            (indices, outstanding)
        };

        tracing::debug!(tasks = indices.len(), "executing task graph");

        let mut queue: VecDeque<NodeIndex> = indices
            .iter()
            .copied()
            .filter(|&index| outstanding[index.index()] == 0)
            .collect();

        while let Some(index) = queue.pop_front() {
            force(&self.inner, TaskId(index))?;

            let dependents: Vec<NodeIndex> = {
                let inner = self.inner.read().expect(LOCK);
                inner
                    .graph
                    .neighbors_directed(index, Direction::Outgoing)
                    .collect()
            };

            for dependent in dependents {
                outstanding[dependent.index()] -= 1;
                if outstanding[dependent.index()] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        // Registration keeps the graph acyclic, so the queue drains every
        // task; an unexecuted leftover means that invariant was broken.
        let inner = self.inner.read().expect(LOCK);
        for &index in &indices {
            if inner.graph[index].cache.is_none() {
                return Err(ExecuteError::CycleDetected);
            }
        }

        Ok(())
    }

    /// The number of registered tasks.
    pub fn task_count(&self) -> usize {
        self.inner.read().expect(LOCK).graph.node_count()
    }

    fn insert_node<R, D, F>(&self, node: TaskNode<R, D, F>) -> Result<TaskId, ScheduleError>
    where
        R: Send + Sync + 'static,
        D: Dependencies + Send + Sync + 'static,
        F: for<'b> Fn(D::Output<'b>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let specs = node.dependencies.specs();
        self.insert(specs, Arc::new(node))
    }

    fn insert(
        &self,
        specs: Vec<DependencySpec>,
        task: Arc<dyn Task>,
    ) -> Result<TaskId, ScheduleError> {
        let mut inner = self.inner.write().expect(LOCK);

        // Every declared dependency must exist, and its declared output type
        // must be the one the handle was created with. Checking here makes
        // the downcast during execution infallible.
        for spec in &specs {
            let slot = inner
                .graph
                .node_weight(spec.id.0)
                .ok_or(ScheduleError::DependencyNotFound(spec.id))?;

            if slot.task.result_type() != spec.output_type {
                return Err(ScheduleError::DependencyTypeMismatch {
                    id: spec.id,
                    expected: spec.output_type_name,
                    declared: slot.task.result_type_name(),
                });
            }
        }

        if has_cycle(&inner.graph, specs.iter().map(|spec| spec.id.0)) {
            return Err(ScheduleError::CycleDetected);
        }

        // All checks passed; only now is a node (and thereby an id) created.
        let name = task.name();
        let index = inner.graph.add_node(Slot { task, cache: None });

        let mut seen = HashSet::new();
        for spec in &specs {
            if seen.insert(spec.id.0) {
                inner.graph.add_edge(spec.id.0, index, ());
            }
        }

        tracing::debug!(
            task = %name,
            id = index.index(),
            dependencies = specs.len(),
            "registered task"
        );

        Ok(TaskId(index))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Scheduler {
    /// Renders the task graph as a Mermaid diagram, edges labeled with the
    /// source task's output type.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect(LOCK);

        writeln!(f, "graph LR")?;

        for index in inner.graph.node_indices() {
            let name = inner.graph[index].task.name().replace('"', "\\\""); // Simple escape
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in inner.graph.edge_indices() {
            let (source, target) = inner.graph.edge_endpoints(edge).unwrap();
            let type_name = inner.graph[source]
                .task
                .result_type_name()
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            writeln!(
                f,
                "    {} -- \"{}\" --> {}",
                source.index(),
                type_name,
                target.index()
            )?;
        }

        Ok(())
    }
}

/// Looks up `id`, verifies the requested type against the task's declared
/// output type, forces the task if needed, and clones the cached value out.
pub(crate) fn pull<T>(inner: &Arc<RwLock<Inner>>, id: TaskId) -> Result<T, ResultError>
where
    T: Clone + Send + Sync + 'static,
{
    {
        let guard = inner.read().expect(LOCK);
        let slot = guard
            .graph
            .node_weight(id.0)
            .ok_or(ResultError::TaskNotFound(id))?;

        if slot.task.result_type() != TypeId::of::<T>() {
            return Err(ResultError::TypeMismatch {
                name: slot.task.name(),
                requested: std::any::type_name::<T>(),
                declared: slot.task.result_type_name(),
            });
        }
    }

    let value = force(inner, id)?;
    let value = match value.downcast::<T>() {
        Ok(value) => value,
        // Registration and the check above keep this impossible.
        Err(_) => unreachable!("task output type drifted from its declaration"),
    };

    Ok(value.as_ref().clone())
}

/// Executes the task once and memoizes the outcome, recursing into unforced
/// dependencies first. A pull may recurse to a depth proportional to the
/// longest dependency chain; exhausting the call stack on a very long chain
/// is a resource limit, not corruption.
fn force(inner: &Arc<RwLock<Inner>>, id: TaskId) -> Result<Dynamic, ResultError> {
    let (task, dependencies) = {
        let guard = inner.read().expect(LOCK);
        let slot = guard
            .graph
            .node_weight(id.0)
            .ok_or(ResultError::TaskNotFound(id))?;

        if let Some(cached) = &slot.cache {
            return cached
                .clone()
                .map_err(|err| ResultError::Task(slot.task.name(), err));
        }

        (slot.task.clone(), slot.task.dependencies())
    };

    // Force the dependency closure first. No lock is held at this point, so
    // a callable that captured a handle may re-enter the scheduler.
    let mut resolved = Vec::with_capacity(dependencies.len());
    for dependency in dependencies {
        resolved.push(force(inner, dependency)?);
    }

    let span = tracing::span!(Level::DEBUG, "task", name = %task.name());
    let outcome = {
        let _enter = span.enter();
        task.execute(&resolved).map_err(TaskError::from)
    };

    let mut guard = inner.write().expect(LOCK);
    let slot = guard
        .graph
        .node_weight_mut(id.0)
        .ok_or(ResultError::TaskNotFound(id))?;

    let cached = slot.cache.get_or_insert(outcome);
    cached
        .clone()
        .map_err(|err| ResultError::Task(task.name(), err))
}

/// Depth-first re-validation of the subgraph reachable from the declared
/// dependencies, following only already-existing forward edges and reporting
/// a cycle when a node on the current recursion stack is revisited.
///
/// The new task has no index yet and cannot appear as a successor of any
/// existing node, so this re-confirms that the pre-existing graph (already
/// acyclic by invariant) stays acyclic; it does not model the edges about to
/// be inserted. Worst-case cost is the size of the reachable subgraph.
fn has_cycle<N, E>(graph: &Graph<N, E>, roots: impl IntoIterator<Item = NodeIndex>) -> bool {
    let mut visited = HashSet::new();
    let mut stack = HashSet::new();

    roots
        .into_iter()
        .any(|root| cycle_dfs(graph, root, &mut visited, &mut stack))
}

fn cycle_dfs<N, E>(
    graph: &Graph<N, E>,
    node: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    stack: &mut HashSet<NodeIndex>,
) -> bool {
    if stack.contains(&node) {
        return true;
    }
    if !visited.insert(node) {
        return false;
    }

    stack.insert(node);
    for dependency in graph.neighbors_directed(node, Direction::Incoming) {
        if cycle_dfs(graph, dependency, visited, stack) {
            return true;
        }
    }
    stack.remove(&node);

    false
}

/// Builder state for a task with no dependencies declared yet.
pub struct TaskDef<'a> {
    scheduler: &'a Scheduler,
    name: Option<Cow<'static, str>>,
}

impl<'a> TaskDef<'a> {
    /// Names the task for logs, errors and graph rendering. Defaults to the
    /// callback's type name.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declares the task's dependencies. Accepts a single handle or a tuple
    /// of up to two handles; each handle's task will run before this one.
    pub fn depends_on<D>(self, dependencies: D) -> TaskBinder<'a, D>
    where
        D: Dependencies,
    {
        TaskBinder {
            scheduler: self.scheduler,
            name: self.name,
            dependencies,
        }
    }

    /// Registers a zero-dependency task.
    pub fn run<F, R>(self, callback: F) -> Result<TaskId, ScheduleError>
    where
        F: Fn() -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        let name = self.name.unwrap_or(std::any::type_name::<F>().into());
        self.scheduler.insert_node(TaskNode {
            name,
            dependencies: (),
            callback: move |()| callback(),
            _phantom: PhantomData,
        })
    }
}

/// Builder state for a task whose dependencies are declared.
pub struct TaskBinder<'a, D> {
    scheduler: &'a Scheduler,
    name: Option<Cow<'static, str>>,
    dependencies: D,
}

impl<'a, D> TaskBinder<'a, D>
where
    D: Dependencies + Send + Sync + 'static,
{
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Registers the task. The callback receives the resolved dependency
    /// outputs by reference, in declaration order.
    pub fn run<F, R>(self, callback: F) -> Result<TaskId, ScheduleError>
    where
        F: for<'b> Fn(D::Output<'b>) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        let name = self.name.unwrap_or(std::any::type_name::<F>().into());
        self.scheduler.insert_node(TaskNode {
            name,
            dependencies: self.dependencies,
            callback,
            _phantom: PhantomData,
        })
    }
}

struct TaskNode<R, D, F> {
    name: Cow<'static, str>,
    dependencies: D,
    callback: F,
    _phantom: PhantomData<R>,
}

impl<R, D, F> TypedTask for TaskNode<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies + Send + Sync,
    F: for<'a> Fn(D::Output<'a>) -> anyhow::Result<R> + Send + Sync,
{
    type Output = R;

    fn name(&self) -> String {
        self.name.to_string()
    }

    fn dependencies(&self) -> Vec<TaskId> {
        self.dependencies
            .specs()
            .into_iter()
            .map(|spec| spec.id)
            .collect()
    }

    fn execute(&self, dependencies: &[Dynamic]) -> anyhow::Result<R> {
        let resolved = self.dependencies.resolve(dependencies);
        (self.callback)(resolved)
    }
}
