/*
 * Copyright 2020 Nikhil Marathe <nsm.nikhil@gmail.com>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! The opaque task contract: `Task`, the `TaskGroup` barrier,
//! `RunnableStatus`, and `HasRun`.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::BuildContext;

/// Status a task reports when asked whether it can run now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnableStatus {
    RunMe,
    AskLater,
    SkipMe,
    CancelMe,
    Exception,
}

/// Terminal status a task (or the core, on its behalf) settles into.
/// Any variant here satisfies the "predecessor is complete" predicate,
/// regardless of whether it represents success or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HasRun {
    Success,
    Skipped,
    Canceled,
    Exception,
    Failed(String),
}

/// Shared handle to a task. Exactly one of {resident in the driver's
/// bookkeeping, in flight on a channel} holds it at a time, so the `Mutex`
/// here exists only to make the handle `Sync` for cross-thread moves, not to
/// arbitrate real contention.
pub type TaskHandle = Arc<Mutex<dyn Task>>;

/// Synthetic node: "all of `prev` must finish before any of `next` may
/// start." Never executed; only propagates completion.
#[derive(Debug, Default)]
pub struct TaskGroup {
    pub prev: HashSet<TaskRef>,
    pub next: Vec<TaskRef>,
    pub(crate) done: bool,
}

impl TaskGroup {
    pub fn new(prev: HashSet<TaskRef>, next: Vec<TaskRef>) -> Self {
        TaskGroup {
            prev,
            next,
            done: false,
        }
    }
}

pub type BarrierHandle = Arc<Mutex<TaskGroup>>;

pub fn barrier(prev: HashSet<TaskRef>, next: Vec<TaskRef>) -> BarrierHandle {
    Arc::new(Mutex::new(TaskGroup::new(prev, next)))
}

pub fn task_handle<T: Task + 'static>(t: T) -> TaskHandle {
    Arc::new(Mutex::new(t))
}

/// Locks a task handle, recovering from poisoning rather than propagating
/// it: a panic inside one task's `process()` must not take down bookkeeping
/// for every other task sharing the same process.
pub fn lock_task(handle: &TaskHandle) -> MutexGuard<'_, dyn Task> {
    match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// An entry in a task's `run_after`: either an ordinary predecessor task or
/// a `TaskGroup` barrier standing in for a whole batch of them.
#[derive(Clone)]
pub enum Dep {
    Task(TaskHandle),
    Barrier(BarrierHandle),
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Dep::Task(a), Dep::Task(b)) => Arc::ptr_eq(a, b),
            (Dep::Barrier(a), Dep::Barrier(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
impl Eq for Dep {}

impl Hash for Dep {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Dep::Task(a) => {
                0u8.hash(state);
                (Arc::as_ptr(a) as *const () as usize).hash(state);
            }
            Dep::Barrier(a) => {
                1u8.hash(state);
                (Arc::as_ptr(a) as *const () as usize).hash(state);
            }
        }
    }
}

/// Identity-hashed wrapper around a [`TaskHandle`]: two `TaskRef`s are equal
/// exactly when they point at the same underlying task, never by comparing
/// contents.
#[derive(Clone)]
pub struct TaskRef(pub TaskHandle);

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for TaskRef {}

impl Hash for TaskRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state)
    }
}

impl TaskRef {
    pub fn lock(&self) -> MutexGuard<'_, dyn Task> {
        lock_task(&self.0)
    }
}

impl std::fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskRef({})", self.lock().name())
    }
}

/// The task contract external to the core. Implementors decide
/// what running a task actually means; the core only ever calls these five
/// hooks plus the optional ones.
pub trait Task: Send {
    /// Human-readable name, used for diagnostics and the default
    /// `log_display`.
    fn name(&self) -> &str;

    /// Snapshot of this task's predecessors. May contain ordinary tasks or
    /// `TaskGroup` barriers.
    fn run_after(&self) -> Vec<Dep>;

    /// Drop one entry from `run_after`, used when a `TaskGroup` barrier
    /// finishes and the core "walks through" it.
    fn remove_run_after(&mut self, dep: &Dep);

    fn runnable_status(&mut self, ctx: &dyn BuildContext) -> RunnableStatus;

    fn process(&mut self, ctx: &dyn BuildContext);

    fn priority(&self) -> i64 {
        0
    }

    fn log_display(&self, ctx: &dyn BuildContext);

    fn hasrun(&self) -> Option<HasRun>;

    fn set_hasrun(&mut self, status: HasRun);

    /// Dynamic graph extension: tasks injected by this task
    /// once it completes. Drained exactly once per completion.
    fn take_more_tasks(&mut self) -> Vec<TaskHandle> {
        Vec::new()
    }

    /// Stable identity used to evict a signature-cache entry on failure.
    /// `None` if the task has no such entry.
    fn uid(&self) -> Option<String> {
        None
    }

    fn err_msg(&self) -> Option<&str> {
        None
    }

    fn set_err_msg(&mut self, _msg: String) {}
}
