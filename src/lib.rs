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

//! A dependency-aware parallel task scheduler.
//!
//! The core loop lives in [`driver::Scheduler`]: it pulls successive groups
//! of tasks from a [`producer::TaskProducer`], computes run order within
//! each group via [`driver::Scheduler::prio_and_split`] (reverse-dependency
//! priority plus cycle detection), and dispatches ready tasks across a
//! bounded pool of worker threads. Hosts plug in their own task semantics by
//! implementing [`task::Task`] and [`context::BuildContext`]; the core
//! never inspects what a task's `process()` actually does.
//!
//! ```no_run
//! use dagrun::context::{BuildContext, KeepGoing};
//! use dagrun::driver::Scheduler;
//! use dagrun::producer::VecProducer;
//! use dagrun::task::{task_handle, Dep, HasRun, RunnableStatus, Task, TaskHandle};
//!
//! struct Noop { name: String, hasrun: Option<HasRun> }
//!
//! impl Task for Noop {
//!     fn name(&self) -> &str { &self.name }
//!     fn run_after(&self) -> Vec<Dep> { Vec::new() }
//!     fn remove_run_after(&mut self, _dep: &Dep) {}
//!     fn runnable_status(&mut self, _ctx: &dyn BuildContext) -> RunnableStatus {
//!         RunnableStatus::RunMe
//!     }
//!     fn process(&mut self, _ctx: &dyn BuildContext) { self.hasrun = Some(HasRun::Success); }
//!     fn log_display(&self, _ctx: &dyn BuildContext) {}
//!     fn hasrun(&self) -> Option<HasRun> { self.hasrun.clone() }
//!     fn set_hasrun(&mut self, status: HasRun) { self.hasrun = Some(status); }
//! }
//!
//! struct Ctx;
//! impl BuildContext for Ctx {
//!     fn total(&self) -> usize { 1 }
//!     fn keep(&self) -> KeepGoing { KeepGoing::Stop }
//!     fn verbose(&self) -> u32 { 1 }
//!     fn forget_signature(&self, _uid: &str) {}
//! }
//!
//! let tasks: Vec<TaskHandle> = vec![task_handle(Noop { name: "build".into(), hasrun: None })];
//! let producer = VecProducer::new(vec![tasks]);
//! let ctx = Ctx;
//! let scheduler = Scheduler::new(Box::new(producer), &ctx, 1);
//! let report = scheduler.start().unwrap();
//! assert_eq!(report.failed.len(), 0);
//! ```

pub mod context;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod prioritizer;
pub mod producer;
pub mod semaphore;
pub mod task;

pub use context::{BuildContext, KeepGoing};
pub use driver::{Scheduler, SchedulerReport, GAP};
pub use error::SchedulerError;
pub use producer::{TaskProducer, VecProducer};
pub use task::{
    barrier, lock_task, task_handle, BarrierHandle, Dep, HasRun, RunnableStatus, Task, TaskGroup,
    TaskHandle, TaskRef,
};
