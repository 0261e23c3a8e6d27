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

//! The scheduling driver: the main loop, refill/backpressure policy,
//! postpone/deadlock handling, and completion reconciliation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::context::{BuildContext, KeepGoing};
use crate::dispatcher;
use crate::error::SchedulerError;
use crate::producer::TaskProducer;
use crate::scoped_metric;
use crate::task::{Dep, HasRun, RunnableStatus, TaskHandle, TaskRef};

/// Minimum in-flight-plus-queued slack before the driver applies
/// backpressure to the producer.
pub const GAP: usize = 20;

/// Summary returned once `start()` terminates.
#[derive(Debug, Default)]
pub struct SchedulerReport {
    pub processed: u64,
    pub total: usize,
    pub failed: Vec<String>,
    pub stopped_early: bool,
}

/// Schedules and drives the tasks yielded by a [`TaskProducer`] to
/// completion over a bounded pool of workers.
///
/// All scheduling state (`outstanding`, `frozen`, `incomplete`, `revdeps`,
/// `count`, `stop`, `error`, `processed`, `total`) is owned exclusively by
/// this struct and mutated only from the thread that calls [`start`].
/// Dispatcher and worker threads communicate with it purely through the
/// `ready`/`out` channels.
pub struct Scheduler<'ctx> {
    pub(crate) numjobs: usize,
    pub(crate) ctx: &'ctx dyn BuildContext,
    pub(crate) producer: Box<dyn TaskProducer + 'ctx>,

    pub(crate) outstanding: VecDeque<TaskRef>,
    pub(crate) frozen: HashSet<TaskRef>,
    pub(crate) incomplete: VecDeque<TaskRef>,
    pub(crate) revdeps: HashMap<TaskRef, HashSet<Dep>>,
    pub(crate) visited: HashMap<TaskRef, u8>,
    pub(crate) prio: HashMap<TaskRef, i64>,

    pub(crate) count: usize,
    pub(crate) processed: u64,
    pub(crate) deadlock: u64,
    pub(crate) total: usize,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) error: Vec<TaskRef>,
    pub(crate) dirty: bool,

    ready_tx: Sender<Option<TaskHandle>>,
    ready_rx: Receiver<Option<TaskHandle>>,
    out_tx: Sender<TaskHandle>,
    out_rx: Receiver<TaskHandle>,
}

impl<'ctx> Scheduler<'ctx> {
    pub fn new(
        producer: Box<dyn TaskProducer + 'ctx>,
        ctx: &'ctx dyn BuildContext,
        numjobs: usize,
    ) -> Self {
        let (ready_tx, ready_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        Scheduler {
            numjobs: numjobs.max(1),
            ctx,
            producer,
            outstanding: VecDeque::new(),
            frozen: HashSet::new(),
            incomplete: VecDeque::new(),
            revdeps: HashMap::new(),
            visited: HashMap::new(),
            prio: HashMap::new(),
            count: 0,
            processed: 0,
            deadlock: 0,
            total: 0,
            stop: Arc::new(AtomicBool::new(false)),
            error: Vec::new(),
            dirty: false,
            ready_tx,
            ready_rx,
            out_tx,
            out_rx,
        }
    }

    /// Runs until termination: either `stop` latched
    /// and every in-flight task reconciled, or the producer is exhausted
    /// and `outstanding`/`incomplete`/`count` are all empty.
    pub fn start(mut self) -> Result<SchedulerReport, SchedulerError> {
        self.total = self.ctx.total();
        let numjobs = self.numjobs;
        let ready_rx = self.ready_rx.clone();
        let out_tx = self.out_tx.clone();
        let stop = Arc::clone(&self.stop);
        let ctx = self.ctx;

        let result = crossbeam::thread::scope(move |scope| {
            if numjobs > 1 {
                scope.spawn(move |scope| {
                    dispatcher::run(scope, numjobs, ready_rx, out_tx, stop, ctx);
                });
            }
            self.drive_to_completion()
        })
        .expect("scheduler coordinator thread panicked");

        result
    }

    fn drive_to_completion(mut self) -> Result<SchedulerReport, SchedulerError> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            self.refill_task_list()?;

            let task_ref = match self.outstanding.pop_front() {
                Some(t) => t,
                None => {
                    if self.count > 0 {
                        continue;
                    }
                    break;
                }
            };

            let already_run = task_ref.lock().hasrun().is_some();
            if already_run {
                // Promoted twice, e.g. by a dynamic extension. Already
                // accounted for.
                self.processed += 1;
                continue;
            }

            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let status = self.task_status(&task_ref);
            match status {
                RunnableStatus::RunMe => {
                    self.count += 1;
                    self.processed += 1;
                    if self.numjobs == 1 {
                        self.run_inline(task_ref);
                    } else {
                        self.ready_tx
                            .send(Some(Arc::clone(&task_ref.0)))
                            .expect("ready channel closed");
                    }
                }
                RunnableStatus::AskLater => self.postpone(task_ref),
                RunnableStatus::SkipMe => {
                    self.processed += 1;
                    task_ref.lock().set_hasrun(HasRun::Skipped);
                    self.add_more_tasks(&task_ref)?;
                    self.mark_finished(&task_ref);
                    self.dirty = true;
                }
                RunnableStatus::CancelMe => {
                    self.processed += 1;
                    if self.ctx.verbose() > 1 {
                        self.error.push(task_ref.clone());
                    }
                    task_ref.lock().set_hasrun(HasRun::Canceled);
                    self.mark_finished(&task_ref);
                    self.dirty = true;
                }
                RunnableStatus::Exception => {
                    // task_status() already drove hasrun/error/stop for us.
                }
            }
        }

        // Errors may be incomplete until in-flight work finishes; collect
        // it all before reporting.
        while !self.error.is_empty() && self.count > 0 {
            self.get_out()?;
        }

        let _ = self.ready_tx.send(None);
        debug_assert!(self.count == 0 || self.stop.load(Ordering::SeqCst));

        let failed: Vec<String> = self
            .error
            .iter()
            .map(|t| t.lock().name().to_string())
            .collect();
        Ok(SchedulerReport {
            processed: self.processed,
            total: self.total,
            failed,
            stopped_early: self.stop.load(Ordering::SeqCst),
        })
    }

    /// Executes a task on the driver's own thread when `numjobs == 1`,
    /// still routing the result through `out` so reconciliation stays
    /// uniform with the dispatched path.
    fn run_inline(&mut self, task_ref: TaskRef) {
        let handle = Arc::clone(&task_ref.0);
        crate::task::lock_task(&handle).log_display(self.ctx);

        let ctx = self.ctx;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            scoped_metric!("process");
            crate::task::lock_task(&handle).process(ctx);
        }));
        if outcome.is_err() {
            let mut guard = crate::task::lock_task(&handle);
            guard.set_hasrun(HasRun::Exception);
            guard.set_err_msg("task panicked during process()".to_string());
        }
        self.out_tx.send(handle).expect("out channel closed");
    }

    pub(crate) fn postpone(&mut self, t: TaskRef) {
        if fastrand::bool() {
            self.incomplete.push_front(t);
        } else {
            self.incomplete.push_back(t);
        }
    }

    /// Repopulates `outstanding`, applying backpressure and promoting
    /// `incomplete`/the next producer group as needed.
    fn refill_task_list(&mut self) -> Result<(), SchedulerError> {
        while self.count > self.numjobs * GAP {
            self.get_out()?;
        }

        while self.outstanding.is_empty() {
            if self.count > 0 {
                self.get_out()?;
            } else if !self.incomplete.is_empty() && self.deadlock == self.processed {
                return Err(self.deadlock_error());
            }

            if !self.incomplete.is_empty() {
                self.deadlock = self.processed;
                self.outstanding.extend(self.incomplete.drain(..));
            } else if self.count == 0 {
                scoped_metric!("prio_and_split");
                match self.producer.next_group() {
                    Some(tasks) => {
                        let (ready, waiting) = self.prio_and_split(tasks)?;
                        self.outstanding.extend(ready);
                        self.frozen.extend(waiting);
                        self.total = self.ctx.total();
                    }
                    None => return Ok(()),
                }
                break;
            }
        }
        Ok(())
    }

    fn deadlock_error(&self) -> SchedulerError {
        let bad_runnable_status = self
            .incomplete
            .iter()
            .any(|t| t.lock().run_after().is_empty());
        let headline = if bad_runnable_status {
            "check the methods runnable_status"
        } else {
            "check the build order"
        };
        let mut detail = String::new();
        for t in &self.incomplete {
            let guard = t.lock();
            detail.push_str(&format!(
                "\n  {} -> {} unmet predecessor(s)",
                guard.name(),
                guard.run_after().len()
            ));
        }
        SchedulerError::Deadlock(format!("{}{}", headline, detail))
    }

    /// Absorbs `t.more_tasks` into the graph. Assumes the
    /// completing task's own priority need not be recomputed.
    pub(crate) fn add_more_tasks(&mut self, t: &TaskRef) -> Result<(), SchedulerError> {
        let more = t.lock().take_more_tasks();
        if more.is_empty() {
            return Ok(());
        }
        let n = more.len();
        let (ready, waiting) = self.prio_and_split(more)?;
        for k in ready {
            self.insert_with_prio(k);
        }
        self.frozen.extend(waiting);
        self.total += n;
        Ok(())
    }

    /// Unfreezes dependents of `t`, walking through any `TaskGroup`
    /// barriers in between.
    pub(crate) fn mark_finished(&mut self, t: &TaskRef) {
        if let Some(deps) = self.revdeps.remove(t) {
            for d in deps {
                match d {
                    Dep::Barrier(b) => {
                        let next_tasks = {
                            let mut guard = b.lock().unwrap();
                            guard.prev.remove(t);
                            if guard.prev.is_empty() {
                                Some(std::mem::take(&mut guard.next))
                            } else {
                                None
                            }
                        };
                        if let Some(next_tasks) = next_tasks {
                            for k in &next_tasks {
                                k.0.lock()
                                    .unwrap()
                                    .remove_run_after(&Dep::Barrier(Arc::clone(&b)));
                                self.try_unfreeze(k.clone());
                            }
                        }
                    }
                    Dep::Task(task_handle) => {
                        self.try_unfreeze(TaskRef(task_handle));
                    }
                }
            }
        }
    }

    fn try_unfreeze(&mut self, x: TaskRef) {
        if self.frozen.contains(&x) {
            let all_done = x
                .0
                .lock()
                .unwrap()
                .run_after()
                .iter()
                .all(|dep| self.dep_done(dep));
            if all_done {
                self.frozen.remove(&x);
                self.insert_with_prio(x);
            }
        }
    }

    pub(crate) fn dep_done(&self, dep: &Dep) -> bool {
        match dep {
            Dep::Task(t) => crate::task::lock_task(t).hasrun().is_some(),
            Dep::Barrier(b) => b.lock().unwrap().prev.is_empty(),
        }
    }

    /// O(1) approximation of a priority queue: insert at the front only if
    /// at least as urgent as the current front, else at the back, the ordering is good-enough").
    pub(crate) fn insert_with_prio(&mut self, t: TaskRef) {
        let p = *self.prio.get(&t).unwrap_or(&0);
        let should_front = match self.outstanding.front() {
            Some(front) => p >= *self.prio.get(front).unwrap_or(&0),
            None => false,
        };
        if should_front {
            self.outstanding.push_front(t);
        } else {
            self.outstanding.push_back(t);
        }
    }

    /// Blocks for the next completion, absorbs dynamic extensions, and
    /// unfreezes dependents.
    ///
    /// A task whose `process()` raised, or whose own executor settled it
    /// into a failed terminal state, is caught here, symmetric with
    /// `task_status`'s handling of a `runnable_status()` panic.
    fn get_out(&mut self) -> Result<(), SchedulerError> {
        let handle = self.out_rx.recv().expect("out channel closed early");
        let task_ref = TaskRef(handle);

        let failed = matches!(
            task_ref.lock().hasrun(),
            Some(HasRun::Exception) | Some(HasRun::Failed(_))
        );
        if failed {
            self.error_handler(&task_ref);
        }

        if !self.stop.load(Ordering::SeqCst) {
            self.add_more_tasks(&task_ref)?;
        }
        self.mark_finished(&task_ref);
        self.count -= 1;
        self.dirty = true;
        Ok(())
    }

    /// Obtains the runnability verdict, absorbing any panic from
    /// `runnable_status()` as a runnability exception.
    fn task_status(&mut self, t: &TaskRef) -> RunnableStatus {
        let handle = Arc::clone(&t.0);
        let ctx = self.ctx;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            crate::task::lock_task(&handle).runnable_status(ctx)
        }));

        match outcome {
            Ok(status) => status,
            Err(_) => {
                self.processed += 1;
                let keep = self.ctx.keep();
                if !self.stop.load(Ordering::SeqCst) && !matches!(keep, KeepGoing::Stop) {
                    {
                        let mut guard = t.lock();
                        guard.set_hasrun(HasRun::Skipped);
                        guard.set_err_msg("runnable_status() panicked".to_string());
                    }
                    self.mark_finished(t);
                    if matches!(keep, KeepGoing::StopAfterFirst) {
                        if self.ctx.verbose() > 1 || self.error.is_empty() {
                            self.error.push(t.clone());
                        }
                        self.stop.store(true, Ordering::SeqCst);
                    } else if self.ctx.verbose() > 1 {
                        self.error.push(t.clone());
                    }
                } else {
                    {
                        let mut guard = t.lock();
                        guard.set_hasrun(HasRun::Exception);
                        guard.set_err_msg("runnable_status() panicked".to_string());
                    }
                    self.error_handler(t);
                }
                RunnableStatus::Exception
            }
        }
    }

    /// Called when a task cannot be executed: evicts its signature-cache
    /// entry, latches `stop` unless keep-going, and records the failure
    ///.
    pub(crate) fn error_handler(&mut self, t: &TaskRef) {
        if let Some(uid) = t.lock().uid() {
            self.ctx.forget_signature(&uid);
        }
        if matches!(self.ctx.keep(), KeepGoing::Stop) {
            self.stop.store(true, Ordering::SeqCst);
        }
        self.error.push(t.clone());
    }
}
