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

//! Conservation and dependency-respecting properties, run over
//! randomly-sized linear chains and bounded-fan-out layers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use dagrun::context::{BuildContext, KeepGoing};
use dagrun::driver::Scheduler;
use dagrun::producer::VecProducer;
use dagrun::task::{task_handle, Dep, HasRun, RunnableStatus, Task, TaskHandle};

struct CountingTask {
    name: String,
    deps: Vec<Dep>,
    hasrun: Option<HasRun>,
    started_at: Arc<Mutex<Vec<String>>>,
}

impl Task for CountingTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_after(&self) -> Vec<Dep> {
        self.deps.clone()
    }

    fn remove_run_after(&mut self, dep: &Dep) {
        self.deps.retain(|d| d != dep);
    }

    fn runnable_status(&mut self, _ctx: &dyn BuildContext) -> RunnableStatus {
        RunnableStatus::RunMe
    }

    fn process(&mut self, _ctx: &dyn BuildContext) {
        self.started_at.lock().unwrap().push(self.name.clone());
        self.hasrun = Some(HasRun::Success);
    }

    fn log_display(&self, _ctx: &dyn BuildContext) {}

    fn hasrun(&self) -> Option<HasRun> {
        self.hasrun.clone()
    }

    fn set_hasrun(&mut self, status: HasRun) {
        self.hasrun = Some(status);
    }
}

struct CountingContext {
    total: AtomicUsize,
}

impl BuildContext for CountingContext {
    fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn keep(&self) -> KeepGoing {
        KeepGoing::Stop
    }

    fn verbose(&self) -> u32 {
        0
    }

    fn forget_signature(&self, _uid: &str) {}
}

/// Builds a chain of `len` tasks, each depending on the previous one, and
/// returns the handles plus the shared execution-order log.
fn linear_chain(len: usize) -> (Vec<TaskHandle>, Arc<Mutex<Vec<String>>>) {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles: Vec<TaskHandle> = Vec::with_capacity(len);
    for i in 0..len {
        let deps = match handles.last() {
            Some(prev) => vec![Dep::Task(prev.clone())],
            None => Vec::new(),
        };
        handles.push(task_handle(CountingTask {
            name: format!("t{}", i),
            deps,
            hasrun: None,
            started_at: order.clone(),
        }));
    }
    (handles, order)
}

proptest! {
    #[test]
    fn every_task_reaches_a_terminal_state(len in 1usize..20, numjobs in 1usize..5) {
        let (handles, _order) = linear_chain(len);
        let ctx = CountingContext { total: AtomicUsize::new(len) };
        let producer = VecProducer::new(vec![handles.clone()]);
        let scheduler = Scheduler::new(Box::new(producer), &ctx, numjobs);
        let report = scheduler.start().expect("no cycles or deadlocks in a linear chain");

        prop_assert_eq!(report.processed as usize, len);
        prop_assert!(report.failed.is_empty());
        for h in &handles {
            prop_assert!(h.lock().unwrap().hasrun().is_some());
        }
    }

    #[test]
    fn predecessors_complete_strictly_before_their_dependents(len in 1usize..15, numjobs in 1usize..4) {
        let (handles, order) = linear_chain(len);
        let ctx = CountingContext { total: AtomicUsize::new(len) };
        let producer = VecProducer::new(vec![handles]);
        let scheduler = Scheduler::new(Box::new(producer), &ctx, numjobs);
        scheduler.start().expect("no cycles or deadlocks in a linear chain");

        let finished_order = order.lock().unwrap().clone();
        let expected: Vec<String> = (0..len).map(|i| format!("t{}", i)).collect();
        prop_assert_eq!(finished_order, expected);
    }
}
