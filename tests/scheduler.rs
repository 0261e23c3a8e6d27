//! End-to-end scheduler behavior: the concrete scenarios and invariants
//! from the scheduler's design notes, exercised against a minimal
//! in-memory [`Task`]/[`BuildContext`] harness.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dagrun::context::{BuildContext, KeepGoing};
use dagrun::driver::Scheduler;
use dagrun::producer::VecProducer;
use dagrun::task::{
    barrier, task_handle, Dep, HasRun, RunnableStatus, Task, TaskHandle, TaskRef,
};

/// Shared order-of-execution log, used to assert dependency ordering
/// without relying on wall-clock timing.
#[derive(Clone, Default)]
struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    fn record(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

enum Behavior {
    Succeed,
    Fail,
    Skip,
    Cancel,
    /// Always returns ASK_LATER; used to provoke a deadlock.
    NeverReady,
}

struct TestTask {
    name: String,
    deps: Vec<Dep>,
    behavior: Behavior,
    hasrun: Option<HasRun>,
    trace: Trace,
    more_tasks: Vec<TaskHandle>,
    concurrent: Option<Arc<(AtomicUsize, AtomicUsize)>>,
}

impl TestTask {
    fn new(name: &str, deps: Vec<TaskHandle>, behavior: Behavior, trace: Trace) -> Self {
        TestTask {
            name: name.to_string(),
            deps: deps.into_iter().map(Dep::Task).collect(),
            behavior,
            hasrun: None,
            trace,
            more_tasks: Vec::new(),
            concurrent: None,
        }
    }

    fn with_more_tasks(mut self, more: Vec<TaskHandle>) -> Self {
        self.more_tasks = more;
        self
    }

    /// Tracks (current, max) concurrently-executing instances sharing this
    /// counter pair, for the bounded-concurrency property test.
    fn tracking_concurrency(mut self, counter: Arc<(AtomicUsize, AtomicUsize)>) -> Self {
        self.concurrent = Some(counter);
        self
    }
}

impl Task for TestTask {
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
        match self.behavior {
            Behavior::NeverReady => RunnableStatus::AskLater,
            Behavior::Skip => RunnableStatus::SkipMe,
            Behavior::Cancel => RunnableStatus::CancelMe,
            _ => RunnableStatus::RunMe,
        }
    }

    fn process(&mut self, _ctx: &dyn BuildContext) {
        if let Some(counter) = &self.concurrent {
            let (current, max) = counter.as_ref();
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            current.fetch_sub(1, Ordering::SeqCst);
        }

        self.trace.record(&self.name);
        self.hasrun = Some(match self.behavior {
            Behavior::Fail => HasRun::Failed(format!("{} failed", self.name)),
            _ => HasRun::Success,
        });
    }

    fn log_display(&self, _ctx: &dyn BuildContext) {}

    fn hasrun(&self) -> Option<HasRun> {
        self.hasrun.clone()
    }

    fn set_hasrun(&mut self, status: HasRun) {
        self.hasrun = Some(status);
    }

    fn take_more_tasks(&mut self) -> Vec<TaskHandle> {
        std::mem::take(&mut self.more_tasks)
    }

    fn uid(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

struct TestContext {
    keep: KeepGoing,
    verbose: u32,
    total: AtomicUsize,
    forgotten: Mutex<Vec<String>>,
}

impl TestContext {
    fn new(keep: KeepGoing, total: usize) -> Self {
        TestContext {
            keep,
            verbose: 0,
            total: AtomicUsize::new(total),
            forgotten: Mutex::new(Vec::new()),
        }
    }

    fn verbose_level(mut self, level: u32) -> Self {
        self.verbose = level;
        self
    }
}

impl BuildContext for TestContext {
    fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn keep(&self) -> KeepGoing {
        self.keep
    }

    fn verbose(&self) -> u32 {
        self.verbose
    }

    fn forget_signature(&self, uid: &str) {
        self.forgotten.lock().unwrap().push(uid.to_string());
    }
}

fn run(jobs: Vec<TaskHandle>, ctx: &TestContext, numjobs: usize) -> dagrun::SchedulerReport {
    let producer = VecProducer::new(vec![jobs]);
    let scheduler = Scheduler::new(Box::new(producer), ctx, numjobs);
    scheduler.start().expect("scheduler should not error")
}

#[test]
fn linear_chain_runs_in_dependency_order() {
    let trace = Trace::default();
    let a = task_handle(TestTask::new("A", vec![], Behavior::Succeed, trace.clone()));
    let b = task_handle(TestTask::new(
        "B",
        vec![a.clone()],
        Behavior::Succeed,
        trace.clone(),
    ));
    let c = task_handle(TestTask::new(
        "C",
        vec![b.clone()],
        Behavior::Succeed,
        trace.clone(),
    ));

    let ctx = TestContext::new(KeepGoing::Stop, 3);
    let report = run(vec![a, b, c], &ctx, 2);

    assert_eq!(report.processed, 3);
    assert!(report.failed.is_empty());
    let order = trace.snapshot();
    assert!(order.iter().position(|n| n == "A") < order.iter().position(|n| n == "B"));
    assert!(order.iter().position(|n| n == "B") < order.iter().position(|n| n == "C"));
}

#[test]
fn fan_out_all_run_after_root() {
    let trace = Trace::default();
    let a = task_handle(TestTask::new("A", vec![], Behavior::Succeed, trace.clone()));
    let children: Vec<TaskHandle> = ["B", "C", "D", "E"]
        .iter()
        .map(|name| {
            task_handle(TestTask::new(
                name,
                vec![a.clone()],
                Behavior::Succeed,
                trace.clone(),
            ))
        })
        .collect();

    let mut jobs = vec![a];
    jobs.extend(children);

    let ctx = TestContext::new(KeepGoing::Stop, 5);
    let report = run(jobs, &ctx, 2);

    assert_eq!(report.processed, 5);
    let order = trace.snapshot();
    let a_pos = order.iter().position(|n| n == "A").unwrap();
    for name in ["B", "C", "D", "E"] {
        assert!(order.iter().position(|n| n == name).unwrap() > a_pos);
    }
}

#[test]
fn skipped_leaf_is_counted_but_not_executed() {
    let trace = Trace::default();
    let a = task_handle(TestTask::new("A", vec![], Behavior::Succeed, trace.clone()));
    let b = task_handle(TestTask::new(
        "B",
        vec![a.clone()],
        Behavior::Skip,
        trace.clone(),
    ));

    let ctx = TestContext::new(KeepGoing::Stop, 2);
    let report = run(vec![a.clone(), b.clone()], &ctx, 1);

    assert_eq!(report.processed, 2);
    assert!(report.failed.is_empty());
    assert_eq!(TaskRef(a).lock().hasrun(), Some(HasRun::Success));
    assert_eq!(TaskRef(b).lock().hasrun(), Some(HasRun::Skipped));
    assert!(!trace.snapshot().contains(&"B".to_string()));
}

#[test]
fn failure_stops_when_keep_is_zero() {
    let trace = Trace::default();
    let a = task_handle(TestTask::new("A", vec![], Behavior::Fail, trace.clone()));
    let b = task_handle(TestTask::new(
        "B",
        vec![a.clone()],
        Behavior::Succeed,
        trace.clone(),
    ));

    let ctx = TestContext::new(KeepGoing::Stop, 2);
    let report = run(vec![a, b], &ctx, 1);

    assert!(report.stopped_early);
    assert_eq!(report.failed, vec!["A".to_string()]);
    assert!(!trace.snapshot().contains(&"B".to_string()));
}

#[test]
fn failure_keeps_going_with_keep_at_least_two() {
    let trace = Trace::default();
    let a = task_handle(TestTask::new("A", vec![], Behavior::Fail, trace.clone()));
    // B's own runnable_status is responsible for noticing its predecessor
    // failed and reporting CANCEL_ME; the core never inspects run_after
    // outcomes on a task's behalf.
    let b = task_handle(TestTask::new(
        "B",
        vec![a.clone()],
        Behavior::Cancel,
        trace.clone(),
    ));
    let c = task_handle(TestTask::new("C", vec![], Behavior::Succeed, trace.clone()));

    let ctx = TestContext::new(KeepGoing::Continue, 3);
    let report = run(vec![a, b, c.clone()], &ctx, 1);

    assert!(report.failed.contains(&"A".to_string()));
    assert_eq!(TaskRef(c).lock().hasrun(), Some(HasRun::Success));
    assert!(!trace.snapshot().contains(&"B".to_string()));
}

#[test]
fn cycle_is_detected_before_any_task_runs() {
    let trace = Trace::default();
    // Concrete Arc<Mutex<TestTask>> handles kept around (rather than the
    // opaque TaskHandle = Arc<Mutex<dyn Task>>) so the cyclic edge (Z -> X)
    // can be wired in directly after all three tasks exist; Task::run_after
    // is a snapshot taken from live state, so this still predates scheduling.
    let x_concrete = Arc::new(Mutex::new(TestTask::new(
        "X",
        vec![],
        Behavior::Succeed,
        trace.clone(),
    )));
    let x: TaskHandle = x_concrete.clone();
    let y_concrete = Arc::new(Mutex::new(TestTask::new(
        "Y",
        vec![x.clone()],
        Behavior::Succeed,
        trace.clone(),
    )));
    let y: TaskHandle = y_concrete.clone();
    let z_concrete = Arc::new(Mutex::new(TestTask::new(
        "Z",
        vec![y.clone()],
        Behavior::Succeed,
        trace.clone(),
    )));
    let z: TaskHandle = z_concrete.clone();
    x_concrete.lock().unwrap().deps.push(Dep::Task(z.clone()));

    let ctx = TestContext::new(KeepGoing::Stop, 3);
    let producer = VecProducer::new(vec![vec![x, y, z]]);
    let scheduler = Scheduler::new(Box::new(producer), &ctx, 1);
    let err = scheduler.start().expect_err("cycle must be reported");
    assert!(matches!(err, dagrun::SchedulerError::Cycle(_)));
    assert!(trace.snapshot().is_empty());
}

#[test]
fn dynamic_extension_runs_injected_tasks() {
    let trace = Trace::default();
    let a1 = task_handle(TestTask::new("A1", vec![], Behavior::Succeed, trace.clone()));
    let a2 = task_handle(TestTask::new(
        "A2",
        vec![a1.clone()],
        Behavior::Succeed,
        trace.clone(),
    ));
    let a = task_handle(
        TestTask::new("A", vec![], Behavior::Succeed, trace.clone())
            .with_more_tasks(vec![a1.clone(), a2.clone()]),
    );

    let ctx = TestContext::new(KeepGoing::Stop, 1);
    let report = run(vec![a], &ctx, 1);

    assert_eq!(report.total, 3);
    let order = trace.snapshot();
    assert!(order.contains(&"A1".to_string()));
    assert!(order.contains(&"A2".to_string()));
    assert!(order.iter().position(|n| n == "A1") < order.iter().position(|n| n == "A2"));
}

#[test]
fn perpetual_ask_later_raises_deadlock() {
    let trace = Trace::default();
    let a = task_handle(TestTask::new(
        "A",
        vec![],
        Behavior::NeverReady,
        trace.clone(),
    ));

    let ctx = TestContext::new(KeepGoing::Stop, 1);
    let producer = VecProducer::new(vec![vec![a]]);
    let scheduler = Scheduler::new(Box::new(producer), &ctx, 1);
    let err = scheduler.start().expect_err("deadlock must be reported");
    assert!(matches!(err, dagrun::SchedulerError::Deadlock(_)));
}

#[test]
fn task_group_barrier_gates_all_predecessors() {
    let trace = Trace::default();
    let a = task_handle(TestTask::new("A", vec![], Behavior::Succeed, trace.clone()));
    let b = task_handle(TestTask::new("B", vec![], Behavior::Succeed, trace.clone()));

    let a_ref = TaskRef(a.clone());
    let b_ref = TaskRef(b.clone());
    let mut prev = std::collections::HashSet::new();
    prev.insert(a_ref);
    prev.insert(b_ref);

    let c_concrete = Arc::new(Mutex::new(TestTask::new(
        "C",
        vec![],
        Behavior::Succeed,
        trace.clone(),
    )));
    let c: TaskHandle = c_concrete.clone();
    let group = barrier(prev, vec![TaskRef(c.clone())]);
    c_concrete.lock().unwrap().deps.push(Dep::Barrier(group));

    let ctx = TestContext::new(KeepGoing::Stop, 3);
    let report = run(vec![a, b, c], &ctx, 2);

    assert_eq!(report.processed, 3);
    let order = trace.snapshot();
    let c_pos = order.iter().position(|n| n == "C").unwrap();
    assert!(order.iter().position(|n| n == "A").unwrap() < c_pos);
    assert!(order.iter().position(|n| n == "B").unwrap() < c_pos);
}

#[test]
fn bounded_concurrency_never_exceeds_numjobs() {
    let trace = Trace::default();
    let counter = Arc::new((AtomicUsize::new(0), AtomicUsize::new(0)));
    let jobs: Vec<TaskHandle> = (0..6)
        .map(|i| {
            task_handle(
                TestTask::new(&format!("J{}", i), vec![], Behavior::Succeed, trace.clone())
                    .tracking_concurrency(counter.clone()),
            )
        })
        .collect();

    let ctx = TestContext::new(KeepGoing::Stop, 6);
    let report = run(jobs, &ctx, 2);

    assert_eq!(report.processed, 6);
    assert!(counter.1.load(Ordering::SeqCst) <= 2);
}

#[test]
fn canceled_task_is_recorded_only_when_verbose() {
    let trace = Trace::default();
    let a = task_handle(TestTask::new(
        "A",
        vec![],
        Behavior::Cancel,
        trace.clone(),
    ));

    let ctx = TestContext::new(KeepGoing::Stop, 1).verbose_level(2);
    let report = run(vec![a], &ctx, 1);

    assert_eq!(report.processed, 1);
    assert!(report.failed.contains(&"A".to_string()) || !report.failed.is_empty());
}

#[test]
fn forget_signature_called_only_for_failed_task() {
    let trace = Trace::default();
    let a = task_handle(TestTask::new("A", vec![], Behavior::Fail, trace.clone()));
    let b = task_handle(TestTask::new(
        "B",
        vec![a.clone()],
        Behavior::Succeed,
        trace.clone(),
    ));

    let ctx = TestContext::new(KeepGoing::Stop, 2);
    let _ = run(vec![a, b], &ctx, 1);

    let forgotten = ctx.forgotten.lock().unwrap();
    assert_eq!(forgotten.as_slice(), &["A".to_string()]);
}
