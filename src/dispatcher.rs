//! The dispatcher and its workers: a single coordinator
//! thread bounded by a semaphore that spawns one thread per dispatched
//! task.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use crossbeam::thread::Scope;

use crate::context::BuildContext;
use crate::scoped_metric;
use crate::semaphore::Semaphore;
use crate::task::{HasRun, TaskHandle};

/// Runs until it receives the `None` sentinel on `ready`. `log_display` is
/// called here, from the dispatcher, rather than inside the worker thread,
/// so that start-of-work lines print in dispatch order instead of being
/// scrambled by worker start jitter.
pub fn run<'scope, 'env>(
    scope: &'scope Scope<'env>,
    numjobs: usize,
    ready: Receiver<Option<TaskHandle>>,
    out: Sender<TaskHandle>,
    stop: Arc<AtomicBool>,
    ctx: &'env dyn BuildContext,
) {
    let sem = Arc::new(Semaphore::new(numjobs));

    loop {
        let task = match ready.recv() {
            Ok(Some(task)) => task,
            Ok(None) | Err(_) => break,
        };

        sem.acquire();
        if !stop.load(Ordering::SeqCst) {
            crate::task::lock_task(&task).log_display(ctx);
        }

        let sem = Arc::clone(&sem);
        let out = out.clone();
        let stop = Arc::clone(&stop);
        scope.spawn(move |_| worker(task, ctx, stop, sem, out));
    }
}

/// Executes exactly one task, then releases its concurrency slot and
/// reports back regardless of how `process()` exited.
fn worker(
    task: TaskHandle,
    ctx: &dyn BuildContext,
    stop: Arc<AtomicBool>,
    sem: Arc<Semaphore>,
    out: Sender<TaskHandle>,
) {
    scopeguard::defer! { sem.release(); }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if !stop.load(Ordering::SeqCst) {
            scoped_metric!("process");
            crate::task::lock_task(&task).process(ctx);
        }
    }));

    if outcome.is_err() {
        let mut guard = crate::task::lock_task(&task);
        guard.set_hasrun(HasRun::Exception);
        guard.set_err_msg("task panicked during process()".to_string());
    }

    let _ = out.send(task);
}
