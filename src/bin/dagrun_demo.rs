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

//! A small end-to-end demo: builds an in-memory job graph (no build-file
//! parsing, no staleness checks — those are a host's job, not the
//! scheduler's) and drives it through [`dagrun::Scheduler`], printing
//! `[n/total] name` status lines the way a build tool's progress meter
//! would.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use dagrun::context::{BuildContext, KeepGoing};
use dagrun::driver::Scheduler;
use dagrun::producer::VecProducer;
use dagrun::task::{task_handle, Dep, HasRun, RunnableStatus, Task, TaskHandle};

/// Reads repeated `-d MODE` flags, the only recognized mode being `stats`.
fn wants_stats(args: &mut pico_args::Arguments) -> anyhow::Result<bool> {
    let mut stats = false;
    while let Some(mode) = args.opt_value_from_str::<_, String>("-d")? {
        if mode == "stats" {
            stats = true;
        } else {
            eprintln!("unknown debug mode '{}' (only 'stats' is recognized)", mode);
            std::process::exit(1);
        }
    }
    Ok(stats)
}

fn print_usage() {
    let called_as = std::env::args().next();
    eprintln!(
        r#"usage: {} [options]

runs a small built-in demo job graph through the scheduler.

options:
  --version  print dagrun's version ("{}")

  -j N       run N jobs in parallel [default={}, derived from CPUs available]
  -k N       keep going after N failures [default=0, stop on first]
  -v         increase verbosity (repeatable)
  -d stats   print per-phase and per-task timing info on exit
"#,
        called_as.as_deref().unwrap_or("dagrun-demo"),
        env!("CARGO_PKG_VERSION"),
        num_cpus::get() + 1,
    );
}

/// A job that "runs" a shell-like command by simply logging it; `fails`
/// marks jobs the demo graph deliberately breaks to exercise keep-going.
struct Job {
    name: String,
    command: String,
    deps: Vec<Dep>,
    fails: bool,
    hasrun: Option<HasRun>,
}

impl Job {
    fn new(name: &str, command: &str, deps: Vec<TaskHandle>, fails: bool) -> Self {
        Job {
            name: name.to_string(),
            command: command.to_string(),
            deps: deps.into_iter().map(Dep::Task).collect(),
            fails,
            hasrun: None,
        }
    }
}

impl Task for Job {
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
        std::thread::sleep(std::time::Duration::from_millis(10));
        self.hasrun = Some(if self.fails {
            HasRun::Failed(format!("{} exited with an error", self.command))
        } else {
            HasRun::Success
        });
    }

    fn log_display(&self, ctx: &dyn BuildContext) {
        ctx.log_progress(&self.command);
    }

    fn hasrun(&self) -> Option<HasRun> {
        self.hasrun.clone()
    }

    fn set_hasrun(&mut self, status: HasRun) {
        self.hasrun = Some(status);
    }

    fn uid(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// Status-line printer: clears and rewrites the current line on a real
/// terminal, otherwise writes one line per update so piped output stays
/// readable.
struct Printer {
    finished: AtomicUsize,
    total: AtomicUsize,
    console: Mutex<console::Term>,
}

impl Printer {
    fn new(total: usize) -> Self {
        Printer {
            finished: AtomicUsize::new(0),
            total: AtomicUsize::new(total),
            console: Mutex::new(console::Term::stdout()),
        }
    }

    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn print_status(&self, command: &str) {
        let finished = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        let mut console = self.console.lock().unwrap();
        if console.is_term() {
            let _ = console.clear_line();
            let _ = write!(console, "[{}/{}] {}", finished, total, command);
        } else {
            let _ = writeln!(console, "[{}/{}] {}", finished, total, command);
        }
    }
}

struct DemoContext {
    printer: Printer,
    keep: KeepGoing,
    verbose: u32,
}

impl BuildContext for DemoContext {
    fn total(&self) -> usize {
        self.printer.total.load(Ordering::SeqCst)
    }

    fn keep(&self) -> KeepGoing {
        self.keep
    }

    fn verbose(&self) -> u32 {
        self.verbose
    }

    fn forget_signature(&self, uid: &str) {
        log::debug!("forgetting cached signature for {}", uid);
    }

    fn log_progress(&self, command: &str) {
        self.printer.print_status(command);
    }
}

/// Builds a small diamond-shaped job graph: `fetch` feeds both `compile`
/// and `lint`, and `link` waits on both.
fn demo_jobs() -> Vec<TaskHandle> {
    let fetch = task_handle(Job::new("fetch", "fetch sources", Vec::new(), false));
    let compile = task_handle(Job::new(
        "compile",
        "cc -c main.c",
        vec![fetch.clone()],
        false,
    ));
    let lint = task_handle(Job::new(
        "lint",
        "clang-tidy main.c",
        vec![fetch.clone()],
        false,
    ));
    let link = task_handle(Job::new(
        "link",
        "cc -o main main.o",
        vec![compile.clone(), lint.clone()],
        false,
    ));
    vec![fetch, compile, lint, link]
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print_usage();
        std::process::exit(1);
    }
    if args.contains("--version") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    let parallelism: usize = args
        .opt_value_from_str("-j")?
        .unwrap_or_else(|| num_cpus::get() + 1);
    let keep_level: u32 = args.opt_value_from_str("-k")?.unwrap_or(0);
    let mut verbose = 0u32;
    while args.contains("-v") {
        verbose += 1;
    }
    let stats = wants_stats(&mut args)?;
    if stats {
        dagrun::metrics::enable();
    }

    let jobs = demo_jobs();
    let ctx = DemoContext {
        printer: Printer::new(jobs.len()),
        keep: KeepGoing::from_level(keep_level),
        verbose,
    };

    let producer = VecProducer::new(vec![jobs]);
    let scheduler = Scheduler::new(Box::new(producer), &ctx, parallelism);
    let report = scheduler.start()?;
    ctx.printer.set_total(report.total);

    if stats {
        dagrun::metrics::dump();
    }

    println!();
    println!(
        "{} tasks processed, {} failed{}",
        report.processed,
        report.failed.len(),
        if report.stopped_early {
            " (stopped early)"
        } else {
            ""
        }
    );
    for name in &report.failed {
        eprintln!("FAILED: {}", name);
    }

    if !report.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
