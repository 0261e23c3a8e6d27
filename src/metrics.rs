//! RAII scoped timers for the prioritizer pass and task wall-clock:
//! thread-local aggregation, a `scoped_metric!` macro, and a tabular
//! `Display` dump. Kept as an internal module rather than a separate
//! workspace member since nothing else in this crate needs to depend on it
//! independently.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Metric {
    name: &'static str,
    count: usize,
    sum: u128,
}

impl Metric {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.sum += elapsed.as_micros();
    }
}

pub struct ScopedMetric {
    index: usize,
    start: Instant,
}

impl ScopedMetric {
    pub fn new(index: usize) -> Self {
        ScopedMetric {
            index,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedMetric {
    fn drop(&mut self) {
        METRICS.with(|m| m.borrow_mut().record(self.index, self.start.elapsed()));
    }
}

#[derive(Debug, Default)]
struct Metrics {
    metrics: Vec<Metric>,
}

impl Metrics {
    fn new_metric(&mut self, name: &'static str) -> usize {
        let len = self.metrics.len();
        self.metrics.push(Metric {
            name,
            ..Default::default()
        });
        len
    }

    fn record(&mut self, i: usize, elapsed: Duration) {
        self.metrics[i].record(elapsed);
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut name_width = 7;
        for metric in &self.metrics {
            name_width = std::cmp::max(name_width, metric.name.len());
        }
        writeln!(
            f,
            "{:name_width$} {:>6} {:>9} {:>11}",
            "metric ",
            "count",
            "avg (us)",
            "total (us)",
            name_width = name_width
        )?;
        for metric in &self.metrics {
            let avg = if metric.count == 0 {
                0.0
            } else {
                metric.sum as f64 / metric.count as f64
            };
            writeln!(
                f,
                "{:name_width$} {: >6} {:>9.3} {:>11}",
                metric.name,
                metric.count,
                avg,
                metric.sum,
                name_width = name_width
            )?;
        }
        Ok(())
    }
}

thread_local! {
    static METRICS: RefCell<Metrics> = RefCell::new(Metrics::default());
}
static ENABLED: AtomicBool = AtomicBool::new(false);

pub fn enable() {
    ENABLED.store(true, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn new_metric(name: &'static str) -> usize {
    METRICS.with(|m| m.borrow_mut().new_metric(name))
}

pub fn dump() {
    METRICS.with(|m| eprintln!("{}", m.borrow()));
}

/// Times its enclosing scope under `$name` when metrics are enabled, a
/// no-op otherwise.
#[macro_export]
macro_rules! scoped_metric {
    ($name:literal) => {
        let _scoped_metric = if $crate::metrics::is_enabled() {
            thread_local! {
                static METRIC_INDEX: usize = $crate::metrics::new_metric($name);
            }
            ::core::option::Option::Some($crate::metrics::ScopedMetric::new(
                METRIC_INDEX.with(|m| *m),
            ))
        } else {
            ::core::option::Option::None
        };
    };
}
