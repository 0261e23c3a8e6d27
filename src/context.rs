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

//! The build context: the narrow bookkeeping interface the core needs from
//! its host.

/// Failure-handling mode, driven by the host's `-k`/`-kk` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepGoing {
    /// `-k` absent: stop on the first failure.
    Stop,
    /// `-k`: record the first failure (with a stack trace if verbose),
    /// then stop.
    StopAfterFirst,
    /// `-kk` or higher: keep going, recording only if verbose.
    Continue,
}

impl KeepGoing {
    pub fn from_level(level: u32) -> Self {
        match level {
            0 => KeepGoing::Stop,
            1 => KeepGoing::StopAfterFirst,
            _ => KeepGoing::Continue,
        }
    }
}

/// External collaborator supplying total-task bookkeeping, the keep-going
/// policy, verbosity, and the signature-cache eviction hook. The
/// core never does logging or caching itself; it calls back into this.
pub trait BuildContext: Send + Sync {
    /// Best current estimate of the total number of tasks across the whole
    /// build.
    fn total(&self) -> usize;

    fn keep(&self) -> KeepGoing;

    /// 0 = quiet, 1 = normal, 2+ = verbose (controls whether cancelled or
    /// skip-on-exception tasks are recorded in `error`).
    fn verbose(&self) -> u32;

    /// Evict `uid`'s entry from the signature cache so a re-run re-scans
    /// it. Called for the failed task only; does not cascade to
    /// dependents.
    fn forget_signature(&self, uid: &str);

    /// Reports the about-to-run display string for a task. A no-op default lets hosts that only care about the
    /// scheduling result skip wiring up a status line.
    fn log_progress(&self, _command: &str) {}
}
