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

//! `prio_and_split` and cycle detection: a reverse-edge pass with
//! `TaskGroup` flattening, a DFS on-stack-coloring priority walk, and a
//! second-pass minimum-cycle reporter (`debug_cycles`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::driver::Scheduler;
use crate::error::SchedulerError;
use crate::task::{Dep, TaskHandle, TaskRef};

impl<'ctx> Scheduler<'ctx> {
    /// Builds reverse-dependency edges for `tasks`, assigns priorities via
    /// a DFS over those edges (detecting cycles along the way), and splits
    /// the group into tasks ready to run now versus still waiting on a
    /// predecessor.
    pub(crate) fn prio_and_split(
        &mut self,
        tasks: Vec<TaskHandle>,
    ) -> Result<(Vec<TaskRef>, Vec<TaskRef>), SchedulerError> {
        let refs: Vec<TaskRef> = tasks.into_iter().map(TaskRef).collect();
        for t in &refs {
            self.visited.insert(t.clone(), 0);
        }

        // Step 1: reverse edges, flattening TaskGroup barriers.
        for x in &refs {
            let deps = x.lock().run_after();
            for k in deps {
                match k {
                    Dep::Barrier(b) => {
                        let prev_tasks = {
                            let mut guard = b.lock().unwrap();
                            if guard.done {
                                None
                            } else {
                                guard.done = true;
                                Some(guard.prev.iter().cloned().collect::<Vec<_>>())
                            }
                        };
                        if let Some(prev_tasks) = prev_tasks {
                            for j in prev_tasks {
                                self.revdeps
                                    .entry(j)
                                    .or_insert_with(HashSet::new)
                                    .insert(Dep::Barrier(Arc::clone(&b)));
                            }
                        }
                    }
                    Dep::Task(k_handle) => {
                        self.revdeps
                            .entry(TaskRef(k_handle))
                            .or_insert_with(HashSet::new)
                            .insert(Dep::Task(Arc::clone(&x.0)));
                    }
                }
            }
        }

        // Step 2: priority + cycle detection.
        for x in &refs {
            if *self.visited.get(x).unwrap_or(&0) == 0 && self.visit(x).is_err() {
                return Err(self.debug_cycles(&refs));
            }
        }

        // Step 3: split into ready vs. waiting, ready sorted by descending
        // priority.
        let mut ready = Vec::new();
        let mut waiting = Vec::new();
        for x in refs {
            let deps = x.lock().run_after();
            let is_waiting = deps.iter().any(|d| !self.dep_done(d));
            if is_waiting {
                waiting.push(x);
            } else {
                ready.push(x);
            }
        }
        let prio = &self.prio;
        ready.sort_by(|a, b| {
            let pa = *prio.get(a).unwrap_or(&0);
            let pb = *prio.get(b).unwrap_or(&0);
            pb.cmp(&pa)
        });

        Ok((ready, waiting))
    }

    /// `prio(n) = n.priority() + |revdeps[n]| + sum(visit(c) for c in
    /// revdeps[n])`. Colors 0 (unseen) -> 1 (on stack) -> 2 (done);
    /// re-entering a color-1 node means a cycle.
    fn visit(&mut self, n: &TaskRef) -> Result<i64, ()> {
        match *self.visited.get(n).unwrap_or(&0) {
            0 => {
                self.visited.insert(n.clone(), 1);
                let own = n.lock().priority();
                let p = match self.revdeps.get(n).cloned() {
                    Some(rev) => {
                        let mut sum = 0i64;
                        for k in &rev {
                            sum += self.visit_dep(k)?;
                        }
                        own + rev.len() as i64 + sum
                    }
                    None => own,
                };
                self.prio.insert(n.clone(), p);
                self.visited.insert(n.clone(), 2);
                Ok(p)
            }
            1 => Err(()),
            _ => Ok(*self.prio.get(n).unwrap_or(&0)),
        }
    }

    /// `prio(TaskGroup g) = sum(prio(c) for c in g.next)`: a barrier
    /// contributes no weight of its own, and (matching the original) is
    /// never itself given an on-stack color — a cycle through a barrier is
    /// still caught because the path necessarily re-enters an ordinary
    /// task further along.
    fn visit_dep(&mut self, d: &Dep) -> Result<i64, ()> {
        match d {
            Dep::Task(t) => self.visit(&TaskRef(Arc::clone(t))),
            Dep::Barrier(b) => {
                let next = b.lock().unwrap().next.clone();
                let mut sum = 0i64;
                for k in &next {
                    sum += self.visit(k)?;
                }
                Ok(sum)
            }
        }
    }

    /// Re-runs the DFS scoped to `tasks` with a fresh coloring map to
    /// report the suffix of the path from the re-entered node — the
    /// minimum cycle, not the whole traversal.
    fn debug_cycles(&self, tasks: &[TaskRef]) -> SchedulerError {
        let mut tmp: HashMap<TaskRef, u8> = tasks.iter().map(|t| (t.clone(), 0)).collect();

        for start in tasks {
            let mut acc = Vec::new();
            if let Err(cycle) = Self::visit_for_cycle(start, &mut tmp, &self.revdeps, &mut acc) {
                return SchedulerError::Cycle(cycle.join(" -> "));
            }
        }
        SchedulerError::Cycle("cycle detected but could not be isolated".to_string())
    }

    fn visit_for_cycle(
        n: &TaskRef,
        tmp: &mut HashMap<TaskRef, u8>,
        revdeps: &HashMap<TaskRef, HashSet<Dep>>,
        acc: &mut Vec<String>,
    ) -> Result<(), Vec<String>> {
        match *tmp.get(n).unwrap_or(&0) {
            0 => {
                tmp.insert(n.clone(), 1);
                acc.push(n.lock().name().to_string());
                if let Some(rev) = revdeps.get(n) {
                    for k in rev {
                        match k {
                            Dep::Task(t) => {
                                let nr = TaskRef(Arc::clone(t));
                                Self::visit_for_cycle(&nr, tmp, revdeps, acc)?;
                            }
                            Dep::Barrier(b) => {
                                let next = b.lock().unwrap().next.clone();
                                for k in &next {
                                    Self::visit_for_cycle(k, tmp, revdeps, acc)?;
                                }
                            }
                        }
                    }
                }
                tmp.insert(n.clone(), 2);
                acc.pop();
                Ok(())
            }
            1 => {
                let mut cycle = acc.clone();
                cycle.push(n.lock().name().to_string());
                Err(cycle)
            }
            _ => Ok(()),
        }
    }
}
