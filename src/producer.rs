//! The task producer: a restartable source of successive groups, expressed
//! as a plain `Iterator`-shaped trait.

use crate::task::TaskHandle;

/// Yields successive groups of tasks. Each group is internally
/// parallelizable but totally ordered with respect to other groups. Returns
/// `None` once exhausted; must not resume producing after that.
pub trait TaskProducer: Send {
    fn next_group(&mut self) -> Option<Vec<TaskHandle>>;
}

/// A producer over a fixed, pre-built sequence of groups. Most hosts that
/// already know their full task graph up front (rather than discovering it
/// incrementally) can use this directly.
pub struct VecProducer {
    groups: std::vec::IntoIter<Vec<TaskHandle>>,
}

impl VecProducer {
    pub fn new(groups: Vec<Vec<TaskHandle>>) -> Self {
        VecProducer {
            groups: groups.into_iter(),
        }
    }
}

impl TaskProducer for VecProducer {
    fn next_group(&mut self) -> Option<Vec<TaskHandle>> {
        self.groups.next()
    }
}
