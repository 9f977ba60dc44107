//! Victim registry and rotation for cross-worker stealing.
//!
//! Workers register their deque at run-loop start and deregister at exit.
//! A thief starts at `thief_id mod N` and visits victims in rotating order,
//! taking the first successful steal; with a batch size above one, extra
//! items from the same victim land in the thief's own deque.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::task::Task;
use crate::sync::WorkStealingDeque;

pub(crate) type TaskDeque = WorkStealingDeque<Box<Task>>;

struct Registry {
    deques: HashMap<i32, Arc<TaskDeque>>,
    // Cached id list so steal attempts iterate without rebuilding keys.
    ids: Vec<i32>,
}

pub(crate) struct StealScheduler {
    registry: RwLock<Registry>,
    batch: usize,
}

impl StealScheduler {
    pub(crate) fn new(batch: usize) -> Self {
        Self {
            registry: RwLock::new(Registry {
                deques: HashMap::new(),
                ids: Vec::new(),
            }),
            batch: batch.max(1),
        }
    }

    pub(crate) fn register(&self, worker_id: i32, deque: Arc<TaskDeque>) {
        let mut registry = self.registry.write();
        if registry.deques.insert(worker_id, deque).is_none() {
            registry.ids.push(worker_id);
        }
    }

    pub(crate) fn deregister(&self, worker_id: i32) {
        let mut registry = self.registry.write();
        if registry.deques.remove(&worker_id).is_some() {
            registry.ids.retain(|&id| id != worker_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.registry.read().ids.len()
    }

    /// Try each victim once in rotating order; the first hit wins. When
    /// `own` is provided and the batch size allows, up to `batch - 1`
    /// further items from the winning victim are moved into `own`.
    pub(crate) fn steal(&self, thief_id: i32, own: Option<&TaskDeque>) -> Option<Box<Task>> {
        let registry = self.registry.read();
        let n = registry.ids.len();
        if n == 0 {
            return None;
        }
        let start = thief_id.unsigned_abs() as usize % n;
        for k in 0..n {
            let victim_id = registry.ids[(start + k) % n];
            if victim_id == thief_id {
                continue;
            }
            let victim = &registry.deques[&victim_id];
            if let Some(task) = victim.steal() {
                if let Some(own) = own {
                    for _ in 1..self.batch {
                        match victim.steal() {
                            Some(extra) => own.push_bottom(extra),
                            None => break,
                        }
                    }
                }
                return Some(task);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::task_cache;

    fn make_task(id: u64) -> Box<Task> {
        task_cache().acquire(id, Box::new(|| {}), 0, None, None)
    }

    #[test]
    fn test_register_deregister() {
        let scheduler = StealScheduler::new(1);
        scheduler.register(1, Arc::new(TaskDeque::new()));
        scheduler.register(2, Arc::new(TaskDeque::new()));
        assert_eq!(scheduler.len(), 2);
        scheduler.deregister(1);
        assert_eq!(scheduler.len(), 1);
        scheduler.deregister(1);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_steal_skips_self_and_rotates() {
        let scheduler = StealScheduler::new(1);
        let own = Arc::new(TaskDeque::new());
        let victim = Arc::new(TaskDeque::new());
        scheduler.register(0, Arc::clone(&own));
        scheduler.register(1, Arc::clone(&victim));

        own.push_bottom(make_task(100));
        victim.push_bottom(make_task(200));

        // Thief 0 must not steal from itself.
        let stolen = scheduler.steal(0, Some(&own)).expect("victim had work");
        assert_eq!(stolen.id, 200);
        assert_eq!(own.len(), 1);
        assert!(scheduler.steal(0, Some(&own)).is_none());
    }

    #[test]
    fn test_steal_batch_fills_own_deque() {
        let scheduler = StealScheduler::new(3);
        let own = Arc::new(TaskDeque::new());
        let victim = Arc::new(TaskDeque::new());
        scheduler.register(7, Arc::clone(&own));
        scheduler.register(8, Arc::clone(&victim));

        for id in 1..=5 {
            victim.push_bottom(make_task(id));
        }

        let stolen = scheduler.steal(7, Some(&own)).expect("victim had work");
        // FIFO from the victim's top.
        assert_eq!(stolen.id, 1);
        assert_eq!(own.len(), 2);
        assert_eq!(victim.len(), 2);
    }

    #[test]
    fn test_steal_empty_registry() {
        let scheduler = StealScheduler::new(1);
        assert!(scheduler.steal(3, None).is_none());
    }
}
