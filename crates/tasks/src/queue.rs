//! Task Queue: strict priority + FIFO-within-priority, resource-aware
//! dequeue, dead-letter as a terminal sink. Grounded in the teacher's
//! single-mutex bookkeeping style (`EventBus`'s `parking_lot::Mutex` guarding
//! only O(1) state, never held across an await) generalized from an event
//! list to per-priority FIFO lanes.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::model::{BackgroundTask, Priority};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct Entry {
    task: BackgroundTask,
    not_before: u64,
}

#[derive(Default)]
struct Lanes {
    lanes: HashMap<Priority, VecDeque<Entry>>,
    dead_letter: Vec<(BackgroundTask, String)>,
    running_count: usize,
}

/// FIFO-within-priority queue with a resource-aware `Dequeue` and a terminal
/// dead-letter sink. The internal mutex is held only for O(1) bookkeeping,
/// never across a suspension point.
pub struct TaskQueue {
    state: Mutex<Lanes>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Lanes::default()),
        }
    }

    pub fn enqueue(&self, task: BackgroundTask) {
        let mut state = self.state.lock();
        state
            .lanes
            .entry(task.priority)
            .or_default()
            .push_back(Entry {
                task,
                not_before: 0,
            });
    }

    /// Pops the first ready task (by strict priority, FIFO within priority)
    /// whose resource requirements fit the worker's declared budget, skipping
    /// over tasks that don't fit or aren't yet due (from a delayed requeue).
    pub fn dequeue(&self, _worker_id: &str, max_cpu_cores: f64, max_memory_mb: u64) -> Option<BackgroundTask> {
        let mut state = self.state.lock();
        let now = now_unix();
        for priority in Priority::DEQUEUE_ORDER {
            let Some(lane) = state.lanes.get_mut(&priority) else {
                continue;
            };
            let pos = lane
                .iter()
                .position(|e| e.not_before <= now && e.task.fits_budget(max_cpu_cores, max_memory_mb));
            if let Some(pos) = pos {
                let entry = lane.remove(pos).expect("position just found");
                state.running_count += 1;
                return Some(entry.task);
            }
        }
        None
    }

    pub fn notify_finished(&self) {
        let mut state = self.state.lock();
        state.running_count = state.running_count.saturating_sub(1);
    }

    pub fn peek(&self, n: usize) -> Vec<BackgroundTask> {
        let state = self.state.lock();
        Priority::DEQUEUE_ORDER
            .iter()
            .flat_map(|p| state.lanes.get(p).into_iter().flatten())
            .take(n)
            .map(|e| e.task.clone())
            .collect()
    }

    /// Re-enqueues `task` at the front of its lane, not eligible for dequeue
    /// before `now + delay_s`.
    pub fn requeue(&self, task: BackgroundTask, delay_s: u64) {
        let mut state = self.state.lock();
        let not_before = now_unix() + delay_s;
        state
            .lanes
            .entry(task.priority)
            .or_default()
            .push_front(Entry { task, not_before });
    }

    /// Moves a task to the dead-letter sink. Terminal: never dequeued again.
    pub fn move_to_dead_letter(&self, mut task: BackgroundTask, reason: impl Into<String>) {
        task.status = crate::model::TaskStatus::Dead;
        let mut state = self.state.lock();
        state.dead_letter.push((task, reason.into()));
    }

    pub fn dead_letter(&self) -> Vec<(BackgroundTask, String)> {
        self.state.lock().dead_letter.clone()
    }

    pub fn pending_count(&self) -> usize {
        let state = self.state.lock();
        state.lanes.values().map(|l| l.len()).sum()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().running_count
    }

    /// `GetQueueDepth`: pending count per priority.
    pub fn queue_depth(&self) -> HashMap<Priority, usize> {
        let state = self.state.lock();
        Priority::DEQUEUE_ORDER
            .iter()
            .map(|p| (*p, state.lanes.get(p).map(|l| l.len()).unwrap_or(0)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskConfig;

    fn task(id: &str, priority: Priority) -> BackgroundTask {
        BackgroundTask::new(
            id,
            "analysis",
            "t",
            priority,
            TaskConfig::default(),
            serde_json::json!({}),
            0,
        )
    }

    #[test]
    fn strict_priority_before_fifo() {
        let q = TaskQueue::new();
        q.enqueue(task("low-1", Priority::Low));
        q.enqueue(task("crit-1", Priority::Critical));
        q.enqueue(task("normal-1", Priority::Normal));

        assert_eq!(q.dequeue("w1", 8.0, 8192).unwrap().id, "crit-1");
        assert_eq!(q.dequeue("w1", 8.0, 8192).unwrap().id, "normal-1");
        assert_eq!(q.dequeue("w1", 8.0, 8192).unwrap().id, "low-1");
    }

    #[test]
    fn fifo_within_same_priority() {
        let q = TaskQueue::new();
        q.enqueue(task("a", Priority::Normal));
        q.enqueue(task("b", Priority::Normal));
        assert_eq!(q.dequeue("w1", 8.0, 8192).unwrap().id, "a");
        assert_eq!(q.dequeue("w1", 8.0, 8192).unwrap().id, "b");
    }

    #[test]
    fn dequeue_skips_tasks_exceeding_worker_budget() {
        let q = TaskQueue::new();
        let mut big = task("big", Priority::Critical);
        big.required_cpu_cores = 16.0;
        q.enqueue(big);
        q.enqueue(task("small", Priority::Normal));

        let dequeued = q.dequeue("w1", 4.0, 8192).unwrap();
        assert_eq!(dequeued.id, "small");
    }

    #[test]
    fn requeue_with_delay_is_not_immediately_dequeueable() {
        let q = TaskQueue::new();
        q.requeue(task("delayed", Priority::Critical), 3600);
        assert!(q.dequeue("w1", 8.0, 8192).is_none());
    }

    #[test]
    fn dead_lettered_task_is_never_dequeued() {
        let q = TaskQueue::new();
        q.move_to_dead_letter(task("dead-1", Priority::Critical), "exceeded retries");
        assert!(q.dequeue("w1", 8.0, 8192).is_none());
        assert_eq!(q.dead_letter().len(), 1);
    }

    #[test]
    fn queue_depth_reports_per_priority_counts() {
        let q = TaskQueue::new();
        q.enqueue(task("a", Priority::High));
        q.enqueue(task("b", Priority::High));
        q.enqueue(task("c", Priority::Low));
        let depth = q.queue_depth();
        assert_eq!(depth[&Priority::High], 2);
        assert_eq!(depth[&Priority::Low], 1);
        assert_eq!(depth[&Priority::Critical], 0);
    }
}
