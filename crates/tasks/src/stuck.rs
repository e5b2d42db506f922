//! Stuck Detector: a running task is "stuck" if its heartbeat is stale or its
//! recent resource snapshots show zero CPU with unchanged memory across the
//! configured threshold window. Grounded in the teacher's `TaskWatcher`
//! (`crates/agent/src/tasks.rs`), which polls a session's task state on a
//! fixed interval and declares it timed out past an idle/total deadline —
//! generalized here from one watched session to every running task.

use crate::model::{BackgroundTask, ResourceSnapshot, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckReason {
    HeartbeatStale,
    ZeroCpuUnchangedMemory,
}

/// Evaluates whether `task` is stuck given `now` and its recent resource
/// snapshots (oldest first). Only ever returns a verdict for `Running` tasks.
pub fn evaluate(task: &BackgroundTask, now: u64, recent_snapshots: &[ResourceSnapshot]) -> Option<StuckReason> {
    if task.status != TaskStatus::Running {
        return None;
    }

    if let Some(last_heartbeat) = task.last_heartbeat_at {
        if now.saturating_sub(last_heartbeat) > task.config.stuck_threshold_s {
            return Some(StuckReason::HeartbeatStale);
        }
    }

    if recent_snapshots.len() >= 2 {
        let window_start = recent_snapshots[0].sampled_at;
        let covers_threshold = now.saturating_sub(window_start) >= task.config.stuck_threshold_s;
        let all_zero_cpu = recent_snapshots.iter().all(|s| s.cpu_percent == 0.0);
        let memory_unchanged = recent_snapshots
            .windows(2)
            .all(|w| w[0].memory_rss_bytes == w[1].memory_rss_bytes);
        if covers_threshold && all_zero_cpu && memory_unchanged {
            return Some(StuckReason::ZeroCpuUnchangedMemory);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, TaskConfig};

    fn running_task(stuck_threshold_s: u64) -> BackgroundTask {
        let mut task = BackgroundTask::new(
            "t1",
            "analysis",
            "t",
            Priority::Normal,
            TaskConfig {
                stuck_threshold_s,
                ..TaskConfig::default()
            },
            serde_json::json!({}),
            0,
        );
        task.status = TaskStatus::Running;
        task.last_heartbeat_at = Some(0);
        task
    }

    #[test]
    fn stale_heartbeat_is_stuck() {
        let task = running_task(60);
        assert_eq!(evaluate(&task, 200, &[]), Some(StuckReason::HeartbeatStale));
    }

    #[test]
    fn fresh_heartbeat_is_not_stuck() {
        let mut task = running_task(60);
        task.last_heartbeat_at = Some(190);
        assert_eq!(evaluate(&task, 200, &[]), None);
    }

    #[test]
    fn zero_cpu_unchanged_memory_across_window_is_stuck() {
        let mut task = running_task(60);
        task.last_heartbeat_at = Some(195);
        let snapshots = vec![
            ResourceSnapshot { task_id: "t1".into(), cpu_percent: 0.0, memory_rss_bytes: 1000, memory_percent: 1.0, sampled_at: 100 },
            ResourceSnapshot { task_id: "t1".into(), cpu_percent: 0.0, memory_rss_bytes: 1000, memory_percent: 1.0, sampled_at: 200 },
        ];
        assert_eq!(evaluate(&task, 200, &snapshots), Some(StuckReason::ZeroCpuUnchangedMemory));
    }

    #[test]
    fn nonzero_cpu_is_not_stuck() {
        let mut task = running_task(60);
        task.last_heartbeat_at = Some(195);
        let snapshots = vec![
            ResourceSnapshot { task_id: "t1".into(), cpu_percent: 5.0, memory_rss_bytes: 1000, memory_percent: 1.0, sampled_at: 100 },
            ResourceSnapshot { task_id: "t1".into(), cpu_percent: 0.0, memory_rss_bytes: 1000, memory_percent: 1.0, sampled_at: 200 },
        ];
        assert_eq!(evaluate(&task, 200, &snapshots), None);
    }

    #[test]
    fn non_running_task_is_never_stuck() {
        let mut task = running_task(60);
        task.status = TaskStatus::Completed;
        assert_eq!(evaluate(&task, 1_000_000, &[]), None);
    }
}
