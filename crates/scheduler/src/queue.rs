use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::Instant;

use crate::task::Task;
use crate::types::Priority;

/// A task waiting for admission.
pub(crate) struct QueuedTask {
    pub seq: u64,
    pub submitted_at: Instant,
    pub deadline: Instant,
    pub task: Task,
}

impl QueuedTask {
    pub fn priority(&self) -> Priority {
        self.task.priority
    }
}

// Max-heap order: higher priority, then earlier deadline, then earlier
// submission. `seq` is unique, so no two entries compare equal.
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority()
            .cmp(&other.priority())
            .then_with(|| other.deadline.cmp(&self.deadline))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

#[derive(Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl PendingQueue {
    pub fn push(&mut self, task: QueuedTask) {
        self.heap.push(task);
    }

    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use accel_core::ResourceRequest;

    use super::*;

    fn queued(seq: u64, priority: Priority, deadline_ms: u64, base: Instant) -> QueuedTask {
        let request = ResourceRequest::memory(1, Duration::from_millis(deadline_ms));
        QueuedTask {
            seq,
            submitted_at: base,
            deadline: base + Duration::from_millis(deadline_ms),
            task: Task::new(priority, request, |_| async { Ok(()) }).with_id(format!("t{}", seq)),
        }
    }

    fn drain(queue: &mut PendingQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop()).map(|q| q.task.id).collect()
    }

    #[test]
    fn priority_dominates() {
        let base = Instant::now();
        let mut q = PendingQueue::default();
        q.push(queued(0, Priority::Low, 10, base));
        q.push(queued(1, Priority::Critical, 1_000, base));
        q.push(queued(2, Priority::Normal, 10, base));
        q.push(queued(3, Priority::High, 10, base));

        assert_eq!(drain(&mut q), vec!["t1", "t3", "t2", "t0"]);
    }

    #[test]
    fn equal_priority_prefers_earlier_deadline_then_submission() {
        let base = Instant::now();
        let mut q = PendingQueue::default();
        q.push(queued(0, Priority::Normal, 500, base));
        q.push(queued(1, Priority::Normal, 100, base));
        q.push(queued(2, Priority::Normal, 500, base));
        q.push(queued(3, Priority::Normal, 100, base));

        assert_eq!(q.len(), 4);
        assert_eq!(drain(&mut q), vec!["t1", "t3", "t0", "t2"]);
        assert!(q.is_empty());
    }
}
