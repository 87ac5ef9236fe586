// Queue Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobStatus, QueueId};

/// Per-queue job counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: QueueId,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl QueueStats {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    /// Add `count` jobs in `status` to the tally
    pub fn record(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
    }

    pub fn count(&self, status: JobStatus) -> i64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Running => self.running,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_total() {
        let mut stats = QueueStats::new("emails");
        stats.record(JobStatus::Pending, 3);
        stats.record(JobStatus::Failed, 1);
        stats.record(JobStatus::Pending, 2);

        assert_eq!(stats.count(JobStatus::Pending), 5);
        assert_eq!(stats.count(JobStatus::Failed), 1);
        assert_eq!(stats.total(), 6);
    }
}
