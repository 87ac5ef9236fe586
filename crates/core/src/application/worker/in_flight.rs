// In-flight job tracking (observability + shutdown reporting only)

use crate::domain::JobId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Set of job ids currently held by this runner's workers
#[derive(Debug, Default)]
pub struct InFlightJobs {
    ids: Mutex<HashSet<JobId>>,
}

impl InFlightJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `job_id` until the returned guard is dropped
    pub fn track(self: &Arc<Self>, job_id: &JobId) -> InFlightGuard {
        self.lock().insert(job_id.clone());
        InFlightGuard {
            jobs: Arc::clone(self),
            job_id: job_id.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted snapshot of the tracked ids
    pub fn snapshot(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<JobId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the job from the in-flight set on drop, even if the worker unwinds
pub struct InFlightGuard {
    jobs: Arc<InFlightJobs>,
    job_id: JobId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.job_id);
    }
}
