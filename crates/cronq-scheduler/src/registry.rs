//! The job+task registry (§4.4): two owning maps keyed by `JobId`, reloaded
//! on invalidation while preserving in-flight task state across the reload.
//!
//! Grounded on pg_cron's `RefreshTaskHash` (`task_states.c`): mark-all-
//! inactive, reload, re-activate-on-match, let the state machine drain the
//! rest.

use std::collections::HashMap;

use cronq_core::job::{JobDef, JobId};
use cronq_core::store::JobStore;
use cronq_core::Result;

use crate::task::{CronTask, TaskState};

/// Owns the scheduler's in-memory view of jobs and their execution state.
pub struct Registry {
    jobs: HashMap<JobId, JobDef>,
    tasks: HashMap<JobId, CronTask>,
    /// Snapshot of a job deleted from the store while its task was still
    /// past `WAITING` — kept just long enough for the in-flight run to
    /// finish and report its real outcome (scenario: dropping a job mid-run
    /// must not truncate the run already in progress). Mirrors pg_cron's
    /// `CronTask` carrying its own copy of the job fields rather than a bare
    /// pointer into the job hash.
    draining: HashMap<JobId, JobDef>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            jobs: HashMap::new(),
            tasks: HashMap::new(),
            draining: HashMap::new(),
        }
    }

    /// Reloads from the store (§4.4 steps 1-4). The invalidation flag
    /// itself is consumed by the caller via `JobStore::take_invalidation`.
    pub async fn reload(&mut self, store: &dyn JobStore) -> Result<()> {
        for task in self.tasks.values_mut() {
            task.is_active = false;
        }

        let fresh = store.list_jobs().await?;
        let fresh_ids: std::collections::HashSet<JobId> = fresh.iter().map(|j| j.job_id).collect();

        for (id, job) in self.jobs.drain() {
            if !fresh_ids.contains(&id)
                && self
                    .tasks
                    .get(&id)
                    .map(|t| t.state != TaskState::Waiting)
                    .unwrap_or(false)
            {
                self.draining.insert(id, job);
            }
        }

        for job in fresh {
            let task = self
                .tasks
                .entry(job.job_id)
                .or_insert_with(|| CronTask::new(job.job_id));
            task.is_active = job.active;
            self.draining.remove(&job.job_id);
            self.jobs.insert(job.job_id, job);
        }

        Ok(())
    }

    /// Removes tasks whose job no longer exists and which have drained back
    /// to the idle `WAITING` state — "destroyed only when the underlying
    /// job is gone AND the task is in a terminal state" (§3 Invariants).
    /// Also drops `draining` snapshots once their task is idle again.
    pub fn prune_orphans(&mut self) {
        let tasks = &self.tasks;
        self.draining
            .retain(|id, _| tasks.get(id).map(|t| t.state != TaskState::Waiting).unwrap_or(false));

        let jobs = &self.jobs;
        let draining = &self.draining;
        self.tasks.retain(|id, task| {
            jobs.contains_key(id) || draining.contains_key(id) || task.state != TaskState::Waiting
        });
    }

    pub fn job(&self, id: JobId) -> Option<&JobDef> {
        self.jobs.get(&id).or_else(|| self.draining.get(&id))
    }

    pub fn task_mut(&mut self, id: JobId) -> Option<&mut CronTask> {
        self.tasks.get_mut(&id)
    }

    /// Every job id the event loop should consider stepping this iteration:
    /// live jobs plus any still-draining ones (§4.4, §4.7 steps 6-7).
    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.keys().chain(self.draining.keys()).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Pairs each active job with its task for the scheduler tick, without
    /// holding two overlapping mutable borrows of `self`.
    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = (&JobDef, &mut CronTask)> {
        let jobs = &self.jobs;
        let tasks = &mut self.tasks;
        jobs.values()
            .filter(|job| job.active)
            .filter_map(move |job| tasks.get_mut(&job.job_id).map(|t| (job, t)))
    }

    /// True if any task has work the event loop should service without
    /// waiting out the full poll timeout (§4.7 step 5).
    pub fn has_immediate_work(&self) -> bool {
        self.tasks.values().any(|t| {
            matches!(t.state, TaskState::Error | TaskState::Done)
                || (t.state == TaskState::Waiting && t.pending_run_count > 0)
        })
    }

    /// Every in-flight task's connect/send deadline, for computing the
    /// event loop's poll timeout (§4.7 step 5: `next_event = min(minute_end,
    /// min over tasks of start_deadline)`).
    pub fn start_deadlines(&self) -> Vec<std::time::Instant> {
        self.tasks.values().filter_map(|t| t.start_deadline).collect()
    }

    /// A histogram of task states, for `cronctl status` (§6b).
    pub fn state_histogram(&self) -> HashMap<&'static str, usize> {
        let mut histogram = HashMap::new();
        for task in self.tasks.values() {
            let label = match task.state {
                TaskState::Waiting => "waiting",
                TaskState::Start => "start",
                TaskState::Connecting => "connecting",
                TaskState::Sending => "sending",
                TaskState::Running => "running",
                TaskState::Error => "error",
                TaskState::Done => "done",
            };
            *histogram.entry(label).or_insert(0) += 1;
        }
        histogram
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cronq_core::job::{JobPatch, RunId, RunPatch, RunRecord, RunStatus};
    use cronq_core::store::{Identity, JobIdOrName};
    use cronq_core::schedule::parse;
    use std::sync::Mutex;

    struct FixedStore {
        jobs: Mutex<Vec<JobDef>>,
    }

    fn job(id: i64, active: bool) -> JobDef {
        JobDef {
            job_id: JobId(id),
            schedule_text: "* * * * *".to_string(),
            schedule: parse("* * * * *").unwrap(),
            command: "SELECT 1".to_string(),
            node_name: "localhost".to_string(),
            node_port: 5432,
            database: "postgres".to_string(),
            user_name: "alice".to_string(),
            job_name: None,
            active,
            timezone_offset_hours: None,
        }
    }

    #[async_trait]
    impl JobStore for FixedStore {
        async fn list_jobs(&self) -> Result<Vec<JobDef>> {
            Ok(self.jobs.lock().unwrap().clone())
        }
        async fn insert_job(
            &self,
            _: &Identity,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
            _: bool,
            _: Option<i8>,
        ) -> Result<JobId> {
            unimplemented!()
        }
        async fn alter_job(&self, _: &Identity, _: JobId, _: JobPatch) -> Result<()> {
            unimplemented!()
        }
        async fn delete_job(&self, _: &Identity, _: JobIdOrName) -> Result<()> {
            unimplemented!()
        }
        async fn next_run_id(&self) -> Result<RunId> {
            unimplemented!()
        }
        async fn insert_run(&self, _: RunId, _: JobId, _: &str, _: &str, _: &str, _: RunStatus) -> Result<()> {
            unimplemented!()
        }
        async fn update_run(&self, _: RunId, _: RunPatch) -> Result<()> {
            unimplemented!()
        }
        async fn list_runs(&self, _: JobId, _: usize) -> Result<Vec<RunRecord>> {
            unimplemented!()
        }
        async fn mark_pending_runs_failed(&self) -> Result<u64> {
            Ok(0)
        }
        fn invalidate(&self) {}
        fn take_invalidation(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn reload_preserves_task_across_reappearance() {
        let store = FixedStore {
            jobs: Mutex::new(vec![job(1, true)]),
        };
        let mut registry = Registry::new();
        registry.reload(&store).await.unwrap();
        registry.task_mut(JobId(1)).unwrap().pending_run_count = 7;

        registry.reload(&store).await.unwrap();

        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 7);
        assert!(registry.task_mut(JobId(1)).unwrap().is_active);
    }

    #[tokio::test]
    async fn removed_job_deactivates_its_task_and_is_pruned_once_idle() {
        let store = FixedStore {
            jobs: Mutex::new(vec![job(1, true)]),
        };
        let mut registry = Registry::new();
        registry.reload(&store).await.unwrap();

        store.jobs.lock().unwrap().clear();
        registry.reload(&store).await.unwrap();

        assert!(!registry.task_mut(JobId(1)).unwrap().is_active);
        registry.prune_orphans();
        assert!(registry.task_mut(JobId(1)).is_none());
    }

    #[tokio::test]
    async fn inactive_job_is_not_in_active_iteration() {
        let store = FixedStore {
            jobs: Mutex::new(vec![job(1, false), job(2, true)]),
        };
        let mut registry = Registry::new();
        registry.reload(&store).await.unwrap();

        let active_ids: Vec<JobId> = registry.iter_active_mut().map(|(job, _)| job.job_id).collect();
        assert_eq!(active_ids, vec![JobId(2)]);
    }
}
