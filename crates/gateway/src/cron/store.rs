//! Persisted cron jobs and run records.
//!
//! Jobs live in `cron_jobs.json` (rewritten on mutation); finished run
//! records append to `cron_runs.jsonl`. A bounded in-memory ring of recent
//! runs serves listings without re-reading the file.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use sb_domain::error::{Error, Result};

use super::model::{CronJob, CronRun};
use super::schedule::{parse_tz, CronExpr};

const RECENT_RUNS: usize = 200;

pub struct CronStore {
    jobs_path: PathBuf,
    runs_path: PathBuf,
    jobs: RwLock<HashMap<Uuid, CronJob>>,
    recent_runs: RwLock<VecDeque<CronRun>>,
    timezone: chrono_tz::Tz,
}

impl CronStore {
    /// Load or create the store under the state path.
    pub fn open(state_path: &Path, timezone: &str) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let jobs_path = state_path.join("cron_jobs.json");
        let runs_path = state_path.join("cron_runs.jsonl");

        let jobs: HashMap<Uuid, CronJob> = if jobs_path.exists() {
            let raw = std::fs::read_to_string(&jobs_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(jobs = jobs.len(), path = %jobs_path.display(), "cron store loaded");

        Ok(Self {
            jobs_path,
            runs_path,
            jobs: RwLock::new(jobs),
            recent_runs: RwLock::new(VecDeque::new()),
            timezone: parse_tz(timezone),
        })
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.timezone
    }

    // ── Jobs ──────────────────────────────────────────────────────

    /// Register a job. The schedule must parse and the name must be free.
    pub fn add(&self, mut job: CronJob) -> Result<CronJob> {
        let expr = CronExpr::parse(&job.schedule)?;

        let mut jobs = self.jobs.write();
        if jobs.values().any(|j| j.name == job.name) {
            return Err(Error::Config(format!(
                "cron job named '{}' already exists",
                job.name
            )));
        }
        job.next_run_at = expr.next_after(&Utc::now(), self.timezone);
        jobs.insert(job.id, job.clone());
        drop(jobs);

        self.flush_best_effort();
        tracing::info!(job = %job.name, schedule = %job.schedule, "cron job added");
        Ok(job)
    }

    pub fn get(&self, id: &Uuid) -> Option<CronJob> {
        self.jobs.read().get(id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<CronJob> {
        self.jobs.read().values().find(|j| j.name == name).cloned()
    }

    pub fn list(&self) -> Vec<CronJob> {
        let mut jobs: Vec<_> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    pub fn remove(&self, id: &Uuid) -> Option<CronJob> {
        let removed = self.jobs.write().remove(id);
        if removed.is_some() {
            self.flush_best_effort();
        }
        removed
    }

    pub fn update(&self, id: &Uuid, mutate: impl FnOnce(&mut CronJob)) -> Option<CronJob> {
        let updated = {
            let mut jobs = self.jobs.write();
            let job = jobs.get_mut(id)?;
            mutate(job);
            job.clone()
        };
        self.flush_best_effort();
        Some(updated)
    }

    /// Enabled jobs whose next occurrence is due at `now`.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<CronJob> {
        self.jobs
            .read()
            .values()
            .filter(|j| j.enabled)
            .filter(|j| match j.next_run_at {
                Some(next) => next <= now,
                // Legacy rows without a computed occurrence: due now.
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Advance bookkeeping for a fired job.
    pub fn mark_fired(&self, id: &Uuid, now: DateTime<Utc>) {
        self.update(id, |job| {
            job.last_run_at = Some(now);
            job.run_count += 1;
            job.next_run_at = CronExpr::parse(&job.schedule)
                .ok()
                .and_then(|expr| expr.next_after(&now, self.timezone));
        });
    }

    // ── Run records ───────────────────────────────────────────────

    /// Track a newly-started run in the in-memory ring.
    pub fn run_started(&self, run: CronRun) {
        let mut recent = self.recent_runs.write();
        recent.push_back(run);
        while recent.len() > RECENT_RUNS {
            recent.pop_front();
        }
    }

    /// Close a run record and append it to the JSONL log.
    pub fn run_finished(&self, run: CronRun) {
        {
            let mut recent = self.recent_runs.write();
            if let Some(slot) = recent.iter_mut().find(|r| r.id == run.id) {
                *slot = run.clone();
            } else {
                recent.push_back(run.clone());
            }
        }

        let line = match serde_json::to_string(&run) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "serializing cron run failed");
                return;
            }
        };
        use std::io::Write;
        let appended = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.runs_path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = appended {
            tracing::warn!(error = %e, "appending cron run record failed");
        }
    }

    pub fn runs_for(&self, job_id: &Uuid) -> Vec<CronRun> {
        self.recent_runs
            .read()
            .iter()
            .filter(|r| &r.job_id == job_id)
            .cloned()
            .collect()
    }

    // ── Persistence ───────────────────────────────────────────────

    fn flush_best_effort(&self) {
        let jobs = self.jobs.read();
        match serde_json::to_string_pretty(&*jobs) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.jobs_path, json) {
                    tracing::warn!(error = %e, "writing cron_jobs.json failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "serializing cron jobs failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::model::{PayloadType, RunOutcome};

    fn store() -> (tempfile::TempDir, CronStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::open(dir.path(), "UTC").unwrap();
        (dir, store)
    }

    #[test]
    fn add_then_list_returns_job_exactly_once() {
        let (_dir, store) = store();
        let job = CronJob::new("daily", "0 9 * * *", "report", PayloadType::AgentTurn);
        store.add(job.clone()).unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "daily");
        assert!(listed[0].next_run_at.is_some());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (_dir, store) = store();
        store
            .add(CronJob::new("j", "0 * * * *", "a", PayloadType::AgentTurn))
            .unwrap();
        let err = store
            .add(CronJob::new("j", "5 * * * *", "b", PayloadType::AgentTurn))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn malformed_schedule_is_a_parse_error() {
        let (_dir, store) = store();
        let err = store
            .add(CronJob::new("bad", "not cron", "x", PayloadType::AgentTurn))
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn due_jobs_respects_enabled_and_next_run() {
        let (_dir, store) = store();
        let job = store
            .add(CronJob::new("j", "0 * * * *", "x", PayloadType::AgentTurn))
            .unwrap();

        // Freshly added: next_run_at is in the future.
        assert!(store.due_jobs(Utc::now()).is_empty());

        // Force it due.
        store.update(&job.id, |j| {
            j.next_run_at = Some(Utc::now() - chrono::Duration::minutes(1));
        });
        assert_eq!(store.due_jobs(Utc::now()).len(), 1);

        store.update(&job.id, |j| j.enabled = false);
        assert!(store.due_jobs(Utc::now()).is_empty());
    }

    #[test]
    fn mark_fired_advances_bookkeeping() {
        let (_dir, store) = store();
        let job = store
            .add(CronJob::new("j", "0 * * * *", "x", PayloadType::AgentTurn))
            .unwrap();
        let now = Utc::now();
        store.mark_fired(&job.id, now);

        let updated = store.get(&job.id).unwrap();
        assert_eq!(updated.run_count, 1);
        assert_eq!(updated.last_run_at, Some(now));
        assert!(updated.next_run_at.unwrap() > now);
    }

    #[test]
    fn jobs_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CronStore::open(dir.path(), "UTC").unwrap();
            store
                .add(CronJob::new("j", "0 9 * * *", "x", PayloadType::SystemEvent))
                .unwrap();
        }
        let store = CronStore::open(dir.path(), "UTC").unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.list()[0].payload, PayloadType::SystemEvent);
    }

    #[test]
    fn run_records_round_trip_through_ring() {
        let (_dir, store) = store();
        let job_id = Uuid::new_v4();
        let run = CronRun::start(job_id);
        let run_id = run.id;
        store.run_started(run.clone());
        store.run_finished(run.finish(RunOutcome::Completed, Some("out".into()), None));

        let runs = store.runs_for(&job_id);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run_id);
        assert_eq!(runs[0].status, RunOutcome::Completed);
        assert!(runs[0].finished_at.is_some());
    }
}
