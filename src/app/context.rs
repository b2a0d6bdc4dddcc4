//! Mutable job state with persisted checkpoints.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{AppError, Job, JobError, JobName, JobRepository};

/// A running job and the store its checkpoints are written to.
///
/// Handlers read their parameters and settled steps from the job's data blob
/// and record progress with [`JobContext::set`] followed by
/// [`JobContext::save`]. Keys are dotted paths such as `bonusJob.name`.
pub struct JobContext {
    job: Job,
    repo: Arc<dyn JobRepository>,
}

impl JobContext {
    pub fn new(job: Job, repo: Arc<dyn JobRepository>) -> Self {
        Self { job, repo }
    }

    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.job.id
    }

    #[must_use]
    pub fn name(&self) -> JobName {
        self.job.name
    }

    /// Deserialize the job parameters from the data blob.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_value(self.job.data.clone()).map_err(|e| {
            AppError::Job(JobError::InvalidParams {
                job: self.job.name.to_string(),
                message: e.to_string(),
            })
        })
    }

    /// Value at a dotted key path, if present and not null.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.job.data, |value, key| value.get(key))
            .filter(|value| !value.is_null())
    }

    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, AppError> {
        self.get(path)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|e| {
                AppError::Job(JobError::InvalidState(format!(
                    "checkpoint '{path}' of job {} is malformed: {e}",
                    self.job.id
                )))
            })
    }

    /// Set a dotted key path in memory, creating intermediate objects.
    pub fn set<T: Serialize>(&mut self, path: &str, value: T) -> Result<(), AppError> {
        let value = serde_json::to_value(value)?;
        set_path(&mut self.job.data, path, value);
        Ok(())
    }

    /// Remove a dotted key path in memory. Returns whether it was present.
    pub fn remove(&mut self, path: &str) -> bool {
        remove_path(&mut self.job.data, path)
    }

    /// Persist the data blob without changing the job status.
    ///
    /// Fails with [`JobError::LeaseLost`] once another worker has reclaimed
    /// the job.
    pub async fn save(&self) -> Result<(), AppError> {
        self.repo
            .save_data(&self.job.id, self.job.attempts, &self.job.data)
            .await?;
        debug!(job_id = %self.job.id, "Saved job checkpoint");
        Ok(())
    }

    /// `set` followed by `save`.
    pub async fn checkpoint<T: Serialize>(&mut self, path: &str, value: T) -> Result<(), AppError> {
        self.set(path, value)?;
        self.save().await
    }

    #[must_use]
    pub fn into_job(self) -> Job {
        self.job
    }
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    let keys: Vec<&str> = path.split('.').collect();
    set_keys(root, &keys, value);
}

fn set_keys(target: &mut Value, keys: &[&str], value: Value) {
    let Some((first, rest)) = keys.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        let child = map.entry((*first).to_string()).or_insert(Value::Null);
        set_keys(child, rest, value);
    }
}

/// Remove a dotted key path from `root`, leaving parents in place.
fn remove_path(root: &mut Value, path: &str) -> bool {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (
            parent
                .split('.')
                .try_fold(&mut *root, |value, key| value.get_mut(key)),
            leaf,
        ),
        None => (Some(root), path),
    };
    parent
        .and_then(Value::as_object_mut)
        .is_some_and(|map| map.remove(leaf).is_some())
}
