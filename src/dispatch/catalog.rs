//! Job configuration lookup.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::models::JobDefinition;

#[async_trait]
pub trait JobCatalog: Send + Sync + std::fmt::Debug {
    async fn load_job(&self, job_id: i64) -> Result<Option<JobDefinition>>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobCatalog {
    jobs: DashMap<i64, JobDefinition>,
}

impl InMemoryJobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = JobDefinition>) -> Self {
        let catalog = Self::new();
        for job in jobs {
            catalog.insert(job);
        }
        catalog
    }

    /// Insert or replace by job id
    pub fn insert(&self, job: JobDefinition) {
        self.jobs.insert(job.job_id, job);
    }

    pub fn remove(&self, job_id: i64) -> Option<JobDefinition> {
        self.jobs.remove(&job_id).map(|(_, job)| job)
    }
}

#[async_trait]
impl JobCatalog for InMemoryJobCatalog {
    async fn load_job(&self, job_id: i64) -> Result<Option<JobDefinition>> {
        Ok(self.jobs.get(&job_id).map(|job| job.value().clone()))
    }
}
