//! Asynchronous provisioning of new downstream servers from the manifest.
//!
//! `provision` validates up front (manifest entry, required env vars) and
//! only then creates a job and spawns a worker. Workers run the install
//! recipe step by step, hand the new spec to the session manager, and leave
//! a terminal record behind for `provision_status` polling.

use chrono::{DateTime, Utc};
use gateway_core::{ConfigSource, GatewayError, Manifest, Platform, Result, ServerSpec};
use gateway_policy::Policy;
use gateway_session::SessionManager;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::catalog::CatalogRegistry;

/// Terminal jobs are kept at least this long for status polling.
pub const JOB_RETENTION: Duration = Duration::from_secs(15 * 60);

/// Concurrent install workers.
const MAX_CONCURRENT_INSTALLS: usize = 4;

/// Install job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Installing,
    Starting,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One provisioning job.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionJob {
    pub job_id: String,
    pub server: String,
    pub state: JobState,
    pub progress: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Shared policy snapshot, swapped on refresh.
pub type SharedPolicy = Arc<RwLock<Arc<Policy>>>;

/// Background installer for manifest servers.
pub struct Provisioner {
    manifest: Manifest,
    manager: Arc<SessionManager>,
    catalog: Arc<CatalogRegistry>,
    policy: SharedPolicy,
    jobs: StdMutex<HashMap<String, ProvisionJob>>,
    workers: Arc<Semaphore>,
}

impl Provisioner {
    pub fn new(
        manifest: Manifest,
        manager: Arc<SessionManager>,
        catalog: Arc<CatalogRegistry>,
        policy: SharedPolicy,
    ) -> Self {
        Self {
            manifest,
            manager,
            catalog,
            policy,
            jobs: StdMutex::new(HashMap::new()),
            workers: Arc::new(Semaphore::new(MAX_CONCURRENT_INSTALLS)),
        }
    }

    /// Validate and enqueue an install job. Validation failures return an
    /// error and create no job.
    pub fn provision(
        self: Arc<Self>,
        server_name: &str,
        extra_env: HashMap<String, String>,
    ) -> Result<String> {
        let entry = self.manifest.get_server(server_name).cloned().ok_or_else(|| {
            GatewayError::ProvisionFailed {
                server: server_name.to_string(),
                step: "manifest lookup".to_string(),
                reason: "server is not in the provisioning manifest".to_string(),
            }
        })?;

        // Required env may come from the caller or the process environment.
        if entry.requires_api_key {
            let var = entry.env_var.clone().unwrap_or_default();
            let provided = extra_env.get(&var).map(|v| !v.is_empty()).unwrap_or(false);
            if !provided {
                entry.check_env()?;
            }
        }

        let platform = Platform::detect();
        if entry.recipe(platform).is_none() {
            return Err(GatewayError::ProvisionFailed {
                server: server_name.to_string(),
                step: "platform check".to_string(),
                reason: format!("no install recipe for platform '{}'", platform.as_str()),
            });
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let job = ProvisionJob {
            job_id: job_id.clone(),
            server: server_name.to_string(),
            state: JobState::Pending,
            progress: "queued".to_string(),
            created_at: Utc::now(),
            finished_at: None,
        };
        {
            let mut jobs = self.jobs.lock().expect("jobs lock");
            prune_terminal(&mut jobs);
            jobs.insert(job_id.clone(), job);
        }

        let worker = self.clone();
        let worker_job_id = job_id.clone();
        tokio::spawn(async move {
            worker.run_job(&worker_job_id, entry, extra_env, platform).await;
        });

        info!(server = %server_name, job = %job_id, "provision job created");
        Ok(job_id)
    }

    /// Current job state and last progress message.
    pub fn status(&self, job_id: &str) -> Option<ProvisionJob> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        prune_terminal(&mut jobs);
        jobs.get(job_id).cloned()
    }

    pub fn jobs(&self) -> Vec<ProvisionJob> {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        prune_terminal(&mut jobs);
        let mut list: Vec<ProvisionJob> = jobs.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    fn update_job(&self, job_id: &str, state: JobState, progress: impl Into<String>) {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(job) = jobs.get_mut(job_id) {
            job.state = state;
            job.progress = progress.into();
            if state.is_terminal() {
                job.finished_at = Some(Utc::now());
            }
        }
    }

    async fn run_job(
        &self,
        job_id: &str,
        entry: gateway_core::ManifestServer,
        extra_env: HashMap<String, String>,
        platform: Platform,
    ) {
        let _permit = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let recipe: Vec<Vec<String>> = entry
            .recipe(platform)
            .map(|steps| steps.to_vec())
            .unwrap_or_default();

        self.update_job(job_id, JobState::Installing, "starting install");
        for (index, step) in recipe.iter().enumerate() {
            let step_display = step.join(" ");
            self.update_job(
                job_id,
                JobState::Installing,
                format!("step {}/{}: {}", index + 1, recipe.len(), step_display),
            );
            if let Err(e) = run_step(&entry.name, step).await {
                warn!(server = %entry.name, step = %step_display, error = %e, "install step failed");
                self.update_job(job_id, JobState::Failed, e.to_string());
                return;
            }
        }

        self.update_job(job_id, JobState::Starting, "starting server");
        let spec = ServerSpec {
            name: entry.name.clone(),
            source: ConfigSource::Custom,
            command: entry.command.clone(),
            args: entry.args.clone(),
            env: extra_env,
            cwd: None,
        };
        if let Err(e) = self.manager.adopt(spec).await {
            self.update_job(
                job_id,
                JobState::Failed,
                format!("server start failed: {}", e),
            );
            return;
        }

        let policy = self.policy.read().expect("policy lock").clone();
        self.catalog.rebuild(&self.manager, &policy).await;
        self.update_job(
            job_id,
            JobState::Completed,
            format!("{} installed and running", entry.name),
        );
        info!(server = %entry.name, job = %job_id, "provision job completed");
    }
}

async fn run_step(server: &str, argv: &[String]) -> Result<()> {
    let (program, args) = argv.split_first().ok_or_else(|| GatewayError::ProvisionFailed {
        server: server.to_string(),
        step: "install".to_string(),
        reason: "empty install step".to_string(),
    })?;

    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| GatewayError::ProvisionFailed {
            server: server.to_string(),
            step: argv.join(" "),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GatewayError::ProvisionFailed {
            server: server.to_string(),
            step: argv.join(" "),
            reason: format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        });
    }
    Ok(())
}

fn prune_terminal(jobs: &mut HashMap<String, ProvisionJob>) {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(JOB_RETENTION).unwrap_or_else(|_| chrono::Duration::zero());
    jobs.retain(|_, job| {
        !job.state.is_terminal() || job.finished_at.map(|at| at > cutoff).unwrap_or(true)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_session::RetryPolicy;

    fn provisioner() -> Arc<Provisioner> {
        let (manager, _rx) = SessionManager::new(RetryPolicy::none());
        let catalog = Arc::new(CatalogRegistry::new());
        let policy: SharedPolicy = Arc::new(RwLock::new(Arc::new(Policy::default())));
        Arc::new(Provisioner::new(
            Manifest::load().unwrap(),
            manager,
            catalog,
            policy,
        ))
    }

    #[tokio::test]
    async fn test_unknown_server_creates_no_job() {
        let p = provisioner();
        let err = p.clone().provision("not-in-manifest", HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "ProvisionFailed");
        assert!(p.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_missing_env_var_creates_no_job() {
        let p = provisioner();
        std::env::remove_var("GITHUB_PERSONAL_ACCESS_TOKEN");
        let err = p.clone().provision("github", HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "ProvisionFailed");
        assert!(err.to_string().contains("GITHUB_PERSONAL_ACCESS_TOKEN"));
        assert!(p.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_caller_env_satisfies_requirement() {
        let p = provisioner();
        std::env::remove_var("GITHUB_PERSONAL_ACCESS_TOKEN");
        let mut env = HashMap::new();
        env.insert(
            "GITHUB_PERSONAL_ACCESS_TOKEN".to_string(),
            "ghp_test".to_string(),
        );
        // Job creation succeeds; the install itself will fail later in this
        // sandbox, which is fine for this test.
        let job_id = p.clone().provision("github", env).unwrap();
        let job = p.status(&job_id).unwrap();
        assert_eq!(job.server, "github");
    }

    #[test]
    fn test_prune_keeps_recent_terminal_jobs() {
        let mut jobs = HashMap::new();
        jobs.insert(
            "old".to_string(),
            ProvisionJob {
                job_id: "old".to_string(),
                server: "x".to_string(),
                state: JobState::Completed,
                progress: "done".to_string(),
                created_at: Utc::now() - chrono::Duration::hours(2),
                finished_at: Some(Utc::now() - chrono::Duration::hours(1)),
            },
        );
        jobs.insert(
            "fresh".to_string(),
            ProvisionJob {
                job_id: "fresh".to_string(),
                server: "y".to_string(),
                state: JobState::Failed,
                progress: "broke".to_string(),
                created_at: Utc::now(),
                finished_at: Some(Utc::now()),
            },
        );
        jobs.insert(
            "running".to_string(),
            ProvisionJob {
                job_id: "running".to_string(),
                server: "z".to_string(),
                state: JobState::Installing,
                progress: "step 1/1".to_string(),
                created_at: Utc::now() - chrono::Duration::hours(3),
                finished_at: None,
            },
        );

        prune_terminal(&mut jobs);
        assert!(!jobs.contains_key("old"));
        assert!(jobs.contains_key("fresh"));
        assert!(jobs.contains_key("running"));
    }
}
