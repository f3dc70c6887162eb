//! Registry and supervisor for downstream sessions.
//!
//! The manager owns every session. Startup fans out in parallel and a
//! single server's failure never blocks the rest. Refresh diffs the new
//! config against the running set: added servers start, removed servers
//! close, changed servers restart, unchanged servers are left alone (their
//! in-flight calls survive) unless forced.

use crate::session::{CancelOutcome, ServerNotification, Session, SessionState, SessionStatus};
use futures::future::join_all;
use gateway_core::{GatewayError, Result, ServerSpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

/// Backoff schedule applied when a session fails to start.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        }
    }
}

impl RetryPolicy {
    /// No retries; used by tests and one-shot CLI commands.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }
}

/// Errors from one refresh or startup pass, keyed by server.
pub type StartErrors = Vec<(String, GatewayError)>;

/// Owns the `name -> Session` map.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    retry: RetryPolicy,
    notify_tx: mpsc::UnboundedSender<ServerNotification>,
}

impl SessionManager {
    /// Create a manager plus the receiver for downstream notifications.
    pub fn new(retry: RetryPolicy) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerNotification>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            retry,
            notify_tx,
        });
        (manager, notify_rx)
    }

    /// Start sessions for every spec in parallel; wait for all to resolve.
    pub async fn start_all(&self, specs: Vec<ServerSpec>) -> StartErrors {
        let mut startups = Vec::new();
        for spec in specs {
            let name = spec.name.clone();
            let session = Arc::new(Session::new(spec, self.notify_tx.clone()));
            self.sessions
                .write()
                .await
                .insert(name.clone(), session.clone());
            startups.push(async move {
                let result = start_with_retry(&session, &self.retry).await;
                (name, result)
            });
        }

        let mut errors = Vec::new();
        for (name, result) in join_all(startups).await {
            match result {
                Ok(()) => info!(server = %name, "session ready"),
                Err(e) => {
                    warn!(server = %name, error = %e, "session failed to start");
                    errors.push((name, e));
                }
            }
        }
        errors
    }

    /// Diff `new_specs` against the running set and reconcile.
    pub async fn refresh(&self, new_specs: Vec<ServerSpec>, force: bool) -> StartErrors {
        let current: HashMap<String, Arc<Session>> = self.sessions.read().await.clone();

        let mut to_start = Vec::new();
        let mut to_close = Vec::new();

        for spec in &new_specs {
            match current.get(&spec.name) {
                Some(session) if !force && session.spec() == spec => {
                    // Unchanged: leave alone. A session stuck in `failed`
                    // is given another chance even without force.
                    if session.state() == SessionState::Failed {
                        to_close.push(session.clone());
                        to_start.push(spec.clone());
                    }
                }
                Some(session) => {
                    to_close.push(session.clone());
                    to_start.push(spec.clone());
                }
                None => to_start.push(spec.clone()),
            }
        }

        let new_names: Vec<&str> = new_specs.iter().map(|s| s.name.as_str()).collect();
        for (name, session) in &current {
            if !new_names.contains(&name.as_str()) {
                to_close.push(session.clone());
            }
        }

        join_all(to_close.iter().map(|s| s.close())).await;
        {
            let mut sessions = self.sessions.write().await;
            for session in &to_close {
                // Only drop the entry if it still points at the session we
                // closed; a restart below will re-insert a fresh one.
                if let Some(existing) = sessions.get(session.name()) {
                    if Arc::ptr_eq(existing, session) {
                        sessions.remove(session.name());
                    }
                }
            }
        }

        self.start_all(to_start).await
    }

    /// Reconcile a single server against its (possibly absent) new spec,
    /// leaving every other session untouched.
    pub async fn refresh_one(
        &self,
        name: &str,
        new_spec: Option<ServerSpec>,
        force: bool,
    ) -> StartErrors {
        let current = self.get(name).await;
        match (current, new_spec) {
            (Some(session), Some(spec)) => {
                let unchanged = session.spec() == &spec
                    && session.state() != SessionState::Failed
                    && !force;
                if unchanged {
                    return Vec::new();
                }
                session.close().await;
                self.sessions.write().await.remove(name);
                self.start_all(vec![spec]).await
            }
            (Some(session), None) => {
                session.close().await;
                self.sessions.write().await.remove(name);
                Vec::new()
            }
            (None, Some(spec)) => self.start_all(vec![spec]).await,
            (None, None) => Vec::new(),
        }
    }

    /// Close every session and clear the registry.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        join_all(sessions.iter().map(|s| s.close())).await;
        self.sessions.write().await.clear();
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Sessions able to serve inventory (ready or degraded), name-sorted.
    pub async fn active_sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| matches!(s.state(), SessionState::Ready | SessionState::Degraded))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.name().cmp(b.name()));
        sessions
    }

    /// All sessions, name-sorted.
    pub async fn all_sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.name().cmp(b.name()));
        sessions
    }

    pub async fn statuses(&self) -> Vec<SessionStatus> {
        let mut statuses: Vec<SessionStatus> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.status())
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn server_states(&self) -> HashMap<String, SessionState> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(name, session)| (name.clone(), session.state()))
            .collect()
    }

    /// Cancel a pending request addressed as `<server>::<local id>`.
    pub async fn cancel(&self, request_id: &str, force: bool) -> Result<CancelOutcome> {
        let (server, local_id) = crate::session::parse_request_id(request_id).ok_or_else(|| {
            GatewayError::InvalidArgument {
                tool_id: request_id.to_string(),
                reason: "request_id must look like server::N".to_string(),
            }
        })?;
        match self.get(&server).await {
            Some(session) => Ok(session.cancel(local_id, force).await),
            None => Ok(CancelOutcome::NotFound),
        }
    }

    /// Register and start a session for a freshly provisioned server.
    pub async fn adopt(&self, spec: ServerSpec) -> Result<()> {
        let name = spec.name.clone();
        if let Some(existing) = self.get(&name).await {
            existing.close().await;
        }
        let session = Arc::new(Session::new(spec, self.notify_tx.clone()));
        self.sessions
            .write()
            .await
            .insert(name.clone(), session.clone());
        start_with_retry(&session, &self.retry).await
    }
}

async fn start_with_retry(session: &Arc<Session>, retry: &RetryPolicy) -> Result<()> {
    let mut last_err = match session.start().await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    for delay in &retry.delays {
        tokio::time::sleep(*delay).await;
        session.record_retry();
        info!(server = %session.name(), delay_secs = delay.as_secs(), "retrying startup");
        match session.start().await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::ConfigSource;

    fn spec(name: &str, command: &str) -> ServerSpec {
        ServerSpec {
            name: name.to_string(),
            source: ConfigSource::Project,
            command: command.to_string(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn test_start_failure_is_isolated() {
        let (manager, _rx) = SessionManager::new(RetryPolicy::none());
        let errors = manager
            .start_all(vec![spec("broken", "/nonexistent/binary/path")])
            .await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "broken");

        let statuses = manager.statuses().await;
        assert_eq!(statuses[0].state, SessionState::Failed);
    }

    #[tokio::test]
    async fn test_refresh_removes_absent_servers() {
        let (manager, _rx) = SessionManager::new(RetryPolicy::none());
        let _ = manager
            .start_all(vec![spec("gone", "/nonexistent/binary/path")])
            .await;
        assert!(manager.get("gone").await.is_some());

        let _ = manager.refresh(vec![], false).await;
        assert!(manager.get("gone").await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_server() {
        let (manager, _rx) = SessionManager::new(RetryPolicy::none());
        let outcome = manager.cancel("ghost::1", true).await.unwrap();
        assert_eq!(outcome, CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_cancel_rejects_malformed_id() {
        let (manager, _rx) = SessionManager::new(RetryPolicy::none());
        let err = manager.cancel("not-a-request-id", true).await.unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }
}
