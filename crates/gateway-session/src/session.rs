//! One live connection to a downstream MCP server.
//!
//! A session owns the child process, a write-locked stdin, and a reader
//! task that demultiplexes inbound messages by request id into a pending
//! table. Progress notifications carrying a known `progressToken` count as
//! heartbeats and push the owning request's timeout forward.

use crate::protocol::{
    initialize_params, InboundMessage, JsonRpcNotification, JsonRpcRequest, ServerCapabilities,
};
use gateway_core::{GatewayError, Result, ServerSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default deadline for a downstream call; each heartbeat resets it.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline for the `initialize` handshake and inventory fetches.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A non-forced cancel is refused while the last heartbeat is younger
/// than this.
pub const CANCEL_HEARTBEAT_GUARD: Duration = Duration::from_secs(30);

/// Backpressure: new calls fail fast once this many requests are pending.
pub const MAX_PENDING_REQUESTS: usize = 256;

/// Grace period between closing stdin and killing the child.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Connecting,
    Ready,
    /// Connection alive but the last inventory fetch errored; calls are
    /// still allowed.
    Degraded,
    Failed,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Whether downstream calls may be sent in this state.
    pub fn accepts_calls(&self) -> bool {
        matches!(self, Self::Connecting | Self::Ready | Self::Degraded)
    }
}

/// Callback invoked whenever an inbound message bears a pending request's id.
pub type HeartbeatFn = Arc<dyn Fn() + Send + Sync>;

/// A notification received from a downstream server.
#[derive(Debug, Clone)]
pub struct ServerNotification {
    pub server: String,
    pub method: String,
    pub params: Option<Value>,
}

/// Outcome of a cancellation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The pending entry was failed locally and the downstream notified.
    Cancelled,
    /// The downstream was notified; the entry stays until it answers.
    NoticeSent,
    /// Refused: the last heartbeat is recent. Carries the age in seconds.
    Refused { heartbeat_age_secs: u64 },
    NotFound,
}

/// Tool descriptor as the downstream reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Resource descriptor as the downstream reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
}

/// Prompt descriptor as the downstream reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Cached inventory from the last successful fetch.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
}

/// Point-in-time view of a session for `health` and `status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub name: String,
    pub state: SessionState,
    pub last_error: Option<String>,
    pub pending_requests: usize,
    pub tool_count: usize,
    pub retry_count: u32,
}

struct PendingMeta {
    method: String,
    started_at: Instant,
    last_heartbeat: StdMutex<Instant>,
    cancelled: AtomicBool,
    heartbeat_cb: Option<HeartbeatFn>,
}

impl PendingMeta {
    fn beat(&self) {
        *self.last_heartbeat.lock().expect("heartbeat lock") = Instant::now();
        if let Some(cb) = &self.heartbeat_cb {
            cb();
        }
    }

    fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat
            .lock()
            .expect("heartbeat lock")
            .elapsed()
    }
}

struct PendingEntry {
    tx: oneshot::Sender<Result<Value>>,
    meta: Arc<PendingMeta>,
}

struct StateInfo {
    state: SessionState,
    last_error: Option<String>,
}

/// State shared between the session handle and its reader task.
struct Shared {
    name: String,
    pending: StdMutex<HashMap<u64, PendingEntry>>,
    state: StdMutex<StateInfo>,
    notify_tx: mpsc::UnboundedSender<ServerNotification>,
}

impl Shared {
    fn set_state(&self, state: SessionState, error: Option<String>) {
        let mut info = self.state.lock().expect("state lock");
        // Closed is terminal.
        if info.state == SessionState::Closed {
            return;
        }
        info.state = state;
        if error.is_some() {
            info.last_error = error;
        }
    }

    fn state(&self) -> SessionState {
        self.state.lock().expect("state lock").state
    }

    fn fail_all_pending(&self, reason: &str) {
        let entries: Vec<PendingEntry> = {
            let mut pending = self.pending.lock().expect("pending lock");
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            let _ = entry.tx.send(Err(GatewayError::SessionClosed {
                server: self.name.clone(),
                reason: reason.to_string(),
            }));
        }
    }

    fn complete(&self, id: u64, result: Result<Value>) {
        let entry = {
            let mut pending = self.pending.lock().expect("pending lock");
            pending.remove(&id)
        };
        if let Some(entry) = entry {
            entry.meta.beat();
            let _ = entry.tx.send(result);
        }
    }

    fn beat(&self, id: u64) {
        let meta = {
            let pending = self.pending.lock().expect("pending lock");
            pending.get(&id).map(|e| e.meta.clone())
        };
        if let Some(meta) = meta {
            meta.beat();
        }
    }

    fn beat_all(&self) {
        let metas: Vec<Arc<PendingMeta>> = {
            let pending = self.pending.lock().expect("pending lock");
            pending.values().map(|e| e.meta.clone()).collect()
        };
        for meta in metas {
            meta.beat();
        }
    }
}

/// One downstream MCP session.
pub struct Session {
    spec: ServerSpec,
    shared: Arc<Shared>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    capabilities: StdMutex<ServerCapabilities>,
    inventory: StdMutex<Inventory>,
    retry_count: AtomicU64,
}

impl Session {
    pub fn new(spec: ServerSpec, notify_tx: mpsc::UnboundedSender<ServerNotification>) -> Self {
        let shared = Arc::new(Shared {
            name: spec.name.clone(),
            pending: StdMutex::new(HashMap::new()),
            state: StdMutex::new(StateInfo {
                state: SessionState::Pending,
                last_error: None,
            }),
            notify_tx,
        });
        Self {
            spec,
            shared,
            stdin: Mutex::new(None),
            child: Mutex::new(None),
            reader: StdMutex::new(None),
            next_id: AtomicU64::new(0),
            capabilities: StdMutex::new(ServerCapabilities::default()),
            inventory: StdMutex::new(Inventory::default()),
            retry_count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().expect("state lock").last_error.clone()
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        self.capabilities.lock().expect("capabilities lock").clone()
    }

    /// The last successfully fetched inventory.
    pub fn cached_inventory(&self) -> Inventory {
        self.inventory.lock().expect("inventory lock").clone()
    }

    pub fn status(&self) -> SessionStatus {
        let info = self.shared.state.lock().expect("state lock");
        SessionStatus {
            name: self.spec.name.clone(),
            state: info.state,
            last_error: info.last_error.clone(),
            pending_requests: self.shared.pending.lock().expect("pending lock").len(),
            tool_count: self.inventory.lock().expect("inventory lock").tools.len(),
            retry_count: self.retry_count.load(Ordering::Relaxed) as u32,
        }
    }

    pub fn record_retry(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Launch the child and perform the MCP handshake.
    ///
    /// The child inherits the parent environment with the spec's overrides
    /// layered on top; override values are never logged.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.shared.state();
            if state == SessionState::Closed {
                return Err(GatewayError::SessionClosed {
                    server: self.spec.name.clone(),
                    reason: "session is closed".to_string(),
                });
            }
        }
        self.shared.set_state(SessionState::Connecting, None);
        info!(server = %self.spec.name, command = %self.spec.command, "starting downstream server");

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.spec.env {
            if !value.is_empty() {
                cmd.env(key, value);
            }
        }
        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            let reason = format!("failed to spawn '{}': {}", self.spec.command, e);
            self.shared.set_state(SessionState::Failed, Some(reason.clone()));
            GatewayError::SessionClosed {
                server: self.spec.name.clone(),
                reason,
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| GatewayError::Internal(
            format!("no stdin pipe for {}", self.spec.name),
        ))?;
        let stdout = child.stdout.take().ok_or_else(|| GatewayError::Internal(
            format!("no stdout pipe for {}", self.spec.name),
        ))?;
        if let Some(stderr) = child.stderr.take() {
            let name = self.spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "stderr: {}", line);
                }
            });
        }

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        let reader = tokio::spawn(reader_loop(self.shared.clone(), stdout));
        if let Some(old) = self.reader.lock().expect("reader lock").replace(reader) {
            old.abort();
        }

        match self.handshake().await {
            Ok(()) => {
                self.shared.set_state(SessionState::Ready, None);
                Ok(())
            }
            Err(e) => {
                let reason = format!("handshake failed: {}", e);
                self.shared.set_state(SessionState::Failed, Some(reason.clone()));
                self.terminate_child().await;
                Err(GatewayError::SessionClosed {
                    server: self.spec.name.clone(),
                    reason,
                })
            }
        }
    }

    async fn handshake(&self) -> Result<()> {
        let result = self
            .call_with_timeout("initialize", Some(initialize_params()), HANDSHAKE_TIMEOUT, None)
            .await?;
        let caps = ServerCapabilities::from_initialize_result(&result);
        debug!(
            server = %self.spec.name,
            downstream = caps.server_name.as_deref().unwrap_or("unknown"),
            "handshake complete"
        );
        *self.capabilities.lock().expect("capabilities lock") = caps;
        self.notify("notifications/initialized", None).await?;
        Ok(())
    }

    /// Fetch tools, resources, and prompts. Capabilities the server does not
    /// advertise yield empty lists. On success the cache is replaced and a
    /// degraded session returns to ready; on failure the session degrades
    /// and the stale cache is kept.
    pub async fn refresh_inventory(&self) -> Result<Inventory> {
        let caps = self.capabilities();
        let fetched = async {
            let tools = if caps.tools { self.list_tools().await? } else { Vec::new() };
            let resources = if caps.resources {
                self.list_resources().await?
            } else {
                Vec::new()
            };
            let prompts = if caps.prompts {
                self.list_prompts().await?
            } else {
                Vec::new()
            };
            Ok::<Inventory, GatewayError>(Inventory {
                tools,
                resources,
                prompts,
            })
        }
        .await;

        match fetched {
            Ok(inventory) => {
                *self.inventory.lock().expect("inventory lock") = inventory.clone();
                if self.shared.state() == SessionState::Degraded {
                    self.shared.set_state(SessionState::Ready, None);
                }
                Ok(inventory)
            }
            Err(e) => {
                warn!(server = %self.spec.name, error = %e, "inventory fetch failed");
                if self.shared.state() == SessionState::Ready {
                    self.shared
                        .set_state(SessionState::Degraded, Some(e.to_string()));
                }
                Err(e)
            }
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self
            .call_with_timeout("tools/list", None, HANDSHAKE_TIMEOUT, None)
            .await?;
        parse_list(&result, "tools")
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        let result = self
            .call_with_timeout("resources/list", None, HANDSHAKE_TIMEOUT, None)
            .await?;
        parse_list(&result, "resources")
    }

    pub async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>> {
        let result = self
            .call_with_timeout("prompts/list", None, HANDSHAKE_TIMEOUT, None)
            .await?;
        parse_list(&result, "prompts")
    }

    /// Call a downstream tool by its bare (un-namespaced) name.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        heartbeat_cb: Option<HeartbeatFn>,
    ) -> Result<Value> {
        self.call(
            "tools/call",
            Some(json!({"name": tool_name, "arguments": arguments})),
            heartbeat_cb,
        )
        .await
    }

    /// Like [`Session::call_tool`], but publishes the allocated request id
    /// through `id_slot` so the caller can cancel the request while it is
    /// still in flight.
    pub async fn call_tool_tracked(
        &self,
        tool_name: &str,
        arguments: Value,
        heartbeat_cb: Option<HeartbeatFn>,
        id_slot: &std::sync::OnceLock<u64>,
    ) -> Result<Value> {
        self.call_inner(
            "tools/call",
            Some(json!({"name": tool_name, "arguments": arguments})),
            DEFAULT_CALL_TIMEOUT,
            heartbeat_cb,
            Some(id_slot),
        )
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.call("resources/read", Some(json!({"uri": uri})), None)
            .await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        let mut params = json!({"name": name});
        if let Some(args) = arguments {
            params["arguments"] = args;
        }
        self.call("prompts/get", Some(params), None).await
    }

    /// Send a request and wait for the matching response with the default
    /// timeout, reset by heartbeats.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        heartbeat_cb: Option<HeartbeatFn>,
    ) -> Result<Value> {
        self.call_with_timeout(method, params, DEFAULT_CALL_TIMEOUT, heartbeat_cb)
            .await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        heartbeat_cb: Option<HeartbeatFn>,
    ) -> Result<Value> {
        self.call_inner(method, params, timeout, heartbeat_cb, None)
            .await
    }

    async fn call_inner(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        heartbeat_cb: Option<HeartbeatFn>,
        id_slot: Option<&std::sync::OnceLock<u64>>,
    ) -> Result<Value> {
        if !self.shared.state().accepts_calls() {
            return Err(GatewayError::SessionClosed {
                server: self.spec.name.clone(),
                reason: format!("session is {}", self.shared.state().as_str()),
            });
        }

        let (id, mut rx, meta) = {
            let mut pending = self.shared.pending.lock().expect("pending lock");
            if pending.len() >= MAX_PENDING_REQUESTS {
                return Err(GatewayError::ServerBusy {
                    server: self.spec.name.clone(),
                    pending: pending.len(),
                });
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = oneshot::channel();
            let meta = Arc::new(PendingMeta {
                method: method.to_string(),
                started_at: Instant::now(),
                last_heartbeat: StdMutex::new(Instant::now()),
                cancelled: AtomicBool::new(false),
                heartbeat_cb,
            });
            pending.insert(
                id,
                PendingEntry {
                    tx,
                    meta: meta.clone(),
                },
            );
            (id, rx, meta)
        };
        if let Some(slot) = id_slot {
            let _ = slot.set(id);
        }

        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.write_message(&serde_json::to_string(&request)?).await {
            self.shared.pending.lock().expect("pending lock").remove(&id);
            return Err(e);
        }

        loop {
            let heartbeat = *meta.last_heartbeat.lock().expect("heartbeat lock");
            let deadline = heartbeat + timeout;
            tokio::select! {
                outcome = &mut rx => {
                    return outcome.unwrap_or_else(|_| {
                        Err(GatewayError::SessionClosed {
                            server: self.spec.name.clone(),
                            reason: "reply channel dropped".to_string(),
                        })
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    // A heartbeat may have landed while we slept; only time
                    // out when the deadline still stands.
                    if meta.heartbeat_age() >= timeout {
                        self.shared.pending.lock().expect("pending lock").remove(&id);
                        return Err(GatewayError::SessionTimeout {
                            server: self.spec.name.clone(),
                            elapsed_secs: meta.started_at.elapsed().as_secs(),
                        });
                    }
                }
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.write_message(&serde_json::to_string(&notification)?)
            .await
    }

    async fn write_message(&self, serialized: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| GatewayError::SessionClosed {
            server: self.spec.name.clone(),
            reason: "stdin closed".to_string(),
        })?;
        stdin.write_all(serialized.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Cancel a pending request by its session-local id.
    ///
    /// Without `force`, a request whose last heartbeat is younger than
    /// [`CANCEL_HEARTBEAT_GUARD`] is refused. With `force`, the pending
    /// entry is failed locally regardless of downstream acknowledgement.
    pub async fn cancel(&self, local_id: u64, force: bool) -> CancelOutcome {
        let meta = {
            let pending = self.shared.pending.lock().expect("pending lock");
            match pending.get(&local_id) {
                Some(entry) => entry.meta.clone(),
                None => return CancelOutcome::NotFound,
            }
        };

        let age = meta.heartbeat_age();
        if !force && age < CANCEL_HEARTBEAT_GUARD {
            return CancelOutcome::Refused {
                heartbeat_age_secs: age.as_secs(),
            };
        }

        meta.cancelled.store(true, Ordering::SeqCst);
        let notice = JsonRpcNotification::cancelled(local_id, "cancelled by gateway");
        if let Ok(serialized) = serde_json::to_string(&notice) {
            let _ = self.write_message(&serialized).await;
        }

        if force {
            let entry = {
                let mut pending = self.shared.pending.lock().expect("pending lock");
                pending.remove(&local_id)
            };
            if let Some(entry) = entry {
                let _ = entry.tx.send(Err(GatewayError::UpstreamCancelled));
            }
            info!(
                server = %self.spec.name,
                request = local_id,
                method = %meta.method,
                "request force-cancelled"
            );
            return CancelOutcome::Cancelled;
        }
        CancelOutcome::NoticeSent
    }

    /// Close stdin, wait a bounded grace period, then terminate the child.
    /// All pending requests fail synchronously with `SessionClosed`.
    pub async fn close(&self) {
        self.shared.set_state(SessionState::Closed, None);
        self.shared.fail_all_pending("session closed");

        // Dropping stdin signals a clean shutdown to well-behaved servers.
        *self.stdin.lock().await = None;
        self.terminate_child().await;

        if let Some(reader) = self.reader.lock().expect("reader lock").take() {
            reader.abort();
        }
        info!(server = %self.spec.name, "session closed");
    }

    async fn terminate_child(&self) {
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(server = %self.spec.name, "child did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }
    }
}

async fn reader_loop(shared: Arc<Shared>, stdout: tokio::process::ChildStdout) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundMessage>(trimmed) {
                    Ok(message) => dispatch_inbound(&shared, message),
                    Err(_) => {
                        // Non-JSON output still proves the server is alive.
                        shared.beat_all();
                        debug!(server = %shared.name, "non-JSON output: {}", trimmed);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(server = %shared.name, error = %e, "read error");
                break;
            }
        }
    }

    // EOF: the process exited or closed its stdout.
    if shared.state() != SessionState::Closed {
        warn!(server = %shared.name, "downstream disconnected unexpectedly");
        shared.set_state(SessionState::Failed, Some("process exited".to_string()));
    }
    shared.fail_all_pending("downstream disconnected");
}

fn dispatch_inbound(shared: &Arc<Shared>, message: InboundMessage) {
    if let Some(id) = message.response_id() {
        let result = match message.error {
            Some(error) => Err(GatewayError::Downstream {
                server: shared.name.clone(),
                message: error.message,
            }),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        shared.complete(id, result);
        return;
    }

    if let Some(token) = message.progress_token() {
        shared.beat(token);
        return;
    }

    if message.is_notification() {
        let method = message.method.unwrap_or_default();
        let _ = shared.notify_tx.send(ServerNotification {
            server: shared.name.clone(),
            method,
            params: message.params,
        });
        return;
    }

    // Server-to-client request: not supported, ignore.
    debug!(server = %shared.name, "ignoring server-to-client request");
}

fn parse_list<T: serde::de::DeserializeOwned>(result: &Value, key: &str) -> Result<Vec<T>> {
    match result.get(key) {
        Some(list) => serde_json::from_value(list.clone()).map_err(GatewayError::from),
        None => Ok(Vec::new()),
    }
}

/// Format a public request id as `<server>::<local id>`.
pub fn format_request_id(server: &str, local_id: u64) -> String {
    format!("{}::{}", server, local_id)
}

/// Parse a public request id back into `(server, local id)`.
pub fn parse_request_id(request_id: &str) -> Option<(String, u64)> {
    let (server, id) = request_id.rsplit_once("::")?;
    let local_id = id.parse().ok()?;
    if server.is_empty() {
        return None;
    }
    Some((server.to_string(), local_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_round_trip() {
        let id = format_request_id("github", 42);
        assert_eq!(id, "github::42");
        assert_eq!(parse_request_id(&id), Some(("github".to_string(), 42)));
    }

    #[test]
    fn test_request_id_rejects_garbage() {
        assert_eq!(parse_request_id("no-separator"), None);
        assert_eq!(parse_request_id("server::not-a-number"), None);
        assert_eq!(parse_request_id("::7"), None);
    }

    #[test]
    fn test_state_accepts_calls() {
        assert!(SessionState::Ready.accepts_calls());
        assert!(SessionState::Degraded.accepts_calls());
        assert!(SessionState::Connecting.accepts_calls());
        assert!(!SessionState::Failed.accepts_calls());
        assert!(!SessionState::Closed.accepts_calls());
        assert!(!SessionState::Pending.accepts_calls());
    }
}
