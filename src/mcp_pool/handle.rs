// ABOUTME: Per-user resident handle: identity, backing resource, status and recency
// ABOUTME: Calls over a handle update its status; cancellation leaves status as it was

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::mcp::{CallError, McpClient, ToolArguments, ToolInfo};

/// Maximum length of a user id.
///
/// Ids end up in container names and host paths, so they're kept short.
pub const MAX_USER_ID_LEN: usize = 64;

// === User ID ===

/// Invalid user identifier
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidUserId {
    #[error("User id is empty")]
    Empty,
    #[error("User id exceeds {MAX_USER_ID_LEN} bytes")]
    TooLong,
    #[error("User id contains unsupported character {0:?}")]
    BadChar(char),
    #[error("User id must start with an alphanumeric character or '_'")]
    BadStart,
}

/// Stable identity of a tenant; the pool key.
///
/// Restricted to `[A-Za-z0-9_.-]` so it is safe inside container names and
/// data directory paths.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidUserId> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(InvalidUserId::Empty);
        }
        if raw.len() > MAX_USER_ID_LEN {
            return Err(InvalidUserId::TooLong);
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            return Err(InvalidUserId::BadChar(bad));
        }
        if raw.starts_with('.') || raw.starts_with('-') {
            return Err(InvalidUserId::BadStart);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for UserId {
    type Err = InvalidUserId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// === Handle ID ===

/// Identifies one provisioning of a backend.
///
/// A re-provisioned user gets a fresh id, so comparing ids tells reuse apart
/// from re-creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct HandleId(pub Uuid);

impl HandleId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// === Kind & Status ===

/// Which kind of backend a pool manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    /// Per-user logical connection to a shared MCP endpoint
    LogicalConnection,
    /// Per-user container running a private MCP server
    ContainerInstance,
}

impl HandleKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LogicalConnection => "connection",
            Self::ContainerInstance => "container",
        }
    }
}

/// Outcome of the most recent call. Advisory only; never blocks calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleStatus {
    Active,
    Error,
}

// === Backing ===

/// Ownership token for a provisioned resource.
pub trait Backing: Send + Sync + 'static {
    /// Host port held by this resource, if any.
    fn port(&self) -> Option<u16> {
        None
    }
}

// === Snapshot ===

/// Point-in-time view of a resident handle
#[derive(Debug, Clone, Serialize)]
pub struct HandleSnapshot {
    pub handle_id: HandleId,
    pub user_id: UserId,
    pub kind: HandleKind,
    pub endpoint: String,
    pub status: HandleStatus,
    pub port: Option<u16>,
    #[serde(with = "super::config::duration_secs")]
    pub idle_for: Duration,
    #[serde(with = "super::config::duration_secs")]
    pub age: Duration,
    pub calls: u64,
}

// === Resource Handle ===

#[derive(Debug)]
struct HandleState {
    status: HandleStatus,
    last_used: Instant,
    calls: u64,
}

/// One user's live backend instance.
pub struct ResourceHandle<B> {
    id: HandleId,
    user_id: UserId,
    kind: HandleKind,
    backing: B,
    client: McpClient,
    created_at: Instant,

    /// Status and recency; held only for field updates.
    state: Mutex<HandleState>,

    /// Serializes wire calls on this backend without touching `state`.
    call_lock: tokio::sync::Mutex<()>,
}

impl<B: Backing> std::fmt::Debug for ResourceHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("kind", &self.kind)
            .field("endpoint", &self.client.endpoint())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<B: Backing> ResourceHandle<B> {
    pub fn new(user_id: UserId, kind: HandleKind, client: McpClient, backing: B) -> Self {
        let now = Instant::now();
        Self {
            id: HandleId::new(),
            user_id,
            kind,
            backing,
            client,
            created_at: now,
            state: Mutex::new(HandleState {
                status: HandleStatus::Active,
                last_used: now,
                calls: 0,
            }),
            call_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub const fn id(&self) -> HandleId {
        self.id
    }

    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub const fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }

    pub const fn backing(&self) -> &B {
        &self.backing
    }

    pub fn status(&self) -> HandleStatus {
        self.state.lock().status
    }

    pub fn last_used(&self) -> Instant {
        self.state.lock().last_used
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_used().elapsed()
    }

    /// Refresh recency. Never moves `last_used` backwards.
    pub fn touch(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if now > state.last_used {
            state.last_used = now;
        }
    }

    pub fn snapshot(&self) -> HandleSnapshot {
        let state = self.state.lock();
        HandleSnapshot {
            handle_id: self.id,
            user_id: self.user_id.clone(),
            kind: self.kind,
            endpoint: self.client.endpoint().to_string(),
            status: state.status,
            port: self.backing.port(),
            idle_for: state.last_used.elapsed(),
            age: self.created_at.elapsed(),
            calls: state.calls,
        }
    }

    /// `tools/list` over this handle.
    pub async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolInfo>, CallError> {
        self.exchange(cancel, self.client.list_tools()).await
    }

    /// `tools/call` over this handle. `arguments` is moved into the request.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        self.exchange(cancel, self.client.call_tool(name, arguments)).await
    }

    /// `ping` over this handle.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<(), CallError> {
        self.exchange(cancel, self.client.ping()).await
    }

    /// Run one exchange, recording its outcome on the handle.
    ///
    /// Status is only written after the exchange finishes, so a cancelled call
    /// leaves the pre-call status in place.
    async fn exchange<T>(
        &self,
        cancel: &CancellationToken,
        call: impl std::future::Future<Output = Result<T, CallError>>,
    ) -> Result<T, CallError> {
        self.touch();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CallError::Cancelled),
            result = async {
                let _serial = self.call_lock.lock().await;
                call.await
            } => result,
        };

        self.record(outcome.as_ref().err());
        outcome
    }

    fn record(&self, error: Option<&CallError>) {
        let mut state = self.state.lock();
        match error {
            None => {
                state.status = HandleStatus::Active;
                state.calls += 1;
            }
            Some(err) if err.marks_handle() => {
                state.status = HandleStatus::Error;
                state.calls += 1;
            }
            Some(_) => {}
        }
        let now = Instant::now();
        if now > state.last_used {
            state.last_used = now;
        }
    }
}
