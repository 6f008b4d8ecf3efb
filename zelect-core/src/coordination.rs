use crate::{Acl, CoordinationError, CreateMode, SessionId};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::oneshot;

/// Prefix the service prepends to protected sequential node names.
pub const PROTECTED_PREFIX: &str = "_c_";

/// Notification delivered through a [`ChildWatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A child of `path` was created or removed
    NodeChildrenChanged { path: String },
    /// The session that armed the watch has ended
    SessionExpired,
    /// The connection dropped but the session may still be alive
    Disconnected,
}

/// Client half of a one-shot child watch.
///
/// Resolves exactly once. Dropping it abandons the registration, which the
/// service prunes the next time it touches that path.
#[derive(Debug)]
pub struct ChildWatch {
    path: String,
    rx: oneshot::Receiver<WatchEvent>,
}

/// Service half of a one-shot child watch.
#[derive(Debug)]
pub struct WatchTrigger {
    tx: oneshot::Sender<WatchEvent>,
}

impl ChildWatch {
    /// Creates a connected trigger/watch pair for `path`.
    pub fn channel(path: impl Into<String>) -> (WatchTrigger, ChildWatch) {
        let (tx, rx) = oneshot::channel();
        (
            WatchTrigger { tx },
            ChildWatch {
                path: path.into(),
                rx,
            },
        )
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the watch to fire.
    ///
    /// A trigger dropped without firing means the service lost track of the
    /// watch, which is reported as a connection loss.
    pub async fn fired(self) -> Result<WatchEvent, CoordinationError> {
        let path = self.path;
        self.rx.await.map_err(|_| {
            CoordinationError::connection_loss(format!("watch on {} was dropped unfired", path))
        })
    }
}

impl WatchTrigger {
    /// Delivers `event`. Returns `false` if the watch was already abandoned.
    pub fn fire(self, event: WatchEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Primitives a ZooKeeper-like coordination service must provide.
///
/// Every call is made on behalf of one session; ephemeral nodes created
/// through an implementation vanish when that session ends.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    fn session_id(&self) -> SessionId;

    /// Creates a node and returns its actual path.
    ///
    /// For sequential modes `path` is a prefix and the service appends a
    /// zero-padded, parent-scoped, monotonically increasing counter.
    async fn create(
        &self,
        path: &str,
        payload: Bytes,
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String, CoordinationError>;

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError>;

    /// Names (not paths) of the children of `path`, in no particular order.
    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;

    /// Like [`children`](Self::children), atomically arming a one-shot watch
    /// that fires on the next change to the child set.
    async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, ChildWatch), CoordinationError>;

    /// Ends the session, removing every ephemeral node it owns.
    async fn close(&self) -> Result<(), CoordinationError>;

    async fn create_ephemeral_sequential(
        &self,
        path: &str,
        payload: Bytes,
        acl: &[Acl],
    ) -> Result<String, CoordinationError> {
        self.create(path, payload, acl, CreateMode::EphemeralSequential)
            .await
    }

    /// Ephemeral sequential create whose name embeds `guid`, so the caller
    /// can find its own node again after an ambiguous connection loss.
    ///
    /// `prefix` is the election path followed by a separator.
    async fn create_protected_ephemeral_sequential(
        &self,
        prefix: &str,
        guid: &str,
        payload: Bytes,
        acl: &[Acl],
    ) -> Result<String, CoordinationError> {
        let path = format!("{}{}", prefix, protected_name_prefix(guid));
        self.create_ephemeral_sequential(&path, payload, acl).await
    }
}

/// Name prefix of a protected node created with `guid`.
pub fn protected_name_prefix(guid: &str) -> String {
    format!("{}{}-", PROTECTED_PREFIX, guid)
}

/// Opens sessions against a coordination-service endpoint.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    type Session: CoordinationService + 'static;

    async fn connect(
        &self,
        endpoint: &str,
        session_timeout: Duration,
    ) -> Result<Self::Session, CoordinationError>;
}
