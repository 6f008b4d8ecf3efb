//! # In-memory coordination service
//!
//! A single-process stand-in for a ZooKeeper ensemble: a node tree with
//! persistent and ephemeral nodes, parent-scoped sequence counters, world
//! ACLs, sessions and one-shot child watches. Used by tests, demos and
//! benchmarks, and carrying the fault hooks the harness needs.

use crate::{
    split_path, validate_path, Acl, ChildWatch, CoordinationError, CoordinationService, CreateMode,
    Permissions, SessionConnector, SessionId, WatchEvent, WatchTrigger,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Endpoint an ensemble answers on unless told otherwise.
pub const DEFAULT_ENDPOINT: &str = "localhost:2181";

#[derive(Debug)]
struct Node {
    #[allow(dead_code)]
    payload: Bytes,
    acl: Vec<Acl>,
    ephemeral_owner: Option<SessionId>,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl Node {
    fn new(payload: Bytes, acl: Vec<Acl>, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            payload,
            acl,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    timeout: Duration,
    ephemerals: BTreeSet<String>,
}

#[derive(Debug)]
struct EnsembleState {
    nodes: HashMap<String, Node>,
    sessions: HashMap<SessionId, SessionEntry>,
    watches: HashMap<String, Vec<(SessionId, WatchTrigger)>>,
    available: bool,
    fail_next_create_after_commit: bool,
    stats: EnsembleStats,
}

/// Counters describing what the ensemble has done so far.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnsembleStats {
    pub sessions_opened: u64,
    pub sessions_ended: u64,
    pub nodes_created: u64,
    pub nodes_removed: u64,
    pub watches_armed: u64,
    pub watches_fired: u64,
}

/// Shared server-side state. Sessions hold an `Arc` to it.
#[derive(Debug)]
pub struct InMemoryEnsemble {
    endpoint: String,
    state: Mutex<EnsembleState>,
}

type PendingFires = Vec<(WatchTrigger, WatchEvent)>;

impl InMemoryEnsemble {
    pub fn new() -> Arc<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Arc<Self> {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::new(Bytes::new(), Acl::world_all(), None));

        Arc::new(Self {
            endpoint: endpoint.into(),
            state: Mutex::new(EnsembleState {
                nodes,
                sessions: HashMap::new(),
                watches: HashMap::new(),
                available: true,
                fail_next_create_after_commit: false,
                stats: EnsembleStats::default(),
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Opens a session directly, bypassing endpoint resolution.
    pub fn open_session(self: &Arc<Self>, timeout: Duration) -> InMemorySession {
        let id = SessionId::new();
        {
            let mut state = self.state.lock();
            state.sessions.insert(
                id,
                SessionEntry {
                    timeout,
                    ephemerals: BTreeSet::new(),
                },
            );
            state.stats.sessions_opened += 1;
        }
        debug!("Opened in-memory session {}", id);

        InMemorySession {
            id,
            ensemble: Arc::clone(self),
        }
    }

    pub fn connector(self: &Arc<Self>) -> InMemoryConnector {
        InMemoryConnector {
            ensemble: Arc::clone(self),
        }
    }

    /// Ends `session_id` as if its heartbeats had stopped.
    ///
    /// Its ephemeral nodes are removed, watchers of their parents are
    /// notified, and the session's own pending watches receive
    /// [`WatchEvent::SessionExpired`]. Returns `false` if the session was not live.
    pub fn expire_session(&self, session_id: SessionId) -> bool {
        let fires = {
            let mut state = self.state.lock();
            Self::end_session_locked(&mut state, session_id)
        };
        let ended = fires.is_some();
        if let Some(fires) = fires {
            info!("Session {} expired", session_id);
            self.deliver(fires);
        }
        ended
    }

    pub fn is_session_live(&self, session_id: SessionId) -> bool {
        self.state.lock().sessions.contains_key(&session_id)
    }

    pub fn session_timeout(&self, session_id: SessionId) -> Option<Duration> {
        self.state
            .lock()
            .sessions
            .get(&session_id)
            .map(|entry| entry.timeout)
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// While unavailable, every call fails with `ServiceUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
        info!(
            "In-memory ensemble {} is now {}",
            self.endpoint,
            if available { "available" } else { "unavailable" }
        );
    }

    /// The next create commits its node but reports `ConnectionLoss`.
    pub fn fail_next_create_after_commit(&self) {
        self.state.lock().fail_next_create_after_commit = true;
    }

    /// Deletes a childless node regardless of owner, as an operator would.
    pub fn remove_node(&self, path: &str) -> Result<(), CoordinationError> {
        let fires = {
            let mut state = self.state.lock();
            let node = state
                .nodes
                .get(path)
                .ok_or_else(|| CoordinationError::no_such_path(path))?;
            if !node.children.is_empty() {
                return Err(CoordinationError::invalid_path(path, "node has children"));
            }
            Self::remove_locked(&mut state, path)
        };
        self.deliver(fires);
        Ok(())
    }

    /// Sets the next sequence number handed out under `path`.
    pub fn set_sequence(&self, path: &str, next: u64) -> Result<(), CoordinationError> {
        let mut state = self.state.lock();
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::no_such_path(path))?;
        node.next_sequence = next;
        Ok(())
    }

    /// Child names of `path` without going through a session.
    pub fn children_of(&self, path: &str) -> Vec<String> {
        self.state
            .lock()
            .nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Session owning the ephemeral node at `path`.
    pub fn owner_of(&self, path: &str) -> Option<SessionId> {
        self.state
            .lock()
            .nodes
            .get(path)
            .and_then(|node| node.ephemeral_owner)
    }

    /// Ephemeral nodes currently owned by `session_id`.
    pub fn ephemerals_of(&self, session_id: SessionId) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .get(&session_id)
            .map(|entry| entry.ephemerals.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Watches on `path` whose client side is still waiting.
    pub fn pending_watches(&self, path: &str) -> usize {
        self.state
            .lock()
            .watches
            .get(path)
            .map(|watches| {
                watches
                    .iter()
                    .filter(|(_, trigger)| !trigger.is_abandoned())
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn stats(&self) -> EnsembleStats {
        self.state.lock().stats.clone()
    }

    fn check_session(
        state: &EnsembleState,
        session_id: SessionId,
    ) -> Result<(), CoordinationError> {
        if !state.available {
            return Err(CoordinationError::unavailable("ensemble is not serving requests"));
        }
        if !state.sessions.contains_key(&session_id) {
            return Err(CoordinationError::SessionExpired { session_id });
        }
        Ok(())
    }

    fn create_node(
        &self,
        session_id: SessionId,
        path: &str,
        payload: Bytes,
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String, CoordinationError> {
        let (created, fires, report_loss) = {
            let mut state = self.state.lock();
            Self::check_session(&state, session_id)?;

            let separator = path
                .rfind('/')
                .ok_or_else(|| CoordinationError::invalid_path(path, "path must be absolute"))?;
            let parent_path = if separator == 0 { "/" } else { &path[..separator] };
            let name_prefix = &path[separator + 1..];
            if !mode.is_sequential() {
                validate_path(path)?;
            } else {
                validate_path(parent_path)?;
            }

            let parent = state
                .nodes
                .get_mut(parent_path)
                .ok_or_else(|| CoordinationError::no_such_path(parent_path))?;
            if parent.ephemeral_owner.is_some() {
                return Err(CoordinationError::invalid_path(
                    path,
                    "ephemeral nodes cannot have children",
                ));
            }
            if !Acl::world_allows(&parent.acl, Permissions::CREATE) {
                return Err(CoordinationError::PermissionDenied {
                    path: parent_path.to_string(),
                });
            }

            let name = if mode.is_sequential() {
                format!("{}{:010}", name_prefix, parent.next_sequence)
            } else {
                name_prefix.to_string()
            };
            if parent.children.contains(&name) {
                return Err(CoordinationError::NodeExists {
                    path: path.to_string(),
                });
            }
            parent.next_sequence = match parent.next_sequence.checked_add(1) {
                Some(next) => next,
                None if mode.is_sequential() => {
                    return Err(CoordinationError::SequenceOverflow {
                        path: parent_path.to_string(),
                    });
                }
                None => parent.next_sequence,
            };
            parent.children.insert(name.clone());

            let created = if parent_path == "/" {
                format!("/{}", name)
            } else {
                format!("{}/{}", parent_path, name)
            };

            let owner = mode.is_ephemeral().then_some(session_id);
            state
                .nodes
                .insert(created.clone(), Node::new(payload, acl.to_vec(), owner));
            if let Some(entry) = owner.and_then(|id| state.sessions.get_mut(&id)) {
                entry.ephemerals.insert(created.clone());
            }
            state.stats.nodes_created += 1;

            let fires = Self::take_child_watches(&mut state, parent_path);
            let report_loss = std::mem::take(&mut state.fail_next_create_after_commit);
            (created, fires, report_loss)
        };

        debug!("Created {:?} node {}", mode, created);
        self.deliver(fires);

        if report_loss {
            return Err(CoordinationError::connection_loss(format!(
                "connection dropped before create of {} was acknowledged",
                path
            )));
        }
        Ok(created)
    }

    fn list_children(
        &self,
        session_id: SessionId,
        path: &str,
        watch: bool,
    ) -> Result<(Vec<String>, Option<ChildWatch>), CoordinationError> {
        validate_path(path)?;
        let mut state = self.state.lock();
        Self::check_session(&state, session_id)?;

        let node = state
            .nodes
            .get(path)
            .ok_or_else(|| CoordinationError::no_such_path(path))?;
        if !Acl::world_allows(&node.acl, Permissions::READ) {
            return Err(CoordinationError::PermissionDenied {
                path: path.to_string(),
            });
        }
        let children: Vec<String> = node.children.iter().cloned().collect();

        let watch = if watch {
            let (trigger, child_watch) = ChildWatch::channel(path);
            let watches = state.watches.entry(path.to_string()).or_default();
            watches.retain(|(_, existing)| !existing.is_abandoned());
            watches.push((session_id, trigger));
            state.stats.watches_armed += 1;
            Some(child_watch)
        } else {
            None
        };

        Ok((children, watch))
    }

    fn exists_node(&self, session_id: SessionId, path: &str) -> Result<bool, CoordinationError> {
        validate_path(path)?;
        let state = self.state.lock();
        Self::check_session(&state, session_id)?;
        Ok(state.nodes.contains_key(path))
    }

    fn end_session_locked(state: &mut EnsembleState, session_id: SessionId) -> Option<PendingFires> {
        let entry = state.sessions.remove(&session_id)?;
        state.stats.sessions_ended += 1;

        let mut fires = Vec::new();
        for watches in state.watches.values_mut() {
            let (own, others): (Vec<_>, Vec<_>) =
                watches.drain(..).partition(|(owner, _)| *owner == session_id);
            *watches = others;
            fires.extend(
                own.into_iter()
                    .map(|(_, trigger)| (trigger, WatchEvent::SessionExpired)),
            );
        }

        for path in entry.ephemerals.iter().rev() {
            fires.extend(Self::remove_locked(state, path));
        }

        Some(fires)
    }

    fn remove_locked(state: &mut EnsembleState, path: &str) -> PendingFires {
        if state.nodes.remove(path).is_none() {
            return Vec::new();
        }
        state.stats.nodes_removed += 1;
        for entry in state.sessions.values_mut() {
            entry.ephemerals.remove(path);
        }

        match split_path(path) {
            Some((parent_path, name)) => {
                if let Some(parent) = state.nodes.get_mut(parent_path) {
                    parent.children.remove(name);
                }
                debug!("Removed node {}", path);
                Self::take_child_watches(state, parent_path)
            }
            None => Vec::new(),
        }
    }

    fn take_child_watches(state: &mut EnsembleState, path: &str) -> PendingFires {
        let event = WatchEvent::NodeChildrenChanged {
            path: path.to_string(),
        };
        state
            .watches
            .remove(path)
            .unwrap_or_default()
            .into_iter()
            .map(|(_, trigger)| (trigger, event.clone()))
            .collect()
    }

    // Called with the state lock released, so woken watchers observe the mutation.
    fn deliver(&self, fires: PendingFires) {
        if fires.is_empty() {
            return;
        }
        let delivered = fires
            .into_iter()
            .map(|(trigger, event)| trigger.fire(event))
            .filter(|delivered| *delivered)
            .count();
        self.state.lock().stats.watches_fired += delivered as u64;
    }
}

/// One client session against an [`InMemoryEnsemble`].
///
/// Dropping the session closes it, the way a crashed client's session
/// eventually ends.
#[derive(Debug)]
pub struct InMemorySession {
    id: SessionId,
    ensemble: Arc<InMemoryEnsemble>,
}

impl InMemorySession {
    pub fn ensemble(&self) -> &Arc<InMemoryEnsemble> {
        &self.ensemble
    }
}

#[async_trait]
impl CoordinationService for InMemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn create(
        &self,
        path: &str,
        payload: Bytes,
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String, CoordinationError> {
        self.ensemble.create_node(self.id, path, payload, acl, mode)
    }

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        self.ensemble.exists_node(self.id, path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.ensemble
            .list_children(self.id, path, false)
            .map(|(children, _)| children)
    }

    async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, ChildWatch), CoordinationError> {
        let (children, watch) = self.ensemble.list_children(self.id, path, true)?;
        let watch = watch.ok_or_else(|| {
            CoordinationError::connection_loss(format!("watch on {} was not armed", path))
        })?;
        Ok((children, watch))
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        let fires = {
            let mut state = self.ensemble.state.lock();
            InMemoryEnsemble::end_session_locked(&mut state, self.id)
        };
        if let Some(fires) = fires {
            debug!("Closed in-memory session {}", self.id);
            self.ensemble.deliver(fires);
        }
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        let fires = {
            let mut state = self.ensemble.state.lock();
            InMemoryEnsemble::end_session_locked(&mut state, self.id)
        };
        if let Some(fires) = fires {
            self.ensemble.deliver(fires);
        }
    }
}

/// Resolves endpoints to a single in-memory ensemble.
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    ensemble: Arc<InMemoryEnsemble>,
}

impl InMemoryConnector {
    pub fn ensemble(&self) -> &Arc<InMemoryEnsemble> {
        &self.ensemble
    }
}

#[async_trait]
impl SessionConnector for InMemoryConnector {
    type Session = InMemorySession;

    async fn connect(
        &self,
        endpoint: &str,
        session_timeout: Duration,
    ) -> Result<InMemorySession, CoordinationError> {
        if endpoint != self.ensemble.endpoint {
            return Err(CoordinationError::unavailable(format!(
                "no ensemble listening on {}",
                endpoint
            )));
        }
        if !self.ensemble.state.lock().available {
            return Err(CoordinationError::unavailable(format!(
                "ensemble at {} refused the session",
                endpoint
            )));
        }
        Ok(self.ensemble.open_session(session_timeout))
    }
}
