//! Candidate registration.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zelect_core::{
    protected_name_prefix, Acl, Candidate, CoordinationError, CoordinationService, ElectionError,
    ElectionPath, Result, CANDIDATE_PREFIX,
};

use crate::ElectionConfig;

/// Registers this process as a candidate by creating one ephemeral
/// sequential node under the election path.
///
/// The registrar never retries a failed create; whether to try again on a
/// fresh session is the caller's decision.
pub struct CandidateRegistrar<S>
where
    S: CoordinationService + ?Sized,
{
    service: Arc<S>,
    path: ElectionPath,
    protected: bool,
}

impl<S> CandidateRegistrar<S>
where
    S: CoordinationService + ?Sized,
{
    pub fn new(service: Arc<S>, config: &ElectionConfig) -> Result<Self> {
        Ok(Self {
            service,
            path: config.path()?,
            protected: config.protected,
        })
    }

    pub fn path(&self) -> &ElectionPath {
        &self.path
    }

    /// Creates the candidate node and extracts its order key.
    pub async fn register(&self) -> Result<Candidate> {
        let prefix = format!("{}/", self.path);
        let acl = Acl::world_all();

        let global_id = if self.protected {
            let guid = Uuid::new_v4().to_string();
            match self
                .service
                .create_protected_ephemeral_sequential(&prefix, &guid, Bytes::new(), &acl)
                .await
            {
                Ok(global_id) => global_id,
                Err(source @ CoordinationError::ConnectionLoss { .. }) => {
                    self.recover_protected(&guid, source).await?
                }
                Err(source) => return Err(self.failed(source)),
            }
        } else {
            let path = format!("{}{}", prefix, CANDIDATE_PREFIX);
            self.service
                .create_ephemeral_sequential(&path, Bytes::new(), &acl)
                .await
                .map_err(|source| self.failed(source))?
        };

        let candidate = Candidate::from_global_id(global_id.as_str()).map_err(|e| {
            ElectionError::protocol_violation(format!(
                "service assigned an unrankable name {}: {}",
                global_id, e
            ))
        })?;

        info!(
            "Registered candidate {} with order key {} (session {})",
            candidate.global_id,
            candidate.order_key,
            self.service.session_id()
        );
        Ok(candidate)
    }

    /// Looks for a node created under `guid` whose acknowledgement was lost.
    async fn recover_protected(&self, guid: &str, lost: CoordinationError) -> Result<String> {
        warn!(
            "Create under {} lost its acknowledgement, looking for protected node {}",
            self.path, guid
        );

        let wanted = protected_name_prefix(guid);
        let children = self
            .service
            .children(self.path.as_str())
            .await
            .map_err(|source| {
                debug!("Protected node lookup failed: {}", source);
                self.failed(lost.clone())
            })?;

        match children.iter().find(|name| name.starts_with(&wanted)) {
            Some(name) => {
                info!("Recovered protected candidate node {}", name);
                Ok(self.path.child(name))
            }
            None => Err(self.failed(lost)),
        }
    }

    fn failed(&self, source: CoordinationError) -> ElectionError {
        ElectionError::registration_failed(self.path.as_str(), source)
    }
}
