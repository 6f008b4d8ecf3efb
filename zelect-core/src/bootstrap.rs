//! Namespace bootstrap: make sure the election path exists before anyone registers.

use crate::{Acl, CoordinationError, CoordinationService, CreateMode, ElectionError, ElectionPath, Result};
use bytes::Bytes;
use tracing::debug;

/// Creates every missing component of `path` as a persistent, world-accessible node.
///
/// Safe to run concurrently from many processes: losing a creation race to
/// another bootstrapper counts as success.
pub async fn ensure_path<S>(service: &S, path: &ElectionPath) -> Result<()>
where
    S: CoordinationService + ?Sized,
{
    for component in path.ancestors() {
        let exists = service
            .exists(&component)
            .await
            .map_err(|source| bootstrap_error(&component, source))?;

        if exists {
            continue;
        }

        match service
            .create(&component, Bytes::new(), &Acl::world_all(), CreateMode::Persistent)
            .await
        {
            Ok(created) => debug!("Created election namespace node {}", created),
            Err(CoordinationError::NodeExists { .. }) => {
                debug!("Namespace node {} created concurrently", component)
            }
            Err(source) => return Err(bootstrap_error(&component, source)),
        }
    }

    Ok(())
}

fn bootstrap_error(path: &str, source: CoordinationError) -> ElectionError {
    ElectionError::Bootstrap {
        path: path.to_string(),
        source,
    }
}
