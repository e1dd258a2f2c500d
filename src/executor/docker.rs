//! Docker engine access for act runs.
//!
//! act starts one container per job from the runner image. The image must be
//! present locally (runs use `--pull=false`), and containers left behind by
//! interrupted runs are removed by ancestor image.

use std::collections::HashMap;

use bollard::Docker;
use bollard::container::{ListContainersOptions, RemoveContainerOptions, StopContainerOptions};
use tracing::{debug, info, warn};

use super::{ExecError, ExecResult};

/// Connection to the local Docker engine.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the local defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect() -> ExecResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Fails with [`ExecError::ImageMissing`] if `image` is not present.
    pub async fn ensure_image(&self, image: &str) -> ExecResult<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("Runner image {} is present", image);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(ExecError::ImageMissing(image.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Stops and removes every container created from `image`.
    ///
    /// Returns the number of containers removed.
    pub async fn remove_containers(&self, image: &str) -> ExecResult<usize> {
        let filters = HashMap::from([("ancestor".to_string(), vec![image.to_string()])]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let mut removed = 0;
        for id in containers.into_iter().filter_map(|c| c.id) {
            if let Err(e) = self
                .docker
                .stop_container(&id, None::<StopContainerOptions>)
                .await
            {
                debug!("Failed to stop container {}: {}", id, e);
            }

            let options = RemoveContainerOptions {
                v: true,
                force: true,
                ..Default::default()
            };
            match self.docker.remove_container(&id, Some(options)).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove container {}: {}", id, e),
            }
        }

        if removed > 0 {
            info!("Removed {} containers of {}", removed, image);
        }
        Ok(removed)
    }
}
