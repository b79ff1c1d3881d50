//! Lifecycle hook execution interface.
//!
//! The runner (exec-in-container or HTTP GET) lives outside this crate. The
//! manager owns only the sequencing: pre-start right after a container comes
//! up, pre-stop raced against the grace-period deadline before a stop.

use anyhow::Result;
use async_trait::async_trait;
use common::{ContainerSpec, Handler, Pod};

#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(
        &self,
        container_id: &str,
        pod: &Pod,
        container: &ContainerSpec,
        handler: &Handler,
    ) -> Result<()>;
}
