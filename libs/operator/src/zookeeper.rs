//! Zookeeper Path Manager: ephemeral, opened per cluster reconcile, ensures
//! a root path exists, then closes.
//!
//! No vetted async Zookeeper client crate is pulled in here, so only the
//! trait ships, plus a no-op implementation for CHIs that never configure
//! Zookeeper. A real deployment injects its own `Arc<dyn
//! ZookeeperPathManager>`.
use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait ZookeeperPathManager: Send + Sync {
    async fn open(&self, nodes: &[String]) -> Result<()>;
    async fn ensure_root(&self, root: &str) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Used whenever a cluster has no `Zookeeper` config, or as the default in
/// tests. Zookeeper failures are non-fatal (best-effort), so a no-op stand-in
/// is always safe.
#[derive(Default)]
pub struct NoopZookeeperPathManager;

#[async_trait]
impl ZookeeperPathManager for NoopZookeeperPathManager {
    async fn open(&self, _nodes: &[String]) -> Result<()> {
        Ok(())
    }

    async fn ensure_root(&self, _root: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
