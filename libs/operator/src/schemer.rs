//! Schemer contract: talks to the live ClickHouse instance on a host to
//! read its software version and migrate table schemas. The actual
//! ClickHouse SQL client lives outside this crate; this module carries the
//! trait plus options structs the host state machine needs to thread
//! through.
use async_trait::async_trait;
use semver::Version;

use crate::error::Result;
use crate::model::Host;

/// Options for probing a host's ClickHouse version.
#[derive(Clone, Copy, Debug, Default)]
pub struct VersionProbeOpts {
    pub skip_new: bool,
    pub skip_stopped_ancestor: bool,
}

/// Table migration options, escalated by data-loss detection.
#[derive(Clone, Copy, Debug, Default)]
pub struct MigrateTableOpts {
    pub force_migrate: bool,
    pub drop_replica: bool,
}

#[async_trait]
pub trait Schemer: Send + Sync {
    /// Best-effort: callers map failure to the literal `"failed to query"`
    /// and continue, never treating it as fatal.
    async fn host_clickhouse_version(&self, host: &Host, opts: VersionProbeOpts) -> Result<Version>;

    async fn migrate_tables(&self, host: &Host, opts: MigrateTableOpts) -> Result<()>;
}

/// Used where no live ClickHouse cluster is reachable (local dev, unit
/// tests): reports a fixed version and treats every migration as a no-op.
pub struct NullSchemer {
    pub version: Version,
}

impl Default for NullSchemer {
    fn default() -> Self {
        Self {
            version: Version::new(24, 3, 0),
        }
    }
}

#[async_trait]
impl Schemer for NullSchemer {
    async fn host_clickhouse_version(&self, _host: &Host, _opts: VersionProbeOpts) -> Result<Version> {
        Ok(self.version.clone())
    }

    async fn migrate_tables(&self, _host: &Host, _opts: MigrateTableOpts) -> Result<()> {
        Ok(())
    }
}
