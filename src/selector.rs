use crate::error::{ExporterError, Result};
use crate::traits::DirectoryClient;
use crate::types::Server;
use tracing::{debug, error};

/// Requesting only this id picks the closest server.
pub const CLOSEST_SERVER_ID: i64 = -1;

/// Which servers a scrape should test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSelection {
    pub server_ids: Vec<i64>,
    /// Accept the closest server in place of a requested id that is unavailable.
    pub fallback: bool,
}

impl ServerSelection {
    pub fn new(server_ids: Vec<i64>, fallback: bool) -> Self {
        Self {
            server_ids,
            fallback,
        }
    }

    #[cfg(test)]
    pub fn closest() -> Self {
        Self::new(vec![CLOSEST_SERVER_ID], false)
    }

    pub fn is_closest(&self) -> bool {
        self.server_ids == [CLOSEST_SERVER_ID]
    }
}

/// 默认的 ID 匹配逻辑
///
/// For every requested id, in order: the server with that id, or the
/// closest server (the first one) when there is none.
pub fn find_by_ids(servers: &[Server], ids: &[i64]) -> Result<Vec<Server>> {
    let Some(closest) = servers.first() else {
        return Err(ExporterError::NoServers);
    };

    Ok(ids
        .iter()
        .map(|id| {
            let wanted = id.to_string();
            servers
                .iter()
                .find(|s| s.id == wanted)
                .unwrap_or(closest)
                .clone()
        })
        .collect())
}

/// 选出本次要测速的服务器
///
/// Fails when `servers` is empty, or when a requested id has no exact match
/// and fallback is disabled. A single unmatched id aborts the whole selection.
pub fn select_servers(
    servers: &[Server],
    selection: &ServerSelection,
    directory: &dyn DirectoryClient,
) -> Result<Vec<Server>> {
    if servers.is_empty() {
        return Err(ExporterError::NoServers);
    }

    if selection.is_closest() {
        return Ok(vec![servers[0].clone()]);
    }

    let targets = directory.find_servers(servers, &selection.server_ids)?;
    if targets.is_empty() {
        error!(server_ids = ?selection.server_ids, "no matching servers returned");
        let first = selection
            .server_ids
            .first()
            .copied()
            .unwrap_or(CLOSEST_SERVER_ID);
        return Err(ExporterError::ServerNotFound(first));
    }

    // every requested id must be among the targets, whatever order the matcher returns
    for id in &selection.server_ids {
        let wanted = id.to_string();
        if targets.iter().any(|t| t.id == wanted) {
            continue;
        }
        if !selection.fallback {
            error!(
                server_id = id,
                "could not find chosen server ID in available servers, server_fallback is not set so failing this test"
            );
            return Err(ExporterError::ServerNotFound(*id));
        }
        debug!(server_id = id, "chosen server unavailable, falling back to closest server");
    }

    Ok(targets)
}
