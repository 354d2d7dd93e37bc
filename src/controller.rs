use crate::error::{NetblockError, Result};
use crate::platform::{PlatformAdapter, PlatformDialect, RuleReport};
use crate::store::{BlockSet, BlockStore};
use std::net::IpAddr;
use tracing::{error, info, warn};

/// Counts from one `restore_all` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub total: usize,
}

impl RestoreSummary {
    pub fn is_complete(&self) -> bool {
        self.restored == self.total
    }
}

/// Parses an endpoint literal, rejecting anything that is not a plain
/// IPv4/IPv6 address.
pub fn parse_endpoint(raw: &str) -> Result<IpAddr> {
    raw.trim()
        .parse()
        .map_err(|_| NetblockError::InvalidEndpoint(raw.to_string()))
}

/// Keeps the recorded block intent and reconciles it with the firewall.
///
/// Mutations take `&mut self`; hosts that share a controller between
/// threads wrap it in a single `Mutex` so that "mutate, persist, issue
/// commands" stays one critical section.
pub struct BlockController {
    store: BlockStore,
    adapter: PlatformAdapter,
    blocked: BlockSet,
}

impl BlockController {
    pub fn new(store: BlockStore, adapter: PlatformAdapter) -> Self {
        let blocked = store.load();
        Self {
            store,
            adapter,
            blocked,
        }
    }

    pub fn dialect(&self) -> PlatformDialect {
        self.adapter.dialect()
    }

    pub fn has_privilege(&self) -> bool {
        self.adapter.has_privilege()
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// Sorted snapshot of the recorded intent.
    pub fn blocked(&self) -> Vec<IpAddr> {
        self.blocked.iter().copied().collect()
    }

    pub fn block(&mut self, ip: &str) -> bool {
        match self.try_block(ip) {
            Ok(report) => report.primary_succeeded(),
            Err(e) => {
                error!("Cannot block {}: {}", ip, e);
                false
            }
        }
    }

    pub fn unblock(&mut self, ip: &str) -> bool {
        match self.try_unblock(ip) {
            Ok(report) => report.primary_succeeded(),
            Err(e) => {
                error!("Cannot unblock {}: {}", ip, e);
                false
            }
        }
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        parse_endpoint(ip)
            .map(|ip| self.blocked.contains(&ip))
            .unwrap_or(false)
    }

    /// Returns `true` only when every recorded endpoint was re-blocked.
    pub fn restore_all(&mut self) -> bool {
        match self.try_restore_all() {
            Ok(summary) => summary.is_complete(),
            Err(e) => {
                error!("Cannot restore blocked IPs: {}", e);
                false
            }
        }
    }

    /// Records `ip` as blocked and installs its firewall rules. The
    /// recorded intent is kept even when the rules fail to apply.
    pub fn try_block(&mut self, ip: &str) -> Result<RuleReport> {
        let ip = self.authorize(ip)?;
        info!("Blocking IP address: {}", ip);

        self.blocked.insert(ip);
        self.persist_intent();

        let report = self.adapter.block(ip, &self.blocked);

        if report.primary_succeeded() {
            if let Err(e) = self.adapter.persist_across_reboot(ip, &self.blocked) {
                error!("Failed to persist block for {} across reboot: {}", ip, e);
            }
            info!("Blocked {}", ip);
        } else {
            warn!("Primary rule for {} failed; block stays recorded", ip);
        }

        Ok(report)
    }

    pub fn try_unblock(&mut self, ip: &str) -> Result<RuleReport> {
        let ip = self.authorize(ip)?;
        info!("Unblocking IP address: {}", ip);

        self.blocked.remove(&ip);
        self.persist_intent();

        let report = self.adapter.unblock(ip, &self.blocked);

        if report.primary_succeeded() {
            if let Err(e) = self.adapter.remove_reboot_persistence(ip, &self.blocked) {
                error!("Failed to remove reboot persistence for {}: {}", ip, e);
            }
            info!("Unblocked {}", ip);
        } else {
            warn!("Primary rule removal for {} failed", ip);
        }

        Ok(report)
    }

    /// Re-applies every recorded block to the live firewall. Failed
    /// endpoints stay recorded and are retried on the next restore.
    pub fn try_restore_all(&mut self) -> Result<RestoreSummary> {
        if !self.adapter.has_privilege() {
            return Err(NetblockError::PrivilegeRequired);
        }

        info!("Restoring blocked IPs from persistent storage");
        let pending = self.blocked();
        let mut summary = RestoreSummary {
            restored: 0,
            total: pending.len(),
        };

        for ip in pending {
            let ip = ip.to_string();
            match self.try_block(&ip) {
                Ok(report) if report.primary_succeeded() => {
                    summary.restored += 1;
                    info!("Restored block for IP: {}", ip);
                }
                Ok(_) => error!("Failed to restore block for IP: {}", ip),
                Err(e) => error!("Failed to restore block for IP {}: {}", ip, e),
            }
        }

        info!(
            "Restored {}/{} blocked IPs",
            summary.restored, summary.total
        );
        Ok(summary)
    }

    fn authorize(&self, raw: &str) -> Result<IpAddr> {
        let ip = parse_endpoint(raw)?;
        if !self.adapter.has_privilege() {
            return Err(NetblockError::PrivilegeRequired);
        }
        Ok(ip)
    }

    fn persist_intent(&self) {
        if let Err(e) = self.store.save(&self.blocked) {
            error!("Error saving blocked IPs (continuing in memory): {}", e);
        }
    }
}
