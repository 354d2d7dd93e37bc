// src/platform/mod.rs

mod bsd;
mod linux;
mod windows;

pub use bsd::BsdPfFirewall;
pub use linux::LinuxIptablesFirewall;
pub use windows::WindowsNetshFirewall;

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::executor::{CommandExecutor, CommandOutput, ExecPolicy, Invocation};
use crate::store::BlockSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformDialect {
    WindowsNetsh,
    LinuxIptables,
    BsdPf,
}

impl PlatformDialect {
    /// Dialect for the host this binary runs on.
    pub fn detect() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    pub fn for_os(os: &str) -> Self {
        match os {
            "windows" => Self::WindowsNetsh,
            "linux" => Self::LinuxIptables,
            _ => Self::BsdPf,
        }
    }

    pub fn exec_policy(self) -> ExecPolicy {
        match self {
            Self::WindowsNetsh => ExecPolicy::Shell,
            Self::LinuxIptables | Self::BsdPf => ExecPolicy::ArgumentVector,
        }
    }
}

impl fmt::Display for PlatformDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WindowsNetsh => "Windows (netsh advfirewall)",
            Self::LinuxIptables => "Linux (iptables)",
            Self::BsdPf => "BSD/macOS (pf)",
        };
        f.write_str(name)
    }
}

/// One firewall rule change for a single endpoint.
#[derive(Debug, Clone)]
pub struct RuleCommand {
    pub label: String,
    pub invocation: Invocation,
    /// Read-only check that exits 0 when the rule is already installed.
    pub present_check: Option<Invocation>,
    /// The rule whose outcome decides the composite result.
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Applied,
    /// Already installed; nothing was changed.
    AlreadyPresent,
    /// Removal of a rule that did not exist.
    NotFound,
    Failed(String),
}

impl RuleOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleResult {
    pub label: String,
    pub primary: bool,
    pub outcome: RuleOutcome,
}

/// Per-rule outcomes of one block or unblock request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleReport {
    pub results: Vec<RuleResult>,
}

impl RuleReport {
    pub fn primary_succeeded(&self) -> bool {
        self.results
            .iter()
            .filter(|r| r.primary)
            .all(|r| r.outcome.is_ok())
            && self.results.iter().any(|r| r.primary)
    }

    pub fn secondary_failures(&self) -> impl Iterator<Item = &RuleResult> {
        self.results
            .iter()
            .filter(|r| !r.primary && !r.outcome.is_ok())
    }
}

pub trait FirewallProvider: Send + Sync {
    fn dialect(&self) -> PlatformDialect;

    /// Read-only command whose success proves firewall privileges.
    fn probe_command(&self) -> Invocation;

    /// Rules installing the block for `ip`. `intent` already contains `ip`.
    fn block_commands(&self, ip: IpAddr, intent: &BlockSet) -> Vec<RuleCommand>;

    /// Rules removing the block for `ip`. `intent` no longer contains `ip`.
    fn unblock_commands(&self, ip: IpAddr, intent: &BlockSet) -> Vec<RuleCommand>;

    /// Whether a failed removal only means the rule was never installed.
    fn is_missing_rule(&self, output: &CommandOutput) -> bool;

    /// Makes the block for `ip` survive a reboot.
    fn persist(&self, ip: IpAddr, intent: &BlockSet, executor: &dyn CommandExecutor)
        -> Result<()>;

    /// Drops `ip` from whatever `persist` left behind for the next boot.
    fn unpersist(
        &self,
        ip: IpAddr,
        intent: &BlockSet,
        executor: &dyn CommandExecutor,
    ) -> Result<()>;
}

pub fn provider_for(
    dialect: PlatformDialect,
    persistence: &PersistenceConfig,
) -> Box<dyn FirewallProvider> {
    match dialect {
        PlatformDialect::WindowsNetsh => Box::new(WindowsNetshFirewall::new(
            persistence.windows_startup_script.clone(),
        )),
        PlatformDialect::LinuxIptables => Box::new(LinuxIptablesFirewall::new(
            persistence.startup_script.clone(),
            persistence.iptables_rules_file.clone(),
            persistence.ip6tables_rules_file.clone(),
        )),
        PlatformDialect::BsdPf => Box::new(BsdPfFirewall::new(persistence.startup_script.clone())),
    }
}

/// Dialect-specific firewall access with the privilege probe done once.
pub struct PlatformAdapter {
    provider: Box<dyn FirewallProvider>,
    executor: Arc<dyn CommandExecutor>,
    privileged: bool,
}

impl PlatformAdapter {
    pub fn new(provider: Box<dyn FirewallProvider>, executor: Arc<dyn CommandExecutor>) -> Self {
        let privileged = Self::probe_privilege(provider.as_ref(), executor.as_ref());
        Self {
            provider,
            executor,
            privileged,
        }
    }

    fn probe_privilege(provider: &dyn FirewallProvider, executor: &dyn CommandExecutor) -> bool {
        let probe = provider.probe_command();
        let privileged = match executor.run(&probe, None) {
            Ok(output) => output.success(),
            Err(e) => {
                warn!("Error checking privileges: {}", e);
                false
            }
        };

        if privileged {
            info!("Firewall privileges confirmed for {}", provider.dialect());
        } else {
            warn!(
                "Insufficient privileges to execute firewall commands. \
                 Run as administrator/root for full functionality."
            );
        }
        privileged
    }

    pub fn dialect(&self) -> PlatformDialect {
        self.provider.dialect()
    }

    pub fn has_privilege(&self) -> bool {
        self.privileged
    }

    pub fn block(&self, ip: IpAddr, intent: &BlockSet) -> RuleReport {
        self.apply(self.provider.block_commands(ip, intent), false)
    }

    pub fn unblock(&self, ip: IpAddr, intent: &BlockSet) -> RuleReport {
        self.apply(self.provider.unblock_commands(ip, intent), true)
    }

    pub fn persist_across_reboot(&self, ip: IpAddr, intent: &BlockSet) -> Result<()> {
        self.provider.persist(ip, intent, self.executor.as_ref())
    }

    pub fn remove_reboot_persistence(&self, ip: IpAddr, intent: &BlockSet) -> Result<()> {
        self.provider.unpersist(ip, intent, self.executor.as_ref())
    }

    fn apply(&self, rules: Vec<RuleCommand>, removing: bool) -> RuleReport {
        let results = rules
            .into_iter()
            .map(|rule| {
                let outcome = self.apply_rule(&rule, removing);
                match &outcome {
                    RuleOutcome::Failed(reason) => {
                        error!("Failed to execute {}: {}", rule.label, reason)
                    }
                    RuleOutcome::NotFound => {
                        warn!("{}: rule was not present", rule.label)
                    }
                    RuleOutcome::AlreadyPresent => {
                        info!("{}: rule already present", rule.label)
                    }
                    RuleOutcome::Applied => info!("Successfully executed {}", rule.label),
                }
                RuleResult {
                    label: rule.label,
                    primary: rule.primary,
                    outcome,
                }
            })
            .collect();

        RuleReport { results }
    }

    fn apply_rule(&self, rule: &RuleCommand, removing: bool) -> RuleOutcome {
        if let Some(check) = &rule.present_check {
            if matches!(self.executor.run(check, None), Ok(output) if output.success()) {
                return RuleOutcome::AlreadyPresent;
            }
        }

        match self.executor.run(&rule.invocation, None) {
            Ok(output) if output.success() => RuleOutcome::Applied,
            Ok(output) if removing && self.provider.is_missing_rule(&output) => {
                RuleOutcome::NotFound
            }
            Ok(output) => RuleOutcome::Failed(output.diagnostic()),
            Err(e) => RuleOutcome::Failed(e.to_string()),
        }
    }
}

/// Replaces a startup script with `header` followed by `lines`. The script
/// is regenerated from the whole intent on every change, so replaying it
/// never stacks rules and unblocked endpoints drop out of it.
pub(crate) fn write_startup_script(path: &Path, header: &str, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut content = String::from(header);
    content.push('\n');
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }

    info!("Wrote {} line(s) to startup script {}", lines.len(), path.display());
    Ok(())
}
