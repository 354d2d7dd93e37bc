use crate::platform::PlatformDialect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetblockConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
    pub persistence: PersistenceConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding the blocked endpoint addresses.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Pins the dialect instead of detecting it from the host.
    #[serde(default)]
    pub dialect: Option<PlatformDialect>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Shell script replayed at boot on Linux (without iptables-save) and BSD.
    pub startup_script: PathBuf,
    /// Batch script replayed at boot on Windows.
    pub windows_startup_script: PathBuf,
    pub iptables_rules_file: PathBuf,
    pub ip6tables_rules_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub reachability_check: bool,
    pub timeout_seconds: u64,
}

impl Default for NetblockConfig {
    fn default() -> Self {
        Self::rooted_at(&install_root())
    }
}

impl NetblockConfig {
    /// Default layout with every state file placed under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            store: StoreConfig {
                path: root.join("blocked_ips.json"),
            },
            firewall: FirewallConfig::default(),
            persistence: PersistenceConfig {
                startup_script: root.join("restore_blocked_ips.sh"),
                windows_startup_script: root.join("restore_blocked_ips.bat"),
                iptables_rules_file: PathBuf::from("/etc/iptables/rules.v4"),
                ip6tables_rules_file: PathBuf::from("/etc/iptables/rules.v6"),
            },
            probe: ProbeConfig {
                reachability_check: true,
                timeout_seconds: 2,
            },
        }
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let default = Self::default();
            default.save()?;
            Ok(default)
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(config_dir) = config_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("netblock")
            .join("config.toml")
    }
}

/// Directory holding the running executable, or the working directory
/// when that cannot be resolved.
pub fn install_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_layout_places_state_under_root() {
        let config = NetblockConfig::rooted_at(Path::new("/opt/netblock"));

        assert_eq!(
            config.store.path,
            PathBuf::from("/opt/netblock/blocked_ips.json")
        );
        assert_eq!(
            config.persistence.startup_script,
            PathBuf::from("/opt/netblock/restore_blocked_ips.sh")
        );
        assert!(config.firewall.dialect.is_none());
    }

    #[test]
    fn parses_pinned_dialect_from_toml() {
        let content = r#"
[store]
path = "/var/lib/netblock/blocked_ips.json"

[firewall]
dialect = "linux_iptables"

[persistence]
startup_script = "/var/lib/netblock/restore.sh"
windows_startup_script = "/var/lib/netblock/restore.bat"
iptables_rules_file = "/etc/iptables/rules.v4"
ip6tables_rules_file = "/etc/iptables/rules.v6"

[probe]
reachability_check = false
timeout_seconds = 5
"#;
        let config: NetblockConfig = toml::from_str(content).unwrap();

        assert_eq!(config.firewall.dialect, Some(PlatformDialect::LinuxIptables));
        assert!(!config.probe.reachability_check);
        assert_eq!(config.probe.timeout_seconds, 5);
    }

    #[test]
    fn firewall_section_is_optional() {
        let config = NetblockConfig::rooted_at(Path::new("/tmp/nb"));
        let mut rendered = toml::to_string_pretty(&config).unwrap();
        rendered = rendered.replace("[firewall]\n", "");

        let parsed: NetblockConfig = toml::from_str(&rendered).unwrap();
        assert!(parsed.firewall.dialect.is_none());
    }
}
