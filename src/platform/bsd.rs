use crate::error::Result;
use crate::executor::{CommandExecutor, CommandOutput, ExecPolicy, Invocation};
use crate::platform::{write_startup_script, FirewallProvider, PlatformDialect, RuleCommand};
use crate::store::BlockSet;
use std::net::IpAddr;
use std::path::PathBuf;

/// pf anchor owned by netblock. `pf.conf` must reference it with
/// `anchor "netblock"` for the rules to be evaluated.
pub const ANCHOR: &str = "netblock";

/// pf implementation for macOS and the BSDs. pf has no single-rule delete,
/// so every change reloads the netblock anchor with the full blocked set.
/// Rules outside the anchor are never touched.
pub struct BsdPfFirewall {
    startup_script: PathBuf,
}

impl BsdPfFirewall {
    pub fn new(startup_script: PathBuf) -> Self {
        Self { startup_script }
    }

    fn ruleset<'a>(ips: impl IntoIterator<Item = &'a IpAddr>) -> String {
        let mut ruleset = String::new();
        for ip in ips {
            ruleset.push_str(&format!("block drop in quick from {} to any\n", ip));
            ruleset.push_str(&format!("block drop out quick from any to {}\n", ip));
        }
        ruleset
    }

    fn load_anchor(ruleset: String) -> Invocation {
        Invocation::new(ExecPolicy::ArgumentVector, "pfctl", ["-a", ANCHOR, "-f", "-"])
            .with_stdin(ruleset)
    }

    fn write_script(&self, intent: &BlockSet) -> Result<()> {
        let mut lines = vec![format!("pfctl -a {} -f - <<'EOF'", ANCHOR)];
        lines.extend(Self::ruleset(intent.iter()).lines().map(str::to_string));
        lines.push("EOF".to_string());
        write_startup_script(&self.startup_script, "#!/bin/sh", &lines)
    }
}

impl FirewallProvider for BsdPfFirewall {
    fn dialect(&self) -> PlatformDialect {
        PlatformDialect::BsdPf
    }

    fn probe_command(&self) -> Invocation {
        Invocation::new(ExecPolicy::ArgumentVector, "pfctl", ["-sr"])
    }

    fn block_commands(&self, ip: IpAddr, intent: &BlockSet) -> Vec<RuleCommand> {
        let mut ips: Vec<&IpAddr> = intent.iter().collect();
        if !intent.contains(&ip) {
            ips.push(&ip);
        }
        vec![RuleCommand {
            label: format!("pf anchor {} reload blocking {}", ANCHOR, ip),
            invocation: Self::load_anchor(Self::ruleset(ips)),
            present_check: None,
            primary: true,
        }]
    }

    fn unblock_commands(&self, ip: IpAddr, intent: &BlockSet) -> Vec<RuleCommand> {
        let remaining = intent.iter().filter(|&&other| other != ip);
        vec![RuleCommand {
            label: format!("pf anchor {} reload without {}", ANCHOR, ip),
            invocation: Self::load_anchor(Self::ruleset(remaining)),
            present_check: None,
            primary: true,
        }]
    }

    fn is_missing_rule(&self, _output: &CommandOutput) -> bool {
        // Loading a ruleset never targets an existing rule.
        false
    }

    fn persist(
        &self,
        _ip: IpAddr,
        intent: &BlockSet,
        _executor: &dyn CommandExecutor,
    ) -> Result<()> {
        self.write_script(intent)
    }

    fn unpersist(
        &self,
        ip: IpAddr,
        intent: &BlockSet,
        _executor: &dyn CommandExecutor,
    ) -> Result<()> {
        if !self.startup_script.exists() {
            return Ok(());
        }
        let remaining: BlockSet = intent.iter().copied().filter(|&other| other != ip).collect();
        self.write_script(&remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockCommandExecutor;

    fn intent(values: &[&str]) -> BlockSet {
        values.iter().map(|v| v.parse::<IpAddr>().unwrap()).collect()
    }

    #[test]
    fn loads_the_netblock_anchor_on_stdin() {
        let fw = BsdPfFirewall::new(PathBuf::from("/tmp/restore.sh"));
        let rules = fw.block_commands("10.0.0.5".parse().unwrap(), &BlockSet::new());

        assert_eq!(rules.len(), 1);
        assert!(rules[0].primary);
        assert_eq!(rules[0].invocation.program, "pfctl");
        assert_eq!(rules[0].invocation.args, ["-a", "netblock", "-f", "-"]);
        assert_eq!(
            rules[0].invocation.stdin.as_deref(),
            Some("block drop in quick from 10.0.0.5 to any\nblock drop out quick from any to 10.0.0.5\n")
        );
    }

    #[test]
    fn blocking_a_second_address_keeps_the_first() {
        let fw = BsdPfFirewall::new(PathBuf::from("/tmp/restore.sh"));
        let rules = fw.block_commands("10.0.0.6".parse().unwrap(), &intent(&["10.0.0.5"]));

        let ruleset = rules[0].invocation.stdin.as_deref().unwrap();
        assert!(ruleset.contains("block drop in quick from 10.0.0.5 to any"));
        assert!(ruleset.contains("block drop in quick from 10.0.0.6 to any"));
        assert_eq!(ruleset.lines().count(), 4);
    }

    #[test]
    fn unblock_reloads_without_the_address() {
        let fw = BsdPfFirewall::new(PathBuf::from("/tmp/restore.sh"));
        let rules = fw.unblock_commands(
            "10.0.0.5".parse().unwrap(),
            &intent(&["10.0.0.5", "10.0.0.6"]),
        );

        let ruleset = rules[0].invocation.stdin.as_deref().unwrap();
        assert!(!ruleset.contains("10.0.0.5"));
        assert!(!ruleset.contains("pass"));
        assert!(ruleset.contains("block drop out quick from any to 10.0.0.6"));
        assert!(!fw.is_missing_rule(&CommandOutput::default()));
    }

    #[test]
    fn unblocking_the_last_address_loads_an_empty_anchor() {
        let fw = BsdPfFirewall::new(PathBuf::from("/tmp/restore.sh"));
        let rules = fw.unblock_commands("10.0.0.5".parse().unwrap(), &intent(&["10.0.0.5"]));

        assert_eq!(rules[0].invocation.stdin.as_deref(), Some(""));
    }

    #[test]
    fn startup_script_is_one_anchor_load() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("restore_blocked_ips.sh");
        let fw = BsdPfFirewall::new(script.clone());
        let both = intent(&["10.0.0.5", "10.0.0.6"]);

        fw.persist("10.0.0.6".parse().unwrap(), &both, &MockCommandExecutor::new())
            .unwrap();
        fw.persist("10.0.0.6".parse().unwrap(), &both, &MockCommandExecutor::new())
            .unwrap();

        let content = std::fs::read_to_string(&script).unwrap();
        assert_eq!(
            content,
            "#!/bin/sh\n\
             pfctl -a netblock -f - <<'EOF'\n\
             block drop in quick from 10.0.0.5 to any\n\
             block drop out quick from any to 10.0.0.5\n\
             block drop in quick from 10.0.0.6 to any\n\
             block drop out quick from any to 10.0.0.6\n\
             EOF\n"
        );
    }

    #[test]
    fn unpersist_rewrites_the_anchor_load() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("restore_blocked_ips.sh");
        let fw = BsdPfFirewall::new(script.clone());

        fw.persist(
            "10.0.0.5".parse().unwrap(),
            &intent(&["10.0.0.5", "10.0.0.6"]),
            &MockCommandExecutor::new(),
        )
        .unwrap();
        fw.unpersist(
            "10.0.0.5".parse().unwrap(),
            &intent(&["10.0.0.6"]),
            &MockCommandExecutor::new(),
        )
        .unwrap();

        let content = std::fs::read_to_string(&script).unwrap();
        assert!(!content.contains("10.0.0.5"));
        assert_eq!(content.matches("pfctl -a netblock").count(), 1);
    }
}
