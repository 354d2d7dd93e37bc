// src/platform/windows.rs

use crate::error::Result;
use crate::executor::{CommandExecutor, CommandOutput, ExecPolicy, Invocation};
use crate::platform::{write_startup_script, FirewallProvider, PlatformDialect, RuleCommand};
use crate::store::BlockSet;
use std::net::IpAddr;
use std::path::PathBuf;

/// Windows implementation using `netsh advfirewall`. Every endpoint gets
/// two named rules, `Block <ip>` inbound and `Block <ip> Out` outbound.
pub struct WindowsNetshFirewall {
    startup_script: PathBuf,
}

#[derive(Clone, Copy)]
enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn rule_name(self, ip: IpAddr) -> String {
        match self {
            Direction::Inbound => format!("Block {}", ip),
            Direction::Outbound => format!("Block {} Out", ip),
        }
    }

    fn netsh_dir(self) -> &'static str {
        match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
        }
    }
}

impl WindowsNetshFirewall {
    pub fn new(startup_script: PathBuf) -> Self {
        Self { startup_script }
    }

    fn netsh(args: Vec<String>) -> Invocation {
        Invocation::new(ExecPolicy::Shell, "netsh", args)
    }

    fn rule_verb(verb: &str, name: &str) -> Vec<String> {
        vec![
            "advfirewall".to_string(),
            "firewall".to_string(),
            verb.to_string(),
            "rule".to_string(),
            format!("name={}", name),
        ]
    }

    fn add_rule(direction: Direction, ip: IpAddr) -> Invocation {
        let mut args = Self::rule_verb("add", &direction.rule_name(ip));
        args.extend([
            format!("dir={}", direction.netsh_dir()),
            "action=block".to_string(),
            format!("remoteip={}", ip),
        ]);
        Self::netsh(args)
    }

    /// Boot script that re-adds a rule only when `show rule` cannot find it.
    fn write_script(&self, intent: &BlockSet) -> Result<()> {
        let mut lines = Vec::with_capacity(intent.len() * 2);
        for &ip in intent.iter() {
            for direction in [Direction::Inbound, Direction::Outbound] {
                let show = Self::netsh(Self::rule_verb("show", &direction.rule_name(ip)));
                lines.push(format!(
                    "{} >nul 2>&1 || {}",
                    show.command_line()?,
                    Self::add_rule(direction, ip).command_line()?
                ));
            }
        }
        write_startup_script(&self.startup_script, "@echo off", &lines)
    }
}

impl FirewallProvider for WindowsNetshFirewall {
    fn dialect(&self) -> PlatformDialect {
        PlatformDialect::WindowsNetsh
    }

    fn probe_command(&self) -> Invocation {
        Self::netsh(vec![
            "advfirewall".to_string(),
            "show".to_string(),
            "allprofiles".to_string(),
        ])
    }

    fn block_commands(&self, ip: IpAddr, _intent: &BlockSet) -> Vec<RuleCommand> {
        [Direction::Inbound, Direction::Outbound]
            .into_iter()
            .map(|direction| {
                let name = direction.rule_name(ip);
                RuleCommand {
                    label: format!("Windows firewall rule \"{}\"", name),
                    invocation: Self::add_rule(direction, ip),
                    present_check: Some(Self::netsh(Self::rule_verb("show", &name))),
                    primary: matches!(direction, Direction::Inbound),
                }
            })
            .collect()
    }

    fn unblock_commands(&self, ip: IpAddr, _intent: &BlockSet) -> Vec<RuleCommand> {
        [Direction::Inbound, Direction::Outbound]
            .into_iter()
            .map(|direction| {
                let name = direction.rule_name(ip);
                RuleCommand {
                    label: format!("Windows firewall delete rule \"{}\"", name),
                    invocation: Self::netsh(Self::rule_verb("delete", &name)),
                    present_check: None,
                    primary: matches!(direction, Direction::Inbound),
                }
            })
            .collect()
    }

    fn is_missing_rule(&self, output: &CommandOutput) -> bool {
        // netsh reports this on stdout, not stderr.
        output.stdout.contains("No rules match") || output.stderr.contains("No rules match")
    }

    fn persist(
        &self,
        _ip: IpAddr,
        intent: &BlockSet,
        _executor: &dyn CommandExecutor,
    ) -> Result<()> {
        // Rules are already durable; the script re-adds them if they get wiped.
        self.write_script(intent)
    }

    fn unpersist(
        &self,
        _ip: IpAddr,
        intent: &BlockSet,
        _executor: &dyn CommandExecutor,
    ) -> Result<()> {
        if self.startup_script.exists() {
            self.write_script(intent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockCommandExecutor;
    use crate::platform::tests::failure;

    #[test]
    fn names_inbound_and_outbound_rules() {
        let fw = WindowsNetshFirewall::new(PathBuf::from("restore.bat"));
        let rules = fw.block_commands("10.0.0.5".parse().unwrap(), &BlockSet::new());

        assert_eq!(rules.len(), 2);
        assert!(rules[0].primary);
        assert_eq!(
            rules[0].invocation.command_line().unwrap(),
            r#"netsh advfirewall firewall add rule name="Block 10.0.0.5" dir=in action=block remoteip=10.0.0.5"#
        );
        assert_eq!(
            rules[1].invocation.command_line().unwrap(),
            r#"netsh advfirewall firewall add rule name="Block 10.0.0.5 Out" dir=out action=block remoteip=10.0.0.5"#
        );
        assert!(rules
            .iter()
            .all(|r| r.invocation.policy == ExecPolicy::Shell));
    }

    #[test]
    fn deletes_both_named_rules() {
        let fw = WindowsNetshFirewall::new(PathBuf::from("restore.bat"));
        let lines: Vec<String> = fw
            .unblock_commands("2001:db8::7".parse().unwrap(), &BlockSet::new())
            .iter()
            .map(|r| r.invocation.command_line().unwrap())
            .collect();

        assert_eq!(
            lines,
            [
                r#"netsh advfirewall firewall delete rule name="Block 2001:db8::7""#,
                r#"netsh advfirewall firewall delete rule name="Block 2001:db8::7 Out""#,
            ]
        );
    }

    #[test]
    fn no_matching_rule_is_missing() {
        let fw = WindowsNetshFirewall::new(PathBuf::from("restore.bat"));
        let output = CommandOutput {
            exit_code: Some(1),
            stdout: "No rules match the specified criteria.".into(),
            stderr: String::new(),
        };
        assert!(fw.is_missing_rule(&output));
        assert!(!fw.is_missing_rule(&failure("The requested operation requires elevation.")));
    }

    #[test]
    fn batch_script_skips_rules_that_exist() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("restore_blocked_ips.bat");
        let fw = WindowsNetshFirewall::new(script.clone());
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let intent: BlockSet = [ip].into_iter().collect();

        fw.persist(ip, &intent, &MockCommandExecutor::new()).unwrap();
        fw.persist(ip, &intent, &MockCommandExecutor::new()).unwrap();

        let content = std::fs::read_to_string(&script).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "@echo off");
        assert_eq!(
            lines[1],
            r#"netsh advfirewall firewall show rule name="Block 10.0.0.5" >nul 2>&1 || netsh advfirewall firewall add rule name="Block 10.0.0.5" dir=in action=block remoteip=10.0.0.5"#
        );
        assert!(lines[2].contains(r#"add rule name="Block 10.0.0.5 Out" dir=out"#));
    }

    #[test]
    fn unpersist_drops_the_endpoint_from_batch_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("restore_blocked_ips.bat");
        let fw = WindowsNetshFirewall::new(script.clone());
        let kept: IpAddr = "10.0.0.6".parse().unwrap();
        let removed: IpAddr = "10.0.0.5".parse().unwrap();

        let both: BlockSet = [kept, removed].into_iter().collect();
        fw.persist(removed, &both, &MockCommandExecutor::new()).unwrap();
        let remaining: BlockSet = [kept].into_iter().collect();
        fw.unpersist(removed, &remaining, &MockCommandExecutor::new())
            .unwrap();

        let content = std::fs::read_to_string(&script).unwrap();
        assert!(!content.contains("10.0.0.5"));
        assert_eq!(content.lines().count(), 3);
    }
}
