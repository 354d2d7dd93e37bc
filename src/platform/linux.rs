use crate::error::{NetblockError, Result};
use crate::executor::{CommandExecutor, CommandOutput, ExecPolicy, Invocation};
use crate::platform::{write_startup_script, FirewallProvider, PlatformDialect, RuleCommand};
use crate::store::BlockSet;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;

/// iptables messages for a `-D` or `-C` on a rule that does not exist.
const MISSING_RULE_MARKERS: &[&str] = &[
    "does a matching rule exist",
    "No chain/target/match by that name",
    "Bad rule",
];

pub struct LinuxIptablesFirewall {
    startup_script: PathBuf,
    rules_file_v4: PathBuf,
    rules_file_v6: PathBuf,
}

/// Chain, address match flag, and whether the chain decides the result.
const CHAINS: [(&str, &str, bool); 3] = [
    ("INPUT", "-s", true),
    ("OUTPUT", "-d", false),
    ("FORWARD", "-s", false),
];

impl LinuxIptablesFirewall {
    pub fn new(startup_script: PathBuf, rules_file_v4: PathBuf, rules_file_v6: PathBuf) -> Self {
        Self {
            startup_script,
            rules_file_v4,
            rules_file_v6,
        }
    }

    fn binary(ip: IpAddr) -> &'static str {
        if ip.is_ipv6() {
            "ip6tables"
        } else {
            "iptables"
        }
    }

    fn rule_args(action: &str, chain: &str, flag: &str, ip: IpAddr) -> Vec<String> {
        vec![
            action.to_string(),
            chain.to_string(),
            flag.to_string(),
            ip.to_string(),
            "-j".to_string(),
            "DROP".to_string(),
        ]
    }

    fn iptables(ip: IpAddr, args: Vec<String>) -> Invocation {
        Invocation::new(ExecPolicy::ArgumentVector, Self::binary(ip), args)
    }

    fn is_available(executor: &dyn CommandExecutor, program: &str) -> bool {
        let which = Invocation::new(ExecPolicy::ArgumentVector, "which", [program]);
        matches!(executor.run(&which, None), Ok(output) if output.success())
    }

    fn saver(ip: IpAddr) -> &'static str {
        if ip.is_ipv6() {
            "ip6tables-save"
        } else {
            "iptables-save"
        }
    }

    /// Boot replay that appends each rule only when `-C` finds it missing.
    fn write_script(&self, intent: &BlockSet) -> Result<()> {
        let mut lines = Vec::with_capacity(intent.len() * CHAINS.len());
        for &ip in intent.iter() {
            for &(chain, flag, _) in CHAINS.iter() {
                let check = Self::iptables(ip, Self::rule_args("-C", chain, flag, ip)).command_line()?;
                let add = Self::iptables(ip, Self::rule_args("-A", chain, flag, ip)).command_line()?;
                lines.push(format!("{} 2>/dev/null || {}", check, add));
            }
        }
        write_startup_script(&self.startup_script, "#!/bin/sh", &lines)
    }

    fn save_rule_table(&self, ip: IpAddr, executor: &dyn CommandExecutor) -> Result<()> {
        let program = Self::saver(ip);
        let path = if ip.is_ipv6() {
            &self.rules_file_v6
        } else {
            &self.rules_file_v4
        };

        let dump = Invocation::new(ExecPolicy::ArgumentVector, program, Vec::<String>::new());
        let output = executor.run(&dump, None)?;
        if !output.success() {
            return Err(NetblockError::CommandFailed(format!(
                "{}: {}",
                program,
                output.diagnostic()
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, output.stdout)?;
        info!("Saved {} rules to {}", program, path.display());
        Ok(())
    }
}

impl FirewallProvider for LinuxIptablesFirewall {
    fn dialect(&self) -> PlatformDialect {
        PlatformDialect::LinuxIptables
    }

    fn probe_command(&self) -> Invocation {
        Invocation::new(ExecPolicy::ArgumentVector, "iptables", ["-L", "-n"])
    }

    fn block_commands(&self, ip: IpAddr, _intent: &BlockSet) -> Vec<RuleCommand> {
        CHAINS
            .iter()
            .map(|&(chain, flag, primary)| RuleCommand {
                label: format!("{} {} DROP rule for {}", Self::binary(ip), chain, ip),
                invocation: Self::iptables(ip, Self::rule_args("-A", chain, flag, ip)),
                present_check: Some(Self::iptables(ip, Self::rule_args("-C", chain, flag, ip))),
                primary,
            })
            .collect()
    }

    fn unblock_commands(&self, ip: IpAddr, _intent: &BlockSet) -> Vec<RuleCommand> {
        CHAINS
            .iter()
            .map(|&(chain, flag, primary)| RuleCommand {
                label: format!("{} delete {} rule for {}", Self::binary(ip), chain, ip),
                invocation: Self::iptables(ip, Self::rule_args("-D", chain, flag, ip)),
                present_check: None,
                primary,
            })
            .collect()
    }

    fn is_missing_rule(&self, output: &CommandOutput) -> bool {
        MISSING_RULE_MARKERS
            .iter()
            .any(|marker| output.stderr.contains(marker))
    }

    fn persist(
        &self,
        ip: IpAddr,
        intent: &BlockSet,
        executor: &dyn CommandExecutor,
    ) -> Result<()> {
        if Self::is_available(executor, Self::saver(ip)) {
            return self.save_rule_table(ip, executor);
        }
        self.write_script(intent)
    }

    fn unpersist(
        &self,
        ip: IpAddr,
        intent: &BlockSet,
        executor: &dyn CommandExecutor,
    ) -> Result<()> {
        if self.startup_script.exists() {
            self.write_script(intent)?;
        }
        if Self::is_available(executor, Self::saver(ip)) {
            self.save_rule_table(ip, executor)?;
        }
        Ok(())
    }
}
