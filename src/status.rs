use crate::controller::BlockController;
use crate::platform::PlatformDialect;
use colored::Colorize;
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub struct BlockStatus {
    pub dialect: PlatformDialect,
    pub privileged: bool,
    pub store_path: PathBuf,
    pub blocked: Vec<IpAddr>,
}

impl BlockStatus {
    pub fn from_controller(controller: &BlockController) -> Self {
        Self {
            dialect: controller.dialect(),
            privileged: controller.has_privilege(),
            store_path: controller.store().path().to_path_buf(),
            blocked: controller.blocked(),
        }
    }

    pub fn display(&self) {
        println!("\n{}", "━".repeat(60).bright_blue());
        println!(
            "{}",
            "                NETBLOCK STATUS                "
                .bright_blue()
                .bold()
        );
        println!("{}", "━".repeat(60).bright_blue());
        println!();

        println!("  {} {}", "Firewall:".bold(), self.dialect.to_string().bright_cyan());
        if self.privileged {
            println!("  {} {}", "Privileges:".bold(), "🟢 GRANTED".bright_green().bold());
        } else {
            println!(
                "  {} {}",
                "Privileges:".bold(),
                "🔴 MISSING (run as administrator/root)".bright_red().bold()
            );
        }
        println!(
            "  {} {}",
            "Store:".bold(),
            self.store_path.display().to_string().dimmed()
        );
        println!();

        if self.blocked.is_empty() {
            println!("  {}", "No endpoints are blocked".yellow());
        } else {
            println!("  {} {}", "Blocked endpoints:".bold(), self.blocked.len());
            for ip in &self.blocked {
                println!("    {} {}", "⛔".red(), ip.to_string().bright_red());
            }
        }

        println!();
        println!("{}", "━".repeat(60).bright_blue());
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_for_list_json() {
        let status = BlockStatus {
            dialect: PlatformDialect::BsdPf,
            privileged: false,
            store_path: PathBuf::from("/var/lib/netblock/blocked_ips.json"),
            blocked: vec!["10.0.0.5".parse().unwrap(), "2001:db8::7".parse().unwrap()],
        };

        let json: serde_json::Value = serde_json::to_value(&status).unwrap();
        assert_eq!(json["dialect"], "bsd_pf");
        assert_eq!(json["privileged"], false);
        assert_eq!(json["blocked"], serde_json::json!(["10.0.0.5", "2001:db8::7"]));
    }
}
