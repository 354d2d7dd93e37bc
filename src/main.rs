use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use netblock::config::NetblockConfig;
use netblock::platform::{self, PlatformAdapter, PlatformDialect};
use netblock::status::BlockStatus;
use netblock::{parse_endpoint, reachability, BlockController, BlockStore, SystemExecutor};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Parser)]
#[command(name = "netblock")]
#[command(version, about = "Block network endpoints at the host firewall", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Block an endpoint in both directions
    Block {
        /// IPv4 or IPv6 address
        ip: String,
    },
    /// Remove the block for an endpoint
    Unblock {
        /// IPv4 or IPv6 address
        ip: String,
    },
    /// Check whether an endpoint is recorded as blocked
    Check {
        /// IPv4 or IPv6 address
        ip: String,
    },
    /// List recorded blocks
    List {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-apply every recorded block (run at boot)
    Restore,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = NetblockConfig::load().unwrap_or_else(|e| {
        warn!("Falling back to default configuration: {}", e);
        NetblockConfig::default()
    });

    match cli.command {
        Commands::Block { ip } => {
            let mut controller = build_controller(&config);
            announce_reachability(&config, &ip, "blocked to prevent future access").await;
            if controller.block(&ip) {
                println!(
                    "{}",
                    format!("[✓] {} has been blocked from accessing the network", ip).green()
                );
            } else {
                fail(&controller, &format!("Failed to block {}", ip));
            }
        }

        Commands::Unblock { ip } => {
            let mut controller = build_controller(&config);
            announce_reachability(&config, &ip, "unblocked to restore future access").await;
            if controller.unblock(&ip) {
                println!(
                    "{}",
                    format!("[✓] {} has been unblocked and can access the network", ip).green()
                );
            } else {
                fail(&controller, &format!("Failed to unblock {}", ip));
            }
        }

        Commands::Check { ip } => {
            if parse_endpoint(&ip).is_err() {
                eprintln!("{} {}", "[✗] Invalid endpoint address:".bright_red(), ip);
                std::process::exit(2);
            }
            let controller = build_controller(&config);
            if controller.is_blocked(&ip) {
                println!("{}", format!("{} is blocked", ip).bright_red().bold());
            } else {
                println!("{}", format!("{} is not blocked", ip).bright_green());
            }
        }

        Commands::List { json } => {
            let controller = build_controller(&config);
            let status = BlockStatus::from_controller(&controller);
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                status.display();
            }
        }

        Commands::Restore => {
            let mut controller = build_controller(&config);
            println!("{}", "[+] Restoring blocked IPs from persistent storage...".cyan());
            match controller.try_restore_all() {
                Ok(summary) if summary.is_complete() => {
                    println!(
                        "{}",
                        format!(
                            "[✓] Restored {}/{} blocked IPs",
                            summary.restored, summary.total
                        )
                        .bright_green()
                    );
                }
                Ok(summary) => {
                    eprintln!(
                        "{}",
                        format!(
                            "[!] Restored {}/{} blocked IPs; the rest will be retried next start",
                            summary.restored, summary.total
                        )
                        .yellow()
                    );
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("{} {}", "[✗] Failed to restore:".bright_red(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Config => {
            println!("{}", "Current Configuration:".bright_blue().bold());
            println!("{}", "━".repeat(50).bright_blue());
            println!("{:#?}", config);
            println!(
                "\n{} {}",
                "Loaded from:".bold(),
                NetblockConfig::config_path().display()
            );
        }
    }

    Ok(())
}

/// Composition root: one executor, one adapter, one controller.
fn build_controller(config: &NetblockConfig) -> BlockController {
    let dialect = config
        .firewall
        .dialect
        .unwrap_or_else(PlatformDialect::detect);
    let provider = platform::provider_for(dialect, &config.persistence);
    let adapter = PlatformAdapter::new(provider, Arc::new(SystemExecutor));
    BlockController::new(BlockStore::new(&config.store.path), adapter)
}

async fn announce_reachability(config: &NetblockConfig, ip: &str, action: &str) {
    if !config.probe.reachability_check {
        return;
    }
    let Ok(addr) = parse_endpoint(ip) else {
        return;
    };

    let timeout = Duration::from_secs(config.probe.timeout_seconds);
    if !reachability::is_reachable(addr, timeout).await {
        println!(
            "{}",
            format!("[!] Device {} is not reachable, but will still be {}", ip, action).yellow()
        );
    }
}

fn fail(controller: &BlockController, message: &str) -> ! {
    eprintln!("{} {}", "[✗]".bright_red(), message.bright_red());
    if !controller.has_privilege() {
        eprintln!(
            "{}",
            "    Insufficient privileges. Run as administrator/root.".yellow()
        );
    } else {
        eprintln!("{}", "    Check the logs for details.".yellow());
    }
    std::process::exit(1);
}
