//! Persistent endpoint blocking reconciled against the host firewall.
//!
//! [`BlockController`] owns the recorded intent ([`BlockSet`]) and drives a
//! [`PlatformAdapter`] for one of the three supported firewall dialects.

pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod platform;
pub mod reachability;
pub mod status;
pub mod store;

pub use controller::{parse_endpoint, BlockController, RestoreSummary};
pub use error::{NetblockError, Result};
pub use executor::{CommandExecutor, CommandOutput, ExecPolicy, Invocation, SystemExecutor};
pub use platform::{PlatformAdapter, PlatformDialect, RuleOutcome, RuleReport};
pub use store::{BlockSet, BlockStore};
