use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Advisory check used before block/unblock. The answer never changes
/// what the controller does; an unreachable device is still blocked.
pub async fn is_reachable(ip: IpAddr, timeout: Duration) -> bool {
    let mut command = ping_command(ip, timeout);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!("Could not run ping: {}", e);
            return false;
        }
    };

    // Give ping its own deadline plus a margin before giving up on it.
    let budget = timeout + Duration::from_millis(500);
    match tokio::time::timeout(budget, child.wait_with_output()).await {
        Ok(Ok(output)) => output.status.success(),
        Ok(Err(e)) => {
            debug!("ping failed: {}", e);
            false
        }
        Err(_) => {
            info!("Reachability check for {} timed out", ip);
            false
        }
    }
}

/// macOS ships IPv6 echo as a separate `ping6` binary.
fn ping_program(ip: IpAddr) -> &'static str {
    if cfg!(target_os = "macos") && ip.is_ipv6() {
        "ping6"
    } else {
        "ping"
    }
}

fn ping_command(ip: IpAddr, timeout: Duration) -> Command {
    let program = ping_program(ip);
    let mut command = Command::new(program);

    if cfg!(target_os = "windows") {
        command
            .arg("-n")
            .arg("1")
            .arg("-w")
            .arg(timeout.as_millis().max(1).to_string());
    } else if cfg!(target_os = "linux") {
        command
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(timeout.as_secs().max(1).to_string());
    } else if program == "ping6" {
        // ping6 has no overall deadline flag; the caller's timeout bounds it.
        command.arg("-c").arg("1");
    } else {
        command.arg("-c").arg("1").arg("-t").arg(timeout.as_secs().max(1).to_string());
    }

    if ip.is_ipv6() && !cfg!(target_os = "windows") && !cfg!(target_os = "macos") {
        command.arg("-6");
    }
    command.arg(ip.to_string());
    command
}
