//! Terminal output for the CLI

use std::time::Duration;

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use burrow_core::network::NetworkAllocation;
use burrow_deployer::{HealthReport, ServerStatus};

/// Render an allocation as a two-column table
pub fn format_allocation(allocation: &NetworkAllocation) -> String {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "FIELD")]
        field: &'static str,
        #[tabled(rename = "VALUE")]
        value: String,
    }

    let rows = vec![
        Row {
            field: "client id",
            value: allocation.client_id.to_string(),
        },
        Row {
            field: "subnet",
            value: allocation.subnet.clone(),
        },
        Row {
            field: "endpoint address",
            value: allocation.server_cidr(),
        },
        Row {
            field: "client address",
            value: allocation.client_cidr(),
        },
        Row {
            field: "listen port",
            value: allocation.listen_port.to_string(),
        },
    ];

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Render the remote endpoint's status
pub fn format_status(host: &str, status: &ServerStatus, health: &HealthReport) -> String {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "PROCESS")]
        process: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "PIDS")]
        pids: String,
        #[tabled(rename = "HEARTBEAT")]
        heartbeat: String,
        #[tabled(rename = "SESSION")]
        session: String,
    }

    let pids = if status.pids.is_empty() {
        "-".to_string()
    } else {
        status
            .pids
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };
    let row = Row {
        host: host.to_string(),
        process: status.process_name.clone(),
        state: if status.running() { "running" } else { "stopped" }.to_string(),
        pids,
        heartbeat: status
            .heartbeat_age
            .map(|age| format!("{} ago", format_duration(age)))
            .unwrap_or_else(|| "-".to_string()),
        session: if health.session_alive { "ok" } else { "lost" }.to_string(),
    };

    let mut out = Table::new(vec![row])
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string();
    if let Some(probe) = &health.probe {
        out.push_str(&format!(
            "\n{} is {} from the remote host",
            probe.addr,
            if probe.reachable { "reachable" } else { "NOT reachable" }
        ));
    }
    out
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Format a byte count with a binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::network::allocate_network;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(7)), "7s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(7260)), "2h 1m");
        assert_eq!(format_duration(Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 512 * 1024), "5.5 MiB");
    }

    #[test]
    fn test_format_allocation() {
        let table = format_allocation(&allocate_network(3).unwrap());
        assert!(table.contains("10.99.3.0/24"));
        assert!(table.contains("10.99.3.1/24"));
        assert!(table.contains("51823"));
    }

    #[test]
    fn test_format_status_stopped() {
        let status = ServerStatus {
            process_name: "burrow-51821".to_string(),
            pids: vec![],
            heartbeat_age: None,
        };
        let health = HealthReport {
            session_alive: true,
            probe: None,
        };
        let out = format_status("gw", &status, &health);
        assert!(out.contains("burrow-51821"));
        assert!(out.contains("stopped"));
        assert!(!out.contains("reachable"));
    }
}
