//! Terminal rendering of cycle snapshots
//!
//! Purely observational: takes a [`CycleSnapshot`] by value and produces
//! text. Nothing here feeds back into the scheduler.

use crate::scheduler::CycleSnapshot;
use crate::types::{truncate_chars, DiscoveryResult, DiscoveryStatus};
use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use std::fmt::Write as _;
use tracing::Level;

/// Nodes listed per endpoint before the remainder is summarized.
pub const NODE_DISPLAY_LIMIT: usize = 50;

/// Log messages are cut to this many characters.
pub const LOG_MESSAGE_MAX_CHARS: usize = 120;

/// Render a full report: status line, endpoint summary, node tables and
/// recent logs.
///
/// With `interactive` unset, tables carry no colors and are not wrapped to
/// the terminal width.
pub fn render_snapshot(snapshot: &CycleSnapshot, now: DateTime<Utc>, interactive: bool) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", status_line(snapshot, now));
    let _ = writeln!(out, "{}", outcome_line(snapshot));
    let _ = writeln!(out);

    if !snapshot.results.is_empty() {
        let _ = writeln!(out, "{}", endpoint_summary(&snapshot.results, interactive));
        for result in &snapshot.results {
            let _ = writeln!(out, "{}", result.endpoint);
            let _ = writeln!(out, "{}", node_table(result, interactive));
        }
    }

    if !snapshot.recent_logs.is_empty() {
        let _ = writeln!(out, "Recent logs");
        let _ = writeln!(out, "{}", log_table(snapshot, interactive));
    }

    out
}

fn status_line(snapshot: &CycleSnapshot, now: DateTime<Utc>) -> String {
    let last = snapshot.last_cycle_at.with_timezone(&Local).format("%H:%M:%S");
    match snapshot.next_cycle_at {
        Some(next) => {
            let remaining = (next - now).num_seconds().max(0);
            format!(
                "Cycle {} | Last update: {} | Next update: {} (in {})",
                snapshot.cycle,
                last,
                next.with_timezone(&Local).format("%H:%M:%S"),
                format_countdown(remaining)
            )
        }
        None => format!("Cycle {} | Last update: {} | Single run", snapshot.cycle, last),
    }
}

fn outcome_line(snapshot: &CycleSnapshot) -> String {
    if let Some(reason) = &snapshot.aborted {
        return format!("Cycle aborted: {}", reason);
    }
    match snapshot.outcome {
        Some(outcome) if outcome.written => format!(
            "Config written ({} endpoint block(s) updated)",
            outcome.updated_blocks
        ),
        Some(outcome) if outcome.changed => "Config changed but could not be written".to_string(),
        _ => "No configuration changes".to_string(),
    }
}

/// `1h 02m 03s`, `4m 05s` or `6s`.
pub fn format_countdown(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn new_table(headers: &[&str], interactive: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    if !interactive {
        table.force_no_tty();
    }
    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);
    table
}

fn status_color(status: &DiscoveryStatus) -> Color {
    match status {
        DiscoveryStatus::Connected => Color::Green,
        DiscoveryStatus::ConnectionFailed => Color::Red,
        DiscoveryStatus::Error(_) => Color::Yellow,
    }
}

fn endpoint_summary(results: &[DiscoveryResult], interactive: bool) -> Table {
    let mut table = new_table(&["Endpoint", "Status", "Nodes", "Checked"], interactive);
    for result in results {
        table.add_row(vec![
            Cell::new(&result.endpoint),
            Cell::new(result.status.to_string()).fg(status_color(&result.status)),
            Cell::new(result.node_count()),
            Cell::new(result.timestamp.with_timezone(&Local).format("%H:%M:%S")),
        ]);
    }
    table
}

fn node_table(result: &DiscoveryResult, interactive: bool) -> Table {
    let mut table = new_table(&["Name", "Namespace", "Type", "Identifier"], interactive);

    if !result.status.is_connected() || result.nodes.is_empty() {
        table.add_row(vec!["No nodes discovered", "", "", ""]);
        return table;
    }

    for node in result.nodes.iter().take(NODE_DISPLAY_LIMIT) {
        table.add_row(vec![
            node.name.clone(),
            node.namespace.clone(),
            node.identifier_type.to_string(),
            node.identifier.to_string(),
        ]);
    }
    if result.nodes.len() > NODE_DISPLAY_LIMIT {
        table.add_row(vec![
            format!("... and {} more nodes", result.nodes.len() - NODE_DISPLAY_LIMIT),
            String::new(),
            String::new(),
            String::new(),
        ]);
    }
    table
}

fn level_color(level: Level) -> Color {
    match level {
        Level::ERROR => Color::Red,
        Level::WARN => Color::Yellow,
        Level::INFO => Color::Green,
        _ => Color::Grey,
    }
}

fn log_table(snapshot: &CycleSnapshot, interactive: bool) -> Table {
    let mut table = new_table(&["Time", "Level", "Message"], interactive);
    for line in &snapshot.recent_logs {
        table.add_row(vec![
            Cell::new(line.time.format("%H:%M:%S")),
            Cell::new(line.level).fg(level_color(line.level)),
            Cell::new(truncate_chars(&line.message, LOG_MESSAGE_MAX_CHARS)),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ReconcileOutcome;
    use crate::types::{IdentifierType, IdentifierValue, VariableDescriptor};
    use teloav_logging::LogLine;

    fn snapshot(results: Vec<DiscoveryResult>) -> CycleSnapshot {
        CycleSnapshot {
            cycle: 3,
            results,
            last_cycle_at: Utc::now(),
            next_cycle_at: None,
            outcome: Some(ReconcileOutcome {
                changed: true,
                updated_blocks: 1,
                written: true,
            }),
            ingest_changed: false,
            aborted: None,
            recent_logs: Vec::new(),
        }
    }

    fn nodes(count: u32) -> Vec<VariableDescriptor> {
        (0..count)
            .map(|i| VariableDescriptor {
                name: format!("Sensor{:03}", i),
                namespace: "2".to_string(),
                identifier_type: IdentifierType::Numeric,
                identifier: IdentifierValue::Numeric(i),
                data_type: None,
            })
            .collect()
    }

    #[test]
    fn test_countdown_format() {
        assert_eq!(format_countdown(5), "5s");
        assert_eq!(format_countdown(65), "1m 05s");
        assert_eq!(format_countdown(3723), "1h 02m 03s");
        assert_eq!(format_countdown(-4), "0s");
    }

    #[test]
    fn test_node_list_is_capped() {
        let report = render_snapshot(
            &snapshot(vec![DiscoveryResult::connected("opc.tcp://a", nodes(60))]),
            Utc::now(),
            false,
        );
        assert!(report.contains("Sensor049"));
        assert!(!report.contains("Sensor050"));
        assert!(report.contains("... and 10 more nodes"));
        assert!(report.contains("Config written (1 endpoint block(s) updated)"));
    }

    #[test]
    fn test_failed_endpoint_shows_status() {
        let report = render_snapshot(
            &snapshot(vec![DiscoveryResult::connection_failed("opc.tcp://down")]),
            Utc::now(),
            false,
        );
        assert!(report.contains("Connection Failed"));
        assert!(report.contains("No nodes discovered"));
    }

    #[test]
    fn test_countdown_in_status_line() {
        let now = Utc::now();
        let mut snap = snapshot(Vec::new());
        snap.next_cycle_at = Some(now + chrono::Duration::seconds(90));
        let report = render_snapshot(&snap, now, false);
        assert!(report.contains("(in 1m 30s)"));
    }

    #[test]
    fn test_aborted_cycle_and_long_log_lines() {
        let mut snap = snapshot(Vec::new());
        snap.outcome = None;
        snap.aborted = Some("Failed to read telegraf.conf".to_string());
        snap.recent_logs = vec![LogLine {
            time: Local::now(),
            level: Level::ERROR,
            message: format!("{}TAIL", "x".repeat(LOG_MESSAGE_MAX_CHARS)),
        }];
        let report = render_snapshot(&snap, Utc::now(), false);
        assert!(report.contains("Cycle aborted: Failed to read telegraf.conf"));
        assert!(report.contains(&"x".repeat(LOG_MESSAGE_MAX_CHARS)));
        assert!(!report.contains("TAIL"));
    }
}
