use crate::error::{ExporterError, Result};
use crate::exporter::Exporter;
use crate::types::{RunReport, Server};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drive `fut` unless `cancel` fires first.
///
/// A token that is already cancelled wins without `fut` being polled at all,
/// so no network operation is started after the deadline.
pub async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExporterError::Cancelled),
        res = fut => res,
    }
}

/// 在终端执行一次完整测速 (带进度提示)
pub async fn run_with_progress(exporter: &Exporter, cancel: &CancellationToken) -> RunReport {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(format!(
        "Testing {} server(s), this takes about a minute each...",
        exporter.selection().server_ids.len()
    ));
    pb.enable_steady_tick(Duration::from_millis(120));

    let report = exporter.run(cancel).await;

    pb.finish_with_message("Testing completed.");
    report
}

/// Print a finished run as a table
pub fn print_report(report: &RunReport) {
    println!();
    if let Some(user) = &report.user {
        println!("Client: {} ({}) at {}, {}", user.ip, user.isp, user.lat, user.lon);
    }

    println!(
        "{:<8} {:<24} {:>10} {:>14} {:>14}",
        "ID", "SERVER", "LATENCY", "DOWNLOAD", "UPLOAD"
    );
    println!("{}", "-".repeat(74));

    for res in &report.servers {
        let r = &res.results;
        let latency = r
            .latency
            .map(|d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "Failed".to_string());

        println!(
            "{:<8} {:<24} {:>10} {:>14} {:>14}",
            res.server.id,
            truncate(&res.server.name, 24),
            latency,
            format_rate(r.download),
            format_rate(r.upload)
        );
    }

    println!("{}", "-".repeat(74));
    println!(
        "Result: {} in {:.1}s",
        if report.healthy { "OK" } else { "FAILED" },
        report.elapsed.as_secs_f64()
    );
}

/// Print the candidate servers, nearest first
pub fn print_servers(servers: &[Server]) {
    println!(
        "{:<8} {:<24} {:<24} {:<16} {:>10}",
        "ID", "NAME", "SPONSOR", "COUNTRY", "DISTANCE"
    );
    println!("{}", "-".repeat(86));
    for s in servers {
        println!(
            "{:<8} {:<24} {:<24} {:<16} {:>8.0}km",
            s.id,
            truncate(&s.name, 24),
            truncate(&s.sponsor, 24),
            truncate(&s.country, 16),
            s.distance
        );
    }
}

/// Bytes per second as Mbit/s, or "Failed" for a missing value.
fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(bps) => format!("{:.2}Mbps", bps * 8.0 / 1_000_000.0),
        None => "Failed".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", head)
}
