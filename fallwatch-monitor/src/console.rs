//! Operator-facing output

use crate::tracker::Report;
use std::io::Write;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::sync::mpsc;

const BELL_RINGS: usize = 3;
const BELL_GAP: Duration = Duration::from_millis(700);

/// Local wall-clock time as `HH:MM:SS`, falling back to UTC when the local
/// offset cannot be determined
pub fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "--:--:--".to_string())
}

pub fn format_report(report: &Report, at: &str) -> String {
    let marker = if report.posture.is_fall() { "!!" } else { "ok" };
    format!("[{}] {} Received: {}", at, marker, report.message())
}

/// Print reports as they arrive; a fall also rings the bell
pub async fn print_reports(mut reports: mpsc::UnboundedReceiver<Report>, bell: bool) {
    while let Some(report) = reports.recv().await {
        println!("{}", format_report(&report, &timestamp()));
        if bell && report.posture.is_fall() {
            ring_bell().await;
        }
    }
}

async fn ring_bell() {
    for _ in 0..BELL_RINGS {
        print!("\x07");
        let _ = std::io::stdout().flush();
        tokio::time::sleep(BELL_GAP).await;
    }
}
