use crate::models::TableKind;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::info;

const MIB: f64 = 1024.0 * 1024.0;

/// Receives periodic byte/record counters from the resolver.
pub trait ProgressReporter {
    /// A new table pass begins. `total_bytes` is 0 when unknown.
    fn start(&mut self, _kind: TableKind, _total_bytes: u64) {}

    fn log(&mut self, bytes_read: u64, records: u64);

    /// The current pass has drained.
    fn finish(&mut self, bytes_read: u64, records: u64);
}

/// Discards all progress.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn log(&mut self, _bytes_read: u64, _records: u64) {}

    fn finish(&mut self, _bytes_read: u64, _records: u64) {}
}

/// Byte bar on the terminal plus a structured rate line per report.
pub struct DumpProgress {
    kind: Option<TableKind>,
    total_bytes: u64,
    bar: Option<ProgressBar>,
    show_bar: bool,
    started: Instant,
    last_at: Instant,
    last_bytes: u64,
    last_records: u64,
}

/// Throughput since the previous report.
#[derive(Debug, Clone, PartialEq)]
pub struct Rates {
    pub records_per_sec: f64,
    pub mib_per_sec: f64,
    pub eta: Option<Duration>,
}

impl Rates {
    pub fn compute(
        elapsed: Duration,
        delta_bytes: u64,
        delta_records: u64,
        remaining_bytes: u64,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Self {
                records_per_sec: 0.0,
                mib_per_sec: 0.0,
                eta: None,
            };
        }
        let bytes_per_sec = delta_bytes as f64 / secs;
        let eta = (bytes_per_sec > 0.0)
            .then(|| Duration::from_secs((remaining_bytes as f64 / bytes_per_sec).floor() as u64));
        Self {
            records_per_sec: delta_records as f64 / secs,
            mib_per_sec: bytes_per_sec / MIB,
            eta,
        }
    }
}

/// `HHhMMmSSs`, or `N/A` without an estimate.
pub fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(d) => {
            let secs = d.as_secs();
            format!("{:02}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
        None => "N/A".to_string(),
    }
}

impl DumpProgress {
    pub fn new(show_bar: bool) -> Self {
        let now = Instant::now();
        Self {
            kind: None,
            total_bytes: 0,
            bar: None,
            show_bar,
            started: now,
            last_at: now,
            last_bytes: 0,
            last_records: 0,
        }
    }

    fn make_bar(total: u64, label: &str) -> ProgressBar {
        let pb = if total > 0 {
            ProgressBar::new(total)
        } else {
            ProgressBar::new_spinner()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template(&format!(
                    "{{spinner:.cyan}} {label:<11} [{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{eta}}) {{msg}}"
                ))
                .unwrap()
                .progress_chars("=> "),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn label(&self) -> &'static str {
        self.kind.map(TableKind::dump_name).unwrap_or("dump")
    }
}

impl ProgressReporter for DumpProgress {
    fn start(&mut self, kind: TableKind, total_bytes: u64) {
        let now = Instant::now();
        self.kind = Some(kind);
        self.total_bytes = total_bytes;
        self.started = now;
        self.last_at = now;
        self.last_bytes = 0;
        self.last_records = 0;
        if self.show_bar {
            self.bar = Some(Self::make_bar(total_bytes, kind.dump_name()));
        }
    }

    fn log(&mut self, bytes_read: u64, records: u64) {
        let now = Instant::now();
        let rates = Rates::compute(
            now.duration_since(self.last_at),
            bytes_read.saturating_sub(self.last_bytes),
            records.saturating_sub(self.last_records),
            self.total_bytes.saturating_sub(bytes_read),
        );
        self.last_at = now;
        self.last_bytes = bytes_read;
        self.last_records = records;

        if let Some(bar) = &self.bar {
            bar.set_position(bytes_read);
            bar.set_message(format!("{records} parsed"));
        }
        info!(
            table = self.label(),
            records,
            elapsed_secs = %format!("{:.2}", self.started.elapsed().as_secs_f64()),
            records_per_sec = %format!("{:.2}", rates.records_per_sec),
            mib_per_sec = %format!("{:.2}", rates.mib_per_sec),
            read_mib = %format!("{:.2}", bytes_read as f64 / MIB),
            total_mib = %format!("{:.2}", self.total_bytes as f64 / MIB),
            eta = %format_eta(rates.eta),
            "Dump progress"
        );
    }

    fn finish(&mut self, bytes_read: u64, records: u64) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        info!(
            table = self.label(),
            records,
            read_mib = %format!("{:.2}", bytes_read as f64 / MIB),
            elapsed_secs = %format!("{:.2}", self.started.elapsed().as_secs_f64()),
            "Pass complete"
        );
    }
}
