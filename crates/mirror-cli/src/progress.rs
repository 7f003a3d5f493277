//! Download progress display.

use indicatif::{ProgressBar, ProgressStyle};

/// Progress tracker for one download
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Create a tracker for `path`. The total is unknown until the
    /// server's response, so the bar tracks bytes and rate only.
    #[must_use]
    pub fn new(path: &str) -> Self {
        let bar = ProgressBar::no_length();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} {bytes} ({bytes_per_sec})")
                .expect("invalid progress template"),
        );
        bar.set_message(path.to_string());
        Self { bar }
    }

    /// Update received byte count
    pub fn update(&self, received: u64) {
        self.bar.set_position(received);
    }

    /// Clear the bar once the transfer has been verified
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Abandon the bar on error, leaving the last state visible
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Render a byte count with a binary-unit suffix.
///
/// Plain byte counts stay exact; everything from a kibibyte up is shown
/// with one decimal.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = *next;
    }

    if unit == "B" {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {unit}")
    }
}

/// Render a transfer rate as bytes per second
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}
