//! CLI output formatting.
//!
//! Every served thumbnail is shown as its box size and how it was obtained,
//! with the artifact location as indented context:
//!
//! ```text
//! 200x150 computed → thumb.jpg
//!     Fingerprint: 2aae6c35c94fcfb415dbe95f408b9ce91ee846ed_200_150
//!     Size: 8123 bytes
//! ```
//!
//! A batch adds one line per size and a summary:
//!
//! ```text
//! http://example.com/flower.jpg
//!     200x200 cached
//!     400x300 computed
//!     9000x9000 failed (400): requested size of 9000 x 9000 is too big
//! 1 cached, 1 computed, 1 failed (3 total)
//! ```
//!
//! Each `format_*` function returns lines and does no I/O; the `print_*`
//! wrappers write them to stdout.

use crate::error::ThumbnailError;
use crate::service::{Outcome, Thumbnail};
use std::fmt;
use std::path::Path;

/// Tally of request outcomes across a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeStats {
    pub cached: u32,
    pub computed: u32,
    pub failed: u32,
}

impl OutcomeStats {
    pub fn record(&mut self, outcome: Outcome) {
        if outcome.is_computed() {
            self.computed += 1;
        } else {
            self.cached += 1;
        }
    }

    pub fn fail(&mut self) {
        self.failed += 1;
    }

    pub fn total(&self) -> u32 {
        self.cached + self.computed + self.failed
    }
}

impl fmt::Display for OutcomeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cached == 0 && self.failed == 0 {
            return write!(f, "{} computed", self.computed);
        }
        write!(f, "{} cached, {} computed", self.cached, self.computed)?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        write!(f, " ({} total)", self.total())
    }
}

fn size_label(width: u32, height: u32) -> String {
    format!("{width}x{height}")
}

fn failure_line(err: &ThumbnailError) -> String {
    format!("failed ({}): {}", err.status(), err.message())
}

/// Format a single served thumbnail written to `output`.
pub fn format_thumbnail(width: u32, height: u32, thumb: &Thumbnail, output: &Path) -> Vec<String> {
    vec![
        format!(
            "{} {} \u{2192} {}",
            size_label(width, height),
            thumb.outcome,
            output.display()
        ),
        format!("    Fingerprint: {}", thumb.fingerprint),
        format!("    Size: {} bytes", thumb.bytes.len()),
    ]
}

pub fn print_thumbnail(width: u32, height: u32, thumb: &Thumbnail, output: &Path) {
    for line in format_thumbnail(width, height, thumb, output) {
        println!("{}", line);
    }
}

/// Format a batch: one line per requested size, then the outcome summary.
pub fn format_batch(
    url: &str,
    results: &[((u32, u32), Result<Thumbnail, ThumbnailError>)],
) -> Vec<String> {
    let mut lines = vec![url.to_string()];
    let mut stats = OutcomeStats::default();

    for ((width, height), result) in results {
        let status = match result {
            Ok(thumb) => {
                stats.record(thumb.outcome);
                thumb.outcome.to_string()
            }
            Err(err) => {
                stats.fail();
                failure_line(err)
            }
        };
        lines.push(format!("    {} {}", size_label(*width, *height), status));
    }

    lines.push(stats.to_string());
    lines
}

pub fn print_batch(url: &str, results: &[((u32, u32), Result<Thumbnail, ThumbnailError>)]) {
    for line in format_batch(url, results) {
        println!("{}", line);
    }
}
