//! Local progress display
//!
//! Renders `ETA HH:MM:SS.s  pct% [####    ]` lines. In normal mode the line
//! is redrawn in place through indicatif; in verbose mode every update is
//! appended as its own line so it interleaves with debug logging.

use crate::progress::estimator::EtaSnapshot;
use console::Term;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Width of the bar in characters
pub const BAR_WIDTH: usize = 40;

/// Format seconds as `HH:MM:SS.s`
pub fn format_clock(secs: f64) -> String {
    let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    let tenths = (secs * 10.0).floor() as u64;
    let h = tenths / 36_000;
    let m = (tenths % 36_000) / 600;
    let s = (tenths % 600) as f64 / 10.0;
    format!("{:02}:{:02}:{:04.1}", h, m, s)
}

/// Number of filled bar cells for a percentage
pub fn bar_fill(progress_pct: f64) -> usize {
    let pct = progress_pct.clamp(0.0, 100.0);
    ((BAR_WIDTH as f64 * pct / 100.0).ceil() as usize).min(BAR_WIDTH)
}

/// Render one progress line
///
/// The line ends in `\r` so the next one overwrites it, or `\n` in
/// verbose mode.
pub fn render_progress_line(progress_pct: f64, eta_secs: f64, verbose: bool) -> String {
    let fill = bar_fill(progress_pct);
    let sep = if verbose { '\n' } else { '\r' };
    format!(
        "ETA {} {:3}% [{}{}] {}",
        format_clock(eta_secs),
        progress_pct.clamp(0.0, 100.0).floor() as u32,
        "#".repeat(fill),
        " ".repeat(BAR_WIDTH - fill),
        sep
    )
}

enum Display {
    Hidden,
    InPlace(ProgressBar),
    Appending(Term),
}

/// Writes progress lines to stderr
pub struct ProgressReporter {
    display: Display,
    verbose: bool,
    last_line: Option<String>,
}

impl ProgressReporter {
    /// Redraw a single line in place
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.set_style(ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));
        Self {
            display: Display::InPlace(bar),
            verbose: false,
            last_line: None,
        }
    }

    /// Append one line per update
    pub fn verbose() -> Self {
        Self {
            display: Display::Appending(Term::stderr()),
            verbose: true,
            last_line: None,
        }
    }

    /// Render nothing (quiet mode)
    pub fn disabled() -> Self {
        Self {
            display: Display::Hidden,
            verbose: false,
            last_line: None,
        }
    }

    /// Pick the reporter for the given output flags
    pub fn for_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::disabled(),
            (false, true) => Self::verbose(),
            (false, false) => Self::new(),
        }
    }

    /// Check if progress is shown
    pub fn is_enabled(&self) -> bool {
        !matches!(self.display, Display::Hidden)
    }

    /// Last rendered line
    pub fn last_line(&self) -> Option<&str> {
        self.last_line.as_deref()
    }

    /// Show a progress update
    pub fn update(&mut self, snapshot: &EtaSnapshot) {
        let line = render_progress_line(snapshot.progress_pct, snapshot.eta_secs, self.verbose);

        match &self.display {
            Display::Hidden => {}
            Display::InPlace(bar) => bar.set_message(line.trim_end().to_string()),
            Display::Appending(term) => {
                // Display errors never abort the copy
                let _ = term.write_str(&line);
            }
        }

        self.last_line = Some(line);
    }

    /// Leave the final line on screen
    pub fn finish(&self) {
        match &self.display {
            Display::Hidden => {}
            Display::InPlace(bar) => bar.finish(),
            Display::Appending(term) => {
                let _ = term.flush();
            }
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "00:00:00.0");
        assert_eq!(format_clock(3723.46), "01:02:03.4");
        assert_eq!(format_clock(59.99), "00:00:59.9");
        assert_eq!(format_clock(-3.0), "00:00:00.0");
        assert_eq!(format_clock(f64::NAN), "00:00:00.0");
    }

    #[test]
    fn test_bar_fill() {
        assert_eq!(bar_fill(0.0), 0);
        assert_eq!(bar_fill(1.0), 1);
        assert_eq!(bar_fill(50.0), 20);
        assert_eq!(bar_fill(100.0), 40);
        assert_eq!(bar_fill(250.0), 40);
    }

    #[test]
    fn test_render_line() {
        let line = render_progress_line(50.0, 90.0, false);
        assert_eq!(
            line,
            format!("ETA 00:01:30.0  50% [{}{}] \r", "#".repeat(20), " ".repeat(20))
        );
    }

    #[test]
    fn test_render_verbose_line() {
        let line = render_progress_line(100.0, 0.0, true);
        assert!(line.starts_with("ETA 00:00:00.0 100% ["));
        assert!(line.ends_with("] \n"));
    }

    #[test]
    fn test_disabled_reporter_tracks_line() {
        let mut reporter = ProgressReporter::disabled();
        assert!(!reporter.is_enabled());
        reporter.update(&EtaSnapshot {
            progress_pct: 25.0,
            eta_secs: 10.0,
            elapsed_secs: 3.0,
            bytes_written: 100,
        });
        assert!(reporter.last_line().unwrap().contains(" 25% ["));
        reporter.finish();
    }
}
