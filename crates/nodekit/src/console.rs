//! Terminal output for child processes and command results

use nodekit_tasks::{OutputSink, Stream, UnitReport};
use std::io::{self, Write};

/// Writes child output to the matching stream of this process as it arrives
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn line(&self, stream: Stream, line: &str) {
        // A closed pipe on our side must not abort the child.
        let _ = match stream {
            Stream::Stdout => writeln!(io::stdout().lock(), "{line}"),
            Stream::Stderr => writeln!(io::stderr().lock(), "{line}"),
        };
    }
}

/// One line per unit: name, outcome and how long it took.
pub fn summary_line(report: &UnitReport) -> String {
    format!(
        "{:<28} {} ({:.1}s)",
        report.unit,
        report.outcome,
        report.duration.as_secs_f64()
    )
}

/// Print a pipeline summary on stderr, keeping stdout for build output.
pub fn print_summary(reports: &[UnitReport]) {
    let mut err = io::stderr().lock();
    for report in reports {
        let _ = writeln!(err, "{}", summary_line(report));
    }
}

/// Print a command result on stdout.
pub fn print_result(text: impl std::fmt::Display) {
    let _ = writeln!(io::stdout().lock(), "{text}");
}
