use std::fmt::Display;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum BesimError {
    #[error("Request was considered invalid due to error: {0}")]
    InvalidRequest(#[from] anyhow::Error),
    #[error("Error identified during schedule compilation: {0}")]
    FailureInScheduleCompilation(SetupError),
    #[error("Error identified during output/meter setup: {0}")]
    FailureInReportingSetup(SetupError),
    #[error("Error identified while emitting results: {0}")]
    FailureInEmission(anyhow::Error),
}

/// A batch of fatal diagnostics accumulated across a whole compile/setup
/// pass. Validation does not fail fast: users see every problem from one run.
#[derive(Debug)]
pub struct SetupError {
    fatals: Vec<String>,
}

impl std::error::Error for SetupError {}

impl Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} fatal error(s) found:", self.fatals.len())?;
        for fatal in &self.fatals {
            writeln!(f, "  ** Severe  ** {fatal}")?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics during schedule compilation and reporting setup.
///
/// Severe diagnostics are collected and only become an error when the pass
/// finishes ([`ErrorCollector::finish`]); warnings are logged immediately and
/// never abort. Each diagnostic carries the offending object's context so
/// repeated failures on distinct objects all surface once.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    fatals: Vec<String>,
    warning_count: usize,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn severe(&mut self, context: impl Display, message: impl Display) {
        self.fatals.push(format!("{context}: {message}"));
    }

    pub fn warning(&mut self, context: impl Display, message: impl Display) {
        self.warning_count += 1;
        warn!("{context}: {message}");
    }

    pub fn has_fatals(&self) -> bool {
        !self.fatals.is_empty()
    }

    pub fn fatal_count(&self) -> usize {
        self.fatals.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Close out the pass: `Ok` if nothing severe accumulated, otherwise the
    /// whole batch as one error.
    pub fn finish(self) -> Result<(), SetupError> {
        if self.fatals.is_empty() {
            Ok(())
        } else {
            Err(SetupError {
                fatals: self.fatals,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn collector_accumulates_rather_than_failing_fast() {
        let mut collector = ErrorCollector::new();
        collector.severe("Schedule:Compact=SCHED A", "gap in Through dates");
        collector.severe("Schedule:Compact=SCHED B", "overlapping Through dates");
        collector.warning("ScheduleTypeLimits=ANY", "unknown unit type");
        assert_eq!(collector.fatal_count(), 2);
        assert_eq!(collector.warning_count(), 1);
        let err = collector.finish().unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("2 fatal error(s)"));
        assert!(rendered.contains("SCHED A"));
        assert!(rendered.contains("SCHED B"));
    }

    #[rstest]
    fn warnings_alone_do_not_fail_the_pass() {
        let mut collector = ErrorCollector::new();
        collector.warning("Schedule:File=FS", "row count mismatch");
        assert!(collector.finish().is_ok());
    }
}
