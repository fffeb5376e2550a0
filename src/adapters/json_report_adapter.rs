//! JSON report adapter implementing ReportPort.
//!
//! Non-finite floats (an infinite profit factor, a NaN stop level) have no
//! JSON spelling and are written as `null`.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::domain::backtest::{ParityReport, RunResult};
use crate::domain::error::StratlabError;
use crate::domain::sandbox::Verdict;
use crate::ports::report_port::ReportPort;

pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }

    fn write_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
        output_path: &str,
    ) -> Result<(), StratlabError> {
        let json = serde_json::to_string_pretty(value).map_err(|e| StratlabError::Report {
            reason: format!("failed to serialize report: {}", e),
        })?;

        let path = Path::new(output_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        tracing::info!(path = output_path, "report written");
        Ok(())
    }
}

impl Default for JsonReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for JsonReportAdapter {
    fn write_run(&self, result: &RunResult, output_path: &str) -> Result<(), StratlabError> {
        self.write_json(result, output_path)
    }

    fn write_sweep(&self, results: &[RunResult], output_path: &str) -> Result<(), StratlabError> {
        self.write_json(results, output_path)
    }

    fn write_parity(&self, report: &ParityReport, output_path: &str) -> Result<(), StratlabError> {
        self.write_json(report, output_path)
    }

    fn write_verdict(&self, verdict: &Verdict, output_path: &str) -> Result<(), StratlabError> {
        self.write_json(verdict, output_path)
    }
}
