//! Report output port trait.

use crate::domain::backtest::{ParityReport, RunResult};
use crate::domain::error::StratlabError;
use crate::domain::sandbox::Verdict;

/// Port for writing run results, parity comparisons and validation verdicts.
pub trait ReportPort {
    fn write_run(&self, result: &RunResult, output_path: &str) -> Result<(), StratlabError>;

    fn write_sweep(&self, results: &[RunResult], output_path: &str) -> Result<(), StratlabError>;

    fn write_parity(&self, report: &ParityReport, output_path: &str) -> Result<(), StratlabError>;

    fn write_verdict(&self, verdict: &Verdict, output_path: &str) -> Result<(), StratlabError>;
}
