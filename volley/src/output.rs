use crate::cli::OutputFormat;
use std::path::Path;

use volley_core::RunConfig;
use volley_core::runner::{ProgressFn, RunReport};

mod human;
mod json;

/// What is known about a run before the first request goes out.
pub(crate) struct RunHeader<'a> {
    pub plan: &'a Path,
    pub name: Option<&'a str>,
    pub config: &'a RunConfig,
    pub users: usize,
}

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, header: &RunHeader<'_>);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
