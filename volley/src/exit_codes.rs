#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// A setup step did not succeed; no load was generated.
    SetupFailed = 20,

    /// Invalid CLI/plan/credentials input (bad flags, durations, threshold syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, task failures).
    RuntimeError = 40,

    /// The operator interrupted the run (Ctrl-C).
    Aborted = 130,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_verdict(thresholds_passed: bool, aborted: bool) -> Self {
        match (aborted, thresholds_passed) {
            (true, _) => Self::Aborted,
            (false, true) => Self::Success,
            (false, false) => Self::ThresholdsFailed,
        }
    }
}
