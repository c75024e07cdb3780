mod gate;
mod limiter;
mod progress;
mod run;
mod signal;
mod vu;

pub use gate::IterationGate;
pub use limiter::RateLimiter;
pub use progress::{LiveMetrics, PROGRESS_INTERVAL, ProgressFn, ProgressUpdate};
pub use run::{RunPlan, RunReport, run};
pub use signal::Signal;
