use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// One stderr line: a bar for time-bound runs, a spinner otherwise.
pub(crate) struct HumanProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    pub(crate) fn update(&self, total: Option<Duration>, elapsed: Duration, message: String) {
        let mut bar = self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let pb = bar.get_or_insert_with(|| new_bar(total));
        pb.set_message(message);

        match total {
            Some(total) => {
                let total_ms = total.as_millis() as u64;
                pb.set_length(total_ms);
                pb.set_position((elapsed.as_millis() as u64).min(total_ms));
            }
            None => pb.tick(),
        }
    }

    pub(crate) fn finish(&self) {
        let mut bar = self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pb) = bar.take() {
            pb.finish_and_clear();
        }
    }
}

fn new_bar(total: Option<Duration>) -> ProgressBar {
    let pb = match total {
        Some(_) => {
            let pb = ProgressBar::new(0);
            pb.set_style(bar_style());
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(spinner_style());
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        }
    };
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    pb.set_prefix("load");
    pb
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
