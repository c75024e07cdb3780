use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_bytes, format_duration, format_ms_opt, format_pct, format_rate};
use progress::HumanProgress;
use summary::render;
use volley_core::runner::{ProgressFn, RunReport};

use super::{OutputFormatter, RunHeader};

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, header: &RunHeader<'_>) {
        let cfg = header.config;
        println!("plan: {}", header.plan.display());
        if let Some(name) = header.name {
            println!("name: {name}");
        }

        let mut line = format!("vus={}", cfg.vus);
        if let Some(d) = cfg.duration {
            line.push_str(&format!(" duration={}", format_duration(d)));
        }
        if let Some(n) = cfg.iterations {
            line.push_str(&format!(" iterations={n}"));
        }
        if let Some(rate) = cfg.rate {
            line.push_str(&format!(" rps={} burst={} limiter={}", rate.rps, rate.burst, rate.scope));
        }
        line.push_str(&format!(
            " think_time={} users={}",
            format_duration(cfg.think_time),
            header.users
        ));
        println!("{line}");
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u| {
            let m = &u.metrics;
            let failing = u.verdict.violations().count();

            let mut message = format!(
                "vus={}/{} elapsed={} rps={} iters/s={} p95={} errors={}/{} tps={}/s",
                u.vus_active,
                u.vus,
                format_duration(u.elapsed),
                format_rate(m.rps_now),
                format_rate(m.iterations_per_sec_now),
                format_ms_opt(m.latency_p95_ms),
                format_pct(Some(m.error_rate_now)),
                m.requests_failed,
                format_bytes(m.bytes_received_total.saturating_add(m.bytes_sent_total) / u.elapsed.as_secs().max(1)),
            );
            if failing > 0 {
                message.push_str(&format!(" thresholds_failing={failing}"));
            }

            progress.update(u.duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        if !report.verdict.passed {
            eprintln!("thresholds failed:");
            for v in report.verdict.violations() {
                match v.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", v.metric, v.expression),
                    None => eprintln!("  {}: {} (missing series)", v.metric, v.expression),
                }
            }
        }

        Ok(())
    }
}
