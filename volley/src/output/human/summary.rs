use std::fmt::Write as _;

use volley_core::runner::RunReport;
use volley_core::{MetricsSummary, Verdict};

use super::format::*;

pub(crate) fn render(report: &RunReport) -> String {
    let s = &report.summary;
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(out, "  elapsed: {}", format_duration(s.elapsed)).ok();
    writeln!(out, "  vus: peak {}", s.vus_active_max).ok();
    writeln!(out, "  iterations: {}", s.iterations).ok();
    writeln!(
        out,
        "  requests: {} (failed {}, {}) rps={}",
        s.requests_total,
        s.requests_failed,
        format_pct(s.request_failure_rate),
        format_rate(s.requests_per_sec)
    )
    .ok();
    writeln!(
        out,
        "  latency = p50={} p90={} p95={} p99={} mean={} max={} (n={})",
        format_ms_opt(s.latency.p50),
        format_ms_opt(s.latency.p90),
        format_ms_opt(s.latency.p95),
        format_ms_opt(s.latency.p99),
        format_ms_opt(s.latency.mean),
        format_ms_opt(s.latency.max),
        s.latency.count
    )
    .ok();
    writeln!(
        out,
        "  bytes: recv {} sent {}",
        format_bytes(s.bytes_received),
        format_bytes(s.bytes_sent)
    )
    .ok();

    if report.aborted {
        out.push_str("  stopped early by operator\n");
    }
    if report.interrupted_vus > 0 {
        writeln!(
            out,
            "  interrupted VUs: {} (still running after graceful stop)",
            report.interrupted_vus
        )
        .ok();
    }

    render_endpoints(s, &mut out);
    render_checks(s, &mut out);
    render_skips_and_errors(s, &mut out);
    render_verdict(&report.verdict, &mut out);

    if let Some(err) = &report.teardown_error {
        writeln!(out, "\nteardown failed: {err}").ok();
    }

    out
}

fn render_endpoints(s: &MetricsSummary, out: &mut String) {
    if s.endpoints.is_empty() {
        return;
    }

    out.push_str("\nendpoints\n");
    for e in &s.endpoints {
        writeln!(
            out,
            "  {}: requests={} failed={} p50={} p95={} p99={} max={}",
            e.name,
            e.requests,
            e.failed,
            format_ms_opt(e.latency.p50),
            format_ms_opt(e.latency.p95),
            format_ms_opt(e.latency.p99),
            format_ms_opt(e.latency.max),
        )
        .ok();
    }
}

fn render_checks(s: &MetricsSummary, out: &mut String) {
    if s.checks.is_empty() {
        return;
    }

    writeln!(
        out,
        "\nchecks ({} passed of {}, {})",
        s.checks_passed,
        s.checks_total,
        format_pct(s.checks_pass_rate)
    )
    .ok();
    for c in &s.checks {
        let status = if c.failure > 0 { "FAIL" } else { "OK" };
        if c.rejection > 0 {
            writeln!(
                out,
                "  {}: success={} rejection={} failure={} [{status}]",
                c.name, c.success, c.rejection, c.failure
            )
            .ok();
        } else {
            writeln!(
                out,
                "  {}: success={} failure={} [{status}]",
                c.name, c.success, c.failure
            )
            .ok();
        }
    }
}

fn render_skips_and_errors(s: &MetricsSummary, out: &mut String) {
    if !s.skipped.is_empty() {
        writeln!(out, "\nskipped steps ({})", s.steps_skipped).ok();
        for k in &s.skipped {
            writeln!(out, "  {}: {}", k.name, k.count).ok();
        }
    }

    if !s.errors.is_empty() {
        out.push_str("\nerrors\n");
        for e in &s.errors {
            writeln!(out, "  {}: {} x{}", e.name, e.cause, e.count).ok();
        }
    }
}

fn render_verdict(verdict: &Verdict, out: &mut String) {
    if verdict.results.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for r in &verdict.results {
        let mark = if r.passed { "✓" } else { "✗" };
        match r.observed {
            Some(obs) => {
                writeln!(out, "  {mark} {}: {} (observed {obs:.4})", r.metric, r.expression).ok()
            }
            None => writeln!(out, "  {mark} {}: {} (no data)", r.metric, r.expression).ok(),
        };
    }
    writeln!(out, "  verdict: {}", if verdict.passed { "PASS" } else { "FAIL" }).ok();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use volley_core::{CheckSummary, ErrorSummary, SkipSummary, ThresholdResult};

    fn report() -> RunReport {
        let summary = MetricsSummary {
            elapsed: Duration::from_secs(10),
            requests_total: 10,
            requests_failed: 2,
            request_failure_rate: Some(0.2),
            requests_per_sec: 1.0,
            checks_total: 10,
            checks_passed: 8,
            checks_pass_rate: Some(0.8),
            checks: vec![CheckSummary {
                name: "auth ok".to_string(),
                success: 6,
                rejection: 2,
                failure: 2,
            }],
            iterations: 5,
            steps_skipped: 3,
            skipped: vec![SkipSummary {
                name: "info".to_string(),
                count: 3,
            }],
            bytes_sent: 1024,
            bytes_received: 2048,
            vus_active_max: 2,
            errors: vec![ErrorSummary {
                name: "auth".to_string(),
                cause: "status 500".to_string(),
                count: 2,
            }],
            ..MetricsSummary::default()
        };

        RunReport {
            summary,
            verdict: Verdict {
                results: vec![ThresholdResult {
                    metric: "checks".to_string(),
                    expression: "rate>0.9999".to_string(),
                    observed: Some(0.8),
                    passed: false,
                }],
                passed: false,
            },
            interrupted_vus: 0,
            aborted: false,
            teardown_error: None,
        }
    }

    #[test]
    fn render_includes_totals_checks_and_verdict() {
        let text = render(&report());
        assert!(text.contains("requests: 10 (failed 2, 20.00%)"));
        assert!(text.contains("bytes: recv 2.00KiB sent 1.00KiB"));
        assert!(text.contains("auth ok: success=6 rejection=2 failure=2 [FAIL]"));
        assert!(text.contains("skipped steps (3)"));
        assert!(text.contains("auth: status 500 x2"));
        assert!(text.contains("✗ checks: rate>0.9999 (observed 0.8000)"));
        assert!(text.contains("verdict: FAIL"));
        assert!(text.contains("latency = p50=n/a"));
    }

    #[test]
    fn render_reports_abort_and_teardown() {
        let mut r = report();
        r.aborted = true;
        r.teardown_error = Some("status 500 (failure)".to_string());
        let text = render(&r);
        assert!(text.contains("stopped early by operator"));
        assert!(text.contains("teardown failed: status 500 (failure)"));
    }
}
