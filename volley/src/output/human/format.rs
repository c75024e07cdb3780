use std::time::Duration;

pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_pct(rate: Option<f64>) -> String {
    match rate {
        Some(r) if r.is_finite() => format!("{:.2}%", r * 100.0),
        _ => "n/a".to_string(),
    }
}

/// Latency values are milliseconds; sub-millisecond values render in µs.
pub(crate) fn format_ms_opt(ms: Option<f64>) -> String {
    match ms {
        None => "n/a".to_string(),
        Some(v) if !v.is_finite() => "n/a".to_string(),
        Some(v) if v >= 1000.0 => format!("{:.2}s", v / 1000.0),
        Some(v) if v >= 1.0 => format!("{v:.2}ms"),
        Some(v) => format!("{:.0}µs", v * 1000.0),
    }
}

/// Single rounded component in s, ms or us.
pub(crate) fn format_duration(d: Duration) -> String {
    let total_ns = d.as_nanos();

    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    if total_ns >= NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_and_latency_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00KiB");
        assert_eq!(format_ms_opt(Some(0.25)), "250µs");
        assert_eq!(format_ms_opt(Some(12.5)), "12.50ms");
        assert_eq!(format_ms_opt(Some(1500.0)), "1.50s");
        assert_eq!(format_ms_opt(None), "n/a");
        assert_eq!(format_pct(Some(0.5)), "50.00%");
    }

    #[test]
    fn duration_rounds_to_one_unit() {
        assert_eq!(format_duration(Duration::from_millis(1499)), "1s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "2s");
        assert_eq!(format_duration(Duration::from_micros(2500)), "3ms");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "2us");
    }
}
