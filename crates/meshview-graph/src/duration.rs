//! Prometheus-style duration strings
//!
//! Accepts one or more `<integer><unit>` segments in descending unit order,
//! e.g. `1h30m` or `90s`. Units: `y` (365d), `w`, `d`, `h`, `m`, `s`, `ms`.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use meshview_common::Error;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:([0-9]+)y)?(?:([0-9]+)w)?(?:([0-9]+)d)?(?:([0-9]+)h)?(?:([0-9]+)m)?(?:([0-9]+)s)?(?:([0-9]+)ms)?$",
    )
    .expect("duration regex is valid")
});

const UNIT_MILLIS: [(u64, &str); 7] = [
    (365 * 24 * 60 * 60 * 1000, "y"),
    (7 * 24 * 60 * 60 * 1000, "w"),
    (24 * 60 * 60 * 1000, "d"),
    (60 * 60 * 1000, "h"),
    (60 * 1000, "m"),
    (1000, "s"),
    (1, "ms"),
];

/// Parse a duration string; `0` is accepted and yields zero
pub fn parse_duration(raw: &str) -> Result<Duration, Error> {
    let invalid = || Error::bad_request_for_param("duration", format!("Invalid duration [{}]", raw));

    if raw == "0" {
        return Ok(Duration::ZERO);
    }
    if raw.is_empty() {
        return Err(invalid());
    }
    let caps = DURATION_RE.captures(raw).ok_or_else(invalid)?;

    let mut millis: u64 = 0;
    for (i, (unit, _)) in UNIT_MILLIS.iter().enumerate() {
        if let Some(m) = caps.get(i + 1) {
            let n: u64 = m.as_str().parse().map_err(|_| invalid())?;
            millis = n
                .checked_mul(*unit)
                .and_then(|v| millis.checked_add(v))
                .ok_or_else(invalid)?;
        }
    }
    Ok(Duration::from_millis(millis))
}

/// Render a duration in the same syntax, largest units first
pub fn format_duration(duration: Duration) -> String {
    let mut millis = duration.as_millis() as u64;
    if millis == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, suffix) in UNIT_MILLIS {
        let n = millis / unit;
        if n > 0 {
            out.push_str(&n.to_string());
            out.push_str(suffix);
            millis -= n * unit;
        }
    }
    out
}
