//! Small shared helpers: payload generation and human-readable
//! formatting for the summary output.

use rand::RngCore;

/// Allocate a payload of `len` random bytes.
///
/// Random content defeats any compression a transport layer might
/// apply, so measured bandwidth reflects the requested byte count.
pub fn fill_payload(len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut payload);
    payload
}

/// Format a duration given in seconds using the most readable unit.
pub fn format_duration(secs: f64) -> String {
    if secs >= 1.0 {
        format!("{secs:.3}s")
    } else if secs >= 0.001 {
        format!("{:.3}ms", secs * 1_000.0)
    } else {
        format!("{:.1}us", secs * 1_000_000.0)
    }
}

/// Format a byte count using binary units.
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Format a bandwidth figure given in bytes per second.
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}
