const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Formats a byte count with one decimal in the largest binary unit that
/// keeps the value at or above one.
pub fn format_human_readable_size(size: u64) -> String {
    let mut value = size as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{size} B");
    }

    format!("{value:.1} {}", UNITS[unit])
}

/// Kilobyte counts as reported by domain statistics.
pub fn format_kb(kb: u64) -> String {
    format_human_readable_size(kb.saturating_mul(1024))
}
