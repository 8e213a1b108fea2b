//! Fixed-budget text formatters used by the status line columns.

const MAX_DECIMALS: usize = 2;

const SIZE_PREFIXES: [&str; 8] = ["", "k", "M", "G", "T", "P", "E", "Z"];

const TIME_UNITS: [(&str, u64); 6] = [
    ("sec", 60),
    ("min", 60),
    ("hr", 24),
    ("day", 30),
    ("mon", 12),
    ("yr", 0),
];

/// Formats `value` right-aligned in `width` columns, spending whatever room
/// the integer part leaves on up to two decimals.
///
/// ```
/// use request_flow::format::format_auto_float;
///
/// assert_eq!(format_auto_float(1234.56, 4), "1235");
/// assert_eq!(format_auto_float(123.56, 4), " 124");
/// assert_eq!(format_auto_float(12.56, 4), "12.6");
/// assert_eq!(format_auto_float(1.56, 4), "1.56");
/// ```
pub fn format_auto_float(value: f64, width: usize) -> String {
    let integer_len = (value.trunc() as i64).to_string().len();
    let decimals_and_point = (MAX_DECIMALS + 1).min(width.saturating_sub(integer_len));
    // a dot without decimals makes no sense
    let decimals = if decimals_and_point >= 2 {
        decimals_and_point - 1
    } else {
        0
    };
    format!("{value:>width$.decimals$}")
}

/// Human-readable byte count with 1024-based units, at most 8 characters
/// for every realistic value.
pub fn format_size(bytes: u64) -> String {
    let mut num = bytes as f64;
    for (index, prefix) in SIZE_PREFIXES.iter().enumerate() {
        if num >= 1024.0 {
            num /= 1024.0;
            continue;
        }
        let number = if index == 0 {
            bytes.to_string()
        } else {
            format_auto_float(num, 5).trim_start().to_owned()
        };
        return format!("{number} {prefix}b");
    }
    format!("{num}b")
}

/// Coarse human-readable duration, at most 6 characters for reasonable
/// inputs: `13 sec`, `17 min`, `5h 23m`, `11 hr`, `23 day`, `3m 21d`.
///
/// Ridiculously large inputs fall back to exponent notation.
pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let mut num = seconds;
    let mut prev_frac = String::new();

    for (name, in_next) in TIME_UNITS {
        if num < 1.0 {
            return format!("<1 {name}");
        }
        if in_next == 0 {
            break;
        }
        let abbrev = &name[..1];
        if num < 10.0 && (name == "hr" || name == "mon") {
            return format!("{num:.0}{abbrev} {prev_frac}").trim_end().to_owned();
        }
        let ratio = in_next as f64;
        if num < ratio {
            return format!("{num:.0} {name}");
        }
        let next = (num / ratio).floor();
        prev_frac = format!("{}{abbrev}", (num - next * ratio).floor() as u64);
        num = next;
    }

    format!("{seconds:.0e}")
}
