//! Byte-size strings.
//!
//! Quota values arrive as quantity strings such as `16Gi`, `4G`, `1.5GiB` or
//! a bare `1073741824`. Binary suffixes (`Ki`, `Mi`, `Gi`, `Ti`) scale by
//! powers of 1024, decimal suffixes (`K`, `M`, `G`, `T`) by powers of 1000.
//! Suffixes are matched case-insensitively by prefix, so `GiB` and `Gi` are
//! the same unit and an unrecognized tail is treated as plain bytes. The
//! number itself may carry a decimal exponent (`16e9`, `1.5e9`), as
//! Kubernetes quantities in `DecimalExponent` form do.

use crate::error::ConfigError;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

const KB: u64 = 1000;
const MB: u64 = 1000 * KB;
const GB: u64 = 1000 * MB;
const TB: u64 = 1000 * GB;

// Longest prefix first: "gi" must win over "g".
const SUFFIXES: [(&str, u64); 8] = [
    ("ti", TIB),
    ("t", TB),
    ("gi", GIB),
    ("g", GB),
    ("mi", MIB),
    ("m", MB),
    ("ki", KIB),
    ("k", KB),
];

/// Parse a size string, returning 0 when it has no leading number.
///
/// A zero quota denies every allocation, so callers that need to tell
/// "garbage" apart from an explicit `0` should use [`try_parse_size`].
#[must_use]
pub fn parse_size(raw: &str) -> u64 {
    try_parse_size(raw).unwrap_or(0)
}

/// Parse a size string into bytes.
///
/// Leading whitespace is skipped, an optional `+` is accepted, and whitespace
/// may separate the number from its unit. Results beyond `u64::MAX` saturate.
pub fn try_parse_size(raw: &str) -> Result<u64, ConfigError> {
    let s = raw.trim_start();
    if s.is_empty() {
        return Err(ConfigError::Empty);
    }
    if s.starts_with('-') {
        return Err(ConfigError::Negative(raw.to_owned()));
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    let numeral = numeric_prefix(s);
    if numeral.int == 0 && numeral.frac == 0 {
        return Err(ConfigError::NotANumber(raw.to_owned()));
    }

    let (number, rest) = s.split_at(numeral.len());
    let multiplier = suffix_multiplier(rest.trim_start());

    if numeral.is_integer() {
        // Integer path keeps exact results for large binary quantities.
        // A dangling '.' ("5.Gi") is not part of the digits.
        return Ok(match number[..numeral.int].parse::<u64>() {
            Ok(value) => value.saturating_mul(multiplier),
            Err(_) => u64::MAX,
        });
    }

    let value: f64 = number
        .parse()
        .map_err(|_| ConfigError::NotANumber(raw.to_owned()))?;
    // `as` saturates for out-of-range floats.
    Ok((value * multiplier as f64) as u64)
}

/// Byte lengths of the parts of a leading decimal numeral:
/// `digits [ '.' digits ] [ ('e' | 'E') [sign] digits ]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Numeral {
    int: usize,
    dot: usize,
    frac: usize,
    exp: usize,
}

impl Numeral {
    fn len(self) -> usize {
        self.int + self.dot + self.frac + self.exp
    }

    fn is_integer(self) -> bool {
        self.frac == 0 && self.exp == 0
    }
}

fn numeric_prefix(s: &str) -> Numeral {
    let bytes = s.as_bytes();
    let int = count_digits(bytes);
    let dot = usize::from(bytes.get(int) == Some(&b'.'));
    let frac = if dot == 1 {
        count_digits(&bytes[int + 1..])
    } else {
        0
    };
    let mut numeral = Numeral {
        int,
        dot,
        frac,
        exp: 0,
    };
    if int + frac > 0 {
        numeral.exp = exponent_len(&bytes[numeral.len()..]);
    }
    numeral
}

/// Length of `[eE][+-]?digits` at the start of `bytes`, or 0 when the marker
/// is not followed by at least one digit.
fn exponent_len(bytes: &[u8]) -> usize {
    if !matches!(bytes.first(), Some(b'e' | b'E')) {
        return 0;
    }
    let sign = usize::from(matches!(bytes.get(1), Some(b'+' | b'-')));
    match count_digits(&bytes[1 + sign..]) {
        0 => 0,
        digits => 1 + sign + digits,
    }
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

fn suffix_multiplier(unit: &str) -> u64 {
    SUFFIXES
        .iter()
        .find(|(prefix, _)| starts_with_ignore_case(unit, prefix))
        .map_or(1, |&(_, multiplier)| multiplier)
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Render a byte count for log lines: `1.00 GiB`, `500.00 MiB`, `512 B`.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
