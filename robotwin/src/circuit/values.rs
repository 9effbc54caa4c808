//! Component value parsing.
//!
//! Values arrive as loosely formatted strings such as `"4.7k"`, `"220 ohm"`,
//! `"5V"` or `"20mA"`.

/// Parse a resistance/voltage style value with an optional SI suffix.
///
/// The string is lower-cased and every `ohm`, `v`, `a` and space is stripped
/// before the suffix is read, so `"1.5 kOhm"` and `"3.3V"` both parse.
/// Supported suffixes: `k`, `m`, `u`, `n`, `meg`.
pub fn parse_value(raw: &str) -> Option<f64> {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }
    let s = s
        .replace("ohm", "")
        .replace('v', "")
        .replace('a', "")
        .replace(' ', "");

    // `meg` is checked before `m`, but after the single-letter suffixes fail
    // on its trailing `g`.
    let (number, multiplier) = if let Some(n) = s.strip_suffix("meg") {
        (n, 1e6)
    } else if let Some(n) = s.strip_suffix('k') {
        (n, 1e3)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 1e-3)
    } else if let Some(n) = s.strip_suffix('u') {
        (n, 1e-6)
    } else if let Some(n) = s.strip_suffix('n') {
        (n, 1e-9)
    } else {
        (s.as_str(), 1.0)
    };

    number.parse::<f64>().ok().map(|v| v * multiplier)
}

/// Parse a current such as `"20mA"`, `"0.5 A"` or `"0.02"`.
pub fn parse_current(raw: &str) -> Option<f64> {
    let s: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ')
        .collect();
    if s.is_empty() {
        return None;
    }
    let (number, multiplier) = if let Some(n) = s.strip_suffix("ma") {
        (n, 1e-3)
    } else if let Some(n) = s.strip_suffix('a') {
        (n, 1.0)
    } else {
        (s.as_str(), 1.0)
    };
    number.parse::<f64>().ok().map(|v| v * multiplier)
}

/// Parse a switch-style boolean. Returns `None` for unrecognised text.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "closed" | "pressed" => Some(true),
        "false" | "0" | "no" | "off" | "open" => Some(false),
        _ => None,
    }
}
