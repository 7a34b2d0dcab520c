//! Illuminance readings from lux meter frames such as `" 123.4 lx"`.

/// Extracts the first number in a frame payload. Returns `None` when the
/// payload carries no number (status or overload frames).
pub fn parse_lux(payload: &str) -> Option<f64> {
    let start = payload.find(|c: char| c.is_ascii_digit() || c == '-' || c == '+' || c == '.')?;
    let rest = &payload[start..];
    let len = rest
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    rest[..len].parse::<f64>().ok().filter(|v| v.is_finite())
}
