//! Weight frames sent by serial/TCP scales.
//!
//! Frames look like `"   12.34 kg"`, `"ST,GS,+00012.34kg"` or the SICS form
//! `"S S     100.00 g"`. Only the last comma-separated segment carries the
//! weight, and within it the last numeric token.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleReading {
    pub weight: String,
    pub unit: String,
}

pub fn parse_frame(frame: &str) -> Option<ScaleReading> {
    let segment = frame.rsplit(',').next()?;
    let tokens: Vec<&str> = segment.split_whitespace().collect();

    let (index, number_len) = tokens
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, token)| numeric_prefix(token).map(|len| (i, len)))?;
    let token = tokens[index];

    // a sign padded away from its digits, as in "+   12.34"
    let sign = match index.checked_sub(1).map(|i| tokens[i]) {
        Some(sign @ ("+" | "-")) if !token.starts_with(['+', '-']) => sign,
        _ => "",
    };
    let weight = normalize_number(&format!("{sign}{}", &token[..number_len]))?;

    let unit: Vec<&str> = std::iter::once(&token[number_len..])
        .chain(tokens[index + 1..].iter().copied())
        .filter(|part| !part.is_empty())
        .collect();
    Some(ScaleReading {
        weight,
        unit: unit.join(" "),
    })
}

/// Byte length of the leading `[+-]digits.digits` run, if it holds a digit.
fn numeric_prefix(token: &str) -> Option<usize> {
    let len = token
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && matches!(c, '+' | '-')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    token[..len].bytes().any(|b| b.is_ascii_digit()).then_some(len)
}

fn normalize_number(raw: &str) -> Option<String> {
    let (negative, digits) = match raw.as_bytes().first()? {
        b'+' => (false, &raw[1..]),
        b'-' => (true, &raw[1..]),
        _ => (false, raw),
    };
    if !digits.bytes().any(|b| b.is_ascii_digit()) || digits.matches('.').count() > 1 {
        return None;
    }

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let int_part = match int_part.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };

    let mut out = String::with_capacity(raw.len());
    if negative {
        out.push('-');
    }
    out.push_str(int_part);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    Some(out)
}
