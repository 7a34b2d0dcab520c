//! Minimal NMEA 0183 parsing for position fixes.

use crate::transforms::geo::Position;

#[derive(Debug, Clone, PartialEq)]
pub enum NmeaError {
    NotASentence,
    BadChecksum { expected: u8, actual: u8 },
    Unsupported(String),
    NoFix,
    Malformed(&'static str),
}

impl std::fmt::Display for NmeaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NmeaError::NotASentence => write!(f, "not an NMEA sentence"),
            NmeaError::BadChecksum { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected:02X}, got {actual:02X}")
            }
            NmeaError::Unsupported(kind) => write!(f, "unsupported sentence {kind}"),
            NmeaError::NoFix => write!(f, "no fix"),
            NmeaError::Malformed(field) => write!(f, "malformed field: {field}"),
        }
    }
}

impl std::error::Error for NmeaError {}

/// Parses a `$xxGGA` or `$xxRMC` sentence into a position.
pub fn parse_sentence(line: &str) -> Result<Position, NmeaError> {
    let line = line.trim();
    let body = line.strip_prefix('$').ok_or(NmeaError::NotASentence)?;

    let body = match body.split_once('*') {
        Some((data, checksum)) => {
            let expected = u8::from_str_radix(checksum.trim(), 16)
                .map_err(|_| NmeaError::Malformed("checksum"))?;
            let actual = data.bytes().fold(0u8, |acc, b| acc ^ b);
            if expected != actual {
                return Err(NmeaError::BadChecksum { expected, actual });
            }
            data
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let kind = fields[0];
    if kind.chars().count() < 5 {
        return Err(NmeaError::Unsupported(kind.to_string()));
    }

    match kind.get(kind.len() - 3..) {
        Some("GGA") => {
            // $GPGGA,time,lat,N,lon,E,quality,...
            let quality = fields.get(6).copied().unwrap_or("");
            if quality.is_empty() || quality == "0" {
                return Err(NmeaError::NoFix);
            }
            position_from(&fields, 2)
        }
        Some("RMC") => {
            // $GPRMC,time,status,lat,N,lon,E,...
            if fields.get(2).copied() != Some("A") {
                return Err(NmeaError::NoFix);
            }
            position_from(&fields, 3)
        }
        _ => Err(NmeaError::Unsupported(kind.to_string())),
    }
}

fn position_from(fields: &[&str], start: usize) -> Result<Position, NmeaError> {
    let field = |i: usize| fields.get(start + i).copied().unwrap_or("");
    let lat = to_decimal(field(0), field(1), 2).ok_or(NmeaError::Malformed("latitude"))?;
    let lon = to_decimal(field(2), field(3), 3).ok_or(NmeaError::Malformed("longitude"))?;
    Ok(Position::new(lat, lon))
}

/// Converts `ddmm.mmmm` (or `dddmm.mmmm`) plus hemisphere to signed degrees.
pub fn to_decimal(value: &str, hemisphere: &str, degree_digits: usize) -> Option<f64> {
    if value.len() <= degree_digits {
        return None;
    }
    let degrees: f64 = value.get(..degree_digits)?.parse().ok()?;
    let minutes: f64 = value.get(degree_digits..)?.parse().ok()?;
    if minutes >= 60.0 {
        return None;
    }
    let magnitude = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Some(magnitude),
        "S" | "W" => Some(-magnitude),
        _ => None,
    }
}
