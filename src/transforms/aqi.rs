//! US EPA air quality index buckets.

use crate::sinks::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AqiLevel {
    Good,
    Moderate,
    UnhealthyForSensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiLevel {
    pub fn from_index(aqi: u32) -> Self {
        match aqi {
            0..=50 => AqiLevel::Good,
            51..=100 => AqiLevel::Moderate,
            101..=150 => AqiLevel::UnhealthyForSensitive,
            151..=200 => AqiLevel::Unhealthy,
            201..=300 => AqiLevel::VeryUnhealthy,
            _ => AqiLevel::Hazardous,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AqiLevel::Good => "Good",
            AqiLevel::Moderate => "Moderate",
            AqiLevel::UnhealthyForSensitive => "Unhealthy for Sensitive Groups",
            AqiLevel::Unhealthy => "Unhealthy",
            AqiLevel::VeryUnhealthy => "Very Unhealthy",
            AqiLevel::Hazardous => "Hazardous",
        }
    }

    pub fn color(self) -> Color {
        match self {
            AqiLevel::Good => Color::rgb(0x00, 0x99, 0x66),
            AqiLevel::Moderate => Color::rgb(0xff, 0xde, 0x33),
            AqiLevel::UnhealthyForSensitive => Color::rgb(0xff, 0x99, 0x33),
            AqiLevel::Unhealthy => Color::rgb(0xcc, 0x00, 0x33),
            AqiLevel::VeryUnhealthy => Color::rgb(0x66, 0x00, 0x99),
            AqiLevel::Hazardous => Color::rgb(0x7e, 0x00, 0x23),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bucket_boundaries() {
        let cases = [
            (0, AqiLevel::Good),
            (50, AqiLevel::Good),
            (51, AqiLevel::Moderate),
            (100, AqiLevel::Moderate),
            (101, AqiLevel::UnhealthyForSensitive),
            (151, AqiLevel::Unhealthy),
            (201, AqiLevel::VeryUnhealthy),
            (300, AqiLevel::VeryUnhealthy),
            (301, AqiLevel::Hazardous),
            (999, AqiLevel::Hazardous),
        ];
        for (aqi, level) in cases {
            assert_eq!(AqiLevel::from_index(aqi), level, "aqi {aqi}");
        }
    }

    #[test]
    fn each_level_has_distinct_color() {
        let levels = [
            AqiLevel::Good,
            AqiLevel::Moderate,
            AqiLevel::UnhealthyForSensitive,
            AqiLevel::Unhealthy,
            AqiLevel::VeryUnhealthy,
            AqiLevel::Hazardous,
        ];
        for (i, a) in levels.iter().enumerate() {
            for b in &levels[i + 1..] {
                assert_ne!(a.color(), b.color());
            }
        }
    }
}
