//! Unit conversions for display values.
//!
//! Every conversion is linear, `value * ratio + offset`, so each forward
//! conversion has an exact inverse.

use serde::{Deserialize, Serialize};

/// A linear conversion between two units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    pub ratio: f64,
    pub offset: f64,
}

impl Linear {
    pub const fn new(ratio: f64, offset: f64) -> Self {
        Self { ratio, offset }
    }

    pub fn apply(&self, value: f64) -> f64 {
        value * self.ratio + self.offset
    }

    pub fn inverse(&self) -> Self {
        Self {
            ratio: 1.0 / self.ratio,
            offset: -self.offset / self.ratio,
        }
    }
}

pub const CELSIUS_TO_FAHRENHEIT: Linear = Linear::new(9.0 / 5.0, 32.0);
pub const KMH_TO_MPH: Linear = Linear::new(0.621_371_192, 0.0);
pub const MBAR_TO_INHG: Linear = Linear::new(0.029_529_983, 0.0);
pub const MM_TO_IN: Linear = Linear::new(1.0 / 25.4, 0.0);

pub fn to_fahrenheit(celsius: f64) -> f64 {
    CELSIUS_TO_FAHRENHEIT.apply(celsius)
}

pub fn from_fahrenheit(fahrenheit: f64) -> f64 {
    CELSIUS_TO_FAHRENHEIT.inverse().apply(fahrenheit)
}

/// Measurement system selected in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl UnitSystem {
    pub fn temperature(self, celsius: f64) -> f64 {
        match self {
            UnitSystem::Metric => celsius,
            UnitSystem::Imperial => to_fahrenheit(celsius),
        }
    }

    pub fn speed(self, kmh: f64) -> f64 {
        match self {
            UnitSystem::Metric => kmh,
            UnitSystem::Imperial => KMH_TO_MPH.apply(kmh),
        }
    }

    pub fn pressure(self, mbar: f64) -> f64 {
        match self {
            UnitSystem::Metric => mbar,
            UnitSystem::Imperial => MBAR_TO_INHG.apply(mbar),
        }
    }

    pub fn temperature_suffix(self) -> &'static str {
        match self {
            UnitSystem::Metric => "°C",
            UnitSystem::Imperial => "°F",
        }
    }

    pub fn speed_suffix(self) -> &'static str {
        match self {
            UnitSystem::Metric => "km/h",
            UnitSystem::Imperial => "mph",
        }
    }

    pub fn pressure_suffix(self) -> &'static str {
        match self {
            UnitSystem::Metric => "mbar",
            UnitSystem::Imperial => "inHg",
        }
    }

    pub fn precipitation(self, mm: f64) -> f64 {
        match self {
            UnitSystem::Metric => mm,
            UnitSystem::Imperial => MM_TO_IN.apply(mm),
        }
    }

    pub fn precipitation_suffix(self) -> &'static str {
        match self {
            UnitSystem::Metric => "mm",
            UnitSystem::Imperial => "in",
        }
    }
}

/// Temperature scale for sensor packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn from_celsius(self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => to_fahrenheit(celsius),
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }
}

/// Formats with a fixed number of decimals, never printing `-0`.
pub fn format_fixed(value: f64, precision: usize) -> String {
    let text = format!("{value:.precision$}");
    if text.starts_with('-') && text[1..].chars().all(|c| c == '0' || c == '.') {
        text[1..].to_string()
    } else {
        text
    }
}
