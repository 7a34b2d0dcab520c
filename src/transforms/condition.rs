//! Threshold conditions with edge detection.
//!
//! A [`ConditionTracker`] turns a stream of readings into edges. The caller
//! passes the clock in, which keeps the tracker a plain value type that can
//! live inside a loop closure and be tested without sleeping.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Comparison applied as `reading <op> configured_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Operator {
    pub fn holds(self, reading: f64, value: f64) -> bool {
        match self {
            Operator::Eq => (reading - value).abs() < f64::EPSILON,
            Operator::Lt => reading < value,
            Operator::Gt => reading > value,
            Operator::Le => reading <= value,
            Operator::Ge => reading >= value,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "=" | "==" => Ok(Operator::Eq),
            "<" => Ok(Operator::Lt),
            ">" => Ok(Operator::Gt),
            "<=" => Ok(Operator::Le),
            ">=" => Ok(Operator::Ge),
            other => Err(format!("unknown operator '{other}'")),
        }
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Transition reported by [`ConditionTracker::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionEdge {
    Activated,
    Deactivated,
    /// Still active and the repeat period elapsed.
    Repeated,
}

impl ConditionEdge {
    /// Value to report downstream for this edge.
    pub fn is_active(self) -> bool {
        !matches!(self, ConditionEdge::Deactivated)
    }
}

#[derive(Debug, Clone)]
pub struct ConditionTracker {
    operator: Operator,
    value: f64,
    delay: Duration,
    repeat_after: Option<Duration>,

    active: bool,
    pending_since: Option<Instant>,
    last_sent: Option<Instant>,
}

impl ConditionTracker {
    pub fn new(operator: Operator, value: f64) -> Self {
        Self {
            operator,
            value,
            delay: Duration::ZERO,
            repeat_after: None,
            active: false,
            pending_since: None,
            last_sent: None,
        }
    }

    /// Comparison must hold this long before the condition activates.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Re-report an active condition after this period.
    pub fn with_repeat(mut self, repeat_after: Option<Duration>) -> Self {
        self.repeat_after = repeat_after.filter(|d| !d.is_zero());
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn evaluate(&mut self, reading: f64, now: Instant) -> Option<ConditionEdge> {
        let holds = self.operator.holds(reading, self.value);

        if !holds {
            self.pending_since = None;
            if self.active {
                self.active = false;
                self.last_sent = Some(now);
                return Some(ConditionEdge::Deactivated);
            }
            return None;
        }

        if self.active {
            let due = match (self.repeat_after, self.last_sent) {
                (Some(period), Some(last)) => now.duration_since(last) >= period,
                _ => false,
            };
            if due {
                self.last_sent = Some(now);
                return Some(ConditionEdge::Repeated);
            }
            return None;
        }

        let since = *self.pending_since.get_or_insert(now);
        if now.duration_since(since) >= self.delay {
            self.active = true;
            self.pending_since = None;
            self.last_sent = Some(now);
            return Some(ConditionEdge::Activated);
        }
        None
    }
}
