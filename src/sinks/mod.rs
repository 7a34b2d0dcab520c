//! Overlay and event sinks on the camera side.
//!
//! The traits are the seam between package loops and the camera services;
//! loops only ever talk to `dyn OverlaySink` / `dyn EventSink`, so tests swap
//! in recording fakes.

pub mod camoverlay;
pub mod camscripter;
pub mod publisher;
pub mod visibility;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use camoverlay::CamOverlayClient;
pub use camscripter::CamScripterEvents;
pub use publisher::{FieldPublisher, PublishOutcome};
pub use visibility::VisibilityTimers;

/// RGB text color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}

/// One named text field of an overlay service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayField {
    pub field: String,
    pub text: String,
    pub color: Option<Color>,
}

impl DisplayField {
    pub fn new(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            text: text.into(),
            color: None,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }
}

/// Custom camera event announced before it is first sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDeclaration {
    pub id: String,
    pub label: String,
}

impl EventDeclaration {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
        }
    }
}

/// Text overlay service on the camera.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OverlaySink: Send + Sync {
    async fn set_enabled(&self, service_id: u32, enabled: bool) -> Result<()>;

    async fn is_enabled(&self, service_id: u32) -> Result<bool>;

    async fn update_text(&self, service_id: u32, fields: &[DisplayField]) -> Result<()>;
}

/// Camera event generator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn declare_event(&self, declaration: &EventDeclaration) -> Result<()>;

    async fn send_event(&self, declaration_id: &str, active: bool) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn color_renders_as_triplet() {
        assert_eq!(Color::rgb(255, 0, 16).to_string(), "255,0,16");
    }

    #[test]
    fn field_builder() {
        let field = DisplayField::new("level", "Good").with_color(Color::rgb(0, 153, 102));
        assert_eq!(field.field, "level");
        assert_eq!(field.color, Some(Color::rgb(0, 153, 102)));
    }
}
