//! Event-driven communication between package tasks and the coordinator.

use anyhow::Result;
use tokio::sync::broadcast;

/// Application events.
///
/// Package tasks report what they did; the coordinator reacts to
/// lifecycle events (`SettingsChanged`, `Fatal`, `SystemShutdown`).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A package pushed new text to an overlay service.
    ReadingPublished { service_id: u32, summary: String },
    /// A threshold condition crossed an edge.
    ConditionChanged { name: String, active: bool },
    /// The settings file changed on disk.
    SettingsChanged,
    /// A package task hit an unrecoverable error.
    Fatal(String),
    SystemShutdown,
}

impl Event {
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Event::SettingsChanged | Event::Fatal(_) | Event::SystemShutdown
        )
    }
}

/// Event bus for publish-subscribe messaging between services.
///
/// # Example
///
/// ```no_run
/// use camlinkd::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::SettingsChanged).unwrap();
///
/// // In async context, receive events:
/// // let event = subscriber.recv().await;
/// ```
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new EventBus with default capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Each subscriber receives all events published after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
