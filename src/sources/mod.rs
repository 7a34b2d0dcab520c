//! Source adapters: where package readings come from.
//!
//! - [`http`] polls third-party JSON APIs.
//! - [`stream`] opens persistent TCP/serial streams, framed by [`codec`].
//! - [`usb`] maps a USB serial adapter to its tty.
//! - [`vapix`] subscribes to camera events.
//!
//! USB HID thermometers live in [`crate::drivers`].

pub mod codec;
pub mod http;
pub mod stream;
pub mod usb;
pub mod vapix;

pub use codec::{LineCodec, StxLfCodec};
pub use http::HttpSource;
pub use stream::{ByteStream, Frames, StreamEndpoint};
pub use vapix::{VapixEvent, VapixEvents};
