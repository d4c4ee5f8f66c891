//! WebSocket event routing.

mod handler;
mod hub;

pub use handler::ws_handler;
pub use hub::{EventHub, EventSink};
