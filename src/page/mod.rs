//! Page agent
//!
//! The overlay logic injected into a page: a pure state machine
//! ([`overlay`]) and the agent that connects it to the relay worker
//! ([`agent`]).

pub mod agent;
pub mod overlay;

pub use agent::{PageAgent, RecordingRenderer, Renderer, PORT_PREFIX};
pub use overlay::{Overlay, OverlayCommand, OverlayEvent, OverlayState, Phase, Popup};
