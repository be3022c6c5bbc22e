//! Response playback module
//!
//! Replies are played through a spatial path first (decode, position,
//! render on the shared output) and fall back to a plain player that is
//! handed the URL directly.

mod engine;
mod fallback;
mod output;
mod spatial;

pub use engine::PlaybackEngine;
pub use fallback::CommandPlayer;
pub use output::{AudioOutput, CpalOutput};
#[cfg(test)]
pub use fallback::FallbackPlayer;
#[cfg(test)]
pub use output::OutputState;
