//! # Echobeats Beats
//!
//! Cognitive beats on top of the persistent scheduler.
//!
//! [`EchobeatsScheduler`] registers an executor for each [`BeatKind`] and
//! forwards beats to an optional [`CognitiveLoop`].

pub mod beat;
pub mod config;
pub mod scheduler;

pub use beat::BeatKind;
pub use config::{BeatSettings, BeatsConfig};
pub use scheduler::{CognitiveLoop, EchobeatsScheduler};
