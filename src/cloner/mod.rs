//! Turning donor messages into target posts.

mod media;
mod pipeline;

pub use media::{MediaError, MediaStore, TempFiles};
pub use pipeline::{CloneError, CloneOutcome, ClonePipeline, SkipReason};
