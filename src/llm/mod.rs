//! Access to the external generation/embedding capability.

pub mod client;
pub mod clock;
pub mod gateway;

pub use client::{
    Embedder, Generator, HttpLlmClient, PacedEmbedder, PacedGenerator, SharedEmbedder,
    SharedGenerator,
};
pub use clock::{Clock, ManualClock, TokioClock};
pub use gateway::{CallState, Gateway};
