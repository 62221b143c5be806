//! Outbound media: resolve the payload, type it, probe audio length, upload
//! and send.

pub mod error;
pub mod mime;
pub mod pipeline;
pub mod probe;
pub mod source;

pub use {
    error::{Error, Result},
    pipeline::MediaPipeline,
    probe::{DurationProbe, round_seconds},
    source::{MediaFetcher, decode_inline},
};
