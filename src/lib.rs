//! Motion-triggered capture pipeline for HTTP cameras.
//!
//! A rolling buffer of recent frames is scanned for luminance changes inside
//! configured hotspot regions. A trigger freezes the buffer as pre-roll,
//! collects a fixed number of live frames on top, and writes the sequence to
//! disk as numbered PNGs or an ffmpeg-encoded video. A small HTTP API exposes
//! status, hotspot editing and a manual trigger.

pub mod api;
pub mod buffer;
pub mod config;
pub mod db;
pub mod detect;
pub mod fps;
pub mod frame;
pub mod hotspot;
pub mod pipeline;
pub mod session;
pub mod source;
pub mod store;
pub mod video;

pub use buffer::RollingFrameBuffer;
pub use config::Config;
pub use frame::Frame;
pub use hotspot::{HotSpot, HotSpotSet};
pub use pipeline::{CapturePipeline, PipelineHandle};
pub use session::CaptureSession;
