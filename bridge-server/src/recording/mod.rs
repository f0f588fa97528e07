//! Session recording and playback.
//!
//! The recorder taps the same broadcast channel the protocol servers
//! subscribe to and appends `(offset, bytes)` frames to an NBR file. The
//! player loads those frames back and replays them through the scenario
//! engine's normal `Running` path, so connected clients cannot tell a replay
//! from a generated session.

pub mod file_format;
pub mod manager;
pub mod recorder;

pub use file_format::{NbrHeader, NbrReader, NbrWriter, RecordedFrame, SourceMode};
pub use manager::{list_recordings, recording_path, recordings_dir, RecordingInfo};
pub use recorder::{start_recording, ActiveRecording, RecordingStatus};
