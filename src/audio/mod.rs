//! # Audio Module
//!
//! Per-guild playback pipeline.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - FIFO of pending tracks plus current/playing/paused/skip state per guild
//! - Every mutation happens under a single lock
//!
//! ### [`pipeline`] - Media Pipeline
//! - Extractor (`yt-dlp`) piped into transcoder (`ffmpeg`)
//! - Raw PCM s16le, 48kHz stereo on the transcoder's stdout
//!
//! ### [`stream`] - Audio Stream
//! - One 20ms frame per tick: read, scale by volume, encode, send
//! - Pause, resume, stop and crash detection
//!
//! ### [`player`] - Playback Orchestrator
//! - Ties queue, voice sessions and streams together
//! - Advances to the next track whenever a stream ends
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz
//! - **Bit Depth**: 16-bit signed integers, little endian
//! - **Channels**: Stereo (2 channels)
//! - **Frame**: 960 samples per channel, 3840 bytes
//! - **Encoding**: Opus at 128kbps (configurable)

pub mod encoder;
pub mod pcm;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod stream;
pub mod track;
