//! External collaborator clients.
//!
//! One thin client per capability, each behind a trait so stage adapters
//! can be tested with stubs. Every HTTP client here goes through the
//! resilient caller; none of them owns retry or timeout logic of its own.
//! The media muxer is the exception to the HTTP rule: it drives ffmpeg as a
//! cancellable child process.

mod align;
mod download;
mod muxer;
mod stock;
mod text_gen;
mod trends;
mod tts;
mod upload;

pub use align::{build_srt, CaptionAligner, HttpCaptionAligner};
pub use download::FileDownloader;
pub use muxer::{FfmpegMuxer, MediaMuxer, MuxSpec};
pub use stock::{filter_candidates, ClipCandidate, ClipSearch, HttpClipSearch};
pub use text_gen::{HttpTextGenerator, MetadataDraft, TextGenerator};
pub use trends::{HttpTrendSource, TrendPost, TrendSource};
pub use tts::{HttpSpeechSynthesizer, SpeechSynthesizer, SynthesizedSpeech};
pub use upload::{HttpVideoPublisher, PublicationReceipt, UploadRequest, VideoPublisher};

use serde::{Deserialize, Serialize};

/// One word with its position in the narration audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
}
