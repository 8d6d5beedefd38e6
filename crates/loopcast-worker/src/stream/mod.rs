//! Live streaming: continuous encode, live audio and health.

mod audio_pipe;
mod audio_source;
mod health;
mod session;

pub use audio_pipe::{audio_pipe, AudioPipeDrain, AudioPipeWriter, PipeCounters, FADE_IN_SECS};
pub use audio_source::{decode_f32le, AudioPump, AudioSource, DecodedFileSource, PUMP_BLOCK};
pub use health::StreamHealth;
pub use session::StreamSession;
