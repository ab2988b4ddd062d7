pub mod config;
pub mod media;
pub mod stt;
pub mod subtitle;

pub use config::{Credentials, SessionOptions};
pub use stt::{
    RaasrApi, RaasrHttpClient, SessionState, SttError, TranscriptionSession, TranscriptSegment,
};
