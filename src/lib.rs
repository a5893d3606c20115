pub mod audio;
pub mod config;
pub mod http;
pub mod realtime;
pub mod session;

pub use audio::{
    AudioDeviceError, AudioDevices, AudioFile, AudioFrame, CaptureBackend, CaptureBackendFactory,
    CaptureConfig, CaptureSource, DefaultAudioDevices, EncodedAudioChunk, OutputTarget,
    PlaybackChunk, PlaybackOutput, PlaybackScheduler,
};
pub use config::Config;
pub use http::{create_router, AppState};
pub use realtime::{GeminiLiveTransport, RealtimeError, RealtimeTransport, ServerEvent};
pub use session::{
    ConnectionState, RoleConfig, SessionController, SessionError, SessionSettings, SessionStats,
    SessionStatus, TranscriptEntry,
};
