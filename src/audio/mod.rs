pub mod backend;
pub mod capture;
pub mod codec;
pub mod convert;
pub mod devices;
pub mod file;
pub mod output;
pub mod playback;
pub mod timeline;

#[cfg(feature = "device")]
pub mod device;

pub use backend::{
    AudioDeviceError, AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConfig,
    CaptureSource,
};
pub use capture::{Capture, CapturedFrame, Framer, DEFAULT_FRAME_SIZE};
pub use codec::{
    decode_chunk, decode_frame, encode_frame, DecodeError, EncodedAudioChunk, PlaybackChunk,
    INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use devices::{AudioDevices, DefaultAudioDevices};
pub use file::{AudioFile, FileCaptureBackend};
pub use output::{OutputTarget, RenderedOutput};
pub use playback::{PlaybackOutput, PlaybackScheduler, ScheduledSource, SourceId};
pub use timeline::Timeline;
