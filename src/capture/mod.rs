//! Microphone capture module
//!
//! A capture session owns the microphone for one bounded recording and
//! always releases it when the session ends, however it ends.

mod device;
mod session;

pub use device::CpalMicrophone;
#[cfg(test)]
pub use device::{samples_to_wav, SAMPLE_RATE};
pub use session::{AudioBlob, AudioCaptureSession, InputTrack, Microphone};
