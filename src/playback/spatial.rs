//! Decoding and spatial rendering of response audio

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};
use std::io::Cursor;

use crate::error::{Result, VoiceError};

/// Average head radius in metres, for interaural delay
const HEAD_RADIUS: f32 = 0.0875;

/// Speed of sound in m/s
const SPEED_OF_SOUND: f32 = 343.0;

/// Mono PCM ready for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Fixed placement of the reply voice in the sound field.
///
/// Panning approximates an HRTF with equal-power level differences plus a
/// Woodworth interaural time delay. Distance attenuation follows the
/// inverse model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialProfile {
    pub ref_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
    /// Cone angles in degrees; 360/360 is omnidirectional
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
    /// Source position relative to a listener facing -z
    pub position: [f32; 3],
}

impl Default for SpatialProfile {
    fn default() -> Self {
        Self {
            ref_distance: 1.0,
            max_distance: 100.0,
            rolloff_factor: 1.0,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_gain: 0.0,
            position: [0.0, 0.0, -1.0],
        }
    }
}

impl SpatialProfile {
    /// Inverse distance gain, distance clamped to [ref, max]
    pub fn distance_gain(&self, distance: f32) -> f32 {
        let d = distance.clamp(self.ref_distance, self.max_distance);
        self.ref_distance / (self.ref_distance + self.rolloff_factor * (d - self.ref_distance))
    }

    /// Gain for a listener `angle` degrees off the source axis
    pub fn cone_gain(&self, angle: f32) -> f32 {
        let inner = self.cone_inner_angle / 2.0;
        let outer = self.cone_outer_angle / 2.0;
        let angle = angle.abs();

        if angle <= inner {
            1.0
        } else if angle >= outer {
            self.cone_outer_gain
        } else {
            let x = (angle - inner) / (outer - inner);
            1.0 + x * (self.cone_outer_gain - 1.0)
        }
    }
}

/// Decode WAV or MP3 bytes into mono samples
pub fn decode(bytes: &[u8]) -> Result<DecodedAudio> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| VoiceError::DecodeFailed(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| VoiceError::DecodeFailed(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| VoiceError::DecodeFailed(e.to_string()))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(VoiceError::DecodeFailed(format!("mp3: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(VoiceError::DecodeFailed("no audio frames".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Average interleaved channels down to mono
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Render mono audio to stereo frames placed per `profile`
pub fn spatialize(audio: &DecodedAudio, profile: &SpatialProfile) -> Vec<[f32; 2]> {
    let [x, y, z] = profile.position;
    let distance = (x * x + y * y + z * z).sqrt();

    // The source faces the listener, so the listener sits on its axis
    let gain = profile.distance_gain(distance) * profile.cone_gain(0.0);

    // 0 straight ahead, positive to the right
    let azimuth = x.atan2(-z);
    let pan = azimuth.sin().clamp(-1.0, 1.0);
    let pan_angle = (pan + 1.0) * FRAC_PI_4;
    let left_gain = pan_angle.cos() * gain;
    let right_gain = pan_angle.sin() * gain;

    let lateral = azimuth.abs().min(FRAC_PI_2);
    let itd = HEAD_RADIUS / SPEED_OF_SOUND * (lateral + lateral.sin());
    let delay = (itd * audio.sample_rate as f32).round() as usize;

    // The far ear hears the source late
    let (left_delay, right_delay) = if pan > 0.0 {
        (delay, 0)
    } else if pan < 0.0 {
        (0, delay)
    } else {
        (0, 0)
    };

    let sample_at = |i: usize, offset: usize| -> f32 {
        i.checked_sub(offset)
            .and_then(|j| audio.samples.get(j))
            .copied()
            .unwrap_or(0.0)
    };

    let len = audio.samples.len() + left_delay.max(right_delay);
    (0..len)
        .map(|i| {
            [
                sample_at(i, left_delay) * left_gain,
                sample_at(i, right_delay) * right_gain,
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::samples_to_wav;

    fn ramp() -> DecodedAudio {
        DecodedAudio {
            samples: vec![0.1, 0.2, 0.3, 0.4],
            sample_rate: 48000,
        }
    }

    #[test]
    fn test_inverse_distance_gain() {
        let profile = SpatialProfile::default();
        assert_eq!(profile.distance_gain(1.0), 1.0);
        assert_eq!(profile.distance_gain(0.2), 1.0);
        assert!((profile.distance_gain(2.0) - 0.5).abs() < 1e-6);
        assert!((profile.distance_gain(1000.0) - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_omnidirectional_cone() {
        let profile = SpatialProfile::default();
        assert_eq!(profile.cone_gain(0.0), 1.0);
        assert_eq!(profile.cone_gain(179.0), 1.0);

        let narrow = SpatialProfile {
            cone_inner_angle: 60.0,
            cone_outer_angle: 120.0,
            ..SpatialProfile::default()
        };
        assert_eq!(narrow.cone_gain(90.0), 0.0);
        assert!((narrow.cone_gain(45.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_front_source_is_centered() {
        let frames = spatialize(&ramp(), &SpatialProfile::default());

        assert_eq!(frames.len(), 4);
        for (frame, sample) in frames.iter().zip(ramp().samples) {
            assert!((frame[0] - frame[1]).abs() < 1e-6);
            assert!((frame[0] - sample * FRAC_PI_4.cos()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_right_source_delays_left_ear() {
        let profile = SpatialProfile {
            position: [1.0, 0.0, 0.0],
            ..SpatialProfile::default()
        };
        let frames = spatialize(&ramp(), &profile);

        assert!(frames.len() > 4);
        assert!(frames[0][0].abs() < 1e-6);
        assert!(frames[0][1] > 0.09);
    }

    #[test]
    fn test_decode_wav() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], 16000).unwrap();
        let audio = decode(&wav).unwrap();

        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.samples.len(), 3);
        assert!((audio.samples[1] - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode(b"definitely not audio");
        assert!(matches!(result, Err(VoiceError::DecodeFailed(_))));
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.2, 0.4, 1.0, 0.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
    }
}
