// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Note sound loading and caching.
//!
//! Sounds are decoded entirely into memory up front so that note on never
//! touches the disk.

use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info};

/// A sound decoded into memory. The sample data is stored in an Arc so every
/// playing instance shares one copy.
#[derive(Clone)]
pub struct LoadedSound {
    /// The sample data as f32 samples (interleaved if multi-channel).
    data: Arc<Vec<f32>>,
    /// Number of channels in the sound.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl LoadedSound {
    /// Returns the interleaved sample data.
    pub fn data(&self) -> Arc<Vec<f32>> {
        self.data.clone()
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Returns the sample rate of the audio data.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the playable duration.
    pub fn duration(&self) -> Duration {
        let frames = self.data.len() as f64 / self.channel_count.max(1) as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Loads and caches note sounds.
pub struct Loader {
    /// Cache of loaded sounds by file path.
    cache: HashMap<PathBuf, LoadedSound>,
    /// Target sample rate for transcoding (matches the audio output).
    target_sample_rate: u32,
}

impl Loader {
    /// Creates a new loader targeting the given sample rate.
    pub fn new(target_sample_rate: u32) -> Loader {
        Loader {
            cache: HashMap::new(),
            target_sample_rate,
        }
    }

    /// Loads a sound from a file into memory. Returns a cached version if
    /// already loaded.
    pub fn load(&mut self, path: &Path) -> Result<LoadedSound, Box<dyn Error + Send + Sync>> {
        if let Some(sound) = self.cache.get(path) {
            debug!(path = ?path, "Using cached sound");
            return Ok(sound.clone());
        }

        let (samples, channel_count, sample_rate) = decode_file(path)?;

        let (samples, sample_rate) = if sample_rate != self.target_sample_rate {
            info!(
                source_rate = sample_rate,
                target_rate = self.target_sample_rate,
                "Transcoding sound"
            );
            (
                transcode_samples(&samples, channel_count, sample_rate, self.target_sample_rate),
                self.target_sample_rate,
            )
        } else {
            (samples, sample_rate)
        };

        let loaded = LoadedSound {
            data: Arc::new(samples),
            channel_count,
            sample_rate,
        };

        info!(
            path = ?path,
            channels = channel_count,
            sample_rate,
            duration_ms = loaded.duration().as_millis(),
            memory_kb = loaded.memory_size() / 1024,
            "Sound loaded"
        );

        self.cache.insert(path.to_path_buf(), loaded.clone());
        Ok(loaded)
    }

    /// Returns the total memory used by cached sounds.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.values().map(|s| s.memory_size()).sum()
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("cached_sounds", &self.cache.len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

/// Decodes the entire file into interleaved f32 samples. Returns the samples,
/// channel count and sample rate.
fn decode_file(path: &Path) -> Result<(Vec<f32>, u16, u32), Box<dyn Error + Send + Sync>> {
    // Include the path in the error so the user sees which file failed.
    let file =
        File::open(path).map_err(|e| format!("unable to open {}: {}", path.display(), e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(|e| format!("'{}': {}", path.display(), e))?;

    let mut format_reader = probed.format;
    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| format!("'{}': no audio track found", path.display()))?;

    let track_id = track.id;
    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| format!("'{}': sample rate not specified", path.display()))?;
    let mut channel_count = params.channels.map(|c| c.count() as u16).unwrap_or(0);

    let decoder_opts: DecoderOptions = Default::default();
    let mut decoder = get_codecs()
        .make(params, &decoder_opts)
        .map_err(|e| format!("'{}': {}", path.display(), e))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                // End of file.
                break;
            }
            Err(SymphoniaError::DecodeError(_)) => {
                // Some decoders return DecodeError at EOF instead of IoError.
                break;
            }
            Err(e) => return Err(format!("'{}': {}", path.display(), e).into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => return Err(format!("'{}': {}", path.display(), e).into()),
        };
        if channel_count == 0 {
            // Container metadata was missing; derive it from the first
            // decoded buffer.
            channel_count = decoded.spec().channels.count() as u16;
        }

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if channel_count == 0 {
        return Err(format!("'{}': channels not specified", path.display()).into());
    }

    Ok((samples, channel_count, sample_rate))
}

/// Transcodes samples from one sample rate to another using linear
/// interpolation, which is sufficient for short one-shot note sounds.
fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channel_count.max(1) as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let idx0 = source_frame * channels + channel;
            let idx1 = (source_frame + 1) * channels + channel;

            let s0 = samples.get(idx0).copied().unwrap_or(0.0);
            let s1 = samples.get(idx1).copied().unwrap_or(s0);

            output.push(s0 + (s1 - s0) * frac);
        }
    }

    output
}

#[cfg(test)]
mod test {
    use std::f32::consts::PI;

    use super::*;

    fn write_test_wav(
        path: &Path,
        sample_rate: u32,
        frames: usize,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for i in 0..frames {
            let sample = (2.0 * PI * 440.0 * i as f32 / sample_rate as f32).sin();
            writer.write_sample((sample * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }

    #[test]
    fn load_wav() -> Result<(), Box<dyn Error + Send + Sync>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("note.wav");
        write_test_wav(&path, 44100, 4410)?;

        let mut loader = Loader::new(44100);
        let loaded = loader.load(&path)?;

        assert_eq!(1, loaded.channel_count());
        assert_eq!(44100, loaded.sample_rate());
        assert_eq!(4410, loaded.data().len());
        assert_eq!(100, loaded.duration().as_millis());
        Ok(())
    }

    #[test]
    fn load_transcodes_to_target_rate() -> Result<(), Box<dyn Error + Send + Sync>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("note.wav");
        write_test_wav(&path, 22050, 2205)?;

        let mut loader = Loader::new(44100);
        let loaded = loader.load(&path)?;

        assert_eq!(44100, loaded.sample_rate());
        assert_eq!(4410, loaded.data().len());
        Ok(())
    }

    #[test]
    fn load_caches_by_path() -> Result<(), Box<dyn Error + Send + Sync>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("note.wav");
        write_test_wav(&path, 44100, 512)?;

        let mut loader = Loader::new(44100);
        let first = loader.load(&path)?;
        let second = loader.load(&path)?;

        assert!(Arc::ptr_eq(&first.data(), &second.data()));
        assert_eq!(first.memory_size(), loader.total_memory_usage());
        Ok(())
    }

    #[test]
    fn load_missing_file_fails() {
        let mut loader = Loader::new(44100);
        assert!(loader.load(Path::new("does/not/exist.wav")).is_err());
    }

    #[test]
    fn transcode_stereo_preserves_channels() {
        let samples = vec![1.0f32, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];

        let result = transcode_samples(&samples, 2, 22050, 44100);

        assert_eq!(16, result.len());
        assert!((result[0] - 1.0).abs() < 0.01);
        assert!((result[1] - (-1.0)).abs() < 0.01);
    }
}
