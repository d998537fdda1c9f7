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
use std::{
    error::Error,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use crate::config;
use crate::sampler::NOTE_COUNT;

use super::loader::{LoadedSound, Loader};

/// A bank backed by cpal. Note sounds are decoded into memory when the bank
/// is created; each sound instance owns a dedicated output stream.
pub struct Bank {
    /// The name of the output device.
    name: String,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The stream configuration used for every sound instance.
    stream_config: cpal::StreamConfig,
    /// The preloaded sound for each note table entry, if configured.
    sounds: Vec<Option<LoadedSound>>,
}

impl Bank {
    /// Gets a bank for the configured output device, preloading every
    /// configured note sound.
    pub fn get(config: &config::Sampler) -> Result<Bank, Box<dyn Error>> {
        let device = find_device(config.device())?;
        let name = device.name()?;

        let supported = device.default_output_config()?;
        let sample_rate = config
            .sample_rate()
            .unwrap_or_else(|| supported.sample_rate());
        let stream_config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let mut loader = Loader::new(sample_rate);
        let mut sounds: Vec<Option<LoadedSound>> = (0..NOTE_COUNT).map(|_| None).collect();
        for (note, file) in config.notes().iter().enumerate() {
            if note >= NOTE_COUNT {
                return Err(format!(
                    "too many note sounds configured, the note table holds {}",
                    NOTE_COUNT
                )
                .into());
            }
            sounds[note] = Some(loader.load(Path::new(file)).map_err(|e| e as Box<dyn Error>)?);
        }

        info!(
            device = name,
            sample_rate,
            sounds = config.notes().len(),
            memory_kb = loader.total_memory_usage() / 1024,
            "Note sounds loaded"
        );

        Ok(Bank {
            name,
            device,
            stream_config,
            sounds,
        })
    }
}

impl super::Bank for Bank {
    fn create(&self, note: usize) -> Result<Box<dyn super::Sound>, Box<dyn Error + Send + Sync>> {
        let loaded = self
            .sounds
            .get(note)
            .and_then(|sound| sound.as_ref())
            .ok_or_else(|| format!("no sound configured for note {}", note))?
            .clone();

        let sound = Sound::new(self.device.clone(), self.stream_config.clone(), loaded)?;
        Ok(Box::new(sound))
    }
}

impl std::fmt::Debug for Bank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bank")
            .field("device", &self.name)
            .field(
                "sounds",
                &self.sounds.iter().filter(|s| s.is_some()).count(),
            )
            .finish()
    }
}

/// Commands handled by a sound's playback thread.
enum Command {
    Play,
    Stop,
    Shutdown,
}

/// A sound instance playing through a dedicated cpal output stream. The
/// stream lives on its own thread since cpal streams cannot move between
/// threads; the instance drives it through a command channel.
struct Sound {
    commands: mpsc::Sender<Command>,
    /// The playback position in frames, shared with the stream callback.
    position: Arc<AtomicUsize>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Sound {
    /// Creates a new sound instance. The output stream is created paused;
    /// playback starts on play.
    fn new(
        device: cpal::Device,
        stream_config: cpal::StreamConfig,
        loaded: LoadedSound,
    ) -> Result<Sound, Box<dyn Error + Send + Sync>> {
        let position = Arc::new(AtomicUsize::new(0));
        let (commands_tx, commands_rx) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let thread = {
            let position = position.clone();
            thread::spawn(move || {
                let stream = match build_stream(&device, &stream_config, loaded, position) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                loop {
                    match commands_rx.recv() {
                        Ok(Command::Play) => {
                            if let Err(e) = stream.play() {
                                error!(err = %e, "Error starting playback stream.");
                            }
                        }
                        Ok(Command::Stop) => {
                            if let Err(e) = stream.pause() {
                                error!(err = %e, "Error pausing playback stream.");
                            }
                        }
                        // Dropping the stream releases the device resource.
                        Ok(Command::Shutdown) | Err(_) => return,
                    }
                }
            })
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Sound {
                commands: commands_tx,
                position,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e.into())
            }
            Err(_) => Err("playback thread exited before reporting readiness".into()),
        }
    }
}

impl super::Sound for Sound {
    fn play(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.commands
            .send(Command::Play)
            .map_err(|_| "playback thread is gone".into())
    }

    fn rewind(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.position.store(0, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.commands
            .send(Command::Stop)
            .map_err(|_| "playback thread is gone".into())
    }
}

impl Drop for Sound {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Builds a paused output stream reading the loaded sound from the shared
/// frame position. Once the sound runs out the stream emits silence until it
/// is rewound or dropped.
fn build_stream(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    loaded: LoadedSound,
    position: Arc<AtomicUsize>,
) -> Result<cpal::Stream, String> {
    let output_channels = stream_config.channels as usize;
    let sound_channels = loaded.channel_count().max(1) as usize;
    let data = loaded.data();

    let stream = device
        .build_output_stream(
            stream_config,
            move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let before = position.load(Ordering::Acquire);
                let mut pos = before;

                for frame in out.chunks_mut(output_channels) {
                    let base = pos * sound_channels;
                    if base >= data.len() {
                        frame.fill(0.0);
                        continue;
                    }
                    for (channel, sample) in frame.iter_mut().enumerate() {
                        *sample = data
                            .get(base + (channel % sound_channels))
                            .copied()
                            .unwrap_or(0.0);
                    }
                    pos += 1;
                }

                // If a rewind happened while rendering, the rewound position
                // wins.
                let _ = position.compare_exchange(
                    before,
                    pos,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            },
            move |e| error!(err = %e, "Playback stream error."),
            None,
        )
        .map_err(|e| format!("unable to build output stream: {}", e))?;

    stream
        .pause()
        .map_err(|e| format!("unable to pause output stream: {}", e))?;

    Ok(stream)
}

/// Finds the output device with the given name, or the default output device.
fn find_device(name: &str) -> Result<cpal::Device, Box<dyn Error>> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let host = cpal::default_host();
    if name == "default" {
        return host
            .default_output_device()
            .ok_or_else(|| "no default audio output device".into());
    }

    for device in host.output_devices()? {
        if device.name()?.trim() == name {
            return Ok(device);
        }
    }

    Err(format!("no audio output device found with name {}", name).into())
}
