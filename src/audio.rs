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
use std::{error::Error, sync::Arc};

use crate::config;
use crate::sampler::NOTE_COUNT;

pub mod cpal;
pub mod loader;
pub mod mock;

pub use loader::{LoadedSound, Loader};

/// The sample rate used when neither the configuration nor the output device
/// dictates one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// A playable sound instance. Dropping the instance releases its playback
/// resources.
pub trait Sound: Send {
    /// Starts or resumes playback.
    fn play(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Seeks back to the beginning without interrupting playback.
    fn rewind(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Stops playback.
    fn stop(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Creates sound instances for note table entries.
pub trait Bank: Send + Sync {
    /// Creates a new sound instance for the given note table entry. Fails if
    /// the note has no configured sound.
    fn create(&self, note: usize) -> Result<Box<dyn Sound>, Box<dyn Error + Send + Sync>>;
}

/// Gets the bank described by the given configuration.
pub fn get_bank(config: &config::Sampler) -> Result<Arc<dyn Bank>, Box<dyn Error>> {
    if config.device().starts_with("mock") {
        return Ok(Arc::new(mock::Bank::new(NOTE_COUNT)));
    };

    Ok(Arc::new(cpal::Bank::get(config)?))
}
