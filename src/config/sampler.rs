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
use std::error::Error;

use serde::Deserialize;

use crate::sampler::{DEFAULT_BASE_PITCH, NOTE_COUNT};

const DEFAULT_DEVICE: &str = "default";

/// A YAML representation of the sampler configuration.
#[derive(Deserialize, Clone)]
pub struct Sampler {
    /// The audio files backing the note table, lowest pitch first.
    notes: Vec<String>,

    /// The audio output device to play through. A name starting with "mock"
    /// selects the mock bank.
    device: Option<String>,

    /// The pitch the first note table entry maps to.
    base_pitch: Option<u8>,

    /// Output sample rate override in Hz. Defaults to the device's rate.
    sample_rate: Option<u32>,
}

impl Sampler {
    /// Returns the note audio files from the configuration.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Returns the audio device from the configuration.
    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    /// Returns the base pitch from the configuration. The whole note table
    /// must fit within the MIDI pitch range.
    pub fn base_pitch(&self) -> Result<u8, Box<dyn Error>> {
        let base_pitch = self.base_pitch.unwrap_or(DEFAULT_BASE_PITCH);
        if base_pitch as usize + NOTE_COUNT - 1 > 127 {
            return Err(format!(
                "base pitch {} leaves no room for {} notes",
                base_pitch, NOTE_COUNT
            )
            .into());
        }
        Ok(base_pitch)
    }

    /// Returns the sample rate override from the configuration.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}
