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

//! The in-process note player.
//!
//! A fixed, contiguous range of pitches is mapped onto a note table. Each
//! table entry holds at most one sound instance at a time.

use std::sync::Arc;

use tracing::error;

use crate::audio::{Bank, Sound};

/// The number of entries in the note table.
pub const NOTE_COUNT: usize = 16;

/// The pitch the first note table entry maps to when unconfigured.
pub const DEFAULT_BASE_PITCH: u8 = 60;

/// Typed error for note playback so callers can distinguish a bad pitch from
/// a sound resource failure.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("pitch {pitch} is outside the playable range {low}-{high}")]
    PitchOutOfRange { pitch: u8, low: u8, high: u8 },
    #[error("unable to create a sound for pitch {pitch}: {err}")]
    CreateSound {
        pitch: u8,
        err: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Plays notes by driving one sound instance per note table entry.
pub struct Sampler {
    /// Creates sound instances for note table entries.
    bank: Arc<dyn Bank>,
    /// The pitch the first note table entry maps to.
    base_pitch: u8,
    /// The note table. An empty entry means the note is silent. Every sound
    /// placed here must be released on note off, otherwise it occupies a
    /// playback resource until the process exits.
    slots: Vec<Option<Box<dyn Sound>>>,
}

impl Sampler {
    /// Creates a new sampler over the given bank.
    pub fn new(bank: Arc<dyn Bank>, base_pitch: u8) -> Sampler {
        Sampler {
            bank,
            base_pitch,
            slots: (0..NOTE_COUNT).map(|_| None).collect(),
        }
    }

    /// Starts the note for the given pitch. If the note is already sounding
    /// it is restarted from the beginning rather than doubled. Velocity is
    /// accepted for interface symmetry but does not affect playback.
    pub fn note_on(&mut self, pitch: u8, _velocity: u8) -> Result<(), SamplerError> {
        let note = self.note_index(pitch)?;

        match self.slots[note] {
            Some(ref mut sound) => {
                if let Err(e) = sound.rewind() {
                    error!(err = %e, pitch, "Error restarting note.");
                }
            }
            None => {
                let mut sound = self
                    .bank
                    .create(note)
                    .map_err(|err| SamplerError::CreateSound { pitch, err })?;
                if let Err(e) = sound.play() {
                    error!(err = %e, pitch, "Error starting note.");
                }
                self.slots[note] = Some(sound);
            }
        }

        Ok(())
    }

    /// Stops the note for the given pitch and releases its sound instance.
    /// Does nothing if the note is not sounding.
    pub fn note_off(&mut self, pitch: u8) -> Result<(), SamplerError> {
        let note = self.note_index(pitch)?;

        if let Some(mut sound) = self.slots[note].take() {
            if let Err(e) = sound.stop() {
                error!(err = %e, pitch, "Error stopping note.");
            }
            // Dropping the sound releases its playback resources.
        }

        Ok(())
    }

    /// Returns the number of notes currently sounding.
    pub fn active_notes(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Maps a pitch onto its note table entry.
    fn note_index(&self, pitch: u8) -> Result<usize, SamplerError> {
        let low = self.base_pitch;
        let high = self.base_pitch + (NOTE_COUNT as u8 - 1);
        if pitch < low || pitch > high {
            return Err(SamplerError::PitchOutOfRange { pitch, low, high });
        }
        Ok((pitch - low) as usize)
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("base_pitch", &self.base_pitch)
            .field("active_notes", &self.active_notes())
            .finish()
    }
}
