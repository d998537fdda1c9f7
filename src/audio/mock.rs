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
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

/// A mock bank. Doesn't actually play anything; it records the lifecycle of
/// every sound it hands out.
#[derive(Clone)]
pub struct Bank {
    notes: usize,
    fail_creates: Arc<AtomicBool>,
    created: Arc<Mutex<Vec<Arc<SoundLog>>>>,
}

impl Bank {
    /// Creates a mock bank holding the given number of notes.
    pub fn new(notes: usize) -> Bank {
        Bank {
            notes,
            fail_creates: Arc::new(AtomicBool::new(false)),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[cfg(test)]
    /// Makes subsequent creates fail.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::Relaxed);
    }

    #[cfg(test)]
    /// Returns the log of every sound created so far, in creation order.
    pub fn created(&self) -> Vec<Arc<SoundLog>> {
        self.created.lock().clone()
    }
}

impl super::Bank for Bank {
    fn create(&self, note: usize) -> Result<Box<dyn super::Sound>, Box<dyn Error + Send + Sync>> {
        if note >= self.notes {
            return Err(format!("no sound configured for note {}", note).into());
        }
        if self.fail_creates.load(Ordering::Relaxed) {
            return Err(format!("unable to create mock sound for note {}", note).into());
        }

        let log = Arc::new(SoundLog {
            note,
            plays: AtomicUsize::new(0),
            rewinds: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        });
        self.created.lock().push(log.clone());

        Ok(Box::new(Sound { log }))
    }
}

/// Records what happened to a single mock sound.
pub struct SoundLog {
    /// The note this sound was created for. Only read by tests.
    #[allow(dead_code)]
    note: usize,
    plays: AtomicUsize,
    rewinds: AtomicUsize,
    stops: AtomicUsize,
    released: AtomicBool,
}

#[cfg(test)]
impl SoundLog {
    /// Returns the note this sound was created for.
    pub fn note(&self) -> usize {
        self.note
    }

    /// Returns how many times the sound was started.
    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::Relaxed)
    }

    /// Returns how many times the sound was rewound.
    pub fn rewinds(&self) -> usize {
        self.rewinds.load(Ordering::Relaxed)
    }

    /// Returns how many times the sound was stopped.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }

    /// Returns true once the sound has been released.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }
}

/// A mock sound. Updates its log and nothing else.
struct Sound {
    log: Arc<SoundLog>,
}

impl super::Sound for Sound {
    fn play(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.log.plays.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rewind(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.log.rewinds.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.log.stops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for Sound {
    fn drop(&mut self) {
        self.log.released.store(true, Ordering::Relaxed);
    }
}
