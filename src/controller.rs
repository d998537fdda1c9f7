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
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info};

use crate::conn::{DeviceSelection, Manager};

pub mod keyboard;

/// Controller events that will trigger behavior in the connection manager.
#[derive(Debug, PartialEq)]
pub enum Event {
    /// Starts the note for the given pitch.
    NoteOn { pitch: u8, velocity: u8 },

    /// Stops the note for the given pitch.
    NoteOff { pitch: u8 },

    /// Requests a device selection. The manager may force the effective
    /// selection back to internal.
    Select(DeviceSelection),

    /// Shuts the controller down.
    Quit,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Drives a connection manager from a driver's events and reports the
/// manager's observable state changes.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(manager: Arc<Manager>, driver: Arc<dyn Driver>) -> Result<Controller, Box<dyn Error>> {
        Ok(Controller {
            handle: tokio::spawn(async move { Controller::trigger_events(manager, driver).await }),
        })
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Forwards driver events into the manager and logs selection and
    /// availability changes as they are published.
    async fn trigger_events(manager: Arc<Manager>, driver: Arc<dyn Driver>) {
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);

        let mut selection = manager.selection();
        let mut available = manager.available();

        info!(
            selection = %*selection.borrow(),
            external_available = *available.borrow(),
            "Controller started."
        );

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => {
                            info!("Controller closing.");
                            if let Err(e) = join_handle.await {
                                error!("Error waiting for event monitor to stop: {}", e);
                            }
                            return;
                        }
                    };

                    info!(event = format!("{:?}", event), "Received event.");

                    match event {
                        Event::NoteOn { pitch, velocity } => {
                            if let Err(e) = manager.note_on(pitch, velocity) {
                                error!("Error playing note: {}", e);
                            }
                        }
                        Event::NoteOff { pitch } => {
                            if let Err(e) = manager.note_off(pitch) {
                                error!("Error stopping note: {}", e);
                            }
                        }
                        Event::Select(requested) => manager.set_selection(requested),
                        Event::Quit => {
                            info!("Controller closing.");
                            return;
                        }
                    }
                }
                result = selection.changed() => {
                    if result.is_err() {
                        return;
                    }
                    info!(selection = %*selection.borrow_and_update(), "Selection changed.");
                }
                result = available.changed() => {
                    if result.is_err() {
                        return;
                    }
                    info!(
                        external_available = *available.borrow_and_update(),
                        "External device availability changed."
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        io,
        sync::{Arc, Barrier, Mutex},
    };

    use tokio::{sync::mpsc::Sender, task::JoinHandle};

    use crate::{
        audio, conn::DeviceSelection, conn::Manager, midi, sampler::Sampler,
        sampler::DEFAULT_BASE_PITCH, sampler::NOTE_COUNT, testutil::eventually,
    };

    use super::{Driver, Event};

    struct TestDriver {
        current_event: Arc<Mutex<Option<Event>>>,
        barrier: Arc<Barrier>,
    }

    impl TestDriver {
        /// Creates a new test driver which is explicitly controlled by the
        /// next_event function.
        fn new() -> TestDriver {
            TestDriver {
                current_event: Arc::new(Mutex::new(None)),
                barrier: Arc::new(Barrier::new(2)),
            }
        }

        /// Signals the next event to the monitor thread.
        fn next_event(&self, event: Event) {
            {
                let mut current_event = self.current_event.lock().expect("failed to get lock");
                *current_event = Some(event);
            }
            // Wait until the thread goes to receive the event.
            self.barrier.wait();
            // Wait until the thread has locked the mutex.
            self.barrier.wait();
        }
    }

    impl Driver for TestDriver {
        fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
            let barrier = self.barrier.clone();
            let current_event = self.current_event.clone();
            tokio::task::spawn_blocking(move || loop {
                // Wait for next_event to set the current event.
                barrier.wait();
                let event = current_event
                    .lock()
                    .expect("failed to get lock")
                    .take()
                    .expect("current event should be set");
                // Let next_event know that we got the event.
                barrier.wait();

                let quit = event == Event::Quit;
                events_tx
                    .blocking_send(event)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                if quit {
                    return Ok(());
                }
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_controller() -> Result<(), Box<dyn std::error::Error>> {
        let driver = Arc::new(TestDriver::new());
        let interface = midi::mock::Interface::with_devices(&["mock-device"]);
        let bank = audio::mock::Bank::new(NOTE_COUNT);
        let sampler = Sampler::new(Arc::new(bank.clone()), DEFAULT_BASE_PITCH);
        let manager = Arc::new(Manager::new(Arc::new(interface.clone()), sampler));
        let mut controller = super::Controller::new(manager.clone(), driver.clone())?;

        // Play a note through the internal path.
        driver.next_event(Event::NoteOn {
            pitch: 60,
            velocity: 127,
        });
        eventually(|| bank.created().len() == 1, "Note never started");
        driver.next_event(Event::NoteOff { pitch: 60 });
        eventually(|| bank.created()[0].released(), "Note never released");

        // Switch to the external device and play a note through it.
        driver.next_event(Event::Select(DeviceSelection::External));
        eventually(
            || *manager.selection().borrow() == DeviceSelection::External,
            "Selection never became external",
        );
        eventually(|| interface.opened().len() == 1, "Device never opened");
        eventually(
            || {
                // Sends are dropped until the open completes.
                let _ = manager.note_on(60, 100);
                !interface.sent().is_empty()
            },
            "Note never reached the device",
        );
        assert_eq!(vec![0x90, 60, 100], interface.sent()[0]);
        assert_eq!(1, bank.created().len());

        driver.next_event(Event::Quit);
        assert!(
            controller.join().await.is_ok(),
            "Error waiting for controller",
        );

        Ok(())
    }
}
