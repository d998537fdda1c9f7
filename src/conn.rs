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

//! The connection manager.
//!
//! Tracks external MIDI device availability, holds the current device
//! selection, owns at most one open external device at a time, and routes
//! note events to either the sampler or the open device.

use std::{error::Error, fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    midi::{self, PortInfo},
    sampler::Sampler,
};

/// Which playback path note events are routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceSelection {
    /// The in-process sampler.
    Internal,
    /// The connected external MIDI device.
    External,
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelection::Internal => write!(f, "internal"),
            DeviceSelection::External => write!(f, "external"),
        }
    }
}

/// The result of an asynchronous device open, delivered back to the manager
/// over its event channel.
struct OpenCompletion {
    port: PortInfo,
    generation: u64,
    result: Result<Box<dyn midi::Output>, Box<dyn Error + Send + Sync>>,
}

/// The currently targeted external device. The output is absent while the
/// open is still in flight; note events sent during that window are dropped.
struct OpenDevice {
    port: PortInfo,
    generation: u64,
    output: Option<Box<dyn midi::Output>>,
}

/// Mutable manager state. Every transition funnels through this one lock:
/// caller-facing methods, device watch notifications, and open completions.
struct State {
    selection: DeviceSelection,
    devices: Vec<PortInfo>,
    open: Option<OpenDevice>,
    /// Incremented for every open kicked off, so a completion for a device
    /// that has since been replaced or cleared can be recognized as stale.
    generation: u64,
    sampler: Sampler,
}

struct Inner {
    interface: Arc<dyn midi::Interface>,
    state: Mutex<State>,
    selection_tx: watch::Sender<DeviceSelection>,
    available_tx: watch::Sender<bool>,
    events_tx: mpsc::Sender<OpenCompletion>,
}

/// Routes note events to the sampler or the selected external MIDI device.
/// Construct one at the composition root and hand out references; observers
/// subscribe through the watch channels.
pub struct Manager {
    inner: Arc<Inner>,
    watch_handle: JoinHandle<()>,
    run_handle: JoinHandle<()>,
}

impl Manager {
    /// Creates a new manager over the given interface and sampler and starts
    /// watching for device changes.
    pub fn new(interface: Arc<dyn midi::Interface>, sampler: Sampler) -> Manager {
        let (selection_tx, _) = watch::channel(DeviceSelection::Internal);
        let (available_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(8);
        let (devices_tx, devices_rx) = mpsc::channel(8);

        let inner = Arc::new(Inner {
            interface: interface.clone(),
            state: Mutex::new(State {
                selection: DeviceSelection::Internal,
                devices: Vec::new(),
                open: None,
                generation: 0,
                sampler,
            }),
            selection_tx,
            available_tx,
            events_tx,
        });

        // Initialize availability from the current device list before any
        // notifications arrive.
        match interface.devices() {
            Ok(devices) => inner.devices_changed(devices),
            Err(e) => warn!(err = %e, "Unable to list MIDI devices."),
        }

        let watch_handle = interface.watch(devices_tx);
        let run_handle = tokio::spawn(Inner::run(inner.clone(), devices_rx, events_rx));

        Manager {
            inner,
            watch_handle,
            run_handle,
        }
    }

    /// Subscribes to external device availability.
    pub fn available(&self) -> watch::Receiver<bool> {
        self.inner.available_tx.subscribe()
    }

    /// Subscribes to the current device selection.
    pub fn selection(&self) -> watch::Receiver<DeviceSelection> {
        self.inner.selection_tx.subscribe()
    }

    /// Requests a device selection. If no external device is available the
    /// effective selection is internal regardless of the request; an invalid
    /// request is ignored rather than failed.
    pub fn set_selection(&self, requested: DeviceSelection) {
        self.inner.set_selection(requested);
    }

    /// Routes a note on to the selected playback path.
    pub fn note_on(&self, pitch: u8, velocity: u8) -> Result<(), Box<dyn Error>> {
        self.inner.note_on(pitch, velocity)
    }

    /// Routes a note off to the selected playback path.
    pub fn note_off(&self, pitch: u8) -> Result<(), Box<dyn Error>> {
        self.inner.note_off(pitch)
    }

    #[cfg(test)]
    /// Returns true once an external device is open and ready to send.
    fn external_ready(&self) -> bool {
        let state = self.inner.state.lock();
        state
            .open
            .as_ref()
            .is_some_and(|open| open.output.is_some())
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.watch_handle.abort();
        self.run_handle.abort();
    }
}

impl Inner {
    /// Drives the manager from device notifications and open completions.
    async fn run(
        inner: Arc<Inner>,
        mut devices_rx: mpsc::Receiver<Vec<PortInfo>>,
        mut events_rx: mpsc::Receiver<OpenCompletion>,
    ) {
        loop {
            tokio::select! {
                Some(devices) = devices_rx.recv() => inner.devices_changed(devices),
                Some(completion) = events_rx.recv() => inner.open_completed(completion),
                else => {
                    info!("Device events closed.");
                    return;
                }
            }
        }
    }

    /// Handles a fresh device list: recomputes availability, forces the
    /// selection back to internal if the external device disappeared, and
    /// reconciles the open device.
    fn devices_changed(&self, devices: Vec<PortInfo>) {
        let mut state = self.state.lock();

        state.devices = devices;
        let available = !state.devices.is_empty();
        self.available_tx.send_replace(available);

        if !available && state.selection == DeviceSelection::External {
            // The selected external device is no longer available.
            info!("External device went away, falling back to internal.");
            state.selection = DeviceSelection::Internal;
            self.selection_tx.send_replace(DeviceSelection::Internal);
        }

        self.sync_device(&mut state);
    }

    fn set_selection(&self, requested: DeviceSelection) {
        let mut state = self.state.lock();

        let effective = if !state.devices.is_empty() {
            requested
        } else {
            // A request for external with no device present is a caller
            // error; ignore it and stay internal.
            DeviceSelection::Internal
        };

        if effective != requested {
            debug!(
                requested = %requested,
                "No external device available, selection forced to internal."
            );
        }

        state.selection = effective;
        self.selection_tx.send_replace(effective);

        self.sync_device(&mut state);
    }

    /// Reconciles the open device with the current selection and device
    /// list. The first listed device is the only open candidate.
    fn sync_device(&self, state: &mut State) {
        let target = match state.selection {
            DeviceSelection::External => state.devices.first().cloned(),
            DeviceSelection::Internal => None,
        };

        if state.open.as_ref().map(|open| &open.port) == target.as_ref() {
            return;
        }

        if let Some(open) = state.open.take() {
            close_output(open);
        }

        if let Some(port) = target {
            state.generation += 1;
            let generation = state.generation;
            state.open = Some(OpenDevice {
                port: port.clone(),
                generation,
                output: None,
            });

            info!(device = %port, "Opening MIDI device.");
            let interface = self.interface.clone();
            let events_tx = self.events_tx.clone();
            tokio::task::spawn_blocking(move || {
                let result = interface.connect(&port);
                let completion = OpenCompletion {
                    port,
                    generation,
                    result,
                };
                if let Err(send_error) = events_tx.blocking_send(completion) {
                    // The manager is gone; don't leak the connection.
                    if let Ok(output) = send_error.0.result {
                        let _ = output.close();
                    }
                }
            });
        }
    }

    /// Handles the completion of an asynchronous open.
    fn open_completed(&self, completion: OpenCompletion) {
        let mut state = self.state.lock();

        let stale = match state.open {
            Some(ref open) => open.generation != completion.generation,
            None => true,
        };
        if stale {
            // The device this open was for has since been replaced or
            // cleared.
            debug!(device = %completion.port, "Discarding stale device open.");
            if let Ok(output) = completion.result {
                if let Err(e) = output.close() {
                    error!(err = %e, device = %completion.port, "Error closing MIDI device.");
                }
            }
            return;
        }

        match completion.result {
            Ok(output) => {
                info!(device = %completion.port, "MIDI device opened.");
                if let Some(ref mut open) = state.open {
                    open.output = Some(output);
                }
            }
            Err(e) => {
                error!(err = %e, device = %completion.port, "Could not open MIDI device.");
                state.open = None;
                state.selection = DeviceSelection::Internal;
                self.selection_tx.send_replace(DeviceSelection::Internal);
            }
        }
    }

    fn note_on(&self, pitch: u8, velocity: u8) -> Result<(), Box<dyn Error>> {
        let mut state = self.state.lock();
        match state.selection {
            DeviceSelection::Internal => Ok(state.sampler.note_on(pitch, velocity)?),
            DeviceSelection::External => {
                let buf = midi::note_on_message(pitch, velocity).map_err(|e| e as Box<dyn Error>)?;
                self.send_external(&mut state, &buf);
                Ok(())
            }
        }
    }

    fn note_off(&self, pitch: u8) -> Result<(), Box<dyn Error>> {
        let mut state = self.state.lock();
        match state.selection {
            DeviceSelection::Internal => Ok(state.sampler.note_off(pitch)?),
            DeviceSelection::External => {
                let buf = midi::note_off_message(pitch).map_err(|e| e as Box<dyn Error>)?;
                self.send_external(&mut state, &buf);
                Ok(())
            }
        }
    }

    /// Sends raw bytes through the open device, if one is ready. A send with
    /// no open device is dropped, not failed.
    fn send_external(&self, state: &mut State, buf: &[u8]) {
        match state.open.as_mut().and_then(|open| open.output.as_mut()) {
            Some(output) => {
                if let Err(e) = output.send(buf) {
                    error!(err = %e, "Error sending MIDI message.");
                }
            }
            None => debug!("No open MIDI device, dropping note message."),
        }
    }
}

/// Best-effort close of an open device. Close errors are logged, never
/// propagated.
fn close_output(open: OpenDevice) {
    match open.output {
        Some(output) => {
            info!(device = output.name(), "Closing MIDI device.");
            if let Err(e) = output.close() {
                error!(err = %e, device = %open.port, "Error closing MIDI device.");
            }
        }
        // The open never completed; its completion will be discarded as
        // stale when it arrives.
        None => debug!(device = %open.port, "Discarding MIDI device still being opened."),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::mock as mock_audio;
    use crate::midi::mock as mock_midi;
    use crate::sampler::NOTE_COUNT;
    use crate::testutil::eventually;

    fn new_manager(interface: &mock_midi::Interface) -> (Manager, mock_audio::Bank) {
        let bank = mock_audio::Bank::new(NOTE_COUNT);
        let sampler = Sampler::new(
            Arc::new(bank.clone()),
            crate::sampler::DEFAULT_BASE_PITCH,
        );
        (
            Manager::new(Arc::new(interface.clone()), sampler),
            bank,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn selection_forced_internal_when_unavailable() {
        let interface = mock_midi::Interface::new();
        let (manager, _) = new_manager(&interface);

        assert!(!*manager.available().borrow());
        manager.set_selection(DeviceSelection::External);
        assert_eq!(DeviceSelection::Internal, *manager.selection().borrow());
        assert!(interface.opened().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn internal_notes_route_to_sampler() -> Result<(), Box<dyn Error>> {
        let interface = mock_midi::Interface::new();
        let (manager, bank) = new_manager(&interface);

        manager.note_on(60, 127)?;
        manager.note_off(60)?;

        let created = bank.created();
        assert_eq!(1, created.len());
        assert_eq!(0, created[0].note());
        assert!(created[0].released());
        assert!(manager.note_on(59, 127).is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn external_opens_asynchronously_and_sends() -> Result<(), Box<dyn Error>> {
        let interface = mock_midi::Interface::with_devices(&["mock-device"]);
        let (manager, bank) = new_manager(&interface);

        assert!(*manager.available().borrow());
        interface.hold_connects();
        manager.set_selection(DeviceSelection::External);
        assert_eq!(DeviceSelection::External, *manager.selection().borrow());

        // The open has not completed; the note is dropped, not failed.
        manager.note_on(60, 100)?;
        assert!(interface.sent().is_empty());

        interface.release_connects();
        eventually(
            || manager.external_ready(),
            "Device never finished opening",
        );

        manager.note_on(60, 100)?;
        manager.note_off(60)?;
        assert_eq!(vec![vec![0x90, 60, 100], vec![0x90, 60, 0]], interface.sent());
        // Nothing reached the sampler.
        assert!(bank.created().is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unplug_forces_internal_and_closes_device() {
        let interface = mock_midi::Interface::with_devices(&["mock-device"]);
        let (manager, _) = new_manager(&interface);

        manager.set_selection(DeviceSelection::External);
        eventually(
            || manager.external_ready(),
            "Device never finished opening",
        );

        interface.set_devices(&[]);
        eventually(
            || *manager.selection().borrow() == DeviceSelection::Internal,
            "Selection never fell back to internal",
        );
        eventually(|| interface.close_count() == 1, "Device never closed");
        assert!(!*manager.available().borrow());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_failure_falls_back_to_internal() {
        let interface = mock_midi::Interface::with_devices(&["mock-device"]);
        interface.fail_connects(true);
        let (manager, _) = new_manager(&interface);

        manager.set_selection(DeviceSelection::External);
        eventually(
            || *manager.selection().borrow() == DeviceSelection::Internal,
            "Selection never fell back to internal",
        );

        // The device is still listed, only the open failed.
        assert!(*manager.available().borrow());
        assert!(interface.opened().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn only_first_device_is_considered() {
        let interface = mock_midi::Interface::with_devices(&["first", "second"]);
        let (manager, _) = new_manager(&interface);

        manager.set_selection(DeviceSelection::External);
        eventually(
            || manager.external_ready(),
            "Device never finished opening",
        );
        assert_eq!(vec![PortInfo::new("first")], interface.opened());

        // A new first entry replaces the open device.
        interface.set_devices(&["second"]);
        eventually(
            || interface.opened().len() == 2,
            "Replacement device never opened",
        );
        assert_eq!(PortInfo::new("second"), interface.opened()[1]);
        eventually(|| interface.close_count() == 1, "Old device never closed");
        assert_eq!(DeviceSelection::External, *manager.selection().borrow());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn switching_back_to_internal_closes_device() {
        let interface = mock_midi::Interface::with_devices(&["mock-device"]);
        let (manager, _) = new_manager(&interface);

        manager.set_selection(DeviceSelection::External);
        eventually(
            || manager.external_ready(),
            "Device never finished opening",
        );

        manager.set_selection(DeviceSelection::Internal);
        eventually(|| interface.close_count() == 1, "Device never closed");
        assert_eq!(DeviceSelection::Internal, *manager.selection().borrow());

        // Close failures are logged, not propagated; the handle is gone
        // either way.
        interface.fail_closes(true);
        manager.set_selection(DeviceSelection::External);
        eventually(
            || manager.external_ready(),
            "Device never reopened",
        );
        manager.set_selection(DeviceSelection::Internal);
        eventually(|| interface.close_count() == 2, "Device never closed again");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_open_completion_is_discarded() {
        let interface = mock_midi::Interface::with_devices(&["mock-device"]);
        let (manager, _) = new_manager(&interface);

        interface.hold_connects();
        manager.set_selection(DeviceSelection::External);

        // The device goes away while the open is still in flight.
        interface.set_devices(&[]);
        eventually(
            || *manager.selection().borrow() == DeviceSelection::Internal,
            "Selection never fell back to internal",
        );

        interface.release_connects();
        eventually(
            || interface.close_count() == 1,
            "Stale connection never closed",
        );
        assert!(interface.sent().is_empty());
    }
}
