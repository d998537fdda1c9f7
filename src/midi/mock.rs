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

use parking_lot::{Condvar, Mutex};
use tokio::{sync::mpsc::Sender, task::JoinHandle};

use super::PortInfo;

/// A mock interface. The device list is scripted by tests, connects can be
/// held in flight or made to fail, and everything sent through a connection
/// is captured.
#[derive(Clone)]
pub struct Interface {
    devices: Arc<Mutex<Vec<PortInfo>>>,
    watchers: Arc<Mutex<Vec<Sender<Vec<PortInfo>>>>>,
    connect_gate: Arc<(Mutex<bool>, Condvar)>,
    fail_connects: Arc<AtomicBool>,
    fail_closes: Arc<AtomicBool>,
    opened: Arc<Mutex<Vec<PortInfo>>>,
    closed: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Interface {
    /// Creates a mock interface with no devices attached.
    pub fn new() -> Interface {
        Interface {
            devices: Arc::new(Mutex::new(Vec::new())),
            watchers: Arc::new(Mutex::new(Vec::new())),
            connect_gate: Arc::new((Mutex::new(true), Condvar::new())),
            fail_connects: Arc::new(AtomicBool::new(false)),
            fail_closes: Arc::new(AtomicBool::new(false)),
            opened: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[cfg(test)]
    /// Creates a mock interface with the given devices attached.
    pub fn with_devices(names: &[&str]) -> Interface {
        let interface = Interface::new();
        *interface.devices.lock() = names.iter().map(|name| PortInfo::new(name)).collect();
        interface
    }

    #[cfg(test)]
    /// Replaces the device list and notifies all watchers, simulating
    /// plug/unplug events.
    pub fn set_devices(&self, names: &[&str]) {
        let devices: Vec<PortInfo> = names.iter().map(|name| PortInfo::new(name)).collect();
        *self.devices.lock() = devices.clone();

        let watchers = self.watchers.lock();
        for watcher in watchers.iter() {
            watcher
                .try_send(devices.clone())
                .expect("error notifying mock watcher");
        }
    }

    #[cfg(test)]
    /// Holds all subsequent connects in flight until released.
    pub fn hold_connects(&self) {
        *self.connect_gate.0.lock() = false;
    }

    #[cfg(test)]
    /// Releases connects previously held in flight.
    pub fn release_connects(&self) {
        *self.connect_gate.0.lock() = true;
        self.connect_gate.1.notify_all();
    }

    #[cfg(test)]
    /// Makes subsequent connects fail.
    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::Relaxed);
    }

    #[cfg(test)]
    /// Makes subsequent closes fail. The close still counts.
    pub fn fail_closes(&self, fail: bool) {
        self.fail_closes.store(fail, Ordering::Relaxed);
    }

    #[cfg(test)]
    /// Returns the ports that were successfully connected to, in order.
    pub fn opened(&self) -> Vec<PortInfo> {
        self.opened.lock().clone()
    }

    #[cfg(test)]
    /// Returns the number of connections that were closed.
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    /// Returns every buffer sent through any connection, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

impl super::Interface for Interface {
    fn devices(&self) -> Result<Vec<PortInfo>, Box<dyn Error + Send + Sync>> {
        Ok(self.devices.lock().clone())
    }

    fn watch(&self, devices_tx: Sender<Vec<PortInfo>>) -> JoinHandle<()> {
        self.watchers.lock().push(devices_tx);
        // Notifications come from set_devices, the task just keeps the
        // handle shape of the real implementation.
        tokio::spawn(async {
            std::future::pending::<()>().await;
        })
    }

    fn connect(
        &self,
        port: &PortInfo,
    ) -> Result<Box<dyn super::Output>, Box<dyn Error + Send + Sync>> {
        {
            let mut open = self.connect_gate.0.lock();
            while !*open {
                self.connect_gate.1.wait(&mut open);
            }
        }

        if self.fail_connects.load(Ordering::Relaxed) {
            return Err(format!("unable to open mock device {}", port).into());
        }

        self.opened.lock().push(port.clone());
        Ok(Box::new(Output {
            name: port.name().to_string(),
            sent: self.sent.clone(),
            closed: self.closed.clone(),
            fail_closes: self.fail_closes.clone(),
        }))
    }
}

/// A mock output connection. Captures everything sent through it.
pub struct Output {
    name: String,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
    fail_closes: Arc<AtomicBool>,
}

impl super::Output for Output {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send(&mut self, buf: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.sent.lock().push(buf.to_vec());
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.closed.fetch_add(1, Ordering::Relaxed);
        if self.fail_closes.load(Ordering::Relaxed) {
            return Err(format!("unable to close mock device {}", self.name).into());
        }
        Ok(())
    }
}
