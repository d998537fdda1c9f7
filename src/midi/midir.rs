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
use std::{error::Error, time::Duration};

use midir::{MidiOutput, MidiOutputConnection};
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, warn};

use super::PortInfo;

/// An interface backed by midir. Since midir has no change notifications,
/// plug/unplug detection polls the port list on a fixed interval.
pub struct Interface {
    client_name: String,
    poll_interval: Duration,
}

impl Interface {
    /// Creates a new midir interface.
    pub fn new(client_name: &str, poll_interval: Duration) -> Interface {
        Interface {
            client_name: client_name.to_string(),
            poll_interval,
        }
    }
}

impl super::Interface for Interface {
    fn devices(&self) -> Result<Vec<PortInfo>, Box<dyn Error + Send + Sync>> {
        list_ports(&self.client_name)
    }

    fn watch(&self, devices_tx: Sender<Vec<PortInfo>>) -> JoinHandle<()> {
        let client_name = self.client_name.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            info!(
                poll_interval = format!("{:?}", poll_interval),
                "Watching MIDI devices."
            );

            let mut known: Option<Vec<PortInfo>> = None;
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;

                let current = match list_ports(&client_name) {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(err = %e, "Unable to list MIDI devices.");
                        continue;
                    }
                };

                if known.as_ref() != Some(&current) {
                    known = Some(current.clone());
                    if devices_tx.send(current).await.is_err() {
                        // Receiver is gone, nothing left to notify.
                        return;
                    }
                }
            }
        })
    }

    fn connect(
        &self,
        port: &PortInfo,
    ) -> Result<Box<dyn super::Output>, Box<dyn Error + Send + Sync>> {
        let output = MidiOutput::new(&self.client_name)?;
        let midir_port = output
            .ports()
            .into_iter()
            .find(|midir_port| {
                output
                    .port_name(midir_port)
                    .is_ok_and(|name| name == port.name())
            })
            .ok_or_else(|| format!("device {} is no longer present", port))?;

        let connection = output
            .connect(&midir_port, "notebridge output")
            .map_err(|e| format!("unable to connect to {}: {}", port, e))?;

        Ok(Box::new(Connection {
            name: port.name().to_string(),
            connection,
        }))
    }
}

/// An open midir output connection.
struct Connection {
    name: String,
    connection: MidiOutputConnection,
}

impl super::Output for Connection {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send(&mut self, buf: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.connection
            .send(buf)
            .map_err(|e| format!("unable to send to {}: {}", self.name, e).into())
    }

    fn close(self: Box<Self>) -> Result<(), Box<dyn Error + Send + Sync>> {
        // midir's close cannot fail, it just tears the connection down.
        self.connection.close();
        Ok(())
    }
}

/// Lists midir output ports.
pub fn list() -> Result<Vec<PortInfo>, Box<dyn Error + Send + Sync>> {
    list_ports("notebridge listing")
}

/// Lists midir output ports using the given client name.
fn list_ports(client_name: &str) -> Result<Vec<PortInfo>, Box<dyn Error + Send + Sync>> {
    let output = MidiOutput::new(client_name)?;

    let mut ports: Vec<PortInfo> = output
        .ports()
        .iter()
        .filter_map(|port| output.port_name(port).ok())
        .map(|name| PortInfo::new(&name))
        .collect();

    ports.sort_by_key(|port| port.name().to_string());
    Ok(ports)
}
