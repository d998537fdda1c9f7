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
use std::{error::Error, fmt, sync::Arc};

use midly::{
    live::LiveEvent,
    num::{u4, u7},
    MidiMessage,
};
use tokio::{sync::mpsc::Sender, task::JoinHandle};

use crate::config;

pub mod midir;
pub mod mock;

/// The MIDI channel all outbound note messages are sent on.
/// MIDI channels 1-16 are encoded as 0-15 in the status byte.
const CHANNEL: u8 = 1;

/// The identity of a MIDI output port as reported by the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortInfo {
    name: String,
}

impl PortInfo {
    /// Creates a port identity from the platform port name.
    pub fn new(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
        }
    }

    /// Returns the platform name of the port.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An open, output-capable connection to a MIDI device.
pub trait Output: Send {
    /// Returns the name of the connected device.
    fn name(&self) -> String;

    /// Sends the raw MIDI bytes through the connection.
    fn send(&mut self, buf: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Closes the connection. Close errors are reported so callers can log
    /// them, but the connection is gone either way.
    fn close(self: Box<Self>) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// The platform MIDI service: enumerates output ports, watches for
/// plug/unplug, and opens connections.
pub trait Interface: Send + Sync {
    /// Returns the currently available output ports.
    fn devices(&self) -> Result<Vec<PortInfo>, Box<dyn Error + Send + Sync>>;

    /// Watches for device list changes and pushes the fresh list to the given
    /// sender whenever it changes.
    fn watch(&self, devices_tx: Sender<Vec<PortInfo>>) -> JoinHandle<()>;

    /// Opens an output connection to the given port. This blocks and is
    /// expected to be called off the async runtime.
    fn connect(&self, port: &PortInfo) -> Result<Box<dyn Output>, Box<dyn Error + Send + Sync>>;
}

/// Lists the output ports known to midir.
pub fn list_devices() -> Result<Vec<PortInfo>, Box<dyn Error + Send + Sync>> {
    midir::list()
}

/// Gets the interface described by the given configuration.
pub fn get_interface(config: &config::Midi) -> Result<Arc<dyn Interface>, Box<dyn Error>> {
    if config.client_name().starts_with("mock") {
        return Ok(Arc::new(mock::Interface::new()));
    };

    Ok(Arc::new(midir::Interface::new(
        config.client_name(),
        config.poll_interval()?,
    )))
}

/// Builds the 3-byte note on message for the hardcoded channel.
pub fn note_on_message(pitch: u8, velocity: u8) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    let event = LiveEvent::Midi {
        channel: parse_channel(CHANNEL)?,
        message: MidiMessage::NoteOn {
            key: parse_u7(pitch)?,
            vel: parse_u7(velocity)?,
        },
    };

    let mut buf: Vec<u8> = Vec::with_capacity(8);
    event.write(&mut buf)?;
    Ok(buf)
}

/// Builds the note off message for the hardcoded channel. Note off is sent as
/// a note on with velocity zero, the conventional form, rather than with a
/// dedicated note off status byte.
pub fn note_off_message(pitch: u8) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    note_on_message(pitch, 0)
}

/// Parses a channel. Input is expected to be [1, 16].
fn parse_channel(channel: u8) -> Result<u4, Box<dyn Error + Send + Sync>> {
    match u4::try_from(channel - 1) {
        Some(val) => Ok(val),
        None => Err(format!("error parsing channel: {} is invalid", channel).into()),
    }
}

/// Parses a raw u7 value.
fn parse_u7(raw: u8) -> Result<u7, Box<dyn Error + Send + Sync>> {
    match u7::try_from(raw) {
        Some(val) => Ok(val),
        None => Err(format!("error parsing u7 value: {} is invalid", raw).into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn note_on_message_bytes() -> Result<(), Box<dyn Error + Send + Sync>> {
        assert_eq!(vec![0x90, 60, 100], note_on_message(60, 100)?);
        assert_eq!(vec![0x90, 0, 127], note_on_message(0, 127)?);
        assert_eq!(vec![0x90, 127, 1], note_on_message(127, 1)?);
        Ok(())
    }

    #[test]
    fn note_off_message_is_note_on_with_zero_velocity() -> Result<(), Box<dyn Error + Send + Sync>>
    {
        assert_eq!(vec![0x90, 60, 0], note_off_message(60)?);
        assert_eq!(vec![0x90, 75, 0], note_off_message(75)?);
        Ok(())
    }

    #[test]
    fn note_message_rejects_invalid_values() {
        assert!(note_on_message(128, 0).is_err());
        assert!(note_on_message(60, 128).is_err());
        assert!(note_off_message(255).is_err());
    }
}
