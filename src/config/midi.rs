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

use duration_string::DurationString;
use serde::Deserialize;

const DEFAULT_CLIENT_NAME: &str = "notebridge";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A YAML representation of the MIDI configuration.
#[derive(Deserialize, Clone, Default)]
pub struct Midi {
    /// The client name to register with the platform MIDI service. A name
    /// starting with "mock" selects the mock interface.
    client_name: Option<String>,

    /// How often to poll the platform for device plug/unplug.
    poll_interval: Option<String>,
}

impl Midi {
    /// Returns the client name from the configuration.
    pub fn client_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(DEFAULT_CLIENT_NAME)
    }

    /// Returns the device poll interval from the configuration.
    pub fn poll_interval(&self) -> Result<Duration, Box<dyn Error>> {
        match &self.poll_interval {
            Some(poll_interval) => Ok(DurationString::from_string(poll_interval.clone())?.into()),
            None => Ok(DEFAULT_POLL_INTERVAL),
        }
    }
}
