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
use std::path::Path;

use config::{Config, File};
use serde::Deserialize;

mod error;
mod midi;
mod sampler;

pub use error::ConfigError;
pub use midi::Midi;
pub use sampler::Sampler;

/// A YAML representation of the application setup.
#[derive(Deserialize)]
pub struct Setup {
    /// The sampler configuration.
    sampler: Sampler,
    /// The MIDI configuration.
    midi: Option<Midi>,
}

impl Setup {
    /// Returns the sampler configuration.
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Returns the MIDI configuration, or the defaults when the section is
    /// absent.
    pub fn midi(&self) -> Midi {
        self.midi.clone().unwrap_or_default()
    }
}

/// Loads the setup from the given YAML file.
pub fn load_setup(path: &Path) -> Result<Setup, ConfigError> {
    Ok(Config::builder()
        .add_source(File::from(path))
        .build()?
        .try_deserialize::<Setup>()?)
}

#[cfg(test)]
mod test {
    use config::FileFormat;

    use super::*;

    fn parse(yaml: &str) -> Result<Setup, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Setup>()?)
    }

    #[test]
    fn full_setup() -> Result<(), Box<dyn std::error::Error>> {
        let setup = parse(
            r#"
            sampler:
              device: USB Audio
              notes:
                - notes/c4.wav
                - notes/c_sharp4.wav
              base_pitch: 48
              sample_rate: 48000
            midi:
              client_name: bridge
              poll_interval: 1s
        "#,
        )?;

        assert_eq!("USB Audio", setup.sampler().device());
        assert_eq!(2, setup.sampler().notes().len());
        assert_eq!(48, setup.sampler().base_pitch()?);
        assert_eq!(Some(48000), setup.sampler().sample_rate());
        assert_eq!("bridge", setup.midi().client_name());
        assert_eq!(
            std::time::Duration::from_secs(1),
            setup.midi().poll_interval()?
        );
        Ok(())
    }

    #[test]
    fn defaults_apply() -> Result<(), Box<dyn std::error::Error>> {
        let setup = parse(
            r#"
            sampler:
              notes:
                - notes/c4.wav
        "#,
        )?;

        assert_eq!("default", setup.sampler().device());
        assert_eq!(60, setup.sampler().base_pitch()?);
        assert_eq!(None, setup.sampler().sample_rate());
        assert_eq!("notebridge", setup.midi().client_name());
        assert_eq!(
            std::time::Duration::from_millis(250),
            setup.midi().poll_interval()?
        );
        Ok(())
    }

    #[test]
    fn base_pitch_must_leave_room_for_the_note_table() -> Result<(), ConfigError> {
        let setup = parse(
            r#"
            sampler:
              notes: []
              base_pitch: 120
        "#,
        )?;

        assert!(setup.sampler().base_pitch().is_err());
        Ok(())
    }

    #[test]
    fn missing_sampler_section_fails() {
        assert!(parse("midi:\n  client_name: bridge\n").is_err());
    }
}
