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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use crate::conn::DeviceSelection;

use super::Event;

const NOTE_ON: &str = "on";
const NOTE_OFF: &str = "off";
const INTERNAL: &str = "internal";
const EXTERNAL: &str = "external";
const QUIT: &str = "quit";

/// The velocity used when a note on command doesn't carry one.
const DEFAULT_VELOCITY: u8 = 127;

/// A driver that controls the connection manager using the keyboard.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({} <pitch> [velocity], {} <pitch>, {}, {}, {}): ",
            NOTE_ON, NOTE_OFF, INTERNAL, EXTERNAL, QUIT,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            // EOF, no more commands will arrive.
            return Ok(false);
        }

        let input = input.trim().to_lowercase();
        let mut fields = input.split_whitespace();

        let event = match fields.next() {
            Some(NOTE_ON) => match parse_note(fields.next(), fields.next()) {
                Ok((pitch, velocity)) => Some(Event::NoteOn { pitch, velocity }),
                Err(e) => {
                    warn!(input = input, "Unrecognized note: {}", e);
                    None
                }
            },
            Some(NOTE_OFF) => match parse_pitch(fields.next()) {
                Ok(pitch) => Some(Event::NoteOff { pitch }),
                Err(e) => {
                    warn!(input = input, "Unrecognized note: {}", e);
                    None
                }
            },
            Some(INTERNAL) => Some(Event::Select(DeviceSelection::Internal)),
            Some(EXTERNAL) => Some(Event::Select(DeviceSelection::External)),
            Some(QUIT) => Some(Event::Quit),
            _ => {
                warn!(input = input, "Unrecognized input");
                None
            }
        };

        match event {
            Some(Event::Quit) => {
                events_tx
                    .blocking_send(Event::Quit)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(false)
            }
            Some(event) => {
                events_tx
                    .blocking_send(event)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(true)
            }
            None => Ok(true),
        }
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            Ok(())
        })
    }
}

/// Parses a pitch and optional velocity from note on arguments.
fn parse_note(
    pitch: Option<&str>,
    velocity: Option<&str>,
) -> Result<(u8, u8), Box<dyn std::error::Error>> {
    let pitch = parse_pitch(pitch)?;
    let velocity = match velocity {
        Some(velocity) => velocity.parse::<u8>()?,
        None => DEFAULT_VELOCITY,
    };
    Ok((pitch, velocity))
}

/// Parses a pitch argument.
fn parse_pitch(pitch: Option<&str>) -> Result<u8, Box<dyn std::error::Error>> {
    match pitch {
        Some(pitch) => Ok(pitch.parse::<u8>()?),
        None => Err("missing pitch".into()),
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, BufReader, BufWriter};

    use tokio::sync::mpsc;

    use crate::conn::DeviceSelection;
    use crate::controller::Event;

    use super::Driver;

    fn get_event(input: &str) -> Result<Option<Event>, io::Error> {
        let (sender, mut receiver) = mpsc::channel::<Event>(1);

        let reader = BufReader::new(input.as_bytes());
        let writer = BufWriter::new(Vec::new());
        Driver::monitor_io(&sender, reader, writer)?;

        // Force the sender to close.
        drop(sender);
        Ok(receiver.blocking_recv())
    }

    #[test]
    fn test_keyboard_events() -> Result<(), io::Error> {
        assert_eq!(
            Some(Event::NoteOn {
                pitch: 60,
                velocity: 100
            }),
            get_event("on 60 100")?
        );
        assert_eq!(
            Some(Event::NoteOn {
                pitch: 72,
                velocity: 127
            }),
            get_event("on 72")?
        );
        assert_eq!(Some(Event::NoteOff { pitch: 60 }), get_event("off 60")?);
        assert_eq!(
            Some(Event::Select(DeviceSelection::Internal)),
            get_event("internal")?
        );
        assert_eq!(
            Some(Event::Select(DeviceSelection::External)),
            get_event("external")?
        );
        assert_eq!(Some(Event::Quit), get_event("quit")?);
        assert_eq!(None, get_event("unrecognized")?);
        assert_eq!(None, get_event("on")?);
        assert_eq!(None, get_event("on pitch")?);
        assert_eq!(None, get_event("off 300")?);
        Ok(())
    }
}
