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
mod audio;
mod config;
mod conn;
mod controller;
mod midi;
mod sampler;
#[cfg(test)]
mod testutil;
mod util;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use controller::keyboard;
use controller::Controller;
use sampler::Sampler;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Plays notes through an in-process sampler or an external MIDI device."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available external MIDI output devices.
    Devices {},
    /// Loads and verifies the note sounds in the given setup.
    Sounds {
        /// The path to the setup file.
        setup_path: String,
    },
    /// Runs the interactive note player.
    Run {
        /// The path to the setup file.
        setup_path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = midi::list_devices().map_err(|e| e as Box<dyn Error>)?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Sounds { setup_path } => {
            let setup = config::load_setup(&PathBuf::from(&setup_path))?;
            let base_pitch = setup.sampler().base_pitch()?;
            let mut loader = audio::Loader::new(
                setup
                    .sampler()
                    .sample_rate()
                    .unwrap_or(audio::DEFAULT_SAMPLE_RATE),
            );

            println!("Sounds (count: {}):", setup.sampler().notes().len());
            for (note, file) in setup.sampler().notes().iter().enumerate() {
                let loaded = loader.load(Path::new(file)).map_err(|e| e as Box<dyn Error>)?;
                println!(
                    "- pitch {}: {} ({}, {} channel(s), {} Hz)",
                    base_pitch as usize + note,
                    file,
                    util::duration_minutes_seconds(loaded.duration()),
                    loaded.channel_count(),
                    loaded.sample_rate()
                );
            }
        }
        Commands::Run { setup_path } => {
            let setup = config::load_setup(&PathBuf::from(&setup_path))?;
            let bank = audio::get_bank(setup.sampler())?;
            let sampler = Sampler::new(bank, setup.sampler().base_pitch()?);
            let interface = midi::get_interface(&setup.midi())?;
            let manager = Arc::new(conn::Manager::new(interface, sampler));

            let mut controller =
                Controller::new(manager, Arc::new(keyboard::Driver::new()))?;
            controller.join().await?;
        }
    }

    Ok(())
}
