//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tonegate_cli::driver::HostDriver;
use tonegate_cli::repl;
use tonegate_core::{seal_song, spawn_module, DeviceSecrets, ModelDmaSink, SongRecipe};

#[derive(Parser, Debug)]
#[command(name = "tonegate", version, about = "Audio DRM host driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Boot a secure module and drive it interactively.
    Repl {
        /// Device provisioning artifact (JSON)
        #[arg(long)]
        secrets: PathBuf,
    },
    /// Producer side: seal a WAV file into a protected song.
    Pack {
        /// Device provisioning artifact (JSON)
        #[arg(long)]
        secrets: PathBuf,
        /// Input WAV file (44-byte canonical header)
        #[arg(short, long)]
        input: PathBuf,
        /// Output protected song
        #[arg(short, long)]
        output: PathBuf,
        /// Owning user id
        #[arg(long)]
        owner: u32,
        /// Region ids the song is licensed for
        #[arg(long, value_delimiter = ',', required = true)]
        regions: Vec<u32>,
        /// User ids the song starts out shared with
        #[arg(long, value_delimiter = ',')]
        users: Vec<u32>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Repl { secrets } => {
            let secrets = DeviceSecrets::load(&secrets)?;
            let (port, handle) = spawn_module(secrets, Box::new(ModelDmaSink::new()));
            println!("[HOST] Secure module booted");

            let driver = HostDriver::new(port.clone());
            let result = repl::run(&driver, &mut io::stdin().lock());

            port.power_off();
            handle.join().ok();
            println!("[HOST] Exiting");
            result
        }
        Commands::Pack {
            secrets,
            input,
            output,
            owner,
            regions,
            users,
        } => {
            let secrets = DeviceSecrets::load(&secrets)?;
            let wav =
                fs::read(&input).with_context(|| format!("open {}", input.display()))?;
            let recipe = SongRecipe {
                owner_id: owner,
                region_ids: regions,
                user_ids: users,
            };
            let song = seal_song(secrets.key(), &wav, &recipe)?;
            fs::write(&output, &song)
                .with_context(|| format!("write {}", output.display()))?;
            println!(
                "[OK] Sealed {} ({} bytes) into {}",
                input.display(),
                wav.len(),
                output.display()
            );
            Ok(())
        }
    }
}
