//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Interactive command loop for the host driver.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::Result;

use crate::driver::HostDriver;

const PROMPT: &str = "tonegate> ";
const PLAYBACK_PROMPT: &str = "tonegate(play)> ";

fn print_help() {
    println!("tonegate options:");
    println!("  login <username> <pin>   log on (must be logged out)");
    println!("  logout                   log off (must be logged in)");
    println!("  query [song.drm]         song info, or player info without a file");
    println!("  share <song.drm> <user>  share the song with the specified user");
    println!("  play <song.drm>          play the song");
    println!("  digital_out <song.drm>   decrypt the song to <song.drm>.dout");
    println!("  help                     display this message");
    println!("  exit                     exit tonegate");
}

fn print_playback_help() {
    println!("playback options:");
    println!("  pause                    pause the song");
    println!("  resume                   resume the paused song");
    println!("  stop                     stop playing the song");
    println!("  restart                  restart the song from the top");
    println!("  help                     display this message");
}

fn print_query(owner: &str, regions: &[String], users: &[String]) {
    if !owner.is_empty() {
        println!("[HOST] Owner: {owner}");
    }
    println!("[HOST] Regions: {}", regions.join(", "));
    println!("[HOST] Authorized users: {}", users.join(", "));
}

/// Read-eval loop over `input`; split out from stdin so tests can drive it.
pub fn run<R: BufRead>(driver: &HostDriver, input: &mut R) -> Result<()> {
    // Dump the player tables before the first prompt.
    match driver.query_player() {
        Ok(q) => print_query("", &q.regions, &q.users),
        Err(e) => eprintln!("[ERR] Player query failed: {e:#}"),
    }

    let mut line = String::new();
    loop {
        print!("{PROMPT}");
        io::stdout().flush().ok();
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(()); // EOF
        }

        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            print_help();
            continue;
        };
        let arg1 = words.next();
        let arg2 = words.next();

        match (cmd, arg1, arg2) {
            ("help", _, _) => print_help(),
            ("exit", _, _) => return Ok(()),
            ("login", Some(user), Some(pin)) => match driver.login(user, pin) {
                Ok(true) => println!("[OK] Logged in as '{user}'"),
                Ok(false) => println!("[ERR] Login failed"),
                Err(e) => eprintln!("[ERR] {e:#}"),
            },
            ("logout", _, _) => match driver.logout() {
                Ok(()) => println!("[OK] Logged out"),
                Err(e) => eprintln!("[ERR] {e:#}"),
            },
            ("query", None, _) => match driver.query_player() {
                Ok(q) => print_query("", &q.regions, &q.users),
                Err(e) => eprintln!("[ERR] {e:#}"),
            },
            ("query", Some(file), _) => match driver.query_song(Path::new(file)) {
                Ok(q) => print_query(&q.owner, &q.regions, &q.users),
                Err(e) => eprintln!("[ERR] {e:#}"),
            },
            ("share", Some(file), Some(user)) => {
                match driver.share(Path::new(file), user) {
                    Ok(()) => println!("[OK] Shared {file} with '{user}'"),
                    Err(e) => eprintln!("[ERR] {e:#}"),
                }
            }
            ("digital_out", Some(file), _) => match driver.digital_out(Path::new(file)) {
                Ok(out) => println!("[OK] Wrote {}", out.display()),
                Err(e) => eprintln!("[ERR] {e:#}"),
            },
            ("play", Some(file), _) => match driver.play(Path::new(file)) {
                Ok(session) => playback_loop(session, input)?,
                Err(e) => eprintln!("[ERR] {e:#}"),
            },
            _ => {
                println!("[ERR] Unrecognized command");
                print_help();
            }
        }
    }
}

fn playback_loop<R: BufRead>(
    mut session: crate::driver::PlaybackSession,
    input: &mut R,
) -> Result<()> {
    let mut line = String::new();
    loop {
        if session.finished() {
            println!("[OK] Song finished");
            return Ok(());
        }
        print!("{PLAYBACK_PROMPT}");
        io::stdout().flush().ok();
        line.clear();
        if input.read_line(&mut line)? == 0 {
            session.stop();
            return Ok(());
        }

        match line.split_whitespace().next() {
            Some("pause") => session.pause(),
            Some("resume") => session.resume(),
            Some("stop") => {
                session.stop();
                println!("[OK] Stopped");
                return Ok(());
            }
            Some("restart") => {
                if let Err(e) = session.restart() {
                    eprintln!("[ERR] {e:#}");
                    return Ok(());
                }
            }
            Some("help") | None => print_playback_help(),
            Some(other) => {
                println!("[ERR] Unrecognized playback command '{other}'");
                print_playback_help();
            }
        }
    }
}
