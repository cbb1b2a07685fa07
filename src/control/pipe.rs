use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use tracing::{debug, info, warn};

use super::{ControlChannel, ControlError};
use crate::config::ConfigError;
use crate::mpx::params::parse_pi;
use crate::mpx::SettingsHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ps(String),
    Rt(String),
    Pi(u16),
    Pty(u8),
    Tp(bool),
    Ptyn(String),
    Volume(u8),
    Rds(bool),
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("expected 0 or 1, got \"{}\"", other)),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("expected a number, got \"{}\"", value))
}

/// Parses one control line: a keyword, a space, and the rest as argument.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (keyword, argument) = line.split_once(' ').unwrap_or((line, ""));

    let command = match keyword.to_ascii_uppercase().as_str() {
        "PS" => Command::Ps(argument.to_string()),
        "RT" => Command::Rt(argument.to_string()),
        "PTYN" => Command::Ptyn(argument.to_string()),
        "PI" => Command::Pi(parse_pi(argument.trim()).map_err(|e| e.to_string())?),
        "PTY" => Command::Pty(parse_number(argument.trim())?),
        "TP" => Command::Tp(parse_flag(argument.trim())?),
        "MPX" => Command::Volume(parse_number(argument.trim())?),
        "RDS" => Command::Rds(parse_flag(argument.trim())?),
        "" => return Err("empty command".to_string()),
        other => return Err(format!("unknown keyword {}", other)),
    };
    Ok(command)
}

/// Reads commands line by line from a file or FIFO.
///
/// A helper thread does the blocking reads; `poll` only drains what it
/// forwarded.
pub struct ControlPipe {
    path: PathBuf,
    lines: Receiver<String>,
    settings: SettingsHandle,
}

impl ControlPipe {
    pub fn open(path: &Path, settings: SettingsHandle) -> io::Result<Self> {
        let (sender, lines) = unbounded();
        let reader_path = path.to_path_buf();

        thread::Builder::new()
            .name("mpxgen-control-reader".to_string())
            .spawn(move || {
                // Opening a FIFO blocks until a writer shows up.
                let file = match File::open(&reader_path) {
                    Ok(file) => file,
                    Err(e) => {
                        warn!(path = %reader_path.display(), "failed to open control pipe: {}", e);
                        return;
                    }
                };
                info!(path = %reader_path.display(), "reading control commands");
                for line in BufReader::new(file).lines() {
                    match line {
                        Ok(line) => {
                            if sender.send(line).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("control pipe read failed: {}", e);
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            lines,
            settings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn apply(&self, command: Command) -> Result<(), ConfigError> {
        self.settings.update(|settings| {
            match command {
                Command::Ps(text) => settings.rds.ps = text,
                Command::Rt(text) => settings.rds.rt = text,
                Command::Ptyn(text) => settings.rds.ptyn = text,
                Command::Pi(pi) => settings.rds.pi = pi,
                Command::Pty(pty) => settings.rds.pty = pty,
                Command::Tp(tp) => settings.rds.tp = tp,
                Command::Volume(volume) => settings.volume = volume,
                Command::Rds(enabled) => settings.rds_enabled = enabled,
            }
            Ok(())
        })
    }

    fn handle_line(&self, line: &str) -> Result<(), ControlError> {
        let invalid = |reason: String| ControlError::Command {
            line: line.to_string(),
            reason,
        };
        let command = parse_command(line).map_err(invalid)?;
        debug!(?command, "control command");
        self.apply(command).map_err(|e| invalid(e.to_string()))
    }
}

impl ControlChannel for ControlPipe {
    fn poll(&mut self) -> Result<(), ControlError> {
        let mut first_error = None;
        loop {
            match self.lines.try_recv() {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(error) = self.handle_line(&line) {
                        first_error.get_or_insert(error);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return match first_error {
                        Some(error) => Err(error),
                        None => Err(ControlError::Closed),
                    };
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
