//! Command-line flags, layered over an optional JSON config file.

use std::path::PathBuf;

use clap::Parser;

use mpxgen::config::{ConfigError, EncoderConfig};
use mpxgen::mpx::params::parse_pi;
use mpxgen::resample::ResampleQuality;

#[derive(Debug, Parser)]
#[command(name = "mpxgen")]
#[command(version, about = "FM multiplex (stereo + RDS) baseband generator")]
pub struct Args {
    /// JSON config file; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Input source: a raw s16le file, a .wav file, `-` for stdin, or a
    /// live device (`alsa:`, `pulse:`, `live:`). Omit for RDS only
    #[arg(long, value_name = "PATH|DEVICE")]
    pub audio: Option<String>,

    /// Output sink, same forms as --audio. Defaults to the live output
    #[arg(long = "output-file", value_name = "PATH|DEVICE")]
    pub output_file: Option<String>,

    /// MPX output volume in percent
    #[arg(long, value_name = "1-100")]
    pub mpx: Option<u32>,

    /// Keep waiting for input at end of file instead of exiting
    #[arg(long, value_name = "0|1", value_parser = parse_flag)]
    pub wait: Option<bool>,

    /// Enable the RDS subcarrier
    #[arg(long, value_name = "0|1", value_parser = parse_flag)]
    pub rds: Option<bool>,

    // === RDS data ===
    /// Programme Identification, hex
    #[arg(long, value_name = "HEX")]
    pub pi: Option<String>,

    /// Programme Service name (up to 8 characters)
    #[arg(long)]
    pub ps: Option<String>,

    /// RadioText (up to 64 characters)
    #[arg(long)]
    pub rt: Option<String>,

    /// Programme Type (0-31)
    #[arg(long)]
    pub pty: Option<u32>,

    /// Traffic Programme flag
    #[arg(long, value_name = "0|1", value_parser = parse_flag)]
    pub tp: Option<bool>,

    /// Alternative frequencies in MHz
    #[arg(long, value_name = "MHZ", num_args = 1..)]
    pub af: Vec<f32>,

    /// Programme Type Name (up to 8 characters)
    #[arg(long)]
    pub ptyn: Option<String>,

    /// North-American callsign; overrides --pi
    #[arg(long)]
    pub callsign: Option<String>,

    /// Control pipe to read runtime commands from
    #[arg(long, value_name = "PATH")]
    pub ctl: Option<String>,

    // === Stream layout ===
    /// Nominal rate of raw input in Hz
    #[arg(long, value_name = "HZ")]
    pub input_rate: Option<u32>,

    /// MPX generation rate in Hz
    #[arg(long, value_name = "HZ")]
    pub mpx_rate: Option<u32>,

    /// Output rate in Hz
    #[arg(long, value_name = "HZ")]
    pub output_rate: Option<u32>,

    /// Input block size in frames
    #[arg(long, value_name = "FRAMES")]
    pub block: Option<usize>,

    /// Resampler quality: fast, balanced or high
    #[arg(long, value_parser = parse_quality)]
    pub quality: Option<ResampleQuality>,
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("expected 0 or 1, got \"{}\"", other)),
    }
}

fn parse_quality(value: &str) -> Result<ResampleQuality, String> {
    match value.to_ascii_lowercase().as_str() {
        "fast" => Ok(ResampleQuality::Fast),
        "balanced" => Ok(ResampleQuality::Balanced),
        "high" => Ok(ResampleQuality::High),
        other => Err(format!("unknown quality \"{}\"", other)),
    }
}

impl Args {
    /// Loads `--config` if given, then applies every flag on top.
    pub fn into_config(self) -> Result<EncoderConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => EncoderConfig::from_json_file(path)?,
            None => EncoderConfig::default(),
        };
        self.apply(&mut config)?;
        Ok(config)
    }

    fn apply(self, config: &mut EncoderConfig) -> Result<(), ConfigError> {
        if self.audio.is_some() {
            config.audio = self.audio;
        }
        if self.output_file.is_some() {
            config.output = self.output_file;
        }
        if let Some(volume) = self.mpx {
            config.volume = volume;
        }
        if let Some(wait) = self.wait {
            config.wait = wait;
        }
        if let Some(enabled) = self.rds {
            config.rds_enabled = enabled;
        }

        let rds = &mut config.rds;
        if let Some(pi) = self.pi {
            rds.pi = parse_pi(&pi)?;
        }
        if let Some(ps) = self.ps {
            rds.ps = ps;
        }
        if let Some(rt) = self.rt {
            rds.rt = rt;
        }
        if let Some(pty) = self.pty {
            rds.pty = u8::try_from(pty).map_err(|_| ConfigError::Pty(pty))?;
        }
        if let Some(tp) = self.tp {
            rds.tp = tp;
        }
        if !self.af.is_empty() {
            rds.af = self.af;
        }
        if let Some(ptyn) = self.ptyn {
            rds.ptyn = ptyn;
        }

        if self.callsign.is_some() {
            config.callsign = self.callsign;
        }
        if self.ctl.is_some() {
            config.control = self.ctl;
        }
        if let Some(rate) = self.input_rate {
            config.input_rate = rate;
        }
        if let Some(rate) = self.mpx_rate {
            config.mpx_rate = rate;
        }
        if let Some(rate) = self.output_rate {
            config.output_rate = rate;
        }
        if let Some(frames) = self.block {
            config.block_frames = frames;
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("mpxgen").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_fill_the_config() {
        let config = parse(&[
            "--audio", "in.wav", "--output-file", "-", "--mpx", "80", "--wait", "0", "--pi",
            "BEEF", "--ps", "Radio", "--pty", "10", "--tp", "1", "--af", "98.5", "101.1",
            "--quality", "high",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.audio.as_deref(), Some("in.wav"));
        assert_eq!(config.output.as_deref(), Some("-"));
        assert_eq!(config.volume, 80);
        assert!(!config.wait);
        assert_eq!(config.rds.pi, 0xBEEF);
        assert_eq!(config.rds.ps, "Radio");
        assert_eq!(config.rds.pty, 10);
        assert!(config.rds.tp);
        assert_eq!(config.rds.af, vec![98.5, 101.1]);
        assert_eq!(config.quality, ResampleQuality::High);
        config.validate().unwrap();
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "volume": 30, "rds": {{ "ps": "FromFile", "rt": "kept" }} }}"#)
            .unwrap();
        let path = file.path().display().to_string();

        let config = parse(&["--config", &path, "--ps", "FromCli"])
            .into_config()
            .unwrap();
        assert_eq!(config.volume, 30);
        assert_eq!(config.rds.ps, "FromCli");
        assert_eq!(config.rds.rt, "kept");
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(Args::try_parse_from(["mpxgen", "--wait", "yes"]).is_err());
        assert!(Args::try_parse_from(["mpxgen", "--quality", "ultra"]).is_err());
        assert!(matches!(
            parse(&["--pi", "xyz"]).into_config(),
            Err(ConfigError::Pi(_))
        ));
        assert!(matches!(
            parse(&["--pty", "300"]).into_config(),
            Err(ConfigError::Pty(300))
        ));
    }
}
