use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ConfigError;

pub const PS_LENGTH: usize = 8;
pub const RT_LENGTH: usize = 64;
pub const PTYN_LENGTH: usize = 8;
pub const MAX_AF: usize = 25;
pub const MAX_PTY: u8 = 31;

/// Station data carried on the RDS subcarrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdsParams {
    pub pi: u16,
    pub ps: String,
    pub rt: String,
    pub pty: u8,
    pub tp: bool,
    /// Alternative frequencies in MHz.
    pub af: Vec<f32>,
    /// Programme type name; empty when not broadcast.
    pub ptyn: String,
}

impl Default for RdsParams {
    fn default() -> Self {
        Self {
            pi: 0x1000,
            ps: "Mpxgen".to_string(),
            rt: "Mpxgen: FM Stereo and RDS encoder".to_string(),
            pty: 0,
            tp: false,
            af: Vec::new(),
            ptyn: String::new(),
        }
    }
}

impl RdsParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_text("PS", &self.ps, PS_LENGTH)?;
        check_text("RT", &self.rt, RT_LENGTH)?;
        check_text("PTYN", &self.ptyn, PTYN_LENGTH)?;
        if self.pty > MAX_PTY {
            return Err(ConfigError::Pty(self.pty as u32));
        }
        if self.af.len() > MAX_AF {
            return Err(ConfigError::TooManyFrequencies { max: MAX_AF });
        }
        for &freq in &self.af {
            af_code(freq)?;
        }
        Ok(())
    }

    /// AF codes for 0A group block C, already validated.
    pub fn af_codes(&self) -> Vec<u8> {
        self.af.iter().filter_map(|&f| af_code(f).ok()).collect()
    }
}

fn check_text(field: &'static str, text: &str, max: usize) -> Result<(), ConfigError> {
    if !text.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return Err(ConfigError::InvalidText { field });
    }
    if text.len() > max {
        return Err(ConfigError::TextTooLong {
            field,
            max,
            len: text.len(),
        });
    }
    Ok(())
}

/// Parses a 16-bit PI code given in hex, with or without `0x`.
pub fn parse_pi(text: &str) -> Result<u16, ConfigError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 4 {
        return Err(ConfigError::Pi(text.to_string()));
    }
    u16::from_str_radix(digits, 16).map_err(|_| ConfigError::Pi(text.to_string()))
}

/// Derives a PI code from a North American callsign.
///
/// Four letters starting with K or W. K calls start at 4096, W calls at
/// 21672; the remaining letters count in base 26.
pub fn callsign_to_pi(callsign: &str) -> Result<u16, ConfigError> {
    let invalid = || ConfigError::Callsign(callsign.to_string());
    let letters: Vec<u8> = callsign.bytes().map(|b| b.to_ascii_uppercase()).collect();
    if letters.len() != 4 || !letters.iter().all(u8::is_ascii_uppercase) {
        return Err(invalid());
    }

    let base: u32 = match letters[0] {
        b'K' => 4096,
        b'W' => 21672,
        _ => return Err(invalid()),
    };
    let index = |c: u8| (c - b'A') as u32;
    let pi = base + 676 * index(letters[1]) + 26 * index(letters[2]) + index(letters[3]);
    u16::try_from(pi).map_err(|_| invalid())
}

/// Converts an FM frequency in MHz to its RDS AF code (1..=204).
pub fn af_code(freq_mhz: f32) -> Result<u8, ConfigError> {
    let code = ((freq_mhz - 87.5) * 10.0).round();
    if !(1.0..=204.0).contains(&code) {
        return Err(ConfigError::Frequency(freq_mhz.to_string()));
    }
    Ok(code as u8)
}

/// Everything the MPX encoder reads that may change at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub rds: RdsParams,
    /// Output volume in percent, 1..=100.
    pub volume: u8,
    pub rds_enabled: bool,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            rds: RdsParams::default(),
            volume: 50,
            rds_enabled: true,
        }
    }
}

impl EncoderSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.volume) {
            return Err(ConfigError::Volume(self.volume as u32));
        }
        self.rds.validate()
    }
}

struct SharedSettings {
    settings: Mutex<EncoderSettings>,
    version: AtomicU64,
}

/// Settings shared between the control channel and the encoder.
///
/// Writers bump a version counter so the encoder only copies the settings
/// when something changed.
#[derive(Clone)]
pub struct SettingsHandle {
    shared: Arc<SharedSettings>,
}

impl SettingsHandle {
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            shared: Arc::new(SharedSettings {
                settings: Mutex::new(settings),
                version: AtomicU64::new(0),
            }),
        }
    }

    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> EncoderSettings {
        self.lock().clone()
    }

    /// Applies `change` to a copy, validates it, then publishes it.
    /// Invalid changes leave the settings untouched.
    pub fn update<F>(&self, change: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EncoderSettings) -> Result<(), ConfigError>,
    {
        let mut settings = self.lock();
        let mut next = settings.clone();
        change(&mut next)?;
        next.validate()?;
        *settings = next;
        self.shared.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EncoderSettings> {
        self.shared.settings.lock().unwrap_or_else(|poisoned| {
            warn!("recovering poisoned settings lock");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callsign_to_pi() {
        assert_eq!(callsign_to_pi("KAAA").unwrap(), 4096);
        assert_eq!(callsign_to_pi("WAAA").unwrap(), 21672);
        // 21672 + 676*1 + 26*1 + 1
        assert_eq!(callsign_to_pi("wbbb").unwrap(), 22375);
        assert!(callsign_to_pi("ABCD").is_err());
        assert!(callsign_to_pi("KAB").is_err());
        assert!(callsign_to_pi("K1AB").is_err());
    }

    #[test]
    fn test_af_codes() {
        assert_eq!(af_code(87.6).unwrap(), 1);
        assert_eq!(af_code(98.5).unwrap(), 110);
        assert_eq!(af_code(107.9).unwrap(), 204);
        assert!(af_code(87.5).is_err());
        assert!(af_code(108.0).is_err());
    }

    #[test]
    fn test_parse_pi() {
        assert_eq!(parse_pi("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_pi("beef").unwrap(), 0xBEEF);
        assert!(parse_pi("12345").is_err());
        assert!(parse_pi("xyz").is_err());
        assert!(parse_pi("").is_err());
    }

    #[test]
    fn test_text_limits() {
        let mut params = RdsParams::default();
        assert!(params.validate().is_ok());

        params.ps = "TOO LONG NAME".to_string();
        assert!(matches!(
            params.validate(),
            Err(ConfigError::TextTooLong { field: "PS", .. })
        ));

        params.ps = "Caf\u{e9}".to_string();
        assert!(matches!(
            params.validate(),
            Err(ConfigError::InvalidText { field: "PS" })
        ));
    }

    #[test]
    fn test_rejected_update_keeps_settings() {
        let handle = SettingsHandle::new(EncoderSettings::default());
        assert_eq!(handle.version(), 0);

        handle
            .update(|s| {
                s.volume = 80;
                Ok(())
            })
            .unwrap();
        assert_eq!(handle.version(), 1);

        let result = handle.update(|s| {
            s.volume = 0;
            Ok(())
        });
        assert!(matches!(result, Err(ConfigError::Volume(0))));
        assert_eq!(handle.version(), 1);
        assert_eq!(handle.snapshot().volume, 80);
    }
}
