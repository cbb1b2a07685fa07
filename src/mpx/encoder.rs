use std::f64::consts::TAU;

use super::params::SettingsHandle;
use super::rds::RdsEncoder;
use super::MpxSynthesizer;
use crate::audio::CHANNELS;

pub const PILOT_FREQ: f64 = 19_000.0;

const AUDIO_LEVEL: f32 = 0.9;
const PILOT_LEVEL: f32 = 0.09;
const RDS_LEVEL: f32 = 0.045;

/// Stereo multiplexer with pilot and RDS subcarrier.
///
/// One phase accumulator at the pilot frequency drives all three carriers
/// (19, 38 and 57 kHz) so they stay locked to each other.
pub struct MpxEncoder {
    settings: SettingsHandle,
    version: Option<u64>,
    volume: f32,
    rds_level: f32,
    rds: RdsEncoder,
    pilot_phase: f64,
    pilot_step: f64,
}

impl MpxEncoder {
    pub fn new(settings: SettingsHandle, sample_rate: u32) -> Self {
        let snapshot = settings.snapshot();
        Self {
            rds: RdsEncoder::new(&snapshot.rds, sample_rate),
            settings,
            version: None,
            volume: 0.0,
            rds_level: 0.0,
            pilot_phase: 0.0,
            pilot_step: PILOT_FREQ / sample_rate as f64,
        }
    }

    fn sync_settings(&mut self) {
        let version = self.settings.version();
        if self.version == Some(version) {
            return;
        }
        let settings = self.settings.snapshot();
        self.volume = settings.volume as f32 / 100.0;
        self.rds_level = if settings.rds_enabled { RDS_LEVEL } else { 0.0 };
        if self.version.is_some() {
            self.rds.set_params(&settings.rds);
        }
        self.version = Some(version);
    }

    /// Returns the pilot angle for the current sample and advances it.
    fn advance_pilot(&mut self) -> f64 {
        let theta = TAU * self.pilot_phase;
        self.pilot_phase += self.pilot_step;
        if self.pilot_phase >= 1.0 {
            self.pilot_phase -= 1.0;
        }
        theta
    }
}

impl MpxSynthesizer for MpxEncoder {
    fn audio_block(&mut self, audio: &[f32], out: &mut [f32], frames: usize) {
        self.sync_settings();

        for (input, output) in audio
            .chunks_exact(CHANNELS)
            .zip(out.chunks_exact_mut(CHANNELS))
            .take(frames)
        {
            let theta = self.advance_pilot();
            let mono = (input[0] + input[1]) * 0.5;
            let side = (input[0] - input[1]) * 0.5;
            let rds = self.rds.next_sample() * (3.0 * theta).sin() as f32;

            let mpx = AUDIO_LEVEL * (mono + side * (2.0 * theta).sin() as f32)
                + PILOT_LEVEL * theta.sin() as f32
                + self.rds_level * rds;
            output.fill(mpx * self.volume);
        }
    }

    fn rds_block(&mut self, out: &mut [f32], frames: usize) {
        self.sync_settings();

        for output in out.chunks_exact_mut(CHANNELS).take(frames) {
            let theta = self.advance_pilot();
            let rds = self.rds.next_sample() * (3.0 * theta).sin() as f32;
            output.fill(self.rds_level * rds * self.volume);
        }
    }
}
