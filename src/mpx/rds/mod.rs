//! RDS group scheduling and biphase baseband generation.

mod group;

use std::f64::consts::TAU;

pub use group::{checkword, Group, GROUP_BITS};

use super::params::{RdsParams, PS_LENGTH, PTYN_LENGTH, RT_LENGTH};

pub const BIT_RATE: f64 = 1187.5;

const AF_NONE: u16 = 0xE0CD;
const AF_FILLER: u8 = 0xCD;
const AF_COUNT_BASE: u8 = 224;
const RT_END: u8 = 0x0D;

/// Every fifth group is 10A while a PTYN is set.
const PTYN_INTERVAL: usize = 5;

/// Station data laid out the way the groups carry it.
struct Layout {
    pi: u16,
    pty: u8,
    tp: bool,
    ps: [u8; PS_LENGTH],
    rt: [u8; RT_LENGTH],
    rt_segments: usize,
    ptyn: Option<[u8; PTYN_LENGTH]>,
    af_blocks: Vec<u16>,
}

impl Layout {
    fn new(params: &RdsParams) -> Self {
        let mut ps = [b' '; PS_LENGTH];
        copy_text(&mut ps, &params.ps);

        let mut rt = [b' '; RT_LENGTH];
        let len = copy_text(&mut rt, &params.rt);
        let rt_segments = if len < RT_LENGTH {
            rt[len] = RT_END;
            (len + 1).div_ceil(4)
        } else {
            RT_LENGTH / 4
        };

        let ptyn = (!params.ptyn.is_empty()).then(|| {
            let mut ptyn = [b' '; PTYN_LENGTH];
            copy_text(&mut ptyn, &params.ptyn);
            ptyn
        });

        Self {
            pi: params.pi,
            pty: params.pty,
            tp: params.tp,
            ps,
            rt,
            rt_segments,
            ptyn,
            af_blocks: af_blocks(&params.af_codes()),
        }
    }

    /// Block B bits shared by every group type.
    fn block_b(&self, group_type: u16) -> u16 {
        (group_type << 12) | ((self.tp as u16) << 10) | ((self.pty as u16 & 0x1F) << 5)
    }
}

fn copy_text(dest: &mut [u8], text: &str) -> usize {
    let len = text.len().min(dest.len());
    dest[..len].copy_from_slice(&text.as_bytes()[..len]);
    len
}

/// Block C words for 0A groups: the count word first, then pairs.
fn af_blocks(codes: &[u8]) -> Vec<u16> {
    if codes.is_empty() {
        return vec![AF_NONE];
    }
    let mut words = Vec::with_capacity(codes.len() / 2 + 1);
    words.push(((AF_COUNT_BASE + codes.len() as u8) as u16) << 8 | codes[0] as u16);
    for pair in codes[1..].chunks(2) {
        let second = pair.get(1).copied().unwrap_or(AF_FILLER);
        words.push((pair[0] as u16) << 8 | second as u16);
    }
    words
}

fn pair(text: &[u8], at: usize) -> u16 {
    (text[at] as u16) << 8 | text[at + 1] as u16
}

/// Cycles through 0A, 2A and 10A groups.
pub struct GroupScheduler {
    layout: Layout,
    pending: Option<RdsParams>,
    ps_segment: usize,
    rt_segment: usize,
    ptyn_segment: usize,
    af_index: usize,
    rt_ab: bool,
    ptyn_ab: bool,
    counter: usize,
    rt_text: String,
    ptyn_text: String,
}

impl GroupScheduler {
    pub fn new(params: &RdsParams) -> Self {
        Self {
            layout: Layout::new(params),
            pending: None,
            ps_segment: 0,
            rt_segment: 0,
            ptyn_segment: 0,
            af_index: 0,
            rt_ab: false,
            ptyn_ab: false,
            counter: 0,
            rt_text: params.rt.clone(),
            ptyn_text: params.ptyn.clone(),
        }
    }

    /// Queues new station data for the next group boundary.
    pub fn set_params(&mut self, params: &RdsParams) {
        self.pending = Some(params.clone());
    }

    fn apply_pending(&mut self) {
        let Some(params) = self.pending.take() else {
            return;
        };
        if params.rt != self.rt_text {
            self.rt_ab = !self.rt_ab;
            self.rt_segment = 0;
            self.rt_text = params.rt.clone();
        }
        if params.ptyn != self.ptyn_text {
            self.ptyn_ab = !self.ptyn_ab;
            self.ptyn_segment = 0;
            self.ptyn_text = params.ptyn.clone();
        }
        self.layout = Layout::new(&params);
        self.af_index %= self.layout.af_blocks.len();
    }

    pub fn next_group(&mut self) -> Group {
        self.apply_pending();

        let counter = self.counter;
        self.counter = self.counter.wrapping_add(1);

        if self.layout.ptyn.is_some() && counter % PTYN_INTERVAL == PTYN_INTERVAL - 1 {
            return self.group_10a();
        }
        if counter % 2 == 0 {
            self.group_0a()
        } else {
            self.group_2a()
        }
    }

    fn group_0a(&mut self) -> Group {
        let layout = &self.layout;
        let segment = self.ps_segment;
        self.ps_segment = (segment + 1) % (PS_LENGTH / 2);

        // TA = 0, MS = 1 (music); DI segment 3 carries the stereo flag.
        let di = (segment == 3) as u16;
        let b = layout.block_b(0) | (1 << 3) | (di << 2) | segment as u16;

        let c = layout.af_blocks[self.af_index];
        self.af_index = (self.af_index + 1) % layout.af_blocks.len();

        Group {
            blocks: [layout.pi, b, c, pair(&layout.ps, segment * 2)],
        }
    }

    fn group_2a(&mut self) -> Group {
        let layout = &self.layout;
        let segment = self.rt_segment;
        self.rt_segment = (segment + 1) % layout.rt_segments;

        let b = layout.block_b(2) | ((self.rt_ab as u16) << 4) | segment as u16;
        Group {
            blocks: [
                layout.pi,
                b,
                pair(&layout.rt, segment * 4),
                pair(&layout.rt, segment * 4 + 2),
            ],
        }
    }

    fn group_10a(&mut self) -> Group {
        let layout = &self.layout;
        let ptyn = layout.ptyn.unwrap_or([b' '; PTYN_LENGTH]);
        let segment = self.ptyn_segment;
        self.ptyn_segment = (segment + 1) % 2;

        let b = layout.block_b(10) | ((self.ptyn_ab as u16) << 4) | segment as u16;
        Group {
            blocks: [
                layout.pi,
                b,
                pair(&ptyn, segment * 4),
                pair(&ptyn, segment * 4 + 2),
            ],
        }
    }
}

/// Turns the group stream into a differentially coded biphase baseband in
/// [-1, 1], one symbol per bit period.
pub struct RdsEncoder {
    scheduler: GroupScheduler,
    bits: [u8; GROUP_BITS],
    bit_index: usize,
    previous: u8,
    symbol: f32,
    bit_phase: f64,
    bit_step: f64,
}

impl RdsEncoder {
    pub fn new(params: &RdsParams, sample_rate: u32) -> Self {
        let mut encoder = Self {
            scheduler: GroupScheduler::new(params),
            bits: [0; GROUP_BITS],
            bit_index: GROUP_BITS,
            previous: 0,
            symbol: 0.0,
            bit_phase: 0.0,
            bit_step: BIT_RATE / sample_rate as f64,
        };
        encoder.next_bit();
        encoder
    }

    pub fn set_params(&mut self, params: &RdsParams) {
        self.scheduler.set_params(params);
    }

    fn next_bit(&mut self) {
        if self.bit_index == GROUP_BITS {
            let group = self.scheduler.next_group();
            group.write_bits(&mut self.bits);
            self.bit_index = 0;
        }
        let coded = self.bits[self.bit_index] ^ self.previous;
        self.bit_index += 1;
        self.previous = coded;
        self.symbol = if coded == 1 { 1.0 } else { -1.0 };
    }

    pub fn next_sample(&mut self) -> f32 {
        let value = self.symbol * (TAU * self.bit_phase).sin() as f32;
        self.bit_phase += self.bit_step;
        if self.bit_phase >= 1.0 {
            self.bit_phase -= 1.0;
            self.next_bit();
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(words: &[u16]) -> String {
        words
            .iter()
            .flat_map(|w| [(w >> 8) as u8, *w as u8])
            .map(char::from)
            .collect()
    }

    #[test]
    fn test_first_groups_carry_ps_and_rt() {
        let params = RdsParams {
            pi: 0x1234,
            pty: 10,
            tp: true,
            ..RdsParams::default()
        };
        let mut scheduler = GroupScheduler::new(&params);

        let mut ps = Vec::new();
        let mut rt = Vec::new();
        for _ in 0..8 {
            let group = scheduler.next_group();
            assert_eq!(group.blocks[0], 0x1234);
            assert_eq!((group.blocks[1] >> 10) & 1, 1);
            assert_eq!((group.blocks[1] >> 5) & 0x1F, 10);
            match group.group_type() {
                0 => ps.push(group.blocks[3]),
                2 => rt.extend_from_slice(&group.blocks[2..4]),
                other => panic!("unexpected group type {}", other),
            }
        }

        assert_eq!(text_of(&ps), "Mpxgen  ");
        assert_eq!(&text_of(&rt)[..16], "Mpxgen: FM Stere");
    }

    #[test]
    fn test_short_radiotext_is_terminated() {
        let params = RdsParams {
            rt: "Hi".to_string(),
            ..RdsParams::default()
        };
        let layout = Layout::new(&params);
        assert_eq!(layout.rt_segments, 1);
        assert_eq!(&layout.rt[..4], &[b'H', b'i', RT_END, b' ']);

        let full = RdsParams {
            rt: "x".repeat(RT_LENGTH),
            ..RdsParams::default()
        };
        assert_eq!(Layout::new(&full).rt_segments, 16);
    }

    #[test]
    fn test_af_blocks() {
        assert_eq!(af_blocks(&[]), vec![AF_NONE]);
        assert_eq!(af_blocks(&[110]), vec![(225 << 8) | 110]);
        assert_eq!(
            af_blocks(&[1, 2, 3, 4]),
            vec![(228 << 8) | 1, (2 << 8) | 3, (4 << 8) | AF_FILLER as u16]
        );
    }

    #[test]
    fn test_ptyn_takes_every_fifth_group() {
        let params = RdsParams {
            ptyn: "Jazz".to_string(),
            ..RdsParams::default()
        };
        let mut scheduler = GroupScheduler::new(&params);
        let types: Vec<u8> = (0..10).map(|_| scheduler.next_group().group_type()).collect();
        assert_eq!(types, vec![0, 2, 0, 2, 10, 2, 0, 2, 0, 10]);
    }

    #[test]
    fn test_radiotext_change_flips_ab_flag() {
        let params = RdsParams::default();
        let mut scheduler = GroupScheduler::new(&params);
        scheduler.next_group();
        let before = scheduler.next_group();
        assert_eq!(before.group_type(), 2);

        scheduler.set_params(&RdsParams {
            rt: "News at ten".to_string(),
            ..params.clone()
        });
        scheduler.next_group();
        let after = scheduler.next_group();

        assert_eq!((before.blocks[1] >> 4) & 1, 0);
        assert_eq!((after.blocks[1] >> 4) & 1, 1);
        assert_eq!(after.blocks[1] & 0xF, 0);
        assert_eq!(text_of(&after.blocks[2..4]), "News");
    }

    #[test]
    fn test_biphase_symbols_decode_to_group_bits() {
        let params = RdsParams::default();
        // Eight samples per bit keeps the symbol boundaries exact.
        let rate = (BIT_RATE * 8.0) as u32;
        let mut encoder = RdsEncoder::new(&params, rate);

        let mut expected = [0u8; GROUP_BITS];
        GroupScheduler::new(&params).next_group().write_bits(&mut expected);

        let mut previous = 0u8;
        for &bit in expected.iter() {
            let samples: Vec<f32> = (0..8).map(|_| encoder.next_sample()).collect();
            assert!(samples.iter().all(|s| s.abs() <= 1.0));
            // A positive first half means a +1 symbol.
            let symbol = if samples[2] > 0.0 { 1u8 } else { 0u8 };
            assert_eq!(symbol ^ previous, bit);
            previous = symbol;
        }
    }
}
