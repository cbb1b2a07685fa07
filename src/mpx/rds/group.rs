/// Generator polynomial x^10 + x^8 + x^7 + x^5 + x^4 + x^3 + 1.
const POLY: u16 = 0x5B9;
const CHECK_BITS: u32 = 10;
const CHECK_MASK: u16 = (1 << CHECK_BITS) - 1;

/// Offset words for blocks A, B, C and D.
const OFFSETS: [u16; 4] = [0x0FC, 0x198, 0x168, 0x1B4];

pub const BLOCK_BITS: usize = 26;
pub const GROUP_BITS: usize = 4 * BLOCK_BITS;

/// Ten-bit CRC of one 16-bit information word.
pub fn checkword(data: u16) -> u16 {
    let mut reg: u16 = 0;
    for i in (0..16).rev() {
        let bit = (data >> i) & 1;
        let msb = (reg >> (CHECK_BITS - 1)) & 1;
        reg = (reg << 1) & CHECK_MASK;
        if msb ^ bit != 0 {
            reg ^= POLY & CHECK_MASK;
        }
    }
    reg
}

/// Four information words; the group type lives in block B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
    pub blocks: [u16; 4],
}

impl Group {
    pub fn group_type(&self) -> u8 {
        (self.blocks[1] >> 12) as u8
    }

    /// Serializes the group MSB first, each block followed by its
    /// offset-masked checkword.
    pub fn write_bits(&self, bits: &mut [u8; GROUP_BITS]) {
        let mut out = bits.iter_mut();
        for (&block, &offset) in self.blocks.iter().zip(OFFSETS.iter()) {
            let check = checkword(block) ^ offset;
            let word = ((block as u32) << CHECK_BITS) | check as u32;
            for i in (0..BLOCK_BITS).rev() {
                if let Some(bit) = out.next() {
                    *bit = ((word >> i) & 1) as u8;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Remainder of a 26-bit codeword divided by the generator.
    fn syndrome(word: u32) -> u32 {
        let generator = POLY as u32;
        let mut rem = word;
        for shift in (0..16).rev() {
            if rem & (1 << (shift + CHECK_BITS)) != 0 {
                rem ^= generator << shift;
            }
        }
        rem
    }

    #[test]
    fn test_codewords_divide_by_generator() {
        for data in [0x0000u16, 0x0001, 0x1000, 0x2345, 0xABCD, 0xFFFF] {
            let word = ((data as u32) << CHECK_BITS) | checkword(data) as u32;
            assert_eq!(syndrome(word), 0, "data {:#06x}", data);
        }
    }

    #[test]
    fn test_write_bits_applies_offsets() {
        let group = Group {
            blocks: [0x1000, 0x0408, 0xE0CD, 0x4D70],
        };
        let mut bits = [0u8; GROUP_BITS];
        group.write_bits(&mut bits);

        for (n, &offset) in OFFSETS.iter().enumerate() {
            let word = bits[n * BLOCK_BITS..(n + 1) * BLOCK_BITS]
                .iter()
                .fold(0u32, |acc, &bit| (acc << 1) | bit as u32);
            assert_eq!((word >> CHECK_BITS) as u16, group.blocks[n]);
            // Removing the offset leaves a valid codeword.
            assert_eq!(syndrome(word ^ offset as u32), 0);
        }
        assert_eq!(group.group_type(), 0);
    }
}
