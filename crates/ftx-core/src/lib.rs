#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use heapless::Vec;
use serde::{Deserialize, Serialize};

pub const PAYLOAD_BITS: usize = 77;
pub const CRC_BITS: usize = 14;
pub const LDPC_N: usize = 174;
pub const LDPC_K: usize = 91;
pub const LDPC_M: usize = 83;

pub const PAYLOAD_BYTES: usize = 10;
pub const PAYLOAD_CRC_BYTES: usize = 12;
pub const CODEWORD_BYTES: usize = 22;

pub const FT8_SYMBOLS: usize = 79;
pub const FT4_SYMBOLS: usize = 105;
pub const MAX_SYMBOLS: usize = FT4_SYMBOLS;

/// 77 message bits, MSB-first; low 3 bits of byte 9 are zero.
pub type Payload = [u8; PAYLOAD_BYTES];
/// 77 message bits followed by 14 CRC bits; low 5 bits of byte 11 are zero.
pub type PayloadWithCrc = [u8; PAYLOAD_CRC_BYTES];
/// 174 codeword bits; the first 91 equal the payload-with-CRC bits.
pub type Codeword = [u8; CODEWORD_BYTES];
pub type ToneSequence = Vec<u8, MAX_SYMBOLS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Ft8,
    Ft4,
}

impl Mode {
    #[must_use]
    pub fn tone_count(self) -> usize {
        match self {
            Self::Ft8 => 8,
            Self::Ft4 => 4,
        }
    }

    #[must_use]
    pub fn bits_per_symbol(self) -> usize {
        match self {
            Self::Ft8 => 3,
            Self::Ft4 => 2,
        }
    }

    #[must_use]
    pub fn total_symbols(self) -> usize {
        match self {
            Self::Ft8 => FT8_SYMBOLS,
            Self::Ft4 => FT4_SYMBOLS,
        }
    }

    /// Data symbols carrying codeword bits (the rest are sync and ramp).
    #[must_use]
    pub fn data_symbols(self) -> usize {
        match self {
            Self::Ft8 => 58,
            Self::Ft4 => 87,
        }
    }

    #[must_use]
    pub fn symbol_period_s(self) -> f32 {
        match self {
            Self::Ft8 => 0.160,
            Self::Ft4 => 0.048,
        }
    }

    #[must_use]
    pub fn tone_spacing_hz(self) -> f32 {
        1.0 / self.symbol_period_s()
    }

    /// Gaussian pulse shaping bandwidth-time product.
    #[must_use]
    pub fn gaussian_bt(self) -> f32 {
        match self {
            Self::Ft8 => 2.0,
            Self::Ft4 => 1.0,
        }
    }

    #[must_use]
    pub fn slot_s(self) -> f32 {
        match self {
            Self::Ft8 => 15.0,
            Self::Ft4 => 7.5,
        }
    }
}

/// FT8 synchronisation pattern, transmitted at symbol offsets 0, 36 and 72.
pub const FT8_COSTAS: [u8; 7] = [3, 1, 4, 0, 6, 5, 2];
pub const FT8_COSTAS_OFFSETS: [usize; 3] = [0, 36, 72];

/// FT4 synchronisation quartets, one per block, at symbol offsets 1, 34, 67, 100.
pub const FT4_COSTAS: [[u8; 4]; 4] = [[0, 1, 3, 2], [1, 0, 2, 3], [2, 3, 1, 0], [3, 2, 0, 1]];
pub const FT4_COSTAS_OFFSETS: [usize; 4] = [1, 34, 67, 100];

/// FT4 ramp symbols (tone 0) bracket the transmission.
pub const FT4_RAMP_POSITIONS: [usize; 2] = [0, 104];

pub const FT8_GRAY: [u8; 8] = [0, 1, 3, 2, 5, 6, 4, 7];
pub const FT4_GRAY: [u8; 4] = [0, 1, 3, 2];

/// Scrambling sequence XORed over the 77 payload bits before the CRC is
/// attached in FT4. The trailing three bits of the last byte are zero so the
/// unused payload bits stay clear.
pub const FT4_XOR_MASK: [u8; PAYLOAD_BYTES] =
    [0x4A, 0x7E, 0xA5, 0x79, 0x4B, 0x0B, 0x1B, 0x23, 0xAB, 0x98];

pub const CRC_POLYNOMIAL: u16 = 0x2757;

// Character alphabets of the packing scheme. Positions 0..5 of an aligned
// six-character callsign each draw from a fixed set.
pub const CHARSET_FREETEXT: &[u8] = b" 0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ+-./?";
pub const CHARSET_HASH: &[u8] = b" 0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ/";
pub const CHARSET_ALNUM_SPACE: &[u8] = b" 0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const CHARSET_ALNUM: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const CHARSET_DIGIT: &[u8] = b"0123456789";
pub const CHARSET_LETTER_SPACE: &[u8] = b" ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Reserved token count of the 28-bit callsign field (DE, QRZ, CQ and the
/// numeric/alphabetic CQ sub-forms).
pub const NTOKENS: u32 = 2_063_592;
/// Size of the 22-bit hash range that follows the tokens.
pub const MAX22: u32 = 4_194_304;
/// Largest packed four-character locator; greater values carry reports and
/// acknowledgement tokens.
pub const MAXGRID4: u16 = 32_400;

#[must_use]
pub fn charset_index(charset: &[u8], c: u8) -> Option<usize> {
    charset.iter().position(|&x| x == c)
}

#[must_use]
pub fn bit_get(bytes: &[u8], idx: usize) -> bool {
    (bytes[idx / 8] >> (7 - idx % 8)) & 1 == 1
}

pub fn bit_set(bytes: &mut [u8], idx: usize, value: bool) {
    let mask = 0x80u8 >> (idx % 8);
    if value {
        bytes[idx / 8] |= mask;
    } else {
        bytes[idx / 8] &= !mask;
    }
}

/// Write `width` bits of `value` (LSB-aligned) at bit offset `start`, MSB first.
pub fn pack_field(bytes: &mut [u8], start: usize, width: usize, value: u64) {
    debug_assert!(width <= 64);
    for k in 0..width {
        bit_set(bytes, start + k, (value >> (width - 1 - k)) & 1 == 1);
    }
}

/// Read `width` bits at bit offset `start` as an LSB-aligned integer.
#[must_use]
pub fn unpack_field(bytes: &[u8], start: usize, width: usize) -> u64 {
    debug_assert!(width <= 64);
    let mut value = 0u64;
    for k in 0..width {
        value = (value << 1) | u64::from(bit_get(bytes, start + k));
    }
    value
}

/// Expand `bit_len` MSB-first bits into one byte per bit.
#[cfg(feature = "std")]
#[must_use]
pub fn unpack_bits(bytes: &[u8], bit_len: usize) -> std::vec::Vec<u8> {
    let mut out = std::vec![0u8; bit_len];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u8::from(bit_get(bytes, i));
    }
    out
}

/// Pack one-byte-per-bit values MSB-first into bytes.
#[cfg(feature = "std")]
#[must_use]
pub fn pack_bits(bits: &[u8]) -> std::vec::Vec<u8> {
    let mut out = std::vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit & 1 == 1 {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
    out
}

/// Spectrogram geometry. `nstep` is the hop between FFT frames in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectrumProfile {
    pub nfft: usize,
    pub nstep: usize,
}

impl Default for SpectrumProfile {
    fn default() -> Self {
        Self {
            nfft: 2048,
            nstep: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodeProfile {
    pub freq_min_hz: f32,
    pub freq_max_hz: f32,
    /// Coarse sync score floor; candidates below it are never evaluated.
    pub sync_min_score: f32,
    pub max_candidates: usize,
    pub ldpc_max_iterations: usize,
}

impl Default for DecodeProfile {
    fn default() -> Self {
        Self {
            freq_min_hz: 50.0,
            freq_max_hz: 2500.0,
            sync_min_score: 1.0,
            max_candidates: 120,
            ldpc_max_iterations: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_accessors_are_consistent() {
        for mode in [Mode::Ft8, Mode::Ft4] {
            assert_eq!(1usize << mode.bits_per_symbol(), mode.tone_count());
            let sync = match mode {
                Mode::Ft8 => 3 * FT8_COSTAS.len(),
                Mode::Ft4 => 4 * 4 + FT4_RAMP_POSITIONS.len(),
            };
            assert_eq!(mode.data_symbols() + sync, mode.total_symbols());
            assert!(mode.total_symbols() <= MAX_SYMBOLS);
        }
    }

    #[test]
    fn costas_tones_are_in_range() {
        assert!(FT8_COSTAS.iter().all(|&t| t < 8));
        for quartet in FT4_COSTAS {
            assert!(quartet.iter().all(|&t| t < 4));
        }
    }

    #[test]
    fn gray_maps_are_permutations() {
        let mut seen8 = [false; 8];
        for &t in &FT8_GRAY {
            seen8[t as usize] = true;
        }
        assert!(seen8.iter().all(|&s| s));

        let mut seen4 = [false; 4];
        for &t in &FT4_GRAY {
            seen4[t as usize] = true;
        }
        assert!(seen4.iter().all(|&s| s));
    }

    #[test]
    fn ft4_mask_leaves_padding_clear() {
        // Bits 77..79 must stay zero after masking a valid payload.
        assert_eq!(FT4_XOR_MASK[PAYLOAD_BYTES - 1] & 0x07, 0);
    }

    #[test]
    fn field_round_trip() {
        let mut buf = [0u8; PAYLOAD_BYTES];
        let value = 0x1234_5678u64 & ((1u64 << 29) - 1);
        pack_field(&mut buf, 3, 29, value);
        pack_field(&mut buf, 32, 16, 0xBEEF);
        assert_eq!(unpack_field(&buf, 3, 29), value);
        assert_eq!(unpack_field(&buf, 32, 16), 0xBEEF);
    }

    #[test]
    fn bit_helpers_match_msb_first_layout() {
        let mut buf = [0u8; 2];
        bit_set(&mut buf, 0, true);
        bit_set(&mut buf, 9, true);
        assert_eq!(buf, [0x80, 0x40]);
        assert!(bit_get(&buf, 0));
        assert!(!bit_get(&buf, 8));
        assert!(bit_get(&buf, 9));
    }

    #[test]
    fn pack_unpack_bits_round_trip() {
        let bytes = [0xA5u8, 0x0F, 0x80];
        let bits = unpack_bits(&bytes, 17);
        assert_eq!(bits.len(), 17);
        assert_eq!(&bits[..8], &[1, 0, 1, 0, 0, 1, 0, 1]);
        let packed = pack_bits(&bits);
        assert_eq!(packed, [0xA5, 0x0F, 0x80]);
    }

    #[test]
    fn charset_lookup() {
        assert_eq!(charset_index(CHARSET_FREETEXT, b' '), Some(0));
        assert_eq!(charset_index(CHARSET_FREETEXT, b'?'), Some(41));
        assert_eq!(charset_index(CHARSET_DIGIT, b'A'), None);
        assert_eq!(CHARSET_FREETEXT.len(), 42);
        assert_eq!(CHARSET_HASH.len(), 38);
        assert_eq!(CHARSET_ALNUM_SPACE.len(), 37);
        assert_eq!(CHARSET_ALNUM.len(), 36);
        assert_eq!(CHARSET_LETTER_SPACE.len(), 27);
    }
}
