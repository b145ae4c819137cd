use std::f32::consts::PI;

use ftx_core::{
    bit_get, Mode, Payload, ToneSequence, FT4_COSTAS, FT4_COSTAS_OFFSETS, FT4_GRAY, FT4_SYMBOLS,
    FT4_XOR_MASK, FT8_COSTAS, FT8_COSTAS_OFFSETS, FT8_GRAY, FT8_SYMBOLS,
};
use ftx_fec::{crc_append, ldpc_encode};

use crate::PhyError;

/// pi * sqrt(2 / ln 2), the Gaussian pulse shape constant.
const GFSK_K: f32 = 5.336_446;

/// Map a payload onto the 79 FT8 channel symbols: Costas sync at offsets
/// 0, 36 and 72, Gray-coded codeword triplets elsewhere.
#[must_use]
pub fn encode_ft8(payload: &Payload) -> ToneSequence {
    let codeword = ldpc_encode(&crc_append(payload));
    let mut tones = ToneSequence::new();
    let mut bit = 0usize;
    for i in 0..FT8_SYMBOLS {
        let tone = if let Some(&off) = FT8_COSTAS_OFFSETS
            .iter()
            .find(|&&off| (off..off + FT8_COSTAS.len()).contains(&i))
        {
            FT8_COSTAS[i - off]
        } else {
            let mut b3 = 0usize;
            for _ in 0..3 {
                b3 = b3 << 1 | usize::from(bit_get(&codeword, bit));
                bit += 1;
            }
            FT8_GRAY[b3]
        };
        tones.push(tone).expect("ft8 fits the tone buffer");
    }
    tones
}

/// Map a payload onto the 105 FT4 channel symbols. The payload is scrambled
/// before the CRC is attached; ramp symbols bracket four sync quartets.
#[must_use]
pub fn encode_ft4(payload: &Payload) -> ToneSequence {
    let mut masked = *payload;
    for (byte, mask) in masked.iter_mut().zip(FT4_XOR_MASK) {
        *byte ^= mask;
    }
    let codeword = ldpc_encode(&crc_append(&masked));

    let mut tones = ToneSequence::new();
    let mut bit = 0usize;
    for i in 0..FT4_SYMBOLS {
        let tone = if i == 0 || i == FT4_SYMBOLS - 1 {
            0
        } else if let Some(block) = FT4_COSTAS_OFFSETS
            .iter()
            .position(|&off| (off..off + 4).contains(&i))
        {
            FT4_COSTAS[block][i - FT4_COSTAS_OFFSETS[block]]
        } else {
            let mut b2 = 0usize;
            for _ in 0..2 {
                b2 = b2 << 1 | usize::from(bit_get(&codeword, bit));
                bit += 1;
            }
            FT4_GRAY[b2]
        };
        tones.push(tone).expect("ft4 fits the tone buffer");
    }
    tones
}

/// Gaussian frequency pulse, truncated to three symbol periods.
#[must_use]
pub fn gfsk_pulse(samples_per_symbol: usize, bt: f32) -> Vec<f32> {
    let mut pulse = vec![0.0f32; 3 * samples_per_symbol];
    for (i, p) in pulse.iter_mut().enumerate() {
        let t = i as f32 / samples_per_symbol as f32 - 1.5;
        let arg1 = GFSK_K * bt * (t + 0.5);
        let arg2 = GFSK_K * bt * (t - 0.5);
        *p = (libm::erff(arg1) - libm::erff(arg2)) / 2.0;
    }
    pulse
}

/// Synthesize a continuous-phase GFSK baseband waveform. Tone zero sits at
/// `f0_hz`; adjacent tones are one symbol rate apart (modulation index one).
pub fn synthesize_gfsk(
    tones: &[u8],
    f0_hz: f32,
    bt: f32,
    symbol_period_s: f32,
    sample_rate_hz: f32,
) -> Result<Vec<f32>, PhyError> {
    if tones.is_empty() || !(sample_rate_hz > 0.0) || !(symbol_period_s > 0.0) || !(f0_hz >= 0.0) {
        return Err(PhyError::InvalidInput);
    }
    let n_spsym = (0.5 + sample_rate_hz * symbol_period_s) as usize;
    if n_spsym == 0 {
        return Err(PhyError::InvalidInput);
    }
    let n_sym = tones.len();
    let n_wave = n_sym * n_spsym;
    let dphi_peak = 2.0 * PI / n_spsym as f32;

    // Smoothed phase-increment track, one dummy symbol on either side so the
    // pulse tails stay defined at the boundaries.
    let mut dphi = vec![2.0 * PI * f0_hz / sample_rate_hz; n_wave + 2 * n_spsym];
    let pulse = gfsk_pulse(n_spsym, bt);

    for (i, &tone) in tones.iter().enumerate() {
        let base = i * n_spsym;
        for (j, &p) in pulse.iter().enumerate() {
            dphi[base + j] += dphi_peak * f32::from(tone) * p;
        }
    }
    for j in 0..2 * n_spsym {
        dphi[j] += dphi_peak * pulse[j + n_spsym] * f32::from(tones[0]);
        dphi[j + n_wave] += dphi_peak * pulse[j] * f32::from(tones[n_sym - 1]);
    }

    let mut signal = vec![0.0f32; n_wave];
    let mut phi = 0.0f32;
    for (k, sample) in signal.iter_mut().enumerate() {
        *sample = phi.sin();
        phi += dphi[k + n_spsym];
        if phi > PI {
            phi -= 2.0 * PI;
        }
    }

    // Raised-cosine key clicks suppression on the first and last symbol.
    let n_ramp = n_spsym / 8;
    for i in 0..n_ramp {
        let env = (1.0 - (PI * i as f32 / n_ramp as f32).cos()) / 2.0;
        signal[i] *= env;
        signal[n_wave - 1 - i] *= env;
    }
    Ok(signal)
}

/// Full transmit chain: payload to baseband samples.
pub fn modulate(
    mode: Mode,
    payload: &Payload,
    f0_hz: f32,
    sample_rate_hz: f32,
) -> Result<Vec<f32>, PhyError> {
    let tones = match mode {
        Mode::Ft8 => encode_ft8(payload),
        Mode::Ft4 => encode_ft4(payload),
    };
    synthesize_gfsk(
        &tones,
        f0_hz,
        mode.gaussian_bt(),
        mode.symbol_period_s(),
        sample_rate_hz,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftx_hash::CallsignHashTable;

    fn payload_for(text: &str) -> Payload {
        let store = CallsignHashTable::new();
        ftx_msg::pack(&ftx_msg::parse(text), &store).expect("pack ok")
    }

    #[test]
    fn ft8_costas_blocks_are_fixed() {
        let tones = encode_ft8(&payload_for("CQ K1ABC FN42"));
        assert_eq!(tones.len(), FT8_SYMBOLS);
        for off in FT8_COSTAS_OFFSETS {
            assert_eq!(&tones[off..off + 7], &FT8_COSTAS, "costas at {off}");
        }
        assert!(tones.iter().all(|&t| t < 8));
    }

    #[test]
    fn ft4_frame_structure() {
        let tones = encode_ft4(&payload_for("K1ABC W9XYZ 73"));
        assert_eq!(tones.len(), FT4_SYMBOLS);
        assert_eq!(tones[0], 0);
        assert_eq!(tones[FT4_SYMBOLS - 1], 0);
        for (block, &off) in FT4_COSTAS_OFFSETS.iter().enumerate() {
            assert_eq!(&tones[off..off + 4], &FT4_COSTAS[block], "quartet {block}");
        }
        assert!(tones.iter().all(|&t| t < 4));
    }

    #[test]
    fn ft4_scrambling_changes_data_symbols() {
        // Same payload, but FT4 scrambles before the CRC, so the data tones
        // cannot simply be the FT8 triplet stream reinterpreted.
        let payload = payload_for("K1ABC W9XYZ 73");
        let ft4 = encode_ft4(&payload);

        let mut unmasked = payload;
        for (byte, mask) in unmasked.iter_mut().zip(FT4_XOR_MASK) {
            *byte ^= mask;
        }
        assert_ne!(encode_ft4(&unmasked)[5..34], ft4[5..34]);
    }

    #[test]
    fn pulse_is_normalised_and_symmetric() {
        let n = 128;
        let pulse = gfsk_pulse(n, 2.0);
        assert_eq!(pulse.len(), 3 * n);
        // Unit plateau in the centre, symmetric tails (sample i sits at
        // -t of sample 3n-i).
        assert!((pulse[3 * n / 2] - 1.0).abs() < 1e-3);
        for i in 1..n {
            assert!((pulse[i] - pulse[3 * n - i]).abs() < 1e-5, "tail {i}");
        }
        let sum: f32 = pulse.iter().sum();
        assert!((sum / n as f32 - 1.0).abs() < 1e-2, "area {sum}");
    }

    #[test]
    fn waveform_length_rms_and_envelope() {
        let tones = encode_ft8(&payload_for("CQ K1ABC FN42"));
        let signal = synthesize_gfsk(&tones, 1500.0, 2.0, 0.160, 12_000.0).expect("synth ok");
        assert_eq!(signal.len(), 79 * 1920);

        let rms = (signal.iter().map(|s| s * s).sum::<f32>() / signal.len() as f32).sqrt();
        assert!(rms > 0.0 && rms <= 1.0, "rms {rms}");
        assert!(signal.iter().all(|s| s.abs() <= 1.0));

        // The keying envelope starts silent and grows monotonically.
        let ramp = 1920 / 8;
        assert!(signal[0].abs() < 1e-6);
        let early: f32 = signal[..ramp / 4].iter().map(|s| s.abs()).fold(0.0, f32::max);
        let late: f32 = signal[ramp..2 * ramp].iter().map(|s| s.abs()).fold(0.0, f32::max);
        assert!(early < late);
    }

    #[test]
    fn phase_is_continuous() {
        let tones = encode_ft8(&payload_for("CQ K1ABC FN42"));
        let signal = synthesize_gfsk(&tones, 1500.0, 2.0, 0.160, 12_000.0).expect("synth ok");
        // At 1500 Hz and 12 kHz sampling the phase advances well under pi per
        // sample, so adjacent samples cannot jump across the full range.
        for pair in signal.windows(2) {
            assert!((pair[1] - pair[0]).abs() < 1.2, "discontinuity");
        }
    }

    #[test]
    fn empty_tone_sequence_is_rejected() {
        assert_eq!(
            synthesize_gfsk(&[], 1500.0, 2.0, 0.160, 12_000.0),
            Err(PhyError::InvalidInput)
        );
        assert_eq!(
            synthesize_gfsk(&[1, 2], 1500.0, 2.0, 0.160, 0.0),
            Err(PhyError::InvalidInput)
        );
    }
}
