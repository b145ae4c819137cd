use std::cmp::Ordering;
use std::collections::HashSet;

use ftx_core::{
    DecodeProfile, Mode, Payload, FT4_COSTAS, FT4_COSTAS_OFFSETS, FT4_GRAY, FT4_XOR_MASK,
    FT8_COSTAS, FT8_COSTAS_OFFSETS, FT8_GRAY, LDPC_N,
};
use ftx_fec::{crc_strip, decode_message};
use ftx_hash::CallsignStore;
use ftx_msg::Message;
use log::{debug, trace};
use rayon::prelude::*;

use crate::modulator::{encode_ft4, encode_ft8};
use crate::waterfall::Waterfall;

/// A sync hit surviving the coarse Costas search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Start of the transmission in waterfall time blocks; may be negative
    /// when the signal began before the capture window.
    pub time_block: i32,
    pub freq_bin: usize,
    pub score: f32,
}

/// A successfully decoded transmission.
#[derive(Debug, Clone)]
pub struct Decode {
    pub message: Message,
    pub text: String,
    pub payload: Payload,
    pub freq_hz: f32,
    pub time_s: f32,
    pub snr_db: f32,
    pub sync_score: f32,
}

/// Mode geometry resolved against one waterfall. Symbol period and tone
/// spacing generally do not divide the hop and bin sizes, so positions are
/// rounded per lookup.
struct Geometry {
    mode: Mode,
    sym_blocks: f32,
    tone_bins: Vec<usize>,
    span_bins: usize,
    total_blocks: usize,
    sync_symbols: Vec<(usize, u8)>,
}

impl Geometry {
    fn new(mode: Mode, wf: &Waterfall) -> Self {
        let sym_blocks = mode.symbol_period_s() / wf.step_s();
        let tone_bins: Vec<usize> = (0..mode.tone_count())
            .map(|t| (t as f32 * mode.tone_spacing_hz() / wf.bin_hz()).round() as usize)
            .collect();
        let span_bins = *tone_bins.last().expect("at least two tones");

        let sync_symbols = match mode {
            Mode::Ft8 => FT8_COSTAS_OFFSETS
                .iter()
                .flat_map(|&off| FT8_COSTAS.iter().enumerate().map(move |(k, &t)| (off + k, t)))
                .collect(),
            Mode::Ft4 => FT4_COSTAS_OFFSETS
                .iter()
                .zip(FT4_COSTAS.iter())
                .flat_map(|(&off, quartet)| {
                    quartet.iter().enumerate().map(move |(k, &t)| (off + k, t))
                })
                .collect(),
        };

        Self {
            mode,
            sym_blocks,
            tone_bins,
            span_bins,
            total_blocks: (mode.total_symbols() as f32 * sym_blocks).round() as usize,
            sync_symbols,
        }
    }

    fn block_of(&self, t0: i32, symbol: usize) -> i32 {
        t0 + (symbol as f32 * self.sym_blocks).round() as i32
    }

    fn symbol_step(&self) -> i32 {
        (self.sym_blocks.round() as i32).max(1)
    }
}

/// Codeword symbol positions skip the sync blocks.
fn data_symbol_position(mode: Mode, k: usize) -> usize {
    match mode {
        Mode::Ft8 => k + if k < 29 { 7 } else { 14 },
        Mode::Ft4 => {
            k + if k < 29 {
                5
            } else if k < 58 {
                9
            } else {
                13
            }
        }
    }
}

/// Costas correlation at one (time, frequency) grid point: mean over the sync
/// symbols of the on-tone magnitude minus the mean off-tone magnitude, which
/// cancels wideband interferers.
fn sync_score(wf: &Waterfall, geom: &Geometry, t0: i32, f0: usize) -> f32 {
    let tones = geom.tone_bins.len();
    let mut score = 0.0f32;
    let mut scored = 0u32;

    for &(symbol, tone) in &geom.sync_symbols {
        let block = geom.block_of(t0, symbol);
        if block < 0 || block as usize >= wf.num_blocks() {
            continue;
        }
        let block = block as usize;
        let on = wf.mag_at(block, f0 + geom.tone_bins[usize::from(tone)]);
        let mut off = 0.0f32;
        for (t, &bin) in geom.tone_bins.iter().enumerate() {
            if t != usize::from(tone) {
                off += wf.mag_at(block, f0 + bin);
            }
        }
        score += on - off / (tones - 1) as f32;
        scored += 1;
    }

    if scored == 0 {
        f32::MIN
    } else {
        score / scored as f32
    }
}

fn search_candidates(wf: &Waterfall, geom: &Geometry, profile: &DecodeProfile) -> Vec<Candidate> {
    let t_step = geom.symbol_step();
    let bin_lo = (profile.freq_min_hz / wf.bin_hz()).ceil() as usize;
    let bin_hi = ((profile.freq_max_hz / wf.bin_hz()).floor() as usize)
        .min(wf.num_bins().saturating_sub(geom.span_bins + 1));
    if bin_lo > bin_hi {
        return Vec::new();
    }

    // Allow transmissions that straddle either edge by two symbols.
    let t_lo = -2 * t_step;
    let t_hi = wf.num_blocks() as i32 - geom.total_blocks as i32 + 2 * t_step;

    let mut raw = Vec::new();
    let mut t0 = t_lo;
    while t0 <= t_hi {
        for f0 in bin_lo..=bin_hi {
            let score = sync_score(wf, geom, t0, f0);
            if score >= profile.sync_min_score {
                raw.push(Candidate {
                    time_block: t0,
                    freq_bin: f0,
                    score,
                });
            }
        }
        t0 += t_step;
    }

    // Non-maximum suppression over a one-symbol, one-bin neighbourhood.
    raw.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut kept: Vec<Candidate> = Vec::new();
    for c in raw {
        let suppressed = kept.iter().any(|k| {
            (c.time_block - k.time_block).abs() <= t_step
                && c.freq_bin.abs_diff(k.freq_bin) <= 1
        });
        if !suppressed {
            kept.push(c);
            if kept.len() == profile.max_candidates {
                break;
            }
        }
    }
    kept
}

/// Coarse Costas sync search over the configured band.
#[must_use]
pub fn find_candidates(wf: &Waterfall, mode: Mode, profile: &DecodeProfile) -> Vec<Candidate> {
    search_candidates(wf, &Geometry::new(mode, wf), profile)
}

/// Per-bit soft metrics for every data symbol of a candidate; positive values
/// favour a one bit. Symbols outside the waterfall contribute erasures.
fn extract_llrs(wf: &Waterfall, geom: &Geometry, candidate: &Candidate) -> Vec<f32> {
    let mode = geom.mode;
    let bits_per_symbol = mode.bits_per_symbol();
    let tones = mode.tone_count();
    let gray: &[u8] = match mode {
        Mode::Ft8 => &FT8_GRAY,
        Mode::Ft4 => &FT4_GRAY,
    };

    let mut llr = vec![0.0f32; LDPC_N];
    let mut magnitudes = [0.0f32; 8];

    for k in 0..mode.data_symbols() {
        let block = geom.block_of(candidate.time_block, data_symbol_position(mode, k));
        if block < 0 || block as usize >= wf.num_blocks() {
            continue;
        }
        let block = block as usize;

        // Index magnitudes by bit pattern: the Gray map gives the tone that
        // carries each pattern.
        for (pattern, &tone) in gray.iter().enumerate() {
            magnitudes[pattern] =
                wf.mag_at(block, candidate.freq_bin + geom.tone_bins[usize::from(tone)]);
        }

        for bit in 0..bits_per_symbol {
            let shift = bits_per_symbol - 1 - bit;
            let mut best_one = f32::MIN;
            let mut best_zero = f32::MIN;
            for (pattern, &m) in magnitudes.iter().enumerate().take(tones) {
                if (pattern >> shift) & 1 == 1 {
                    best_one = best_one.max(m);
                } else {
                    best_zero = best_zero.max(m);
                }
            }
            llr[k * bits_per_symbol + bit] = best_one - best_zero;
        }
    }
    llr
}

/// Rescale the soft metrics to the decoder's operating variance.
fn normalize_llrs(llr: &mut [f32]) {
    let n = llr.len() as f32;
    let sum: f32 = llr.iter().sum();
    let sum2: f32 = llr.iter().map(|x| x * x).sum();
    let variance = (sum2 - sum * sum / n) / n;
    if variance > f32::EPSILON {
        let scale = (24.0 / variance).sqrt();
        for x in llr.iter_mut() {
            *x *= scale;
        }
    }
}

/// On-tone signal power against the power two bins outside the occupied
/// band, in dB, clamped to the conventional reporting range.
fn estimate_snr(wf: &Waterfall, geom: &Geometry, candidate: &Candidate, tones: &[u8]) -> f32 {
    let mut signal = 0.0f64;
    let mut signal_n = 0u32;
    let mut noise = 0.0f64;
    let mut noise_n = 0u32;

    for (i, &tone) in tones.iter().enumerate() {
        let block = geom.block_of(candidate.time_block, i);
        if block < 0 || block as usize >= wf.num_blocks() {
            continue;
        }
        let block = block as usize;
        signal += f64::from(wf.power_at(block, candidate.freq_bin + geom.tone_bins[usize::from(tone)]));
        signal_n += 1;

        let below = candidate.freq_bin as i64 - 2;
        let above = (candidate.freq_bin + geom.span_bins + 2) as i64;
        for neighbour in [below, above] {
            if neighbour >= 0 && (neighbour as usize) < wf.num_bins() {
                noise += f64::from(wf.power_at(block, neighbour as usize));
                noise_n += 1;
            }
        }
    }

    if signal_n == 0 || noise_n == 0 {
        return -24.0;
    }
    let ratio = (signal / f64::from(signal_n)).max(1e-12) / (noise / f64::from(noise_n)).max(1e-12);
    (10.0 * ratio.log10() as f32).clamp(-24.0, 24.0)
}

fn evaluate_candidate(
    wf: &Waterfall,
    geom: &Geometry,
    profile: &DecodeProfile,
    store: &dyn CallsignStore,
    candidate: &Candidate,
) -> Option<Decode> {
    let mut llr = extract_llrs(wf, geom, candidate);
    normalize_llrs(&mut llr);

    let message = match decode_message(&llr, profile.ldpc_max_iterations) {
        Ok(message) => message,
        Err(err) => {
            trace!(
                "candidate t={} f={} rejected: {err}",
                candidate.time_block,
                candidate.freq_bin
            );
            return None;
        }
    };

    let mut payload = crc_strip(&message);
    if geom.mode == Mode::Ft4 {
        for (byte, mask) in payload.iter_mut().zip(FT4_XOR_MASK) {
            *byte ^= mask;
        }
    }

    let parsed = match ftx_msg::unpack(&payload, store) {
        Ok(parsed) => parsed,
        Err(err) => {
            trace!(
                "candidate t={} f={} unpack failed: {err}",
                candidate.time_block,
                candidate.freq_bin
            );
            return None;
        }
    };

    let tones = match geom.mode {
        Mode::Ft8 => encode_ft8(&payload),
        Mode::Ft4 => encode_ft4(&payload),
    };

    Some(Decode {
        text: parsed.to_string(),
        message: parsed,
        payload,
        freq_hz: candidate.freq_bin as f32 * wf.bin_hz(),
        time_s: candidate.time_block as f32 * wf.step_s(),
        snr_db: estimate_snr(wf, geom, candidate, &tones),
        sync_score: candidate.score,
    })
}

fn decode_mode(
    mode: Mode,
    wf: &Waterfall,
    profile: &DecodeProfile,
    store: &dyn CallsignStore,
) -> Vec<Decode> {
    let geom = Geometry::new(mode, wf);
    if wf.num_bins() <= geom.span_bins + 1 {
        return Vec::new();
    }

    let candidates = search_candidates(wf, &geom, profile);
    debug!(
        "{mode:?}: {} candidates above score {}",
        candidates.len(),
        profile.sync_min_score
    );

    let mut decodes: Vec<Decode> = candidates
        .par_iter()
        .filter_map(|c| evaluate_candidate(wf, &geom, profile, store, c))
        .collect();

    // The same transmission often clears sync at more than one grid point;
    // keep the strongest instance of each payload.
    decodes.sort_by(|a, b| {
        b.sync_score
            .partial_cmp(&a.sync_score)
            .unwrap_or(Ordering::Equal)
    });
    let mut seen: HashSet<Payload> = HashSet::new();
    let mut unique: Vec<Decode> = decodes
        .into_iter()
        .filter(|d| seen.insert(d.payload))
        .collect();
    unique.sort_by(|a, b| a.freq_hz.partial_cmp(&b.freq_hz).unwrap_or(Ordering::Equal));

    debug!("{mode:?}: {} unique decodes", unique.len());
    unique
}

/// Decode every FT8 transmission found in a waterfall.
#[must_use]
pub fn decode_ft8(wf: &Waterfall, profile: &DecodeProfile, store: &dyn CallsignStore) -> Vec<Decode> {
    decode_mode(Mode::Ft8, wf, profile, store)
}

/// Decode every FT4 transmission found in a waterfall.
#[must_use]
pub fn decode_ft4(wf: &Waterfall, profile: &DecodeProfile, store: &dyn CallsignStore) -> Vec<Decode> {
    decode_mode(Mode::Ft4, wf, profile, store)
}
