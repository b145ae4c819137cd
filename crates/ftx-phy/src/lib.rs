#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]

use thiserror::Error;

mod decoder;
mod modulator;
mod waterfall;

pub use decoder::{decode_ft4, decode_ft8, find_candidates, Candidate, Decode};
pub use modulator::{encode_ft4, encode_ft8, gfsk_pulse, modulate, synthesize_gfsk};
pub use waterfall::{build_spectrogram, SpectrumAnalyzer, Waterfall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PhyError {
    #[error("invalid input")]
    InvalidInput,
    #[error("input shorter than one transform frame")]
    InputTooShort,
}
