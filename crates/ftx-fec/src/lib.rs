use std::sync::OnceLock;

use ftx_core::{
    bit_get, bit_set, pack_field, unpack_field, Codeword, Payload, PayloadWithCrc, CRC_BITS,
    CRC_POLYNOMIAL, LDPC_K, LDPC_M, LDPC_N, PAYLOAD_BITS,
};
use thiserror::Error;

mod tables;

use tables::{CHECK_ROW_VARS, GENERATOR_ROWS_HEX};

/// The CRC runs over the payload plus five zero bits.
const CRC_SPAN_BITS: usize = PAYLOAD_BITS + 5;

/// Belief-propagation operating limits from the reference decoders.
const LLR_CLAMP: f32 = 20.0;
const TANH_CLAMP: f32 = 0.999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FecError {
    #[error("invalid length")]
    InvalidLength,
    #[error("decoding failed")]
    DecodingFailed,
    #[error("crc mismatch")]
    CrcMismatch,
}

/// CRC-14, polynomial 0x2757, zero initial remainder, no reflection, over
/// `nbits` MSB-first bits.
#[must_use]
pub fn crc14(bytes: &[u8], nbits: usize) -> u16 {
    let mut rem: u16 = 0;
    for i in 0..nbits {
        rem ^= u16::from(bit_get(bytes, i)) << (CRC_BITS - 1);
        rem = if rem & (1u16 << (CRC_BITS - 1)) != 0 {
            (rem << 1) ^ CRC_POLYNOMIAL
        } else {
            rem << 1
        };
    }
    rem & 0x3FFF
}

/// Attach the CRC to a 77-bit payload, yielding the 91-bit codec input.
#[must_use]
pub fn crc_append(payload: &Payload) -> PayloadWithCrc {
    let mut out = PayloadWithCrc::default();
    out[..payload.len()].copy_from_slice(payload);
    out[9] &= 0xF8;
    let crc = crc14(&out, CRC_SPAN_BITS);
    pack_field(&mut out, PAYLOAD_BITS, CRC_BITS, u64::from(crc));
    out
}

#[must_use]
pub fn crc_check(message: &PayloadWithCrc) -> bool {
    let mut scratch = PayloadWithCrc::default();
    scratch[..10].copy_from_slice(&message[..10]);
    scratch[9] &= 0xF8;
    let computed = crc14(&scratch, CRC_SPAN_BITS);
    let received = unpack_field(message, PAYLOAD_BITS, CRC_BITS) as u16;
    computed == received
}

/// Strip a verified 91-bit message back to its payload.
#[must_use]
pub fn crc_strip(message: &PayloadWithCrc) -> Payload {
    let mut payload = Payload::default();
    payload.copy_from_slice(&message[..10]);
    payload[9] &= 0xF8;
    payload
}

fn parity8(mut x: u8) -> u8 {
    x ^= x >> 4;
    x ^= x >> 2;
    x ^= x >> 1;
    x & 1
}

fn generator() -> &'static [[u8; 12]; LDPC_M] {
    static ROWS: OnceLock<[[u8; 12]; LDPC_M]> = OnceLock::new();
    ROWS.get_or_init(|| {
        let mut rows = [[0u8; 12]; LDPC_M];
        for (row, hex) in rows.iter_mut().zip(GENERATOR_ROWS_HEX) {
            for (n, c) in hex.bytes().enumerate() {
                let digit = match c {
                    b'0'..=b'9' => c - b'0',
                    b'a'..=b'f' => c - b'a' + 10,
                    _ => unreachable!("generator rows are lowercase hex"),
                };
                row[n / 2] |= if n % 2 == 0 { digit << 4 } else { digit };
            }
            // Only 91 of the 92 hex bits are row data.
            row[11] &= 0xE0;
        }
        rows
    })
}

/// Parity-check graph in both orientations, with the per-edge slot of every
/// variable so the column pass can address row storage directly.
struct ParityGraph {
    row_vars: Vec<Vec<usize>>,
    col_edges: [[(usize, usize); 3]; LDPC_N],
}

fn graph() -> &'static ParityGraph {
    static GRAPH: OnceLock<ParityGraph> = OnceLock::new();
    GRAPH.get_or_init(|| {
        let row_vars: Vec<Vec<usize>> = CHECK_ROW_VARS
            .iter()
            .map(|row| {
                row.iter()
                    .take_while(|&&v| v != 0)
                    .map(|&v| usize::from(v) - 1)
                    .collect()
            })
            .collect();

        let mut col_edges = [[(0usize, 0usize); 3]; LDPC_N];
        let mut col_fill = [0usize; LDPC_N];
        for (j, vars) in row_vars.iter().enumerate() {
            for (slot, &i) in vars.iter().enumerate() {
                col_edges[i][col_fill[i]] = (j, slot);
                col_fill[i] += 1;
            }
        }
        assert!(
            col_fill.iter().all(|&n| n == 3),
            "column weight must be uniformly three"
        );
        ParityGraph {
            row_vars,
            col_edges,
        }
    })
}

/// Systematic encode: the first 91 codeword bits are the message, the
/// remaining 83 are generator-row parities.
#[must_use]
pub fn ldpc_encode(message: &PayloadWithCrc) -> Codeword {
    let gen = generator();
    let mut codeword = Codeword::default();
    codeword[..12].copy_from_slice(message);
    codeword[11] &= 0xE0;

    for (i, row) in gen.iter().enumerate() {
        let mut parity = 0u8;
        for (m, g) in message.iter().zip(row) {
            parity ^= parity8(m & g);
        }
        bit_set(&mut codeword, LDPC_K + i, parity == 1);
    }
    codeword
}

/// Number of unsatisfied parity checks for a hard-decision codeword.
#[must_use]
pub fn ldpc_errors(codeword: &Codeword) -> usize {
    graph()
        .row_vars
        .iter()
        .filter(|vars| {
            vars.iter()
                .fold(false, |acc, &i| acc ^ bit_get(codeword, i))
        })
        .count()
}

/// Sum-product belief propagation over the parity graph. `llr` holds one
/// value per codeword bit, positive favouring a one bit. Returns the packed
/// hard decision with the fewest unsatisfied checks and that count; a clean
/// decode reports zero.
pub fn ldpc_decode(llr: &[f32], max_iterations: usize) -> Result<(Codeword, usize), FecError> {
    if llr.len() != LDPC_N {
        return Err(FecError::InvalidLength);
    }
    let graph = graph();

    // Edge messages live in row-major storage parallel to row_vars.
    let mut to_check: Vec<Vec<f32>> = graph
        .row_vars
        .iter()
        .map(|vars| vars.iter().map(|&i| llr[i]).collect())
        .collect();
    let mut to_var: Vec<Vec<f32>> = graph
        .row_vars
        .iter()
        .map(|vars| vec![0.0f32; vars.len()])
        .collect();

    let mut best = Codeword::default();
    let mut best_errors = usize::MAX;

    for _ in 0..max_iterations {
        for (j, vars) in graph.row_vars.iter().enumerate() {
            for k1 in 0..vars.len() {
                let mut a = 1.0f32;
                for k2 in 0..vars.len() {
                    if k2 != k1 {
                        a *= (-to_check[j][k2].clamp(-LLR_CLAMP, LLR_CLAMP) / 2.0).tanh();
                    }
                }
                to_var[j][k1] = -2.0 * a.clamp(-TANH_CLAMP, TANH_CLAMP).atanh();
            }
        }

        let mut codeword = Codeword::default();
        for (i, &channel) in llr.iter().enumerate() {
            let total: f32 = graph.col_edges[i]
                .iter()
                .map(|&(j, slot)| to_var[j][slot])
                .sum::<f32>()
                + channel;
            bit_set(&mut codeword, i, total > 0.0);
        }

        let errors = ldpc_errors(&codeword);
        if errors < best_errors {
            best_errors = errors;
            best = codeword;
        }
        if errors == 0 {
            break;
        }

        for (i, &channel) in llr.iter().enumerate() {
            let edges = &graph.col_edges[i];
            let total: f32 = edges.iter().map(|&(j, slot)| to_var[j][slot]).sum();
            for &(j, slot) in edges {
                to_check[j][slot] = channel + total - to_var[j][slot];
            }
        }
    }

    Ok((best, best_errors))
}

/// Run belief propagation and the CRC gate, returning the verified 91-bit
/// message.
pub fn decode_message(llr: &[f32], max_iterations: usize) -> Result<PayloadWithCrc, FecError> {
    let (codeword, errors) = ldpc_decode(llr, max_iterations)?;
    if errors != 0 {
        return Err(FecError::DecodingFailed);
    }
    let mut message = PayloadWithCrc::default();
    message.copy_from_slice(&codeword[..12]);
    message[11] &= 0xE0;
    if !crc_check(&message) {
        return Err(FecError::CrcMismatch);
    }
    Ok(message)
}

/// Hard channel observations for a noiseless codeword, in the decoder's sign
/// convention.
#[must_use]
pub fn llrs_from_codeword(codeword: &Codeword) -> Vec<f32> {
    (0..LDPC_N)
        .map(|i| if bit_get(codeword, i) { 4.0 } else { -4.0 })
        .collect()
}
