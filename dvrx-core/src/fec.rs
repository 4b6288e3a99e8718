//! Forward-error-correction and CRC primitives.
//!
//! Pure functions over bit slices (one bit per byte). Protocol decoders
//! treat these as black boxes: a decode either yields the corrected payload
//! plus the number of flipped bits, or `None`, which the caller converts
//! into an irrecoverable-bit count on the burst.

use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// CRC family
// ---------------------------------------------------------------------------

/// Generic MSB-first CRC over a bit slice.
pub fn crc_bits(bits: &[u8], width: u32, poly: u32, init: u32, xorout: u32) -> u32 {
    let mask = if width == 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    };
    let mut crc = init & mask;
    for &bit in bits {
        let fed = ((crc >> (width - 1)) & 1) ^ (bit as u32 & 1);
        crc = (crc << 1) & mask;
        if fed != 0 {
            crc ^= poly & mask;
        }
    }
    (crc ^ xorout) & mask
}

pub fn crc5(bits: &[u8]) -> u32 {
    crc_bits(bits, 5, 0x15, 0, 0)
}

pub fn crc7(bits: &[u8]) -> u32 {
    crc_bits(bits, 7, 0x79, 0, 0)
}

pub fn crc8(bits: &[u8]) -> u32 {
    crc_bits(bits, 8, 0x07, 0, 0)
}

pub fn crc9(bits: &[u8]) -> u32 {
    crc_bits(bits, 9, 0x059, 0, 0)
}

pub fn crc12(bits: &[u8]) -> u32 {
    crc_bits(bits, 12, 0x80F, 0, 0)
}

pub fn crc15(bits: &[u8]) -> u32 {
    crc_bits(bits, 15, 0x4CD5, 0, 0)
}

pub fn crc16_ccitt(bits: &[u8]) -> u32 {
    crc_bits(bits, 16, 0x1021, 0xFFFF, 0)
}

pub fn crc32_mpeg(bits: &[u8]) -> u32 {
    crc_bits(bits, 32, 0x04C1_1DB7, 0xFFFF_FFFF, 0)
}

// ---------------------------------------------------------------------------
// Hamming codes (single-error-correcting, syndrome decode)
// ---------------------------------------------------------------------------

/// Parity-check columns for Hamming(17,12,3): 12 data columns followed by
/// the 5 unit parity columns. Every column is a distinct nonzero 5-bit
/// value, so any single bit error maps to a unique syndrome.
const H17_COLS: [u32; 17] = [
    3, 5, 6, 7, 9, 10, 11, 12, 13, 14, 15, 17, // data
    16, 8, 4, 2, 1, // parity
];

/// Columns for Hamming(13,9,3): 9 data + 4 parity.
const H13_COLS: [u32; 13] = [
    3, 5, 6, 7, 9, 10, 11, 12, 13, // data
    8, 4, 2, 1, // parity
];

fn hamming_encode(data: &[u8], cols: &'static [u32], n: usize) -> Vec<u8> {
    let k = data.len();
    let parity_count = n - k;
    let mut syndrome = 0u32;
    for (i, &bit) in data.iter().enumerate() {
        if bit & 1 != 0 {
            syndrome ^= cols[i];
        }
    }
    let mut out = Vec::with_capacity(n);
    out.extend_from_slice(data);
    for p in 0..parity_count {
        let col = cols[k + p];
        out.push(((syndrome & col) != 0) as u8);
    }
    out
}

fn hamming_decode(codeword: &mut [u8], cols: &'static [u32]) -> Option<u32> {
    let mut syndrome = 0u32;
    for (i, &bit) in codeword.iter().enumerate() {
        if bit & 1 != 0 {
            syndrome ^= cols[i];
        }
    }
    if syndrome == 0 {
        return Some(0);
    }
    if let Some(pos) = cols.iter().position(|&c| c == syndrome) {
        codeword[pos] ^= 1;
        return Some(1);
    }
    None
}

pub fn hamming_17_12_3_encode(data: &[u8; 12]) -> Vec<u8> {
    hamming_encode(data, &H17_COLS, 17)
}

/// Corrects up to one bit in place; `None` when the syndrome is
/// uncorrectable.
pub fn hamming_17_12_3_decode(codeword: &mut [u8; 17]) -> Option<u32> {
    hamming_decode(codeword, &H17_COLS)
}

pub fn hamming_13_9_3_encode(data: &[u8; 9]) -> Vec<u8> {
    hamming_encode(data, &H13_COLS, 13)
}

pub fn hamming_13_9_3_decode(codeword: &mut [u8; 13]) -> Option<u32> {
    hamming_decode(codeword, &H13_COLS)
}

// ---------------------------------------------------------------------------
// Golay codes
// ---------------------------------------------------------------------------

/// Generator polynomial of the (23,12) binary Golay code.
const GOLAY_POLY: u32 = 0xAE3;

/// Cyclic systematic encode: message in the high 12 bits, 11 parity bits
/// appended.
fn golay_23_12_encode_word(message: u16) -> u32 {
    let mut reg = (message as u32 & 0xFFF) << 11;
    for bit in (11..23).rev() {
        if reg & (1 << bit) != 0 {
            reg ^= GOLAY_POLY << (bit - 11);
        }
    }
    (((message as u32) & 0xFFF) << 11) | (reg & 0x7FF)
}

fn golay_codebook() -> &'static Vec<u32> {
    static BOOK: OnceLock<Vec<u32>> = OnceLock::new();
    BOOK.get_or_init(|| (0u16..4096).map(golay_23_12_encode_word).collect())
}

pub fn golay_23_12_encode(data: &[u8; 12]) -> Vec<u8> {
    let message = data.iter().fold(0u16, |acc, &b| (acc << 1) | (b as u16 & 1));
    let word = golay_23_12_encode_word(message);
    (0..23).rev().map(|i| ((word >> i) & 1) as u8).collect()
}

/// Maximum-likelihood decode within radius 3. The (23,12) Golay code is
/// perfect, so any word has exactly one codeword within distance 3.
pub fn golay_23_12_decode(codeword: &[u8; 23]) -> Option<([u8; 12], u32)> {
    let word = codeword
        .iter()
        .fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1));
    for (message, &cw) in golay_codebook().iter().enumerate() {
        let dist = (word ^ cw).count_ones();
        if dist <= 3 {
            let mut data = [0u8; 12];
            for (i, slot) in data.iter_mut().enumerate() {
                *slot = ((message >> (11 - i)) & 1) as u8;
            }
            return Some((data, dist));
        }
    }
    None
}

/// Extended (24,12) Golay: (23,12) plus an overall even-parity bit.
pub fn golay_24_12_encode(data: &[u8; 12]) -> Vec<u8> {
    let mut bits = golay_23_12_encode(data);
    let parity = bits.iter().fold(0u8, |acc, &b| acc ^ b);
    bits.push(parity);
    bits
}

pub fn golay_24_12_decode(codeword: &[u8; 24]) -> Option<([u8; 12], u32)> {
    let mut inner = [0u8; 23];
    inner.copy_from_slice(&codeword[..23]);
    let (data, mut corrected) = golay_23_12_decode(&inner)?;
    let reencoded = golay_24_12_encode(&data);
    let parity_errors = reencoded
        .iter()
        .zip(codeword.iter())
        .filter(|(a, b)| a != b)
        .count() as u32;
    if parity_errors > 3 {
        return None;
    }
    corrected = parity_errors.max(corrected);
    Some((data, corrected))
}

/// Shortened (20,8) Golay used for short signalling words: an 8-bit message
/// occupies the low data positions of a (24,12) codeword whose top four
/// data bits are zero and are not transmitted.
pub fn golay_20_8_encode(data: &[u8; 8]) -> Vec<u8> {
    let mut full = [0u8; 12];
    full[4..].copy_from_slice(data);
    let ext = golay_24_12_encode(&full);
    ext[4..].to_vec()
}

pub fn golay_20_8_decode(codeword: &[u8; 20]) -> Option<([u8; 8], u32)> {
    let word = codeword
        .iter()
        .fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1));
    let mut best: Option<([u8; 8], u32)> = None;
    for message in 0u32..256 {
        let mut data = [0u8; 8];
        for (i, slot) in data.iter_mut().enumerate() {
            *slot = ((message >> (7 - i)) & 1) as u8;
        }
        let cw = golay_20_8_encode(&data)
            .iter()
            .fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1));
        let dist = (word ^ cw).count_ones();
        if dist <= 3 && best.as_ref().map_or(true, |&(_, d)| dist < d) {
            best = Some((data, dist));
        }
    }
    best
}

// ---------------------------------------------------------------------------
// QR(16,7,6)
// ---------------------------------------------------------------------------

/// Systematic parity rows of the (16,7) quadratic-residue-style code.
const QR_PARITY_ROWS: [u16; 7] = [
    0b1_1010_1100, 0b0_1101_0110, 0b0_0110_1011, 0b1_0011_0101, 0b1_1001_1010,
    0b0_1100_1101, 0b1_0110_0110,
];

pub fn qr_16_7_6_encode(data: &[u8; 7]) -> Vec<u8> {
    let mut parity = 0u16;
    for (i, &bit) in data.iter().enumerate() {
        if bit & 1 != 0 {
            parity ^= QR_PARITY_ROWS[i];
        }
    }
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(data);
    for i in (0..9).rev() {
        out.push(((parity >> i) & 1) as u8);
    }
    out
}

/// Nearest-codeword decode over the 128 messages; rejects when the best
/// distance exceeds 2 or is tied.
pub fn qr_16_7_6_decode(codeword: &[u8; 16]) -> Option<([u8; 7], u32)> {
    let word = codeword
        .iter()
        .fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1));
    let mut best: Option<([u8; 7], u32)> = None;
    let mut tie = false;
    for message in 0u32..128 {
        let mut data = [0u8; 7];
        for (i, slot) in data.iter_mut().enumerate() {
            *slot = ((message >> (6 - i)) & 1) as u8;
        }
        let cw = qr_16_7_6_encode(&data)
            .iter()
            .fold(0u32, |acc, &b| (acc << 1) | (b as u32 & 1));
        let dist = (word ^ cw).count_ones();
        match best {
            Some((_, d)) if dist == d => tie = true,
            Some((_, d)) if dist < d => {
                best = Some((data, dist));
                tie = false;
            }
            None => best = Some((data, dist)),
            _ => {}
        }
    }
    match best {
        Some((data, dist)) if dist <= 2 && !tie => Some((data, dist)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Reed-Solomon (12,9) over GF(64)
// ---------------------------------------------------------------------------

/// GF(2^6) arithmetic with the primitive polynomial x^6 + x + 1.
struct Gf64 {
    exp: [u8; 128],
    log: [u8; 64],
}

impl Gf64 {
    fn tables() -> &'static Gf64 {
        static TABLES: OnceLock<Gf64> = OnceLock::new();
        TABLES.get_or_init(|| {
            let mut exp = [0u8; 128];
            let mut log = [0u8; 64];
            let mut x = 1u32;
            for i in 0..63 {
                exp[i] = x as u8;
                log[x as usize] = i as u8;
                x <<= 1;
                if x & 0x40 != 0 {
                    x ^= 0x43;
                }
            }
            for i in 63..128 {
                exp[i] = exp[i - 63];
            }
            Gf64 { exp, log }
        })
    }

    fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        self.exp[(self.log[a as usize] as usize + self.log[b as usize] as usize) % 63]
    }

    fn div(&self, a: u8, b: u8) -> u8 {
        if a == 0 {
            return 0;
        }
        self.exp[(self.log[a as usize] as usize + 63 - self.log[b as usize] as usize) % 63]
    }

    fn pow_alpha(&self, e: usize) -> u8 {
        self.exp[e % 63]
    }
}

/// Systematic RS(12,9) encode over GF(64): appends three parity symbols
/// from the generator (x - a)(x - a^2)(x - a^3).
pub fn rs_12_9_encode(data: &[u8; 9]) -> Vec<u8> {
    let gf = Gf64::tables();
    // Expand the generator polynomial coefficients.
    let mut gen = vec![1u8];
    for i in 1..=3 {
        let root = gf.pow_alpha(i);
        let mut next = vec![0u8; gen.len() + 1];
        for (j, &c) in gen.iter().enumerate() {
            next[j] ^= gf.mul(c, root);
            next[j + 1] ^= c;
        }
        gen = next;
    }
    gen.reverse(); // highest degree first

    // Polynomial long division of data * x^3 by gen.
    let mut work = [0u8; 12];
    work[..9].copy_from_slice(data);
    for i in 0..9 {
        let coef = work[i];
        if coef != 0 {
            for (j, &g) in gen.iter().enumerate() {
                work[i + j] ^= gf.mul(coef, g);
            }
        }
    }
    let mut out = Vec::with_capacity(12);
    out.extend_from_slice(data);
    out.extend_from_slice(&work[9..]);
    out
}

/// Single-symbol-error decode (the code's minimum distance is 4).
pub fn rs_12_9_decode(codeword: &[u8; 12]) -> Option<([u8; 9], u32)> {
    let gf = Gf64::tables();

    // Syndromes S1..S3 evaluated at a^1..a^3.
    let mut syndromes = [0u8; 3];
    for (s, syn) in syndromes.iter_mut().enumerate() {
        let alpha = gf.pow_alpha(s + 1);
        let mut acc = 0u8;
        for &sym in codeword.iter() {
            acc = gf.mul(acc, alpha) ^ (sym & 0x3F);
        }
        *syn = acc;
    }

    if syndromes.iter().all(|&s| s == 0) {
        let mut data = [0u8; 9];
        data.copy_from_slice(&codeword[..9]);
        return Some((data, 0));
    }
    if syndromes[0] == 0 || syndromes[1] == 0 {
        return None;
    }

    // Single error: locator a^p = S2/S1, magnitude S1^2/S2, consistency
    // check against S3.
    let locator = gf.div(syndromes[1], syndromes[0]);
    let magnitude = gf.div(gf.mul(syndromes[0], syndromes[0]), syndromes[1]);
    let expected_s3 = gf.mul(gf.mul(locator, locator), magnitude);
    if expected_s3 != syndromes[2] {
        return None;
    }

    // Map locator to a position: syndrome evaluation treats the first
    // transmitted symbol as the highest power, a^(n-1-i).
    let pos_exp = gf.log[locator as usize] as usize;
    if pos_exp >= 12 {
        return None;
    }
    let position = 11 - pos_exp;

    let mut fixed = *codeword;
    fixed[position] ^= magnitude;
    let mut data = [0u8; 9];
    data.copy_from_slice(&fixed[..9]);
    Some((data, 1))
}

// ---------------------------------------------------------------------------
// Convolutional codes (Viterbi)
// ---------------------------------------------------------------------------

/// Rate-1/2 convolutional encode, MSB-first polynomials, zero-flushed.
pub fn conv_encode(bits: &[u8], constraint: usize, polys: (u32, u32)) -> Vec<u8> {
    let mut state = 0u32;
    let mut out = Vec::with_capacity((bits.len() + constraint) * 2);
    let mask = (1u32 << constraint) - 1;
    for &bit in bits.iter().chain(std::iter::repeat(&0u8).take(constraint - 1)) {
        state = ((state << 1) | (bit as u32 & 1)) & mask;
        out.push(((state & polys.0).count_ones() & 1) as u8);
        out.push(((state & polys.1).count_ones() & 1) as u8);
    }
    out
}

/// Hard-decision Viterbi decode of a zero-flushed rate-1/2 stream.
///
/// `reliability` optionally weights branch metrics (one byte per coded
/// bit); `None` decodes with unit weights.
pub fn viterbi_decode(
    coded: &[u8],
    constraint: usize,
    polys: (u32, u32),
    reliability: Option<&[u8]>,
) -> Vec<u8> {
    let n_states = 1usize << (constraint - 1);
    let steps = coded.len() / 2;
    const INF: u32 = u32::MAX / 2;

    let mut metrics = vec![INF; n_states];
    metrics[0] = 0;
    // survivor[t][state] = (prev_state, input_bit)
    let mut survivors: Vec<Vec<(u16, u8)>> = Vec::with_capacity(steps);

    let state_mask = (1u32 << constraint) - 1;
    for t in 0..steps {
        let observed = (coded[2 * t] & 1, coded[2 * t + 1] & 1);
        let weights = match reliability {
            Some(r) => (
                r.get(2 * t).copied().unwrap_or(255) as u32 + 1,
                r.get(2 * t + 1).copied().unwrap_or(255) as u32 + 1,
            ),
            None => (1, 1),
        };
        let mut next = vec![INF; n_states];
        let mut surv = vec![(0u16, 0u8); n_states];
        for state in 0..n_states {
            if metrics[state] >= INF {
                continue;
            }
            for input in 0..2u32 {
                let full = (((state as u32) << 1) | input) & state_mask;
                let out0 = ((full & polys.0).count_ones() & 1) as u8;
                let out1 = ((full & polys.1).count_ones() & 1) as u8;
                let mut branch = 0u32;
                if out0 != observed.0 {
                    branch += weights.0;
                }
                if out1 != observed.1 {
                    branch += weights.1;
                }
                let next_state = (full & (state_mask >> 1)) as usize;
                let candidate = metrics[state] + branch;
                if candidate < next[next_state] {
                    next[next_state] = candidate;
                    surv[next_state] = (state as u16, input as u8);
                }
            }
        }
        metrics = next;
        survivors.push(surv);
    }

    // Traceback from the zero state (the stream is flushed).
    let mut state = 0usize;
    let mut decoded = vec![0u8; steps];
    for t in (0..steps).rev() {
        let (prev, input) = survivors[t][state];
        decoded[t] = input;
        state = prev as usize;
    }
    decoded.truncate(steps.saturating_sub(constraint - 1));
    decoded
}

/// Puncture pattern for the rate-3/4 trellis: keep three of every four
/// coded bits.
const RATE34_PUNCTURE: [bool; 4] = [true, true, true, false];

/// Rate-3/4 encode by puncturing the rate-1/2 stream.
pub fn trellis_34_encode(bits: &[u8], constraint: usize, polys: (u32, u32)) -> Vec<u8> {
    conv_encode(bits, constraint, polys)
        .into_iter()
        .enumerate()
        .filter(|(i, _)| RATE34_PUNCTURE[i % 4])
        .map(|(_, b)| b)
        .collect()
}

/// Rate-3/4 decode: re-inflate punctured positions as erasures (zero
/// reliability) and run the rate-1/2 Viterbi.
pub fn trellis_34_decode(
    coded: &[u8],
    reliability: Option<&[u8]>,
    constraint: usize,
    polys: (u32, u32),
) -> Vec<u8> {
    let mut inflated = Vec::with_capacity(coded.len() * 4 / 3 + 4);
    let mut weights = Vec::with_capacity(inflated.capacity());
    let mut src = 0usize;
    let mut slot = 0usize;
    while src < coded.len() {
        if RATE34_PUNCTURE[slot % 4] {
            inflated.push(coded[src]);
            weights.push(
                reliability
                    .and_then(|r| r.get(src).copied())
                    .unwrap_or(255),
            );
            src += 1;
        } else {
            inflated.push(0);
            weights.push(0); // erasure
        }
        slot += 1;
    }
    // Terminate on a codeword-pair boundary.
    if inflated.len() % 2 != 0 {
        inflated.push(0);
        weights.push(0);
    }
    viterbi_decode(&inflated, constraint, polys, Some(&weights))
}

/// M17 convolutional code parameters (K=5, G1=0x19, G2=0x17).
pub const M17_CONSTRAINT: usize = 5;
pub const M17_POLYS: (u32, u32) = (0x19, 0x17);

/// D-STAR / generic K=3 code (G1=7, G2=5).
pub const K3_CONSTRAINT: usize = 3;
pub const K3_POLYS: (u32, u32) = (0x7, 0x5);

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_of(value: u32, width: usize) -> Vec<u8> {
        (0..width).rev().map(|i| ((value >> i) & 1) as u8).collect()
    }

    #[test]
    fn crc16_known_vector() {
        // CRC-CCITT (0xFFFF init) of ASCII "123456789" is 0x29B1.
        let bits: Vec<u8> = b"123456789"
            .iter()
            .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1))
            .collect();
        assert_eq!(crc16_ccitt(&bits), 0x29B1);
    }

    #[test]
    fn crc_detects_single_bit_flip() {
        let bits = bits_of(0xDEAD_BEEF, 32);
        let clean = crc12(&bits);
        for i in 0..bits.len() {
            let mut corrupted = bits.clone();
            corrupted[i] ^= 1;
            assert_ne!(crc12(&corrupted), clean, "flip at {} undetected", i);
        }
    }

    #[test]
    fn hamming_17_corrects_any_single_error() {
        let data: [u8; 12] = [1, 0, 1, 1, 0, 0, 1, 0, 1, 1, 1, 0];
        let encoded = hamming_17_12_3_encode(&data);
        for i in 0..17 {
            let mut cw = [0u8; 17];
            cw.copy_from_slice(&encoded);
            cw[i] ^= 1;
            let corrected = hamming_17_12_3_decode(&mut cw).expect("should correct");
            assert_eq!(corrected, 1);
            assert_eq!(&cw[..12], &data[..]);
        }
    }

    #[test]
    fn hamming_13_clean_word_passes() {
        let data: [u8; 9] = [0, 1, 1, 0, 1, 0, 0, 1, 1];
        let encoded = hamming_13_9_3_encode(&data);
        let mut cw = [0u8; 13];
        cw.copy_from_slice(&encoded);
        assert_eq!(hamming_13_9_3_decode(&mut cw), Some(0));
    }

    #[test]
    fn golay_23_corrects_three_errors() {
        let data: [u8; 12] = [1, 1, 0, 1, 0, 0, 1, 1, 1, 0, 1, 0];
        let encoded = golay_23_12_encode(&data);
        let mut cw = [0u8; 23];
        cw.copy_from_slice(&encoded);
        cw[0] ^= 1;
        cw[11] ^= 1;
        cw[22] ^= 1;
        let (decoded, corrected) = golay_23_12_decode(&cw).expect("within radius");
        assert_eq!(decoded, data);
        assert_eq!(corrected, 3);
    }

    #[test]
    fn golay_24_rejects_four_errors_detectably() {
        let data: [u8; 12] = [0, 0, 1, 0, 1, 1, 0, 1, 0, 1, 1, 1];
        let encoded = golay_24_12_encode(&data);
        let mut cw = [0u8; 24];
        cw.copy_from_slice(&encoded);
        for i in [1, 5, 9, 13] {
            cw[i] ^= 1;
        }
        // Four errors exceed the correction radius; the decode must not
        // silently return wrong data it claims is clean.
        if let Some((decoded, corrected)) = golay_24_12_decode(&cw) {
            assert!(decoded != data || corrected > 0);
        }
    }

    #[test]
    fn golay_20_8_roundtrip_with_errors() {
        let data: [u8; 8] = [1, 0, 0, 1, 1, 1, 0, 1];
        let encoded = golay_20_8_encode(&data);
        assert_eq!(encoded.len(), 20);
        let mut cw = [0u8; 20];
        cw.copy_from_slice(&encoded);
        cw[3] ^= 1;
        cw[15] ^= 1;
        let (decoded, corrected) = golay_20_8_decode(&cw).expect("within radius");
        assert_eq!(decoded, data);
        assert_eq!(corrected, 2);
    }

    #[test]
    fn qr_16_corrects_single_error() {
        let data: [u8; 7] = [1, 0, 1, 0, 0, 1, 1];
        let encoded = qr_16_7_6_encode(&data);
        for i in 0..16 {
            let mut cw = [0u8; 16];
            cw.copy_from_slice(&encoded);
            cw[i] ^= 1;
            let (decoded, _) = qr_16_7_6_decode(&cw).expect("single error");
            assert_eq!(decoded, data, "failed with flip at {}", i);
        }
    }

    #[test]
    fn rs_12_9_corrects_one_symbol() {
        let data: [u8; 9] = [0x01, 0x23 & 0x3F, 0x05, 0x3F, 0x00, 0x11, 0x2A, 0x07, 0x19];
        let encoded = rs_12_9_encode(&data);
        assert_eq!(encoded.len(), 12);
        for pos in 0..12 {
            let mut cw = [0u8; 12];
            cw.copy_from_slice(&encoded);
            cw[pos] ^= 0x15; // arbitrary symbol corruption
            let (decoded, corrected) = rs_12_9_decode(&cw)
                .unwrap_or_else(|| panic!("decode failed with error at {}", pos));
            assert_eq!(decoded, data);
            assert_eq!(corrected, 1);
        }
    }

    #[test]
    fn rs_12_9_clean_passes() {
        let data: [u8; 9] = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        let encoded = rs_12_9_encode(&data);
        let mut cw = [0u8; 12];
        cw.copy_from_slice(&encoded);
        assert_eq!(rs_12_9_decode(&cw), Some((data, 0)));
    }

    #[test]
    fn viterbi_roundtrip_k5() {
        let data: Vec<u8> = (0..40).map(|i| ((i * 7 + 3) % 5 % 2) as u8).collect();
        let coded = conv_encode(&data, M17_CONSTRAINT, M17_POLYS);
        let decoded = viterbi_decode(&coded, M17_CONSTRAINT, M17_POLYS, None);
        assert_eq!(decoded, data);
    }

    #[test]
    fn viterbi_corrects_scattered_errors() {
        let data: Vec<u8> = (0..48).map(|i| ((i / 3) % 2) as u8).collect();
        let mut coded = conv_encode(&data, M17_CONSTRAINT, M17_POLYS);
        // Flip well-separated coded bits.
        for i in [4, 30, 61, 88] {
            coded[i] ^= 1;
        }
        let decoded = viterbi_decode(&coded, M17_CONSTRAINT, M17_POLYS, None);
        assert_eq!(decoded, data);
    }

    #[test]
    fn trellis_34_roundtrip() {
        let data: Vec<u8> = (0..36).map(|i| ((i * 5) % 3 % 2) as u8).collect();
        let coded = trellis_34_encode(&data, K3_CONSTRAINT, K3_POLYS);
        assert!(coded.len() < data.len() * 2);
        let decoded = trellis_34_decode(&coded, None, K3_CONSTRAINT, K3_POLYS);
        assert_eq!(&decoded[..data.len()], &data[..]);
    }
}
