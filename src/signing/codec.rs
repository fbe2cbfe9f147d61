//! DER <-> compact signature codec
//!
//! The signing primitive emits ASN.1 DER (`SEQUENCE { INTEGER r, INTEGER s }`),
//! which is 70-72 bytes depending on the values. The ledger and the wire
//! carry a fixed 64-byte `r || s` form instead.

use std::fmt;
use thiserror::Error;

pub const COMPACT_LEN: usize = 64;
const COMPONENT_LEN: usize = 32;

const SEQUENCE_TAG: u8 = 0x30;
const INTEGER_TAG: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("invalid start byte 0x{0:02x}, expected SEQUENCE (0x30)")]
    InvalidStartByte(u8),
    #[error("declared length {declared} does not match the {actual} remaining bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("signature truncated")]
    Truncated,
    #[error("expected INTEGER tag for {component}, found 0x{found:02x}")]
    InvalidIntegerTag { component: &'static str, found: u8 },
    #[error("{component} component is {len} bytes, at most 32 allowed")]
    ComponentTooLong { component: &'static str, len: usize },
    #[error("unexpected bytes after the s component")]
    TrailingBytes,
    #[error("compact signature must be 64 bytes, got {0}")]
    InvalidCompactLength(usize),
    #[error("invalid compact signature hex: {0}")]
    InvalidHex(String),
}

/// Fixed-width `r || s` signature, each half left-padded to 32 bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureCompact([u8; COMPACT_LEN]);

impl SignatureCompact {
    /// Placeholder written into a row before it is signed
    pub const ZERO: SignatureCompact = SignatureCompact([0u8; COMPACT_LEN]);

    pub fn from_bytes(bytes: [u8; COMPACT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        let array: [u8; COMPACT_LEN] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidCompactLength(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; COMPACT_LEN] {
        &self.0
    }

    pub fn r(&self) -> &[u8] {
        &self.0[..COMPONENT_LEN]
    }

    pub fn s(&self) -> &[u8] {
        &self.0[COMPONENT_LEN..]
    }

    pub fn is_placeholder(&self) -> bool {
        self.0 == [0u8; COMPACT_LEN]
    }

    /// 128 lowercase hex characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(s).map_err(|e| SignatureError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Default for SignatureCompact {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for SignatureCompact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureCompact({})", self.to_hex())
    }
}

impl fmt::Display for SignatureCompact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Convert a DER-encoded ECDSA signature into its compact form.
pub fn to_compact(der: &[u8]) -> Result<SignatureCompact, SignatureError> {
    let (&tag, rest) = der.split_first().ok_or(SignatureError::Truncated)?;
    if tag != SEQUENCE_TAG {
        return Err(SignatureError::InvalidStartByte(tag));
    }

    let (&declared, body) = rest.split_first().ok_or(SignatureError::Truncated)?;
    if declared as usize != body.len() {
        return Err(SignatureError::LengthMismatch {
            declared: declared as usize,
            actual: body.len(),
        });
    }

    let (r, body) = read_integer(body, "r")?;
    let (s, body) = read_integer(body, "s")?;
    if !body.is_empty() {
        return Err(SignatureError::TrailingBytes);
    }

    let mut out = [0u8; COMPACT_LEN];
    out[COMPONENT_LEN - r.len()..COMPONENT_LEN].copy_from_slice(r);
    out[COMPACT_LEN - s.len()..].copy_from_slice(s);
    Ok(SignatureCompact(out))
}

/// Rebuild the DER encoding of a compact signature.
pub fn to_der(compact: &SignatureCompact) -> Vec<u8> {
    let r = der_integer(compact.r());
    let s = der_integer(compact.s());

    let mut out = Vec::with_capacity(2 + r.len() + s.len());
    out.push(SEQUENCE_TAG);
    // At most 2 * (2 + 33) = 70 bytes, always short-form
    out.push((r.len() + s.len()) as u8);
    out.extend_from_slice(&r);
    out.extend_from_slice(&s);
    out
}

fn read_integer<'a>(
    input: &'a [u8],
    component: &'static str,
) -> Result<(&'a [u8], &'a [u8]), SignatureError> {
    let (&tag, rest) = input.split_first().ok_or(SignatureError::Truncated)?;
    if tag != INTEGER_TAG {
        return Err(SignatureError::InvalidIntegerTag {
            component,
            found: tag,
        });
    }

    let (&len, rest) = rest.split_first().ok_or(SignatureError::Truncated)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(SignatureError::Truncated);
    }
    let (value, rest) = rest.split_at(len);

    // One 0x00 keeps a high-bit value non-negative; it is not part of the number
    let value = match value {
        [0, tail @ ..] => tail,
        other => other,
    };
    if value.len() > COMPONENT_LEN {
        return Err(SignatureError::ComponentTooLong {
            component,
            len: value.len(),
        });
    }

    Ok((value, rest))
}

fn der_integer(half: &[u8]) -> Vec<u8> {
    let start = half
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(half.len() - 1);
    let magnitude = &half[start..];
    let needs_pad = magnitude[0] & 0x80 != 0;

    let mut out = Vec::with_capacity(magnitude.len() + 3);
    out.push(INTEGER_TAG);
    out.push((magnitude.len() + usize::from(needs_pad)) as u8);
    if needs_pad {
        out.push(0);
    }
    out.extend_from_slice(magnitude);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn compact_from(r_fill: u8, s_fill: u8) -> SignatureCompact {
        let mut bytes = [0u8; COMPACT_LEN];
        bytes[..32].fill(r_fill);
        bytes[32..].fill(s_fill);
        SignatureCompact::from_bytes(bytes)
    }

    #[test]
    fn high_bit_components_get_padding_byte() {
        let der = to_der(&compact_from(0x80, 0x7f));
        // SEQUENCE, len, INTEGER, 33, 0x00, r..., INTEGER, 32, s...
        assert_eq!(der[0], 0x30);
        assert_eq!(der[1] as usize, der.len() - 2);
        assert_eq!(&der[2..5], &[0x02, 33, 0x00]);
        assert_eq!(der[5], 0x80);
        assert_eq!(&der[37..39], &[0x02, 32]);
        assert_eq!(der.len(), 2 + 35 + 34);
    }

    #[test]
    fn short_components_are_left_padded() {
        let mut bytes = [0u8; COMPACT_LEN];
        bytes[1..32].fill(0x11); // r has a leading zero byte
        bytes[34..].fill(0x22); // s has two leading zero bytes
        let compact = SignatureCompact::from_bytes(bytes);

        let der = to_der(&compact);
        assert_eq!(&der[2..4], &[0x02, 31]);
        assert_eq!(to_compact(&der).unwrap(), compact);
    }

    #[test]
    fn round_trip_is_stable_for_edge_patterns() {
        let mut patterns = vec![
            compact_from(0x00, 0x00),
            compact_from(0xff, 0xff),
            compact_from(0x80, 0x01),
            compact_from(0x01, 0x80),
        ];
        let mut counting = [0u8; COMPACT_LEN];
        for (i, b) in counting.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(0x81);
        }
        patterns.push(SignatureCompact::from_bytes(counting));

        for x in patterns {
            let der = to_der(&x);
            let compact = to_compact(&der).unwrap();
            assert_eq!(compact, x);
            assert_eq!(to_der(&compact), der);
        }
    }

    #[test]
    fn round_trip_is_stable_for_random_inputs() {
        let mut rng = StdRng::seed_from_u64(0x5eed_da7a);
        for _ in 0..500 {
            let mut bytes = [0u8; COMPACT_LEN];
            rng.fill(&mut bytes[..]);
            for half in bytes.chunks_mut(32) {
                let zeros = rng.gen_range(0..=32);
                half[..zeros].fill(0);
                if zeros < 32 && rng.gen_bool(0.5) {
                    half[zeros] |= 0x80;
                }
            }
            let x = SignatureCompact::from_bytes(bytes);

            let der = to_der(&x);
            let compact = to_compact(&der).unwrap();
            assert_eq!(compact, x);
            assert_eq!(to_der(&compact), der);
        }
    }

    #[test]
    fn rejects_wrong_start_byte() {
        let mut der = to_der(&compact_from(0x10, 0x20));
        der[0] = 0x31;
        assert_eq!(to_compact(&der), Err(SignatureError::InvalidStartByte(0x31)));
    }

    #[test]
    fn rejects_declared_length_mismatch() {
        let mut der = to_der(&compact_from(0x10, 0x20));
        der.push(0x00);
        assert!(matches!(
            to_compact(&der),
            Err(SignatureError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_truncated_and_empty_input() {
        assert_eq!(to_compact(&[]), Err(SignatureError::Truncated));
        assert_eq!(to_compact(&[0x30, 0x02, 0x02, 0x05]), Err(SignatureError::Truncated));
    }

    #[test]
    fn rejects_oversized_component() {
        // r is 33 significant bytes without a zero pad
        let mut der = vec![0x30, 0x00, 0x02, 33];
        der.extend(std::iter::repeat(0x11).take(33));
        der.extend([0x02, 0x01, 0x01]);
        der[1] = (der.len() - 2) as u8;
        assert!(matches!(
            to_compact(&der),
            Err(SignatureError::ComponentTooLong { component: "r", len: 33 })
        ));
    }

    #[test]
    fn rejects_missing_integer_tag() {
        let mut der = to_der(&compact_from(0x10, 0x20));
        der[2] = 0x04;
        assert!(matches!(
            to_compact(&der),
            Err(SignatureError::InvalidIntegerTag { component: "r", .. })
        ));
    }

    #[test]
    fn hex_round_trip_is_128_chars() {
        let compact = compact_from(0xab, 0xcd);
        let hex = compact.to_hex();
        assert_eq!(hex.len(), 128);
        assert_eq!(SignatureCompact::from_hex(&hex).unwrap(), compact);
        assert!(SignatureCompact::from_hex("abcd").is_err());
    }
}
