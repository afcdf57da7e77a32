//! Canonical low-S enforcement over the secp256k1 group order
//!
//! ECDSA admits two valid S values per message; chains that enforce
//! canonical signatures reject the high-S form. Every ECDSA adapter
//! normalizes S before embedding it, and the XRPL adapter additionally
//! verifies against the normalized S so the checked bytes equal the
//! embedded bytes.

use crate::error::{ErrorCode, KeysignError, KeysignResult};
use std::cmp::Ordering;

/// secp256k1 group order N, big-endian
pub const CURVE_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36,
    0x41, 0x41,
];

/// floor(N / 2), the inclusive upper bound for a canonical S
pub const CURVE_ORDER_HALF: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b,
    0x20, 0xa0,
];

/// Normalize a 32-byte S scalar to canonical low-S form.
///
/// Fails for S == 0 and S >= N; replaces S > N/2 with N - S. The result
/// is always a left-padded 32-byte big-endian scalar.
pub fn normalize_low_s(s: &[u8; 32]) -> KeysignResult<[u8; 32]> {
    if is_zero(s) {
        return Err(KeysignError::new(
            ErrorCode::SignatureOutOfRange,
            "Signature S is zero",
        ));
    }
    if cmp_be(s, &CURVE_ORDER) != Ordering::Less {
        return Err(KeysignError::new(
            ErrorCode::SignatureOutOfRange,
            "Signature S is not below the curve order",
        ));
    }
    if cmp_be(s, &CURVE_ORDER_HALF) == Ordering::Greater {
        Ok(sub_be(&CURVE_ORDER, s))
    } else {
        Ok(*s)
    }
}

/// True if the scalar is already in canonical low-S form (and in range).
pub fn is_low_s(s: &[u8; 32]) -> bool {
    !is_zero(s)
        && cmp_be(s, &CURVE_ORDER) == Ordering::Less
        && cmp_be(s, &CURVE_ORDER_HALF) != Ordering::Greater
}

/// Check that R is a valid scalar: nonzero and below the curve order.
pub fn check_r_in_range(r: &[u8; 32]) -> KeysignResult<()> {
    if is_zero(r) {
        return Err(KeysignError::new(
            ErrorCode::SignatureOutOfRange,
            "Signature R is zero",
        ));
    }
    if cmp_be(r, &CURVE_ORDER) != Ordering::Less {
        return Err(KeysignError::new(
            ErrorCode::SignatureOutOfRange,
            "Signature R is not below the curve order",
        ));
    }
    Ok(())
}

fn is_zero(a: &[u8; 32]) -> bool {
    a.iter().all(|&b| b == 0)
}

fn cmp_be(a: &[u8; 32], b: &[u8; 32]) -> Ordering {
    for i in 0..32 {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Big-endian a - b. Caller guarantees a >= b.
fn sub_be(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut borrow = 0u16;
    for i in (0..32).rev() {
        let lhs = a[i] as u16;
        let rhs = b[i] as u16 + borrow;
        if lhs >= rhs {
            out[i] = (lhs - rhs) as u8;
            borrow = 0;
        } else {
            out[i] = (lhs + 0x100 - rhs) as u8;
            borrow = 1;
        }
    }
    out
}
