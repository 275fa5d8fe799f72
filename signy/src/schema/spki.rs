// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal DER handling for `SubjectPublicKeyInfo` documents.
//!
//! The verification primitives want the bare subject key (PKCS#1 for RSA,
//! the uncompressed point for P-256), while key files and metadata carry
//! full SPKI documents. This module converts between the two without
//! pulling in a general-purpose ASN.1 stack.

use crate::schema::error::{self, Result};

// DER-encoded AlgorithmIdentifier values.
// SEQUENCE { OID 1.2.840.113549.1.1.1 (rsaEncryption), NULL }
const ALG_RSA: &[u8] = &[
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00,
];
// SEQUENCE { OID 1.2.840.10045.2.1 (ecPublicKey), OID 1.2.840.10045.3.1.7 (prime256v1) }
const ALG_EC_P256: &[u8] = &[
    0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a, 0x86,
    0x48, 0xce, 0x3d, 0x03, 0x01, 0x07,
];
// SEQUENCE { OID 1.3.101.112 (Ed25519) }
const ALG_ED25519: &[u8] = &[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70];

/// The key algorithm named by an SPKI document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Algorithm {
    Rsa,
    EcP256,
    Ed25519,
}

fn der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, (len & 0xff) as u8]
    }
}

fn der_wrap(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(der_length(contents.len()));
    out.extend_from_slice(contents);
    out
}

fn spki(alg: &[u8], subject_key: &[u8]) -> Vec<u8> {
    // BIT STRING with zero unused bits.
    let mut bits = vec![0x00];
    bits.extend_from_slice(subject_key);
    let mut body = alg.to_vec();
    body.extend(der_wrap(0x03, &bits));
    der_wrap(0x30, &body)
}

/// Wraps a PKCS#1 `RSAPublicKey` into an SPKI document.
pub(crate) fn rsa_spki(pkcs1: &[u8]) -> Vec<u8> {
    spki(ALG_RSA, pkcs1)
}

/// Wraps an uncompressed P-256 point into an SPKI document.
pub(crate) fn p256_spki(point: &[u8]) -> Vec<u8> {
    spki(ALG_EC_P256, point)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return error::InvalidSpkiSnafu { reason: "truncated" }.fail();
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn element(&mut self, expected_tag: u8) -> Result<&'a [u8]> {
        let tag = self.take(1)?[0];
        if tag != expected_tag {
            return error::InvalidSpkiSnafu {
                reason: "unexpected tag",
            }
            .fail();
        }
        let first = self.take(1)?[0];
        let len = if first < 0x80 {
            usize::from(first)
        } else {
            let count = usize::from(first & 0x7f);
            if count == 0 || count > 2 {
                return error::InvalidSpkiSnafu {
                    reason: "unsupported length form",
                }
                .fail();
            }
            let mut len = 0usize;
            for byte in self.take(count)? {
                len = (len << 8) | usize::from(*byte);
            }
            len
        };
        self.take(len)
    }
}

/// Parses an SPKI document, returning the algorithm and the bare subject
/// key bits.
pub(crate) fn parse(der: &[u8]) -> Result<(Algorithm, Vec<u8>)> {
    let mut outer = Reader { data: der, pos: 0 };
    let body = outer.element(0x30)?;

    let mut inner = Reader { data: body, pos: 0 };
    let alg_body = inner.element(0x30)?;
    let alg_der = der_wrap(0x30, alg_body);
    let algorithm = if alg_der == ALG_RSA {
        Algorithm::Rsa
    } else if alg_der == ALG_EC_P256 {
        Algorithm::EcP256
    } else if alg_der == ALG_ED25519 {
        Algorithm::Ed25519
    } else {
        return error::InvalidSpkiSnafu {
            reason: "unrecognized algorithm",
        }
        .fail();
    };

    let bits = inner.element(0x03)?;
    if bits.first() != Some(&0x00) {
        return error::InvalidSpkiSnafu {
            reason: "unused bits in subject key",
        }
        .fail();
    }
    Ok((algorithm, bits[1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::{p256_spki, parse, rsa_spki, Algorithm};

    #[test]
    fn p256_round_trip() {
        let point = vec![0x04; 65];
        let der = p256_spki(&point);
        let (alg, bits) = parse(&der).unwrap();
        assert_eq!(alg, Algorithm::EcP256);
        assert_eq!(bits, point);
    }

    #[test]
    fn rsa_round_trip_long_form_length() {
        // A 2048-bit PKCS#1 body is long enough to need two length bytes.
        let pkcs1 = vec![0xabu8; 270];
        let der = rsa_spki(&pkcs1);
        let (alg, bits) = parse(&der).unwrap();
        assert_eq!(alg, Algorithm::Rsa);
        assert_eq!(bits, pkcs1);
    }

    #[test]
    fn garbage_rejected() {
        assert!(parse(&[0x30, 0x02, 0xff]).is_err());
        assert!(parse(b"not der at all").is_err());
    }
}
