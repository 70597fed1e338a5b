//! Recovery codes: the secret users write down to restore their wallet.
//!
//! A code is eight segments of four characters joined by `-`, e.g. `L2AB-CDEF-…`. Characters
//! come from a 29-symbol alphabet without look-alikes (no `G`, `I`, `L`, `O`, `0`, `1`, `6`).
//!
//! Parsing a code also determines its version, since both depend on the same characters:
//!
//! - Codes starting with `L` followed by a digit carry that digit as their version. `L` is not
//!   part of the alphabet, so this prefix never occurs in legacy codes.
//! - Every other valid code is a legacy version 1 code.

use std::{fmt, str::FromStr};

use rand::seq::index;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoProvider, NativeCryptoProvider, RecoveryCodeError};

/// The characters a recovery code is written in.
pub const ALPHABET: &[u8; 29] = b"ABCDEFHJKMNPQRSTUVWXYZ2345789";

/// Number of segments in a code.
pub const SEGMENT_COUNT: usize = 8;

/// Characters per segment.
pub const SEGMENT_LENGTH: usize = 4;

/// Separator between segments.
pub const SEPARATOR: char = '-';

/// Version of codes generated by this wallet.
pub const CURRENT_VERSION: u32 = 2;

/// Version of codes without a version prefix.
pub const LEGACY_VERSION: u32 = 1;

const VERSION_PREFIX: char = 'L';

/// A parsed recovery code.
///
/// Equality compares segments only: two codes with the same characters are equal whatever
/// version was detected for them.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryCode {
    segments: Vec<String>,
    version: u32,
}

impl RecoveryCode {
    /// Parses a code from text, detecting its version.
    pub fn parse(code: &str) -> Result<Self, RecoveryCodeError> {
        let segments = code
            .trim()
            .split(SEPARATOR)
            .map(|s| s.trim().to_ascii_uppercase())
            .collect();
        Self::from_segments(segments)
    }

    /// Builds a code from its segments, detecting its version.
    pub fn from_segments(segments: Vec<String>) -> Result<Self, RecoveryCodeError> {
        if segments.len() != SEGMENT_COUNT {
            return Err(RecoveryCodeError::SegmentCount(segments.len()));
        }

        for (index, segment) in segments.iter().enumerate() {
            let length = segment.chars().count();
            if length != SEGMENT_LENGTH {
                return Err(RecoveryCodeError::SegmentLength { index, length });
            }
        }

        let version = detect_version(&segments[0])?;
        let skip_prefix = if version == LEGACY_VERSION { 0 } else { 2 };

        for (index, segment) in segments.iter().enumerate() {
            let skip = if index == 0 { skip_prefix } else { 0 };
            if !segment.bytes().skip(skip).all(|b| ALPHABET.contains(&b)) {
                return Err(RecoveryCodeError::InvalidCharacters(index));
            }
        }

        Ok(Self { segments, version })
    }

    /// Generates a fresh code of the current version.
    pub fn random() -> Result<Self, RecoveryCodeError> {
        Self::random_with(&NativeCryptoProvider)
    }

    /// Generates a fresh code of the current version from `provider`'s randomness.
    pub fn random_with<P: CryptoProvider>(provider: &P) -> Result<Self, RecoveryCodeError> {
        let prefix = format!("{VERSION_PREFIX}{CURRENT_VERSION}");
        let needed = SEGMENT_COUNT * SEGMENT_LENGTH - prefix.len();

        let mut chars = prefix;
        // 232 is the largest multiple of 29 that fits a byte, so accepting only bytes below it
        // keeps the symbol distribution uniform.
        let limit = (256 / ALPHABET.len() * ALPHABET.len()) as u8;
        let mut pool = [0u8; 64];
        while chars.len() < needed + 2 {
            provider.fill_random(&mut pool)?;
            for byte in pool.iter().filter(|b| **b < limit) {
                if chars.len() == needed + 2 {
                    break;
                }
                chars.push(ALPHABET[*byte as usize % ALPHABET.len()] as char);
            }
        }
        pool.zeroize();

        let segments = chars
            .as_bytes()
            .chunks(SEGMENT_LENGTH)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();
        chars.zeroize();

        Self::from_segments(segments)
    }

    /// Picks `count` distinct segment positions, in random order, for the user to re-enter.
    pub fn random_segment_indexes(count: usize) -> Vec<usize> {
        let count = count.min(SEGMENT_COUNT);
        index::sample(&mut rand::thread_rng(), SEGMENT_COUNT, count).into_vec()
    }

    /// The segments of this code.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The version detected while parsing.
    pub const fn version(&self) -> u32 {
        self.version
    }
}

fn detect_version(first_segment: &str) -> Result<u32, RecoveryCodeError> {
    let mut chars = first_segment.chars();
    if chars.next() != Some(VERSION_PREFIX) {
        return Ok(LEGACY_VERSION);
    }

    let version = chars
        .next()
        .and_then(|c| c.to_digit(10))
        .ok_or(RecoveryCodeError::InvalidCharacters(0))?;

    if version != CURRENT_VERSION {
        return Err(RecoveryCodeError::UnsupportedVersion(version));
    }

    Ok(version)
}

impl PartialEq for RecoveryCode {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for RecoveryCode {}

impl fmt::Display for RecoveryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                write!(f, "{SEPARATOR}")?;
            }
            first = false;
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RecoveryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryCode")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl FromStr for RecoveryCode {
    type Err = RecoveryCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
