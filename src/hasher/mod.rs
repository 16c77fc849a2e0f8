//! Multi-strategy document fingerprinting.
//!
//! Three independent fingerprints are computed per document:
//!
//! | Fingerprint | Function | Detects |
//! |-------------|----------|---------|
//! | File hash | [`hash_file`] | byte-identical files |
//! | Content hash | [`hash_content`] | the same text after OCR/encoding noise is normalized away |
//! | Fuzzy hash | [`hash_fuzzy`] | near-duplicates (small edits), compared with [`compare_fuzzy`] |
//!
//! Page-level hashes ([`hash_pages`], [`find_common_pages`]) support
//! detecting documents that share some but not all pages.
//!
//! All hash strings have the form `"<algorithm>:<digest>"`. Consumers must
//! split on the first `:` only (see [`split_hash`]).

#[cfg(feature = "fuzzy")]
mod ctph;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::{DedupError, Result};

/// Read buffer size for [`hash_file`].
const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Normalized inputs shorter than this produce fuzzy signatures too short
/// to compare meaningfully.
pub const MIN_FUZZY_INPUT: usize = 512;

/// Form feed, the page separator emitted by `pdftotext` and most OCR tools.
pub const PAGE_BREAK: char = '\x0C';

/// A locality-sensitive fingerprint in `"ssdeep:<blocksize>:<sig1>:<sig2>"` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyHash(String);

impl FuzzyHash {
    /// Accept a stored fuzzy hash string. Returns `None` for other schemes.
    pub fn parse(s: &str) -> Option<Self> {
        match split_hash(s) {
            Some(("ssdeep", rest)) if rest.splitn(3, ':').count() == 3 => {
                Some(FuzzyHash(s.to_string()))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Why no fuzzy hash could be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzyUnavailable {
    /// The capability is compiled out or turned off in config.
    Disabled,
    /// The normalized text is shorter than [`MIN_FUZZY_INPUT`].
    InputTooShort,
}

/// Outcome of [`hash_fuzzy`]. Callers must handle the degraded path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzyDigest {
    Available(FuzzyHash),
    Unavailable(FuzzyUnavailable),
}

impl FuzzyDigest {
    pub fn hash(&self) -> Option<&FuzzyHash> {
        match self {
            FuzzyDigest::Available(h) => Some(h),
            FuzzyDigest::Unavailable(_) => None,
        }
    }
}

/// Result of comparing the page hashes of two documents.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOverlap {
    pub shared: BTreeSet<String>,
    /// Fraction of the first document's pages found in the second.
    pub overlap_a: f64,
    /// Fraction of the second document's pages found in the first.
    pub overlap_b: f64,
}

impl PageOverlap {
    pub fn max_overlap(&self) -> f64 {
        self.overlap_a.max(self.overlap_b)
    }
}

/// Split `"<algorithm>:<digest>"` on the first `:`.
pub fn split_hash(hash: &str) -> Option<(&str, &str)> {
    hash.split_once(':')
}

fn format_sha256(hasher: Sha256) -> String {
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Byte-exact SHA-256 digest of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format_sha256(hasher)
}

/// Byte-exact SHA-256 digest of a file, read in fixed-size chunks.
///
/// The digest depends only on the file's bytes, never on its name or location.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| DedupError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| DedupError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format_sha256(hasher))
}

/// Digest of text, optionally after [`normalize_text`].
pub fn hash_content(text: &str, normalize: bool) -> String {
    let mut hasher = Sha256::new();
    if normalize {
        hasher.update(normalize_text(text).as_bytes());
    } else {
        hasher.update(text.as_bytes());
    }
    format_sha256(hasher)
}

/// ASCII replacement for typographic variants OCR engines disagree on.
fn fold_punctuation(ch: char) -> Option<&'static str> {
    match ch {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{00B4}' => Some("'"),
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{00AB}'
        | '\u{00BB}' => Some("\""),
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
        | '\u{2212}' => Some("-"),
        '\u{2026}' => Some("..."),
        '\u{00AD}' | '\u{200B}' | '\u{FEFF}' => Some(""),
        _ => None,
    }
}

/// Canonical text form used for content hashing.
///
/// Line endings are unified and the text is brought to NFKC, so ligatures,
/// full-width forms and other compatibility characters match their plain
/// spellings. Typographic quotes and dashes then fold to ASCII, everything
/// is lowercased, and every whitespace run (including newlines and page
/// breaks) becomes a single space. Leading and trailing whitespace is
/// dropped.
pub fn normalize_text(text: &str) -> String {
    let text: String = text.replace("\r\n", "\n").replace('\r', "\n").nfkc().collect();
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        let folded = fold_punctuation(ch);
        if folded == Some("") {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        match folded {
            Some(s) => out.push_str(s),
            None => out.extend(ch.to_lowercase()),
        }
    }
    out
}

/// Near-duplicate fingerprint of the normalized text.
pub fn hash_fuzzy(text: &str) -> FuzzyDigest {
    #[cfg(feature = "fuzzy")]
    {
        let normalized = normalize_text(text);
        if normalized.len() < MIN_FUZZY_INPUT {
            return FuzzyDigest::Unavailable(FuzzyUnavailable::InputTooShort);
        }
        FuzzyDigest::Available(FuzzyHash(format!(
            "ssdeep:{}",
            ctph::digest(normalized.as_bytes())
        )))
    }
    #[cfg(not(feature = "fuzzy"))]
    {
        let _ = text;
        FuzzyDigest::Unavailable(FuzzyUnavailable::Disabled)
    }
}

/// Whether fuzzy hashing was compiled in.
pub fn fuzzy_supported() -> bool {
    cfg!(feature = "fuzzy")
}

/// Similarity of two fuzzy hashes in `[0, 1]`.
///
/// Malformed hashes, or hashes whose block sizes are too far apart to be
/// comparable, score `0.0`.
pub fn compare_fuzzy(a: &FuzzyHash, b: &FuzzyHash) -> f64 {
    #[cfg(feature = "fuzzy")]
    {
        let (Some((_, da)), Some((_, db))) = (split_hash(a.as_str()), split_hash(b.as_str()))
        else {
            return 0.0;
        };
        ctph::compare(da, db).map(|s| s as f64 / 100.0).unwrap_or(0.0)
    }
    #[cfg(not(feature = "fuzzy"))]
    {
        if a == b {
            1.0
        } else {
            0.0
        }
    }
}

/// Split extracted text into pages on form feeds.
pub fn split_pages(text: &str) -> Vec<&str> {
    text.split(PAGE_BREAK).collect()
}

/// Content hash per page, keyed by 1-based page number. Blank pages are
/// skipped so that scanner-inserted separator pages never count as shared.
pub fn hash_pages<S: AsRef<str>>(pages: &[S]) -> BTreeMap<u32, String> {
    pages
        .iter()
        .enumerate()
        .filter(|(_, p)| !normalize_text(p.as_ref()).is_empty())
        .map(|(i, p)| (i as u32 + 1, hash_content(p.as_ref(), true)))
        .collect()
}

/// Pages two documents have in common, with the overlap fraction from
/// each side's point of view.
pub fn find_common_pages(
    hashes_a: &BTreeMap<u32, String>,
    hashes_b: &BTreeMap<u32, String>,
) -> PageOverlap {
    let set_a: BTreeSet<&String> = hashes_a.values().collect();
    let set_b: BTreeSet<&String> = hashes_b.values().collect();
    let shared: BTreeSet<String> = set_a.intersection(&set_b).map(|h| (*h).clone()).collect();

    let fraction = |hashes: &BTreeMap<u32, String>| {
        if hashes.is_empty() {
            0.0
        } else {
            hashes.values().filter(|h| shared.contains(*h)).count() as f64 / hashes.len() as f64
        }
    };

    PageOverlap {
        overlap_a: fraction(hashes_a),
        overlap_b: fraction(hashes_b),
        shared,
    }
}
