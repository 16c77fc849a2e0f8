//! Deterministic canonical identifiers.
//!
//! A canonical id is derived solely from the content hash:
//! `"doc_" + first 12 hex chars of the digest`. Re-processing identical
//! normalized text always yields the same id.

use crate::hasher::split_hash;

pub const NAMESPACE: &str = "doc";
pub const ID_HEX_LEN: usize = 12;

/// Map a `"<algorithm>:<hex>"` content hash to its canonical id.
///
/// A hash without a scheme prefix is used as-is. Digests shorter than
/// [`ID_HEX_LEN`] are used in full.
pub fn canonical_id(content_hash: &str) -> String {
    let digest = split_hash(content_hash)
        .map(|(_, d)| d)
        .unwrap_or(content_hash);
    let hex: String = digest.chars().take(ID_HEX_LEN).collect();
    format!("{}_{}", NAMESPACE, hex.to_lowercase())
}

/// Whether `id` has the `doc_<12 hex>` shape.
pub fn is_canonical_id(id: &str) -> bool {
    match id.split_once('_') {
        Some((ns, hex)) => {
            ns == NAMESPACE
                && hex.len() == ID_HEX_LEN
                && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_content;

    #[test]
    fn strips_prefix_and_truncates() {
        assert_eq!(
            canonical_id("sha256:1f3a9c00d2e4b5a6c7d8e9f0"),
            "doc_1f3a9c00d2e4"
        );
    }

    #[test]
    fn stable_for_equivalent_text() {
        let a = canonical_id(&hash_content("Hello   World", true));
        let b = canonical_id(&hash_content("hello world", true));
        assert_eq!(a, b);
        assert!(is_canonical_id(&a));
    }

    #[test]
    fn shape_check() {
        assert!(is_canonical_id("doc_0123456789ab"));
        assert!(!is_canonical_id("doc_0123"));
        assert!(!is_canonical_id("file_0123456789ab"));
        assert!(!is_canonical_id("doc_0123456789AB"));
    }
}
