use std::fmt;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Stable identity of one generation request: corpus, normalized question,
/// window bounds, and relation set. Equal fingerprints mean the upstream
/// call would be identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercases, trims, and collapses whitespace runs so cosmetic variants of
/// the same question share a fingerprint.
pub fn normalize_question(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&word.to_lowercase());
    }
    out
}

pub fn fingerprint(
    corpus_id: &str,
    question: &str,
    window_bounds: (usize, usize),
    related: &[usize],
) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(corpus_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_question(question).as_bytes());
    hasher.update([0u8]);
    hasher.update((window_bounds.0 as u64).to_be_bytes());
    hasher.update((window_bounds.1 as u64).to_be_bytes());
    for &index in related {
        hasher.update((index as u64).to_be_bytes());
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // infallible for String
        let _ = write!(hex, "{byte:02x}");
    }
    Fingerprint(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosmetic_question_variants_share_a_fingerprint() {
        let a = fingerprint("c1", "What   Happened First? ", (0, 100), &[]);
        let b = fingerprint("c1", "what happened first?", (0, 100), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn corpus_window_and_relations_separate_fingerprints() {
        let base = fingerprint("c1", "question", (0, 100), &[]);
        assert_ne!(base, fingerprint("c2", "question", (0, 100), &[]));
        assert_ne!(base, fingerprint("c1", "question", (0, 200), &[]));
        assert_ne!(base, fingerprint("c1", "question", (0, 100), &[2]));
    }

    #[test]
    fn fingerprint_is_hex_encoded_sha256() {
        let print = fingerprint("c1", "question", (0, 100), &[]);
        assert_eq!(print.as_str().len(), 64);
        assert!(print.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
