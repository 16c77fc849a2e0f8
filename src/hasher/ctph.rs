//! Context-triggered piecewise hashing (the spamsum/ssdeep scheme).
//!
//! A rolling hash over a 7-byte window decides where to cut the input into
//! pieces; each piece contributes one base64 character to the signature.
//! Because cut points depend only on local content, an edit disturbs the
//! signature only around the edited region.
//!
//! Digest format: `<block_size>:<sig1>:<sig2>`, where `sig2` is computed at
//! twice the block size so hashes one block size apart stay comparable.

const ROLLING_WINDOW: usize = 7;
const MIN_BLOCKSIZE: u64 = 3;
const SPAMSUM_LENGTH: usize = 64;
const HASH_PRIME: u32 = 0x0100_0193;
const HASH_INIT: u32 = 0x2802_1967;
const B64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Default)]
struct RollingHash {
    window: [u8; ROLLING_WINDOW],
    h1: u32,
    h2: u32,
    h3: u32,
    n: usize,
}

impl RollingHash {
    fn update(&mut self, c: u8) -> u32 {
        let c32 = c as u32;
        let slot = self.n % ROLLING_WINDOW;

        self.h2 = self.h2.wrapping_sub(self.h1);
        self.h2 = self.h2.wrapping_add(ROLLING_WINDOW as u32 * c32);
        self.h1 = self.h1.wrapping_add(c32);
        self.h1 = self.h1.wrapping_sub(self.window[slot] as u32);
        self.window[slot] = c;
        self.n += 1;
        self.h3 = (self.h3 << 5) ^ c32;

        self.h1.wrapping_add(self.h2).wrapping_add(self.h3)
    }
}

fn sum_hash(c: u8, h: u32) -> u32 {
    h.wrapping_mul(HASH_PRIME) ^ c as u32
}

fn b64(h: u32) -> char {
    B64[(h % 64) as usize] as char
}

fn signatures(data: &[u8], block_size: u64) -> (String, String) {
    let mut roll = RollingHash::default();
    let mut piece1 = HASH_INIT;
    let mut piece2 = HASH_INIT;
    let mut sig1 = String::with_capacity(SPAMSUM_LENGTH);
    let mut sig2 = String::with_capacity(SPAMSUM_LENGTH / 2);

    for &c in data {
        let r = roll.update(c) as u64;
        piece1 = sum_hash(c, piece1);
        piece2 = sum_hash(c, piece2);

        if r % block_size == block_size - 1 {
            // Once a signature is full, its last character absorbs the rest.
            if sig1.len() < SPAMSUM_LENGTH - 1 {
                sig1.push(b64(piece1));
                piece1 = HASH_INIT;
            }
            if r % (block_size * 2) == block_size * 2 - 1 && sig2.len() < SPAMSUM_LENGTH / 2 - 1 {
                sig2.push(b64(piece2));
                piece2 = HASH_INIT;
            }
        }
    }

    if piece1 != HASH_INIT {
        sig1.push(b64(piece1));
    }
    if piece2 != HASH_INIT {
        sig2.push(b64(piece2));
    }
    (sig1, sig2)
}

/// Fuzzy digest of `data` without the scheme prefix.
pub(super) fn digest(data: &[u8]) -> String {
    let mut block_size = MIN_BLOCKSIZE;
    while block_size * (SPAMSUM_LENGTH as u64) < data.len() as u64 {
        block_size *= 2;
    }

    loop {
        let (sig1, sig2) = signatures(data, block_size);
        if block_size > MIN_BLOCKSIZE && sig1.len() < SPAMSUM_LENGTH / 2 {
            block_size /= 2;
            continue;
        }
        return format!("{}:{}:{}", block_size, sig1, sig2);
    }
}

struct Parsed {
    block_size: u64,
    sig1: Vec<u8>,
    sig2: Vec<u8>,
}

fn parse(digest: &str) -> Option<Parsed> {
    let mut parts = digest.splitn(3, ':');
    let block_size = parts.next()?.parse::<u64>().ok()?;
    let sig1 = parts.next()?;
    let sig2 = parts.next()?;
    if block_size == 0 {
        return None;
    }
    Some(Parsed {
        block_size,
        sig1: eliminate_sequences(sig1.as_bytes()),
        sig2: eliminate_sequences(sig2.as_bytes()),
    })
}

/// Collapse runs of more than three identical characters; long runs carry
/// little information and inflate scores for repetitive input.
fn eliminate_sequences(s: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for (i, &c) in s.iter().enumerate() {
        if i >= 3 && c == s[i - 1] && c == s[i - 2] && c == s[i - 3] {
            continue;
        }
        out.push(c);
    }
    out
}

fn has_common_substring(a: &[u8], b: &[u8]) -> bool {
    if a.len() < ROLLING_WINDOW || b.len() < ROLLING_WINDOW {
        return false;
    }
    a.windows(ROLLING_WINDOW)
        .any(|wa| b.windows(ROLLING_WINDOW).any(|wb| wa == wb))
}

/// Edit distance with insert/delete cost 1 and substitution cost 2.
fn edit_distance(a: &[u8], b: &[u8]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitute = prev[j] + if ca == cb { 0 } else { 2 };
            cur[j + 1] = substitute.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn score_strings(a: &[u8], b: &[u8], block_size: u64) -> u32 {
    if a.len() > SPAMSUM_LENGTH || b.len() > SPAMSUM_LENGTH {
        return 0;
    }
    if !has_common_substring(a, b) {
        return 0;
    }

    let dist = edit_distance(a, b) as u64;
    let mut score = dist * SPAMSUM_LENGTH as u64 / (a.len() + b.len()) as u64;
    score = 100 * score / SPAMSUM_LENGTH as u64;
    if score >= 100 {
        return 0;
    }
    score = 100 - score;

    // Small block sizes mean short inputs; cap the score so tiny signatures
    // cannot claim a near-perfect match.
    let uncapped_from = (99 + ROLLING_WINDOW as u64) / ROLLING_WINDOW as u64 * MIN_BLOCKSIZE;
    if block_size >= uncapped_from {
        return score as u32;
    }
    let cap = block_size / MIN_BLOCKSIZE * a.len().min(b.len()) as u64;
    score.min(cap) as u32
}

/// Similarity score 0–100, or `None` if either digest is malformed.
pub(super) fn compare(a: &str, b: &str) -> Option<u32> {
    let a = parse(a)?;
    let b = parse(b)?;

    if a.block_size != b.block_size
        && a.block_size != b.block_size * 2
        && b.block_size != a.block_size * 2
    {
        return Some(0);
    }

    if a.block_size == b.block_size && a.sig1 == b.sig1 && a.sig2 == b.sig2 {
        return Some(100);
    }

    let score = if a.block_size == b.block_size {
        score_strings(&a.sig1, &b.sig1, a.block_size).max(score_strings(
            &a.sig2,
            &b.sig2,
            a.block_size * 2,
        ))
    } else if a.block_size == b.block_size * 2 {
        score_strings(&a.sig1, &b.sig2, a.block_size)
    } else {
        score_strings(&a.sig2, &b.sig1, b.block_size)
    };
    Some(score)
}
