//! Share codes and filename sanitization.
//!
//! A share code names both the storage prefix for uploaded files and the
//! signaling key for the P2P handshake. Codes are random with no collision
//! detection, unique enough in practice for the few minutes a session
//! lives.

use crate::core::config::{CODE_ALPHABET, CODE_LENGTH, MAX_FILENAME_LENGTH, MIN_CODE_LENGTH};
use anyhow::{anyhow, Result};
use rand::Rng;

/// Generate a fresh share code from the unambiguous alphabet.
pub fn generate_share_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Normalize user input: trim whitespace, uppercase.
pub fn normalize_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

/// Check that a (normalized) code is syntactically plausible.
pub fn is_valid_code(code: &str) -> bool {
    (MIN_CODE_LENGTH..=CODE_LENGTH).contains(&code.len())
        && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

/// Sanitize a user-supplied filename for storage under a code prefix.
///
/// - Strips any directory components (`/` and `\`).
/// - Removes ASCII control characters.
/// - Caps the length at [`MAX_FILENAME_LENGTH`].
///
/// Returns an error when nothing printable remains.
pub fn safe_filename(raw: &str) -> Result<String> {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();

    if base.is_empty() {
        return Err(anyhow!("Filename cannot be empty"));
    }

    if base.len() > MAX_FILENAME_LENGTH {
        let mut end = MAX_FILENAME_LENGTH;
        while !base.is_char_boundary(end) {
            end -= 1;
        }
        Ok(base[..end].to_string())
    } else {
        Ok(base)
    }
}
