use sha2::{Digest, Sha256};

/// Short SHA-256 digest of a submission, logged in place of the source itself
pub fn source_digest(source: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(source.as_bytes()));
    digest[..16].to_string()
}

/// Truncate to at most `max_chars` characters, keeping char boundaries
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
