use sha2::{Digest, Sha256};
use uuid::Uuid;

const LOGIN_CODE_LEN: usize = 6;
const LOGIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    hash_password(password) == stored_hash
}

/// One candidate student login code. Uniqueness is the caller's problem:
/// check against the users table and draw again on collision.
pub fn new_login_code() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(LOGIN_CODE_LEN)
        .map(|b| LOGIN_CODE_ALPHABET[(*b as usize) % LOGIN_CODE_ALPHABET.len()] as char)
        .collect()
}
