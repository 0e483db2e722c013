//! Content hashing for idempotent message appends.

use sha2::{Digest, Sha256};
use sw_domain::llm::Role;

/// Stable content hash of a message: SHA-256 of `role || 0x00 || content`,
/// truncated to 128 bits, hex-encoded. Uniqueness is only required
/// within a single session; cross-session collisions are irrelevant.
pub fn content_hash(role: Role, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(role.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(
            content_hash(Role::User, "hello"),
            content_hash(Role::User, "hello")
        );
    }

    #[test]
    fn role_is_part_of_the_hash() {
        assert_ne!(
            content_hash(Role::User, "hello"),
            content_hash(Role::Assistant, "hello")
        );
    }

    #[test]
    fn separator_prevents_boundary_ambiguity() {
        // "user" + "xhello" must not collide with "user" + "" + "xhello"
        // shifted — the 0x00 separator pins the role boundary.
        assert_ne!(content_hash(Role::User, "ahello"), content_hash(Role::User, "hello"));
    }

    #[test]
    fn is_128_bits_hex() {
        let h = content_hash(Role::System, "prompt");
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
