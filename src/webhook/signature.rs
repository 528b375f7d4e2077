use hex::ToHex;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signature for an outbound webhook delivery, hex-encoded
/// (spec §6): a subscription's `secret` signs its own payload so the
/// receiver can authenticate the call the same way this crate expects
/// inbound provider webhooks to be verified.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts a key of any length");
    mac.update(payload);
    mac.finalize().into_bytes().encode_hex::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let a = sign_payload("shh", b"{\"event\":\"delivered\"}");
        let b = sign_payload("shh", b"{\"event\":\"delivered\"}");
        assert_eq!(a, b);
    }

    #[test]
    fn different_secrets_sign_differently() {
        let a = sign_payload("secret-a", b"same payload");
        let b = sign_payload("secret-b", b"same payload");
        assert_ne!(a, b);
    }

    #[test]
    fn different_payloads_sign_differently() {
        let a = sign_payload("shh", b"payload one");
        let b = sign_payload("shh", b"payload two");
        assert_ne!(a, b);
    }

    #[test]
    fn signature_is_hex_encoded_sha256_length() {
        let sig = sign_payload("shh", b"payload");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
