//! The cryptography collaborators named in `spec.md` §6: `random_key`,
//! `encrypt_to_server`, `cipher_context`, `get_otp_code`.
//!
//! These are external collaborators -- the spec only requires the core to
//! consume them through an interface. Traits are defined here, along with
//! one demonstration implementation per trait (X25519 + ChaCha20-Poly1305)
//! so the crate is exercisable end-to-end. Production deployments should
//! supply their own, backed by whatever key material and OTP secret the
//! controller actually provisions -- no OTP algorithm is implemented here,
//! matching the spec's scoping of the OTP generator as external.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{TunnelError, TunnelResult};

/// Generates a fresh symmetric key and wraps it for the controller's
/// static public key.
pub trait KeyAgreement: Send + Sync {
    fn random_key(&self) -> [u8; 32];
    fn encrypt_to_server(&self, key: &[u8]) -> TunnelResult<Vec<u8>>;
}

/// An opaque, stateful symmetric cipher context bound to one session key.
/// Nonce management is internal: callers never see or supply a nonce.
pub trait CipherContext: Send {
    fn encrypt(&mut self, plaintext: &[u8]) -> TunnelResult<Vec<u8>>;
    fn decrypt(&mut self, ciphertext: &[u8]) -> TunnelResult<Vec<u8>>;
}

/// Supplies the current one-time-password code as a decimal string.
pub trait OtpProvider: Send + Sync {
    fn code(&self) -> String;
}

/// X25519 ECDH "encrypt to server": an ephemeral key is generated per
/// call, the shared secret with the controller's static public key seeds
/// a ChaCha20-Poly1305 seal of the symmetric session key.
pub struct X25519KeyAgreement {
    server_public: PublicKey,
}

impl X25519KeyAgreement {
    pub fn new(server_public: [u8; 32]) -> Self {
        X25519KeyAgreement { server_public: PublicKey::from(server_public) }
    }
}

impl KeyAgreement for X25519KeyAgreement {
    fn random_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    fn encrypt_to_server(&self, key: &[u8]) -> TunnelResult<Vec<u8>> {
        let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.server_public);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(shared.as_bytes()));
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, key)
            .map_err(|e| TunnelError::Crypto(e.to_string()))?;

        let mut out = Vec::with_capacity(32 + 12 + ciphertext.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// Decrypts what `X25519KeyAgreement::encrypt_to_server` produced, using
/// the controller's static secret. Only used by tests and the fake
/// controller -- the real controller lives outside this crate.
pub fn decrypt_from_client(server_secret: &StaticSecret, blob: &[u8]) -> TunnelResult<Vec<u8>> {
    if blob.len() < 32 + 12 {
        return Err(TunnelError::Crypto("init blob too short".into()));
    }
    let ephemeral_public = PublicKey::from(<[u8; 32]>::try_from(&blob[0..32]).unwrap());
    let nonce = Nonce::from_slice(&blob[32..44]);
    let ciphertext = &blob[44..];

    let shared = server_secret.diffie_hellman(&ephemeral_public);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(shared.as_bytes()));
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| TunnelError::Crypto(e.to_string()))
}

/// A ChaCha20-Poly1305 context keyed by the session's symmetric key. Each
/// call to `encrypt` draws a fresh random 12-byte nonce and prepends it to
/// the ciphertext; `decrypt` expects the same layout.
pub struct ChaChaCipherContext {
    cipher: ChaCha20Poly1305,
}

impl ChaChaCipherContext {
    pub fn new(key: [u8; 32]) -> Self {
        ChaChaCipherContext { cipher: ChaCha20Poly1305::new(Key::from_slice(&key)) }
    }
}

impl CipherContext for ChaChaCipherContext {
    fn encrypt(&mut self, plaintext: &[u8]) -> TunnelResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| TunnelError::Crypto(e.to_string()))?;
        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> TunnelResult<Vec<u8>> {
        if ciphertext.len() < 12 {
            return Err(TunnelError::Crypto("ciphertext shorter than nonce".into()));
        }
        let (nonce_bytes, body) = ciphertext.split_at(12);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| TunnelError::Crypto(e.to_string()))
    }
}

/// A fixed OTP code, useful for tests and for deployments where the
/// caller manages rotation outside this crate.
pub struct FixedOtpProvider(pub String);

impl OtpProvider for FixedOtpProvider {
    fn code(&self) -> String {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_to_server_round_trips_via_static_secret() {
        let server_secret = StaticSecret::random_from_rng(rand::thread_rng());
        let server_public = PublicKey::from(&server_secret);
        let agreement = X25519KeyAgreement::new(server_public.to_bytes());

        let key = agreement.random_key();
        let blob = agreement.encrypt_to_server(&key).unwrap();
        let recovered = decrypt_from_client(&server_secret, &blob).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn cipher_context_round_trips() {
        let mut ctx = ChaChaCipherContext::new([7u8; 32]);
        let ciphertext = ctx.encrypt(b"hello controller").unwrap();
        assert_eq!(ctx.decrypt(&ciphertext).unwrap(), b"hello controller");
    }

    #[test]
    fn cipher_context_nonces_differ_between_calls() {
        let mut ctx = ChaChaCipherContext::new([7u8; 32]);
        let a = ctx.encrypt(b"same plaintext").unwrap();
        let b = ctx.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn fixed_otp_provider_returns_configured_code() {
        let otp = FixedOtpProvider("123456".into());
        assert_eq!(otp.code(), "123456");
    }
}
