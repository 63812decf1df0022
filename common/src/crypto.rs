//! Hashing and Ed25519 signing helpers

use anyhow::{bail, Result};
use blake2::{
    digest::consts::{U28, U32},
    Blake2b, Digest,
};
use cryptoxide::ed25519::{
    self, KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH, SEED_LENGTH, SIGNATURE_LENGTH,
};
use std::{fmt, str::FromStr};

use crate::hash::{Hash, KeyHash};

/// Bech32 prefix for plain (non-extended) Ed25519 signing keys
const SIGNING_KEY_HRP: &str = "ed25519_sk";

/// Get a Blake2b-224 hash of some data
pub fn blake2b_224(data: &[u8]) -> Hash<28> {
    let mut hasher = Blake2b::<U28>::new();
    hasher.update(data);
    let mut hash = [0u8; 28];
    hash.copy_from_slice(&hasher.finalize());
    Hash::new(hash)
}

/// Get a Blake2b-256 hash of some data
pub fn blake2b_256(data: &[u8]) -> Hash<32> {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    Hash::new(hash)
}

/// Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

/// Ed25519 signature over a transaction id
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

/// Ed25519 signing key, kept as its 32 byte seed
#[derive(Clone)]
pub struct SigningKey {
    seed: [u8; SEED_LENGTH],

    /// Seed followed by the public key, as the signer expects it
    keypair: [u8; KEYPAIR_LENGTH],
    public: PublicKey,
}

impl PublicKey {
    /// All-zero key. Not a valid key, only a stand-in of the right size.
    pub const fn zero() -> Self {
        Self([0; PUBLIC_KEY_LENGTH])
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.try_into() {
            Ok(key) => Ok(Self(key)),
            Err(_) => bail!("Invalid public key size {}, expecting {PUBLIC_KEY_LENGTH}", bytes.len()),
        }
    }

    /// Key hash used in addresses and required signers
    pub fn hash(&self) -> KeyHash {
        blake2b_224(&self.0)
    }

    pub fn verify(&self, message: impl AsRef<[u8]>, signature: &Signature) -> bool {
        ed25519::verify(message.as_ref(), &self.0, &signature.0)
    }
}

impl Signature {
    /// All-zero signature, for sizing transactions before signing
    pub const fn zero() -> Self {
        Self([0; SIGNATURE_LENGTH])
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.try_into() {
            Ok(signature) => Ok(Self(signature)),
            Err(_) => bail!("Invalid signature size {}, expecting {SIGNATURE_LENGTH}", bytes.len()),
        }
    }
}

impl SigningKey {
    pub fn from_seed(seed: [u8; SEED_LENGTH]) -> Self {
        let (keypair, public) = ed25519::keypair(&seed);
        Self {
            seed,
            keypair,
            public: PublicKey(public),
        }
    }

    /// Fresh key from the thread RNG
    pub fn generate() -> Self {
        Self::from_seed(rand::random())
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn key_hash(&self) -> KeyHash {
        self.public.hash()
    }

    pub fn sign(&self, message: impl AsRef<[u8]>) -> Signature {
        Signature(ed25519::signature(message.as_ref(), &self.keypair))
    }

    /// Render as `ed25519_sk1...`
    pub fn to_bech32(&self) -> Result<String> {
        let hrp = bech32::Hrp::parse(SIGNING_KEY_HRP)?;
        Ok(bech32::encode::<bech32::Bech32>(hrp, &self.seed)?)
    }

    /// Accepts `ed25519_sk1...` or a 64 character hex seed
    pub fn from_text(text: &str) -> Result<Self> {
        let text = text.trim();
        let bytes = if text.starts_with(SIGNING_KEY_HRP) {
            let (hrp, data) = bech32::decode(text)?;
            if hrp.as_str() != SIGNING_KEY_HRP {
                bail!("Unexpected key prefix {}", hrp.as_str());
            }
            data
        } else {
            hex::decode(text)?
        };

        match <[u8; SEED_LENGTH]>::try_from(bytes.as_slice()) {
            Ok(seed) => Ok(Self::from_seed(seed)),
            Err(_) => bail!("Invalid signing key size {}, expecting {SEED_LENGTH}", bytes.len()),
        }
    }
}

impl FromStr for SigningKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_text(s)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey<Ed25519>").field(&hex::encode(self.0)).finish()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature<Ed25519>").field(&hex::encode(self.0)).finish()
    }
}

// Never print the seed
impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey").field("public", &self.public).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake2b_224_of_empty_input() {
        assert_eq!(
            blake2b_224(&[]).to_string(),
            "836cc68931c2e4e3e838602eca1902591d216837bafddfe6f0c8cb07"
        );
    }

    #[test]
    fn signature_verifies_only_for_signed_message() {
        let key = SigningKey::from_seed([3u8; 32]);
        let signature = key.sign(b"tx body hash");
        assert!(key.public_key().verify(b"tx body hash", &signature));
        assert!(!key.public_key().verify(b"other message", &signature));
    }

    // RFC 8032 section 7.1, test 1
    #[test]
    fn rfc8032_empty_message_vector() {
        let seed: [u8; SEED_LENGTH] =
            hex::decode("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60")
                .unwrap()
                .try_into()
                .unwrap();
        let key = SigningKey::from_seed(seed);
        assert_eq!(
            key.public_key().to_string(),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
        assert_eq!(
            hex::encode(key.sign(b"")),
            "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e065224901555fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b"
        );
    }

    #[test]
    fn bech32_key_roundtrips() {
        let key = SigningKey::generate();
        let text = key.to_bech32().unwrap();
        assert!(text.starts_with("ed25519_sk1"));
        let back = SigningKey::from_text(&text).unwrap();
        assert_eq!(back.key_hash(), key.key_hash());
    }

    #[test]
    fn hex_seed_is_accepted() {
        let key = SigningKey::from_text(&"07".repeat(32)).unwrap();
        assert_eq!(key.key_hash(), SigningKey::from_seed([7u8; 32]).key_hash());
        assert!(SigningKey::from_text("0707").is_err());
    }
}
