//! Cryptographic primitives: RSA-2048 keypairs, signing over the canonical
//! payload strings used by coins and transfer intents, and the SHA-256
//! hashing helpers the coin hash chain and witness replay cache build on.

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::sha2::Sha256;
use rsa::signature::SignatureEncoding;
use rsa::signature::{Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::{Error, Result};

pub const KEY_SIZE: usize = 2048;

/// A PEM-encoded RSA public key (SPKI), serialized as that PEM string on the
/// wire so it can live in a wallet's or a witness's directory cache.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "pem_public")] RsaPublicKey);

impl PublicKey {
    pub fn to_pem(&self) -> String {
        self.0
            .to_public_key_pem(Default::default())
            .expect("RSA public keys always encode to PEM")
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self(
            RsaPublicKey::from_public_key_pem(pem).map_err(|_| Error::InvalidPem)?,
        ))
    }

    /// Verifies a base64-encoded PKCS#1v1.5/SHA-256 signature over `message`.
    pub fn verify_str(&self, message: &str, signature_b64: &str) -> Result<()> {
        let sig_bytes = base64_decode(signature_b64)?;
        let signature = Signature::try_from(sig_bytes.as_slice())
            .map_err(|_| Error::InvalidSignature(rsa::signature::Error::new()))?;
        let verifying_key = VerifyingKey::<Sha256>::new(self.0.clone());
        verifying_key
            .verify(message.as_bytes(), &signature)
            .map_err(Error::InvalidSignature)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateKey(#[serde(with = "pem_private")] RsaPrivateKey);

impl PrivateKey {
    pub fn to_pem(&self) -> String {
        self.0
            .to_pkcs8_pem(Default::default())
            .expect("RSA private keys always encode to PEM")
            .to_string()
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self(
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|_| Error::InvalidPem)?,
        ))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(RsaPublicKey::from(&self.0))
    }

    /// Signs `message` and returns the base64-encoded PKCS#1v1.5 signature,
    /// matching the wire form of spec §6 ("signature: <base64>").
    pub fn sign_str(&self, message: &str) -> String {
        let signing_key = SigningKey::<Sha256>::new(self.0.clone());
        let signature = signing_key.sign(message.as_bytes());
        base64_encode(&signature.to_vec())
    }
}

pub fn generate_keypair() -> Result<(PrivateKey, PublicKey)> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, KEY_SIZE)?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok((PrivateKey(private_key), PublicKey(public_key)))
}

/// SHA-256 of `data`, hex-encoded.
pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Derives a wallet id from its public key: the first 16 hex chars of
/// SHA-256(public key PEM), per spec §3.
pub fn wallet_id_from_public_key(public_key: &PublicKey) -> String {
    sha256_hex(&public_key.to_pem())[..16].to_string()
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|_| Error::InvalidBase64)
}

mod pem_public {
    use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
    use rsa::RsaPublicKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(key: &RsaPublicKey, ser: S) -> Result<S::Ok, S::Error> {
        let pem = key
            .to_public_key_pem(Default::default())
            .map_err(serde::ser::Error::custom)?;
        pem.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<RsaPublicKey, D::Error> {
        let pem = String::deserialize(de)?;
        RsaPublicKey::from_public_key_pem(&pem).map_err(serde::de::Error::custom)
    }
}

mod pem_private {
    use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
    use rsa::RsaPrivateKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(key: &RsaPrivateKey, ser: S) -> Result<S::Ok, S::Error> {
        let pem = key
            .to_pkcs8_pem(Default::default())
            .map_err(serde::ser::Error::custom)?;
        pem.to_string().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<RsaPrivateKey, D::Error> {
        let pem = String::deserialize(de)?;
        RsaPrivateKey::from_pkcs8_pem(&pem).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generate_keypair_test() {
        let (private_key, public_key) = generate_keypair().unwrap();
        assert_eq!(private_key.public_key(), public_key);
    }

    #[test]
    fn sign_verify_str_test() {
        let (private_key, public_key) = generate_keypair().unwrap();
        let (_, other_public_key) = generate_keypair().unwrap();

        let message = "coin-id-owner-recipient-1700000000-5";
        let signature = private_key.sign_str(message);

        assert!(public_key.verify_str(message, &signature).is_ok());
        assert!(other_public_key.verify_str(message, &signature).is_err());
        assert!(public_key.verify_str("tampered", &signature).is_err());
    }

    #[test]
    fn wallet_id_is_stable_and_16_chars() {
        let (_, public_key) = generate_keypair().unwrap();
        let id1 = wallet_id_from_public_key(&public_key);
        let id2 = wallet_id_from_public_key(&public_key);
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 16);
    }

    #[test]
    fn pem_roundtrip() {
        let (private_key, public_key) = generate_keypair().unwrap();
        let pem = public_key.to_pem();
        let restored = PublicKey::from_pem(&pem).unwrap();
        assert_eq!(public_key, restored);

        let priv_pem = private_key.to_pem();
        let restored_priv = PrivateKey::from_pem(&priv_pem).unwrap();
        assert_eq!(restored_priv.public_key(), public_key);
    }
}
