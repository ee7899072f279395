/*
 * vDesk customer support engine
 * Copyright (C) 2023 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! Envelope encryption of account credentials.
//!
//! Each sealed record carries its own random AES-256-GCM data key; the data
//! key is wrapped by the process master key. Rotating the master key only
//! re-wraps data keys, the payload ciphertext is reused as-is. Plaintext
//! buffers are zeroized when the caller drops them.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::Engine;
use sha2::Digest;
use vdesk_common::entity::SealedBlob;
use zeroize::{Zeroize, Zeroizing};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Failure of a seal or open operation.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    /// the blob is not a sealed envelope produced by this module.
    #[error("malformed sealed blob: {0}")]
    Malformed(String),
    /// wrong master key, or the ciphertext was tampered with.
    #[error("credential cannot be opened with the configured master key")]
    BadKey,
    /// the envelope version is newer than this build understands.
    #[error("unsupported sealed blob version {0}")]
    UnsupportedVersion(u8),
}

/// The process-held key that wraps every data key.
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material.
        f.debug_tuple("MasterKey").finish()
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl MasterKey {
    /// Build from the `MASTER_ENCRYPTION_KEY` environment value: either a
    /// base64 encoded 32-byte key, or an arbitrary passphrase hashed down
    /// to one.
    #[must_use]
    pub fn derive(secret: &str) -> Self {
        if let Ok(raw) = B64.decode(secret) {
            if let Ok(key) = <[u8; 32]>::try_from(raw.as_slice()) {
                return Self(key);
            }
        }
        let digest = sha2::Sha256::digest(secret.as_bytes());
        Self(digest.into())
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope {
    v: u8,
    /// data key wrapped by the master key.
    wk: String,
    /// nonce of the wrap.
    wn: String,
    /// nonce of the payload.
    pn: String,
    /// payload ciphertext.
    ct: String,
}

fn decode_field(envelope_field: &str, what: &str) -> Result<Vec<u8>, SealError> {
    B64.decode(envelope_field)
        .map_err(|_| SealError::Malformed(format!("{what} is not base64")))
}

/// Seal a plaintext credential under the master key.
///
/// # Errors
///
/// never fails in practice; kept fallible for parity with [`open`].
pub fn seal(master: &MasterKey, plaintext: &str) -> Result<SealedBlob, SealError> {
    let mut data_key = [0_u8; 32];
    let mut payload_nonce = [0_u8; 12];
    let mut wrap_nonce = [0_u8; 12];
    OsRng.fill_bytes(&mut data_key);
    OsRng.fill_bytes(&mut payload_nonce);
    OsRng.fill_bytes(&mut wrap_nonce);

    let data_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key));
    let ciphertext = data_cipher
        .encrypt(Nonce::from_slice(&payload_nonce), plaintext.as_bytes())
        .map_err(|_| SealError::BadKey)?;

    let wrapped_key = master
        .cipher()
        .encrypt(Nonce::from_slice(&wrap_nonce), data_key.as_slice())
        .map_err(|_| SealError::BadKey)?;
    data_key.zeroize();

    let envelope = Envelope {
        v: 1,
        wk: B64.encode(wrapped_key),
        wn: B64.encode(wrap_nonce),
        pn: B64.encode(payload_nonce),
        ct: B64.encode(ciphertext),
    };
    #[allow(clippy::expect_used)]
    let json = serde_json::to_string(&envelope).expect("envelope serializes");
    Ok(SealedBlob(B64.encode(json)))
}

/// Open a sealed credential. The returned buffer zeroizes itself on drop;
/// callers must not copy it into longer-lived storage.
///
/// # Errors
///
/// * the blob is malformed or versioned ahead of this build
/// * the master key does not open the envelope
pub fn open(master: &MasterKey, blob: &SealedBlob) -> Result<Zeroizing<String>, SealError> {
    let json = decode_field(blob.as_str(), "envelope")?;
    let envelope = serde_json::from_slice::<Envelope>(&json)
        .map_err(|error| SealError::Malformed(error.to_string()))?;
    if envelope.v != 1 {
        return Err(SealError::UnsupportedVersion(envelope.v));
    }

    let wrap_nonce = decode_field(&envelope.wn, "wrap nonce")?;
    let payload_nonce = decode_field(&envelope.pn, "payload nonce")?;
    let wrapped_key = decode_field(&envelope.wk, "wrapped key")?;
    let ciphertext = decode_field(&envelope.ct, "ciphertext")?;

    let mut data_key = master
        .cipher()
        .decrypt(Nonce::from_slice(&wrap_nonce), wrapped_key.as_slice())
        .map_err(|_| SealError::BadKey)?;

    let plaintext = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key))
        .decrypt(Nonce::from_slice(&payload_nonce), ciphertext.as_slice())
        .map_err(|_| SealError::BadKey);
    data_key.zeroize();

    let mut plaintext = plaintext?;
    let text = String::from_utf8(plaintext.clone())
        .map_err(|_| SealError::Malformed("payload is not utf-8".to_owned()));
    plaintext.zeroize();
    text.map(Zeroizing::new)
}

/// Re-wrap a sealed credential under a new master key, e.g. on
/// `MASTER_ENCRYPTION_KEY` rotation.
///
/// # Errors
///
/// * the blob cannot be opened with `old`
pub fn reseal(
    old: &MasterKey,
    new: &MasterKey,
    blob: &SealedBlob,
) -> Result<SealedBlob, SealError> {
    let plaintext = open(old, blob)?;
    seal(new, &plaintext)
}
