//! AES-256-CTR stream transform
//!
//! The opaque key is expanded into a cipher key and an initial counter block
//! with BLAKE3 in key-derivation mode. CTR keeps ciphertext the same length
//! as plaintext, so file sizes seen through the mount are exact.

use super::{CipherKey, Direction, Transform, IV_SIZE, KEY_SIZE};
use crate::error::{Error, Result};
use aes::cipher::{KeyIvInit, StreamCipher};
use std::io::{ErrorKind, Read, Write};
use zeroize::Zeroizing;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

const KEY_CONTEXT: &str = "cryptmirror 2024-05-01 content key";
const IV_CONTEXT: &str = "cryptmirror 2024-05-01 content iv";

/// Bytes moved per read/write round
const CHUNK_SIZE: usize = 64 * 1024;

/// AES-256-CTR implementation of [`Transform`]
#[derive(Debug, Clone, Copy, Default)]
pub struct AesCtrTransform;

impl AesCtrTransform {
    pub fn new() -> Self {
        AesCtrTransform
    }

    fn keystream(key: &CipherKey) -> Aes256Ctr {
        let cipher_key: Zeroizing<[u8; KEY_SIZE]> =
            Zeroizing::new(blake3::derive_key(KEY_CONTEXT, key.as_bytes()));
        let derived_iv: Zeroizing<[u8; KEY_SIZE]> =
            Zeroizing::new(blake3::derive_key(IV_CONTEXT, key.as_bytes()));

        let mut iv = Zeroizing::new([0u8; IV_SIZE]);
        iv.copy_from_slice(&derived_iv[..IV_SIZE]);

        Aes256Ctr::new((&*cipher_key).into(), (&*iv).into())
    }
}

impl Transform for AesCtrTransform {
    fn apply(
        &self,
        source: &mut dyn Read,
        destination: &mut dyn Write,
        direction: Direction,
        key: &CipherKey,
    ) -> Result<u64> {
        // Encrypt and Decrypt are the same keystream XOR in CTR mode
        let mut cipher = match direction {
            Direction::Encrypt | Direction::Decrypt => Some(Self::keystream(key)),
            Direction::Passthrough => None,
        };

        let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
        let mut total = 0u64;

        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::Transform(format!("source read failed: {}", e)));
                }
            };

            if let Some(ref mut c) = cipher {
                c.apply_keystream(&mut buf[..n]);
            }

            destination
                .write_all(&buf[..n])
                .map_err(|e| Error::Transform(format!("destination write failed: {}", e)))?;
            total += n as u64;
        }

        destination
            .flush()
            .map_err(|e| Error::Transform(format!("destination flush failed: {}", e)))?;

        Ok(total)
    }
}
