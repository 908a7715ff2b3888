// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! VNC Authentication (security type 2, RFC 6143 section 7.2.2).
//!
//! The server sends a 16-byte random challenge; the client encrypts it with
//! DES in ECB mode, two 8-byte blocks, keyed by the password; the server
//! performs the same encryption and compares. The DES key is the password
//! truncated or zero-padded to 8 bytes with the bits of every byte mirrored.
//! The mirroring is absent from RFC 6143 but is the de-facto VNC convention;
//! without it no stock viewer can authenticate.
//!
//! VNC Authentication is a legacy scheme with well-known weaknesses (56-bit
//! DES, 8 significant password bytes). Offer it on trusted networks only.

use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use rand::Rng;

/// Challenge-response state for one authentication attempt.
///
/// The cipher is rebuilt from the password on every verification, so an
/// instance carries no state beyond the shared secret.
pub struct VncAuth {
    auth_text: String,
}

impl VncAuth {
    /// Creates an authenticator for the given shared secret.
    pub fn new(auth_text: impl Into<String>) -> Self {
        Self {
            auth_text: auth_text.into(),
        }
    }

    /// Generates the 16 cryptographically random challenge bytes sent to the
    /// client.
    #[allow(clippy::unused_self)] // method for symmetry with verify_response
    pub fn generate_challenge(&self) -> [u8; 16] {
        let mut rng = rand::rng();
        let mut challenge = [0u8; 16];
        rng.fill(&mut challenge);
        challenge
    }

    /// Checks the client's 16-byte response against the server's own
    /// encryption of `challenge`.
    pub fn verify_response(&self, challenge: &[u8; 16], response: &[u8; 16]) -> bool {
        self.encrypt_challenge(challenge) == *response
    }

    /// Encrypts the challenge the way a well-behaved client would: DES-ECB,
    /// two independent 8-byte blocks, keyed via [`prepare_key`].
    fn encrypt_challenge(&self, challenge: &[u8; 16]) -> [u8; 16] {
        let cipher = Des::new_from_slice(&prepare_key(&self.auth_text)).expect("8-byte key");

        let mut expected = [0u8; 16];
        for (plain, out) in challenge.chunks_exact(8).zip(expected.chunks_exact_mut(8)) {
            let mut block = [0u8; 8];
            block.copy_from_slice(plain);
            let mut block = block.into();
            cipher.encrypt_block(&mut block);
            out.copy_from_slice(&block);
        }
        expected
    }
}

/// Derives the 8-byte DES key from a password.
///
/// The first 8 password bytes are taken, zero-padded if the password is
/// shorter, and every byte has its bit order reversed (the VNC quirk).
pub fn prepare_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    for (slot, &byte) in key.iter_mut().zip(password.as_bytes().iter().take(8)) {
        *slot = mirror_bits(byte);
    }
    key
}

/// Reverses the bit order of a byte (LSB becomes MSB).
fn mirror_bits(byte: u8) -> u8 {
    let mut mirrored = 0u8;
    for i in 0..8 {
        if byte & (1 << i) != 0 {
            mirrored |= 1 << (7 - i);
        }
    }
    mirrored
}
