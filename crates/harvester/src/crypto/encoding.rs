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

//! URL-safe token encoding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Encodes `bytes` with the URL-safe base64 alphabet, padding stripped.
///
/// The 64-byte `secret || mac` concatenation encodes to exactly 86
/// characters, safe to embed in an activation or recovery link.
pub fn encode_token(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;

    #[test]
    fn sixty_four_bytes_encode_to_86_chars() {
        let encoded = encode_token(&[0u8; 64]);
        assert_eq!(encoded.len(), 86);
        assert!(encoded.chars().all(|c| c == 'A'));
    }

    #[test]
    fn uses_url_alphabet_without_padding() {
        // 0xfb 0xff 0xbf encodes to "+/+/" in the standard alphabet.
        let encoded = encode_token(&[0xfb, 0xff, 0xbf]);
        assert_eq!(encoded, "-_-_");
        assert!(!encoded.contains('='));
    }

    #[test]
    fn round_trips_through_a_padded_decoder() {
        let original: Vec<u8> = (0..=255).collect();
        let mut encoded = encode_token(&original);
        while encoded.len() % 4 != 0 {
            encoded.push('=');
        }
        assert_eq!(URL_SAFE.decode(&encoded).unwrap(), original);
    }
}
