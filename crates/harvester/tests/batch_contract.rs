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

//! The wire contract consumed by the downstream sender: five fields per
//! row, URL-safe tokens that verify against an independently constructed
//! HMAC, no partial rows.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use harvester::row::{append_rows, Action, TokenRow};
use harvester::{MacKey, TokenSigner};

const KEY_HEX: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

fn signer() -> TokenSigner {
    let key: MacKey = KEY_HEX.parse().unwrap();
    TokenSigner::new(&key)
}

/// HMAC computed outside the signer, over the raw key bytes.
fn reference_mac(input: &[u8]) -> Vec<u8> {
    let key = hex::decode(KEY_HEX).unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
    mac.update(input);
    mac.finalize().into_bytes().to_vec()
}

#[test]
fn single_activation_row() {
    let signer = signer();
    let secret = [0u8; 32];
    let rows = vec![TokenRow {
        action: Action::Activation,
        email: "a@b",
        login: "x",
        secret: &secret,
        code: "",
    }];

    let mut line = String::new();
    assert_eq!(append_rows(&signer, rows, &mut line), 1);

    let fields: Vec<&str> = line.split(',').collect();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[0], "1");
    assert_eq!(fields[1], "a@b");
    assert_eq!(fields[2], "x");
    assert_eq!(fields[3].len(), 86);
    assert_eq!(fields[4], "");

    let token = URL_SAFE_NO_PAD.decode(fields[3]).unwrap();
    assert_eq!(token.len(), 64);
    assert_eq!(&token[..32], &secret[..]);

    let mut input = b"/activate".to_vec();
    input.extend_from_slice(&secret);
    assert_eq!(&token[32..], &reference_mac(&input)[..]);
}

#[test]
fn mixed_batch_is_one_position_stable_record() {
    let signer = signer();
    let s1 = [0x11u8; 32];
    let s2 = [0x22u8; 32];
    let s3 = [0x33u8; 32];
    let rows = vec![
        TokenRow {
            action: Action::Activation,
            email: "j@k",
            login: "jk",
            secret: &s1,
            code: "",
        },
        TokenRow {
            action: Action::PasswordRecovery,
            email: "m@n",
            login: "mn",
            secret: &s2,
            code: "12345",
        },
        TokenRow {
            action: Action::Activation,
            email: "o@p",
            login: "op",
            secret: &s3,
            code: "",
        },
    ];

    let mut line = String::new();
    assert_eq!(append_rows(&signer, rows, &mut line), 3);

    let fields: Vec<&str> = line.split(',').collect();
    assert_eq!(fields.len(), 15);
    assert_eq!(fields[0], "1");
    assert_eq!(fields[5], "2");
    assert_eq!(fields[10], "1");

    // Every encoded token verifies against the reference HMAC.
    for (offset, secret, input_prefix, code) in [
        (0usize, &s1, &b"/activate"[..], ""),
        (5, &s2, &b"/recover"[..], "12345"),
        (10, &s3, &b"/activate"[..], ""),
    ] {
        let token = URL_SAFE_NO_PAD.decode(fields[offset + 3]).unwrap();
        assert_eq!(&token[..32], &secret[..]);

        let mut input = input_prefix.to_vec();
        input.extend_from_slice(secret);
        input.extend_from_slice(code.as_bytes());
        assert_eq!(&token[32..], &reference_mac(&input)[..]);
    }
}

#[test]
fn malformed_secret_drops_only_its_row() {
    let signer = signer();
    let good = [0x44u8; 32];
    let short = [0u8; 31];
    let rows = vec![
        TokenRow {
            action: Action::Activation,
            email: "a@b",
            login: "a",
            secret: &good,
            code: "",
        },
        TokenRow {
            action: Action::Activation,
            email: "c@d",
            login: "c",
            secret: &short,
            code: "",
        },
        TokenRow {
            action: Action::PasswordRecovery,
            email: "e@f",
            login: "e",
            secret: &good,
            code: "54321",
        },
    ];

    let mut line = String::new();
    assert_eq!(append_rows(&signer, rows, &mut line), 2);

    let fields: Vec<&str> = line.split(',').collect();
    assert_eq!(fields.len(), 10);
    assert_eq!(fields[1], "a@b");
    assert_eq!(fields[6], "e@f");
    assert!(!line.contains("c@d"));
}
