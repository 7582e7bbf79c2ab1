// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HMAC-SHA256 request signing, per `spec.md` §4.4 and §12.
//!
//! `ring::hmac::verify` is already constant-time, the property the
//! reference's own `constant_time_eq` helper hand-rolls for its simpler
//! Bearer-token comparison.

use axum::http::HeaderMap;
use ring::hmac;

use crate::error::BusError;
use crate::secrets::SecretRegistry;

const SIGNATURE_HEADER: &str = "x-bus-signature";

fn lowercase_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Sign a payload with an agent's shared secret, for test harnesses and the
/// CLI client.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, payload);
    format!("sha256={}", lowercase_hex(tag.as_ref()))
}

fn parse_header(value: &str) -> Option<&str> {
    value.strip_prefix("sha256=").or(Some(value))
}

fn verify(secret: &str, payload: &[u8], header_value: &str) -> bool {
    let Some(hex) = parse_header(header_value.trim()) else { return false };
    let Ok(expected) = hex_decode(hex) else { return false };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hmac::verify(&key, payload, &expected).is_ok()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 {
        return Err(());
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    let bytes = hex.as_bytes();
    for chunk in bytes.chunks(2) {
        let byte = std::str::from_utf8(chunk).ok().and_then(|s| u8::from_str_radix(s, 16).ok()).ok_or(())?;
        out.push(byte);
    }
    Ok(out)
}

/// Verify a signed request for `agent_id` over `payload` (raw JSON body or
/// raw query string, byte-exact). Missing/invalid/mis-encoded signatures all
/// return `unauthorized`, with a single non-revealing message.
pub async fn require_signature(
    secrets: &SecretRegistry,
    agent_id: &str,
    payload: &[u8],
    headers: &HeaderMap,
) -> Result<(), BusError> {
    let header_value = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| BusError::unauthorized("invalid signature"))?;
    let secret = secrets.get(agent_id).await.ok_or_else(|| BusError::unauthorized("invalid signature"))?;
    if verify(&secret, payload, header_value) {
        Ok(())
    } else {
        Err(BusError::unauthorized("invalid signature"))
    }
}
