//! Mutation and read primitives over a [`SecretRecord`].
//!
//! Versions are append-only. Every write bumps `current_version` by one and
//! never reuses numbers; rollback appends a byte-identical copy of the
//! target ciphertext under a new version number.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use envsync_crypto::VaultKey;

use crate::error::CoreError;
use crate::types::{SecretRecord, SecretVersion};

fn rfc3339(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Append a new encrypted version (a `set` or `rotate`). Returns the new
/// version number.
pub fn write_version(
    rec: &mut SecretRecord,
    key: &VaultKey,
    value: &str,
    rotated: bool,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    device_id: &str,
) -> Result<i64, CoreError> {
    let sealed = envsync_crypto::encrypt(key, value)?;
    let next = rec.current_version + 1;
    rec.current_version = next;
    rec.versions.push(SecretVersion {
        version: next,
        nonce_b64: BASE64.encode(sealed.nonce),
        cipher_b64: BASE64.encode(&sealed.ciphertext),
        deleted: false,
        rotated,
        expires_at: expires_at.map(rfc3339),
        updated_at: rfc3339(now),
        device_id: device_id.to_string(),
        plain_hash: sealed.plain_hash,
    });
    Ok(next)
}

/// Append a tombstone version. Returns the new version number.
pub fn delete_version(rec: &mut SecretRecord, now: DateTime<Utc>, device_id: &str) -> i64 {
    let next = rec.current_version + 1;
    rec.current_version = next;
    rec.versions.push(SecretVersion {
        version: next,
        deleted: true,
        updated_at: rfc3339(now),
        device_id: device_id.to_string(),
        ..Default::default()
    });
    next
}

/// Append a copy of version `target` (cipher, nonce, hash and tombstone flag
/// preserved) as the new current version.
pub fn rollback_version(
    rec: &mut SecretRecord,
    target: i64,
    now: DateTime<Utc>,
    device_id: &str,
) -> Result<i64, CoreError> {
    let source = rec
        .versions
        .iter()
        .find(|v| v.version == target)
        .ok_or(CoreError::VersionNotFound(target))?
        .clone();
    let next = rec.current_version + 1;
    rec.current_version = next;
    rec.versions.push(SecretVersion {
        version: next,
        nonce_b64: source.nonce_b64,
        cipher_b64: source.cipher_b64,
        deleted: source.deleted,
        rotated: false,
        expires_at: source.expires_at,
        updated_at: rfc3339(now),
        device_id: device_id.to_string(),
        plain_hash: source.plain_hash,
    });
    Ok(next)
}

/// The latest version of a record, if it has any.
pub fn current_version(rec: &SecretRecord) -> Option<&SecretVersion> {
    rec.versions.last()
}

/// Whether a version carries an expiry in the past.
pub fn is_expired(v: &SecretVersion, now: DateTime<Utc>) -> bool {
    match v.expires_at.as_deref() {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => ts.with_timezone(&Utc) <= now,
            Err(_) => false,
        },
        None => false,
    }
}

/// Decrypt the current version of `key_name`, rejecting tombstones and
/// expired values.
pub fn decrypt_current(
    rec: &SecretRecord,
    key_name: &str,
    key: &VaultKey,
    now: DateTime<Utc>,
) -> Result<String, CoreError> {
    let v = current_version(rec).ok_or_else(|| CoreError::NotFound {
        entity: "key",
        name: key_name.to_string(),
    })?;
    if v.deleted {
        return Err(CoreError::Deleted(key_name.to_string()));
    }
    if is_expired(v, now) {
        return Err(CoreError::Expired(key_name.to_string()));
    }
    let nonce = BASE64
        .decode(&v.nonce_b64)
        .map_err(|_| envsync_crypto::CryptoError::InvalidCiphertext)?;
    let cipher = BASE64
        .decode(&v.cipher_b64)
        .map_err(|_| envsync_crypto::CryptoError::InvalidCiphertext)?;
    let plaintext = envsync_crypto::decrypt(key, &cipher, &nonce)?;
    Ok(plaintext.to_string())
}

/// Status label used by `history`: deleted beats rotated beats active.
pub fn version_status(v: &SecretVersion) -> &'static str {
    if v.deleted {
        "deleted"
    } else if v.rotated {
        "rotated"
    } else {
        "active"
    }
}

/// Render one `export KEY="value"` line with double-quote escaping for `"`,
/// `\` and control characters.
pub fn shell_export_line(key: &str, value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                escaped.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => escaped.push(c),
        }
    }
    format!("export {key}=\"{escaped}\"")
}
