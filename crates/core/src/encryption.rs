//! Server-side encryption key resolution
//!
//! Keys are scoped to an alias and prefix:
//!
//! - `--encrypt-key alias/prefix=KEY` SSE-C with a 32-byte customer key given as
//!   64 hex characters, base64, or 32 raw bytes
//! - `--encrypt-kms alias/prefix=KEY_ID` SSE-KMS with a named master key
//! - `--encrypt alias/prefix` SSE-S3
//!
//! All keys are validated up front. A malformed key never reaches the copy loop.

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

use crate::alias::{AliasResolver, ResolvedUrl};
use crate::error::{Error, Result};

/// Environment variable consulted when no `--encrypt-key` is given
pub const ENCRYPT_KEY_ENV: &str = "STOW_ENCRYPT_KEY";

/// Length of an SSE-C customer key in bytes
pub const SSE_C_KEY_LEN: usize = 32;

/// Server-side encryption applied to one object
#[derive(Clone, PartialEq, Eq)]
pub enum Sse {
    /// Customer-provided key
    Customer { key: [u8; SSE_C_KEY_LEN] },
    /// KMS-managed key
    Kms { key_id: String },
    /// Server-managed key
    S3,
}

impl fmt::Debug for Sse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sse::Customer { .. } => f.write_str("Sse::Customer(<redacted>)"),
            Sse::Kms { key_id } => f.debug_struct("Sse::Kms").field("key_id", key_id).finish(),
            Sse::S3 => f.write_str("Sse::S3"),
        }
    }
}

/// The three flag families accepted on the command line
#[derive(Debug, Clone, Default)]
pub struct EncryptFlags {
    /// `--encrypt-key` values
    pub customer: Vec<String>,
    /// `--encrypt-kms` values
    pub kms: Vec<String>,
    /// `--encrypt` values
    pub s3: Vec<String>,
}

impl EncryptFlags {
    /// Fill `customer` from `STOW_ENCRYPT_KEY` when no key flag was given
    pub fn with_env_fallback(mut self) -> Self {
        if self.customer.is_empty() {
            if let Ok(value) = std::env::var(ENCRYPT_KEY_ENV) {
                if !value.is_empty() {
                    tracing::debug!("using encryption keys from {ENCRYPT_KEY_ENV}");
                    self.customer.push(value);
                }
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.customer.is_empty() && self.kms.is_empty() && self.s3.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Customer,
    Kms,
    S3,
}

/// A key bound to an `alias/prefix`
#[derive(Debug, Clone)]
pub struct PrefixKey {
    pub prefix: String,
    pub sse: Sse,
}

/// Validated encryption keys grouped by alias, longest prefix first
#[derive(Debug, Clone, Default)]
pub struct EncryptionKeys {
    by_alias: HashMap<String, Vec<PrefixKey>>,
}

impl EncryptionKeys {
    /// Parse and validate every key flag against the command arguments
    pub fn parse(flags: &EncryptFlags, args: &[String], resolver: &AliasResolver) -> Result<Self> {
        let mut by_alias: HashMap<String, Vec<PrefixKey>> = HashMap::new();

        let families = [
            (&flags.kms, KeyType::Kms),
            (&flags.s3, KeyType::S3),
            (&flags.customer, KeyType::Customer),
        ];
        for (values, key_type) in families {
            for spec in values.iter().flat_map(|v| v.split(',')).map(str::trim) {
                if spec.is_empty() {
                    continue;
                }
                let (alias, key) = parse_prefix_key(spec, key_type, args)?;
                by_alias.entry(alias).or_default().push(key);
            }
        }

        for keys in by_alias.values() {
            check_overlap(keys)?;
        }

        for (alias, keys) in &by_alias {
            if !resolver.contains(alias) {
                let prefix = keys.first().map(|k| k.prefix.as_str()).unwrap_or(alias.as_str());
                return Err(Error::EncryptionKey(format!(
                    "SSE prefix {prefix} has no configured alias '{alias}'"
                )));
            }
        }

        for keys in by_alias.values_mut() {
            keys.sort_by(|a, b| {
                b.prefix
                    .len()
                    .cmp(&a.prefix.len())
                    .then_with(|| a.prefix.cmp(&b.prefix))
            });
        }

        Ok(Self { by_alias })
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }

    /// Key for a resolved URL: the longest prefix that matches `alias/bucket/key`
    pub fn lookup(&self, url: &ResolvedUrl) -> Option<Sse> {
        if url.is_local() {
            return None;
        }
        let resource = url.display_path();
        self.by_alias
            .get(&url.alias)?
            .iter()
            .find(|k| resource.starts_with(&k.prefix))
            .map(|k| k.sse.clone())
    }
}

fn split_alias(spec: &str) -> (&str, &str) {
    spec.split_once('/').unwrap_or((spec, ""))
}

fn parse_prefix_key(spec: &str, key_type: KeyType, args: &[String]) -> Result<(String, PrefixKey)> {
    let missing = || {
        Error::EncryptionKey(format!(
            "'{}' is missing a key, use alias/prefix=key",
            redact(spec)
        ))
    };

    let (target, encoded) = match spec.rfind('=') {
        None if key_type == KeyType::S3 => (spec, ""),
        None => return Err(missing()),
        Some(pos) if pos == spec.len() - 1 => return Err(missing()),
        Some(pos) => (&spec[..pos], &spec[pos + 1..]),
    };

    let (alias, prefix) = split_alias(target);
    if alias.is_empty() {
        return Err(Error::EncryptionKey(format!(
            "'{prefix}' does not start with an alias"
        )));
    }

    let sse = match key_type {
        KeyType::Kms => {
            if !valid_kms_key_name(encoded) {
                return Err(Error::EncryptionKey(format!(
                    "KMS key ({encoded}) is badly formatted"
                )));
            }
            Sse::Kms {
                key_id: encoded.to_string(),
            }
        }
        KeyType::Customer => Sse::Customer {
            key: decode_customer_key(encoded)?,
        },
        KeyType::S3 => Sse::S3,
    };

    let full_prefix = format!("{alias}/{prefix}");
    let matched = args
        .iter()
        .any(|arg| arg.starts_with(&full_prefix) || full_prefix.starts_with(arg.as_str()));
    if !matched {
        return Err(Error::EncryptionKey(format!(
            "SSE prefix {full_prefix} does not match any source or target argument"
        )));
    }

    Ok((
        alias.to_string(),
        PrefixKey {
            prefix: full_prefix,
            sse,
        },
    ))
}

fn redact(spec: &str) -> &str {
    spec.rsplit_once('=').map_or(spec, |(target, _)| target)
}

fn check_overlap(keys: &[PrefixKey]) -> Result<()> {
    for (i, a) in keys.iter().enumerate() {
        for b in &keys[i + 1..] {
            if a.prefix.starts_with(&b.prefix) || b.prefix.starts_with(&a.prefix) {
                return Err(Error::EncryptionKey(format!(
                    "overlapping SSE prefixes {} and {}",
                    a.prefix, b.prefix
                )));
            }
        }
    }
    Ok(())
}

/// Decode an SSE-C key: 64 hex characters, base64, or 32 raw bytes
fn decode_customer_key(encoded: &str) -> Result<[u8; SSE_C_KEY_LEN]> {
    let bytes = if encoded.len() == 2 * SSE_C_KEY_LEN {
        hex::decode(encoded).map_err(|err| {
            Error::EncryptionKey(format!("64-character key is not valid hex: {err}"))
        })?
    } else {
        match STANDARD_NO_PAD
            .decode(encoded)
            .or_else(|_| STANDARD.decode(encoded))
        {
            Ok(bytes) if bytes.len() == SSE_C_KEY_LEN => bytes,
            _ if encoded.len() == SSE_C_KEY_LEN => encoded.as_bytes().to_vec(),
            Ok(bytes) => bytes,
            Err(_) => {
                return Err(Error::EncryptionKey(
                    "key was neither base64 nor hex encoded".into(),
                ));
            }
        }
    };

    <[u8; SSE_C_KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        Error::EncryptionKey(format!(
            "decoded key is {} bytes, but should be {SSE_C_KEY_LEN} bytes",
            bytes.len()
        ))
    })
}

/// KMS key names: ASCII alphanumerics, `_`, and `-` anywhere but the ends
pub fn valid_kms_key_name(s: &str) -> bool {
    if s.is_empty() || s == "_" {
        return false;
    }
    let last = s.len() - 1;
    s.bytes().enumerate().all(|(i, b)| {
        b.is_ascii_alphanumeric() || b == b'_' || (b == b'-' && i > 0 && i < last)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::Alias;

    const PLAIN_KEY: &str = "32byteslongsecretkeymustbegiven1";

    fn resolver() -> AliasResolver {
        AliasResolver::new([
            Alias::new("myminio", "http://localhost:9000", "a", "b"),
            Alias::new("other", "http://localhost:9001", "a", "b"),
        ])
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_customer_key_encodings() {
        let lower = hex::encode(PLAIN_KEY);
        assert_eq!(decode_customer_key(&lower).unwrap(), *b"32byteslongsecretkeymustbegiven1");
        let upper = hex::encode_upper(PLAIN_KEY);
        assert_eq!(decode_customer_key(&upper).unwrap(), *b"32byteslongsecretkeymustbegiven1");

        let b64 = STANDARD_NO_PAD.encode(PLAIN_KEY);
        assert_eq!(decode_customer_key(&b64).unwrap(), *b"32byteslongsecretkeymustbegiven1");

        let padded = STANDARD.encode(PLAIN_KEY);
        assert_eq!(decode_customer_key(&padded).unwrap(), *b"32byteslongsecretkeymustbegiven1");

        assert_eq!(decode_customer_key(PLAIN_KEY).unwrap(), *b"32byteslongsecretkeymustbegiven1");
        assert!(decode_customer_key("c2hvcnQ").is_err());
        let bad_hex = "z".repeat(64);
        let err = decode_customer_key(&bad_hex).unwrap_err();
        assert!(err.to_string().contains("not valid hex"));
    }

    #[test]
    fn test_kms_key_names() {
        assert!(valid_kms_key_name("my-key_1"));
        assert!(valid_kms_key_name("__"));
        assert!(!valid_kms_key_name(""));
        assert!(!valid_kms_key_name("_"));
        assert!(!valid_kms_key_name("-key"));
        assert!(!valid_kms_key_name("key-"));
        assert!(!valid_kms_key_name("key/1"));
    }

    #[test]
    fn test_parse_and_lookup_longest_prefix() {
        let key = STANDARD_NO_PAD.encode(PLAIN_KEY);
        let flags = EncryptFlags {
            customer: vec![format!("myminio/bucket/secret={key}")],
            kms: vec!["other/bucket=my-key".into()],
            s3: vec![],
        };
        let argv = args(&["src/", "myminio/bucket/secret/", "other/bucket/x"]);
        let keys = EncryptionKeys::parse(&flags, &argv, &resolver()).unwrap();

        let url = resolver().expand("myminio/bucket/secret/a.txt").unwrap();
        assert!(matches!(keys.lookup(&url), Some(Sse::Customer { .. })));

        let url = resolver().expand("myminio/bucket/public/a.txt").unwrap();
        assert_eq!(keys.lookup(&url), None);

        let url = resolver().expand("other/bucket/x").unwrap();
        assert_eq!(
            keys.lookup(&url),
            Some(Sse::Kms {
                key_id: "my-key".into()
            })
        );

        let local = resolver().expand("src/a.txt").unwrap();
        assert_eq!(keys.lookup(&local), None);
    }

    #[test]
    fn test_sse_s3_without_key() {
        let flags = EncryptFlags {
            s3: vec!["myminio/bucket".into()],
            ..Default::default()
        };
        let keys = EncryptionKeys::parse(&flags, &args(&["myminio/bucket/"]), &resolver()).unwrap();
        let url = resolver().expand("myminio/bucket/k").unwrap();
        assert_eq!(keys.lookup(&url), Some(Sse::S3));
    }

    #[test]
    fn test_prefix_must_match_an_argument() {
        let flags = EncryptFlags {
            kms: vec!["myminio/elsewhere=key".into()],
            ..Default::default()
        };
        let err = EncryptionKeys::parse(&flags, &args(&["myminio/bucket/"]), &resolver())
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_overlapping_prefixes_rejected() {
        let flags = EncryptFlags {
            kms: vec!["myminio/bucket=k1".into(), "myminio/bucket/dir=k2".into()],
            ..Default::default()
        };
        let err = EncryptionKeys::parse(&flags, &args(&["myminio/bucket/dir/"]), &resolver())
            .unwrap_err();
        assert!(err.to_string().contains("overlapping"));
    }

    #[test]
    fn test_unknown_alias_rejected() {
        let flags = EncryptFlags {
            kms: vec!["ghost/bucket=k1".into()],
            ..Default::default()
        };
        let err = EncryptionKeys::parse(&flags, &args(&["ghost/bucket/"]), &resolver())
            .unwrap_err();
        assert!(matches!(err, Error::EncryptionKey(_)));
    }

    #[test]
    fn test_missing_key_rejected() {
        for spec in ["myminio/bucket", "myminio/bucket="] {
            let flags = EncryptFlags {
                customer: vec![spec.into()],
                ..Default::default()
            };
            let err = EncryptionKeys::parse(&flags, &args(&["myminio/bucket"]), &resolver())
                .unwrap_err();
            assert!(err.to_string().contains("missing a key"), "{spec}");
        }
    }

    #[test]
    fn test_comma_separated_values() {
        let flags = EncryptFlags {
            kms: vec!["myminio/a=k1,myminio/b=k2".into()],
            ..Default::default()
        };
        let keys =
            EncryptionKeys::parse(&flags, &args(&["myminio/a/", "myminio/b/"]), &resolver()).unwrap();
        let url = resolver().expand("myminio/b/x").unwrap();
        assert_eq!(keys.lookup(&url), Some(Sse::Kms { key_id: "k2".into() }));
    }

    #[test]
    fn test_debug_redacts_customer_key() {
        let sse = Sse::Customer { key: [7; 32] };
        assert_eq!(format!("{sse:?}"), "Sse::Customer(<redacted>)");
    }
}
