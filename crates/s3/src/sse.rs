//! Server-side encryption request parameters

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};

/// Algorithm name sent with customer-provided keys
pub const SSE_C_ALGORITHM: &str = "AES256";

/// Base64 key and base64 MD5 digest of the key, as S3 expects them
pub fn customer_key_headers(key: &[u8; 32]) -> (String, String) {
    let digest = Md5::digest(key);
    (STANDARD.encode(key), STANDARD.encode(digest))
}

/// Attach the customer key headers (if any) to a read-side request
macro_rules! with_customer_key {
    ($request:expr, $sse:expr) => {{
        let request = $request;
        match $sse {
            Some(stow_core::Sse::Customer { key }) => {
                let (key, md5) = $crate::sse::customer_key_headers(key);
                request
                    .sse_customer_algorithm($crate::sse::SSE_C_ALGORITHM)
                    .sse_customer_key(key)
                    .sse_customer_key_md5(md5)
            }
            _ => request,
        }
    }};
}

/// Attach write-side encryption parameters
macro_rules! with_target_sse {
    ($request:expr, $sse:expr) => {{
        use aws_sdk_s3::types::ServerSideEncryption;
        let request = $request;
        match $sse {
            Some(stow_core::Sse::Customer { .. }) => with_customer_key!(request, $sse),
            Some(stow_core::Sse::Kms { key_id }) => request
                .server_side_encryption(ServerSideEncryption::AwsKms)
                .ssekms_key_id(key_id.clone()),
            Some(stow_core::Sse::S3) => request.server_side_encryption(ServerSideEncryption::Aes256),
            None => request,
        }
    }};
}

/// Attach the copy-source customer key headers
macro_rules! with_copy_source_key {
    ($request:expr, $sse:expr) => {{
        let request = $request;
        match $sse {
            Some(stow_core::Sse::Customer { key }) => {
                let (key, md5) = $crate::sse::customer_key_headers(key);
                request
                    .copy_source_sse_customer_algorithm($crate::sse::SSE_C_ALGORITHM)
                    .copy_source_sse_customer_key(key)
                    .copy_source_sse_customer_key_md5(md5)
            }
            _ => request,
        }
    }};
}

pub(crate) use {with_copy_source_key, with_customer_key, with_target_sse};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_key_headers() {
        let key = [7u8; 32];
        let (encoded, md5) = customer_key_headers(&key);
        assert_eq!(STANDARD.decode(encoded).unwrap(), key.to_vec());
        assert_eq!(STANDARD.decode(md5).unwrap().len(), 16);
    }

    #[test]
    fn test_md5_of_empty_input() {
        let digest = Md5::digest(b"");
        assert_eq!(STANDARD.encode(digest), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }
}
