//! Multipart uploads and copies
//!
//! Bodies at or above [`MULTIPART_THRESHOLD`] are sent in parts, so neither
//! the single-PUT limit nor the size of an object in memory caps a transfer.
//! Server-side copies switch to part copies above [`MAX_COPY_SIZE`].

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass};
use futures::StreamExt;

use stow_core::{CopyOptions, Error, ObjectBody, PutOptions, Result};

use crate::client::map_sdk_error;
use crate::sse::{with_copy_source_key, with_customer_key, with_target_sse};

/// Bodies this large or larger are uploaded in parts
pub const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Part size used until an object would need more than [`MAX_PARTS`]
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Smallest part S3 accepts, the last part excepted
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

pub const MAX_PARTS: u64 = 10_000;

/// Largest object a single CopyObject request accepts
pub const MAX_COPY_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Part size for an object of `object_size` bytes
pub fn part_size_for(object_size: u64) -> u64 {
    object_size
        .div_ceil(MAX_PARTS)
        .max(DEFAULT_PART_SIZE)
        .clamp(MIN_PART_SIZE, MAX_PART_SIZE)
}

/// Inclusive byte range of 1-based part `number`, if the object has one
pub fn part_range(number: u64, part_size: u64, total: u64) -> Option<(u64, u64)> {
    let start = number.checked_sub(1)? * part_size;
    if start >= total {
        return None;
    }
    Some((start, (start + part_size).min(total) - 1))
}

/// One open multipart upload
struct Upload<'a> {
    client: &'a aws_sdk_s3::Client,
    bucket: &'a str,
    key: &'a str,
    upload_id: String,
    parts: Vec<CompletedPart>,
}

impl<'a> Upload<'a> {
    async fn create(
        client: &'a aws_sdk_s3::Client,
        bucket: &'a str,
        key: &'a str,
        options: &PutOptions,
    ) -> Result<Upload<'a>> {
        let content_type = mime_guess::from_path(key).first_or_octet_stream();
        let request = client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type.essence_str())
            .set_storage_class(options.storage_class.as_deref().map(StorageClass::from));
        let request = with_target_sse!(request, options.sse.as_ref());
        let created = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::General(format!("{bucket}/{key}: no upload id returned")))?
            .to_string();
        tracing::debug!(bucket, key, upload_id = %upload_id, "multipart upload started");
        Ok(Upload {
            client,
            bucket,
            key,
            upload_id,
            parts: Vec::new(),
        })
    }

    fn what(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }

    fn next_number(&self) -> i32 {
        self.parts.len() as i32 + 1
    }

    fn record(&mut self, number: i32, etag: Option<&str>) {
        self.parts.push(
            CompletedPart::builder()
                .part_number(number)
                .set_e_tag(etag.map(str::to_string))
                .build(),
        );
    }

    async fn send_part(&mut self, data: Vec<u8>, options: &PutOptions) -> Result<()> {
        let number = self.next_number();
        let request = self
            .client
            .upload_part()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(&self.upload_id)
            .part_number(number)
            .body(ByteStream::from(data));
        let request = with_customer_key!(request, options.sse.as_ref());
        let response = request.send().await.map_err(|e| map_sdk_error(e, &self.what()))?;
        self.record(number, response.e_tag());
        Ok(())
    }

    async fn copy_part(
        &mut self,
        source: &str,
        range: (u64, u64),
        options: &CopyOptions,
    ) -> Result<()> {
        let number = self.next_number();
        let request = self
            .client
            .upload_part_copy()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(&self.upload_id)
            .part_number(number)
            .copy_source(source)
            .copy_source_range(format!("bytes={}-{}", range.0, range.1));
        let request = with_copy_source_key!(request, options.source_sse.as_ref());
        let request = with_customer_key!(request, options.target_sse.as_ref());
        let response = request.send().await.map_err(|e| map_sdk_error(e, &self.what()))?;
        let etag = response.copy_part_result().and_then(|r| r.e_tag());
        self.record(number, etag);
        Ok(())
    }

    async fn complete(self) -> Result<()> {
        let what = self.what();
        let parts = self.parts.len();
        self.client
            .complete_multipart_upload()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(self.parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &what))?;
        tracing::debug!(object = %what, parts, "multipart upload completed");
        Ok(())
    }

    async fn abort(self) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(&self.upload_id)
            .send()
            .await;
        if let Err(err) = result {
            tracing::warn!(
                object = %self.what(),
                upload_id = %self.upload_id,
                error = %map_sdk_error(err, "abort"),
                "multipart upload left behind"
            );
        }
    }
}

/// Upload `body` in parts, aborting the upload on any failure
pub(crate) async fn upload(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    mut body: ObjectBody,
    options: &PutOptions,
) -> Result<u64> {
    let part_size = part_size_for(body.size) as usize;
    let mut upload = Upload::create(client, bucket, key, options).await?;

    let mut pending: Vec<u8> = Vec::new();
    let mut written = 0u64;
    let result: Result<()> = async {
        while let Some(chunk) = body.chunks.next().await {
            pending.extend_from_slice(&chunk?);
            while pending.len() >= part_size {
                let rest = pending.split_off(part_size);
                let part = std::mem::replace(&mut pending, rest);
                written += part.len() as u64;
                upload.send_part(part, options).await?;
            }
        }
        if !pending.is_empty() || upload.parts.is_empty() {
            written += pending.len() as u64;
            upload.send_part(std::mem::take(&mut pending), options).await?;
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            upload.complete().await?;
            Ok(written)
        }
        Err(err) => {
            upload.abort().await;
            Err(err)
        }
    }
}

/// Server-side copy of an object too large for CopyObject
pub(crate) async fn copy(
    client: &aws_sdk_s3::Client,
    source: &str,
    bucket: &str,
    key: &str,
    options: &CopyOptions,
) -> Result<u64> {
    let part_size = part_size_for(options.size);
    let put = PutOptions {
        sse: options.target_sse.clone(),
        storage_class: None,
    };
    let mut upload = Upload::create(client, bucket, key, &put).await?;

    let mut number = 1;
    let result: Result<()> = async {
        while let Some(range) = part_range(number, part_size, options.size) {
            upload.copy_part(source, range, options).await?;
            number += 1;
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            upload.complete().await?;
            Ok(options.size)
        }
        Err(err) => {
            upload.abort().await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_size_grows_for_huge_objects() {
        assert_eq!(part_size_for(0), DEFAULT_PART_SIZE);
        assert_eq!(part_size_for(100 * 1024 * 1024), DEFAULT_PART_SIZE);

        let huge = DEFAULT_PART_SIZE * 20_000;
        let size = part_size_for(huge);
        assert!(size > DEFAULT_PART_SIZE);
        assert!(huge.div_ceil(size) <= MAX_PARTS);

        assert_eq!(part_size_for(u64::MAX), MAX_PART_SIZE);
    }

    #[test]
    fn test_part_ranges_cover_object() {
        assert_eq!(part_range(1, 100, 250), Some((0, 99)));
        assert_eq!(part_range(2, 100, 250), Some((100, 199)));
        assert_eq!(part_range(3, 100, 250), Some((200, 249)));
        assert_eq!(part_range(4, 100, 250), None);
        assert_eq!(part_range(0, 100, 250), None);
        assert_eq!(part_range(1, 100, 0), None);
    }
}
