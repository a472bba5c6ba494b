//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements [`ObjectClient`] from stow-core.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier, StorageClass};
use aws_smithy_types::DateTime;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use jiff::Timestamp;
use tokio::sync::mpsc;

use stow_core::client::{REMOVE_CHANNEL_CAPACITY, receiver_stream};
use stow_core::{
    Alias, ClientContent, ClientUrl, CopyOptions, Error, GetOptions, ListOptions, ObjectBody,
    ObjectClient, PutOptions, RemoveOptions, RemoveOutcome, Result, StatOptions, UrlKind,
};

use crate::multipart::{self, MAX_COPY_SIZE, MULTIPART_THRESHOLD};
use crate::sse::{with_copy_source_key, with_customer_key, with_target_sse};

const LIST_CHANNEL_CAPACITY: usize = 1000;

/// Keys per DeleteObjects request (S3 limit)
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Map an SDK error to a stow error
pub(crate) fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, what: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            Error::Network(format!("{what}: {}", DisplayErrorContext(&err)))
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = service.err().code().unwrap_or_default();
            match (code, status) {
                ("NoSuchKey" | "NoSuchBucket" | "NoSuchVersion" | "NotFound", _) | (_, 404) => {
                    Error::NotFound(what.to_string())
                }
                (
                    "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
                    | "ExpiredToken",
                    _,
                )
                | (_, 401 | 403) => Error::Auth(format!("{what}: {code}")),
                ("PreconditionFailed" | "OperationAborted", _) | (_, 409 | 412) => {
                    Error::Conflict(format!("{what}: {code}"))
                }
                ("NotImplemented", _) | (_, 501) => Error::UnsupportedFeature(what.to_string()),
                _ => {
                    let message = service.err().message().unwrap_or_default();
                    Error::General(format!("{what}: {code} {message}").trim_end().to_string())
                }
            }
        }
        _ => Error::General(format!("{what}: {}", DisplayErrorContext(&err))),
    }
}

fn timestamp(value: Option<&DateTime>) -> Option<Timestamp> {
    value.and_then(|t| Timestamp::from_second(t.secs()).ok())
}

fn clean_etag(etag: Option<&str>) -> Option<String> {
    etag.map(|e| e.trim_matches('"').to_string())
}

/// Percent-encode a copy source, keeping `/`
fn encode_copy_source(bucket: &str, key: &str) -> String {
    let key: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{bucket}/{}", key.join("/"))
}

/// S3 client wrapper
#[derive(Clone)]
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    scheme: String,
    host: String,
}

impl S3Client {
    /// Create a new S3 client from an alias configuration
    pub async fn new(alias: &Alias) -> Result<Self> {
        let endpoint = url_parts(&alias.endpoint)?;
        let credentials = aws_credential_types::Credentials::new(
            alias.access_key.clone(),
            alias.secret_key.clone(),
            None,
            None,
            "stow-static-credentials",
        );

        let transport = &alias.transport;
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_config::Region::new(alias.region.clone()))
            .endpoint_url(&alias.endpoint)
            .retry_config(
                aws_config::retry::RetryConfig::standard()
                    .with_max_attempts(transport.max_attempts.max(1))
                    .with_initial_backoff(transport.initial_backoff())
                    .with_max_backoff(transport.max_backoff()),
            )
            .timeout_config(
                aws_config::timeout::TimeoutConfig::builder()
                    .connect_timeout(transport.connect_timeout())
                    .read_timeout(transport.read_timeout())
                    .build(),
            )
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(!alias.virtual_host_style())
            .build();

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            scheme: endpoint.0,
            host: endpoint.1,
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    fn url(&self, path: &str) -> ClientUrl {
        ClientUrl::object(self.scheme.clone(), self.host.clone(), path)
    }

    async fn has_prefix(&self, bucket: &str, prefix: &str) -> Result<bool> {
        let response = self
            .inner
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{bucket}/{prefix}")))?;
        Ok(!response.contents().is_empty() || !response.common_prefixes().is_empty())
    }

    async fn list_buckets(&self) -> Result<Vec<ClientContent>> {
        let response = self
            .inner
            .list_buckets()
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "list buckets"))?;
        Ok(response
            .buckets()
            .iter()
            .filter_map(|b| {
                let name = b.name()?;
                let mut content = ClientContent::dir(self.url(name));
                content.modified = timestamp(b.creation_date());
                Some(content)
            })
            .collect())
    }
}

fn url_parts(endpoint: &str) -> Result<(String, String)> {
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| Error::Config(format!("endpoint {endpoint} has no scheme")))?;
    let host = rest.split('/').next().unwrap_or_default();
    Ok((scheme.to_string(), host.to_string()))
}

/// Feeds one listing into a channel
struct Lister {
    client: S3Client,
    options: ListOptions,
    tx: mpsc::Sender<Result<ClientContent>>,
}

impl Lister {
    /// Send one item; false once the consumer is gone
    async fn send(&self, item: Result<ClientContent>) -> bool {
        self.tx.send(item).await.is_ok()
    }

    async fn run(self, url: ClientUrl) {
        let (bucket, key) = url.bucket_and_key();
        if !bucket.is_empty() {
            self.objects(bucket, key).await;
            return;
        }

        let buckets = match self.client.list_buckets().await {
            Ok(buckets) => buckets,
            Err(err) => {
                self.send(Err(err)).await;
                return;
            }
        };
        for content in buckets {
            let name = content.url.bucket_and_key().0.to_string();
            if !self.options.recursive {
                if !self.send(Ok(content)).await {
                    return;
                }
                continue;
            }
            if !self.objects(&name, "").await {
                return;
            }
        }
    }

    async fn objects(&self, bucket: &str, prefix: &str) -> bool {
        if self.options.include_versions {
            self.versions(bucket, prefix).await
        } else {
            self.latest(bucket, prefix).await
        }
    }

    async fn latest(&self, bucket: &str, prefix: &str) -> bool {
        let mut token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .inner
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(token.take());
            if !self.options.recursive {
                request = request.delimiter("/");
            }
            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    let err = map_sdk_error(err, &format!("{bucket}/{prefix}"));
                    self.send(Err(err)).await;
                    return false;
                }
            };

            for common in response.common_prefixes() {
                if let Some(dir) = common.prefix() {
                    let content = ClientContent::dir(self.client.url(&format!("{bucket}/{dir}")));
                    if !self.send(Ok(content)).await {
                        return false;
                    }
                }
            }
            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let mut content = ClientContent::file(
                    self.client.url(&format!("{bucket}/{key}")),
                    object.size().unwrap_or(0),
                );
                content.modified = timestamp(object.last_modified());
                content.etag = clean_etag(object.e_tag());
                content.storage_class = object.storage_class().map(|s| s.as_str().to_string());
                if !self.send(Ok(content)).await {
                    return false;
                }
            }

            match response.next_continuation_token() {
                Some(next) if response.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string());
                }
                _ => return true,
            }
        }
    }

    async fn versions(&self, bucket: &str, prefix: &str) -> bool {
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;
        loop {
            let mut request = self
                .client
                .inner
                .list_object_versions()
                .bucket(bucket)
                .prefix(prefix)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take());
            if !self.options.recursive {
                request = request.delimiter("/");
            }
            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    let err = map_sdk_error(err, &format!("{bucket}/{prefix}"));
                    self.send(Err(err)).await;
                    return false;
                }
            };

            for common in response.common_prefixes() {
                if let Some(dir) = common.prefix() {
                    let content = ClientContent::dir(self.client.url(&format!("{bucket}/{dir}")));
                    if !self.send(Ok(content)).await {
                        return false;
                    }
                }
            }

            let mut page = Vec::new();
            for version in response.versions() {
                let Some(key) = version.key() else { continue };
                let mut content = ClientContent::file(
                    self.client.url(&format!("{bucket}/{key}")),
                    version.size().unwrap_or(0),
                );
                content.modified = timestamp(version.last_modified());
                content.etag = clean_etag(version.e_tag());
                content.version_id = version.version_id().map(str::to_string);
                content.storage_class = version.storage_class().map(|s| s.as_str().to_string());
                content.is_latest = version.is_latest().unwrap_or(false);
                page.push(content);
            }
            for marker in response.delete_markers() {
                let Some(key) = marker.key() else { continue };
                let mut content = ClientContent::file(self.client.url(&format!("{bucket}/{key}")), 0);
                content.modified = timestamp(marker.last_modified());
                content.version_id = marker.version_id().map(str::to_string);
                content.is_delete_marker = true;
                content.is_latest = marker.is_latest().unwrap_or(false);
                page.push(content);
            }
            // newest first within a key; the latest version leads
            page.sort_by(|a, b| {
                a.url
                    .path
                    .cmp(&b.url.path)
                    .then_with(|| b.is_latest.cmp(&a.is_latest))
                    .then_with(|| b.modified.cmp(&a.modified))
            });
            for content in page {
                if !self.send(Ok(content)).await {
                    return false;
                }
            }

            if !response.is_truncated().unwrap_or(false) {
                return true;
            }
            key_marker = response.next_key_marker().map(str::to_string);
            version_marker = response.next_version_id_marker().map(str::to_string);
            if key_marker.is_none() {
                return true;
            }
        }
    }
}

/// Removes queued URLs with DeleteObjects, one bucket run at a time
struct Remover {
    client: S3Client,
    options: RemoveOptions,
    tx: mpsc::Sender<RemoveOutcome>,
}

impl Remover {
    async fn run(self, mut targets: mpsc::Receiver<ClientUrl>) {
        while let Some(first) = targets.recv().await {
            let mut pending = vec![first];
            while pending.len() < DELETE_BATCH_SIZE {
                match targets.try_recv() {
                    Ok(url) => pending.push(url),
                    Err(_) => break,
                }
            }
            for run in bucket_runs(pending) {
                if !self.delete(run).await {
                    return;
                }
            }
        }
    }

    /// Identifiers for one URL: its key, or every version of it
    async fn identifiers(&self, bucket: &str, key: &str) -> Result<Vec<ObjectIdentifier>> {
        if !self.options.include_versions {
            let id = ObjectIdentifier::builder()
                .key(key)
                .build()
                .map_err(|e| Error::General(e.to_string()))?;
            return Ok(vec![id]);
        }

        let mut ids = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;
        loop {
            let response = self
                .client
                .inner
                .list_object_versions()
                .bucket(bucket)
                .prefix(key)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;
            let versions = response
                .versions()
                .iter()
                .filter(|v| v.key() == Some(key))
                .map(|v| v.version_id().map(str::to_string));
            let markers = response
                .delete_markers()
                .iter()
                .filter(|m| m.key() == Some(key))
                .map(|m| m.version_id().map(str::to_string));
            for version_id in versions.chain(markers) {
                let id = ObjectIdentifier::builder()
                    .key(key)
                    .set_version_id(version_id)
                    .build()
                    .map_err(|e| Error::General(e.to_string()))?;
                ids.push(id);
            }
            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = response.next_key_marker().map(str::to_string);
            version_marker = response.next_version_id_marker().map(str::to_string);
            if key_marker.as_deref().is_some_and(|k| k > key) {
                break;
            }
        }
        Ok(ids)
    }

    async fn report(&self, outcome: RemoveOutcome) -> bool {
        self.tx.send(outcome).await.is_ok()
    }

    /// Delete one same-bucket run; false once the stream must stop
    async fn delete(&self, urls: Vec<ClientUrl>) -> bool {
        let Some(bucket) = urls.first().map(|u| u.bucket_and_key().0.to_string()) else {
            return true;
        };

        let mut ids = Vec::new();
        let mut queued = Vec::new();
        for url in urls {
            let key = url.bucket_and_key().1.to_string();
            match self.identifiers(&bucket, &key).await {
                Ok(found) if found.is_empty() => {
                    let err = Error::NotFound(url.to_string());
                    if !self.report(RemoveOutcome::Failed(url, err)).await {
                        return false;
                    }
                }
                Ok(found) => {
                    ids.extend(found);
                    queued.push((url, key));
                }
                Err(err) if err.is_fatal() => {
                    self.report(RemoveOutcome::Aborted(err)).await;
                    return false;
                }
                Err(err) => {
                    if !self.report(RemoveOutcome::Failed(url, err)).await {
                        return false;
                    }
                }
            }
        }
        if ids.is_empty() {
            return true;
        }

        let mut failures = std::collections::HashMap::new();
        for chunk in ids.chunks(DELETE_BATCH_SIZE) {
            let delete = match Delete::builder().set_objects(Some(chunk.to_vec())).build() {
                Ok(delete) => delete,
                Err(err) => {
                    self.report(RemoveOutcome::Aborted(Error::General(err.to_string())))
                        .await;
                    return false;
                }
            };
            let mut request = self.client.inner.delete_objects().bucket(&bucket).delete(delete);
            if self.options.bypass_governance {
                request = request.bypass_governance_retention(true);
            }
            match request.send().await {
                Ok(response) => {
                    for failure in response.errors() {
                        if let Some(key) = failure.key() {
                            let message = format!(
                                "{} {}",
                                failure.code().unwrap_or_default(),
                                failure.message().unwrap_or_default()
                            );
                            failures.insert(key.to_string(), message.trim().to_string());
                        }
                    }
                }
                Err(err) => {
                    let err = map_sdk_error(err, &format!("delete in {bucket}"));
                    if err.is_fatal() {
                        self.report(RemoveOutcome::Aborted(err)).await;
                        return false;
                    }
                    for id in chunk {
                        failures.insert(id.key().to_string(), err.to_string());
                    }
                }
            }
        }

        for (url, key) in queued {
            let outcome = match failures.get(&key) {
                Some(message) => RemoveOutcome::Failed(url, Error::General(message.clone())),
                None => RemoveOutcome::Removed(url),
            };
            if !self.report(outcome).await {
                return false;
            }
        }
        true
    }
}

/// Split URLs into consecutive runs sharing a bucket, keeping order
fn bucket_runs(urls: Vec<ClientUrl>) -> Vec<Vec<ClientUrl>> {
    let mut runs: Vec<Vec<ClientUrl>> = Vec::new();
    for url in urls {
        match runs.last_mut() {
            Some(run) if run[0].bucket_and_key().0 == url.bucket_and_key().0 => run.push(url),
            _ => runs.push(vec![url]),
        }
    }
    runs
}

#[async_trait]
impl ObjectClient for S3Client {
    fn kind(&self) -> UrlKind {
        UrlKind::Object
    }

    fn list(&self, url: &ClientUrl, options: ListOptions) -> BoxStream<'static, Result<ClientContent>> {
        let (tx, rx) = mpsc::channel(LIST_CHANNEL_CAPACITY);
        let lister = Lister {
            client: self.clone(),
            options,
            tx,
        };
        tokio::spawn(lister.run(url.clone()));
        receiver_stream(rx)
    }

    async fn stat(&self, url: &ClientUrl, options: &StatOptions) -> Result<ClientContent> {
        let (bucket, key) = url.bucket_and_key();
        if bucket.is_empty() {
            return Ok(ClientContent::dir(url.clone()));
        }
        if key.is_empty() {
            self.inner
                .head_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &url.path))?;
            return Ok(ClientContent::dir(url.clone()));
        }
        if key.ends_with('/') {
            return match self.has_prefix(bucket, key).await? {
                true => Ok(ClientContent::dir(url.clone())),
                false => Err(Error::NotFound(url.path.clone())),
            };
        }

        let request = self
            .inner
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(options.version_id.clone());
        let request = with_customer_key!(request, options.sse.as_ref());
        match request.send().await {
            Ok(head) => {
                let mut content = ClientContent::file(url.clone(), head.content_length().unwrap_or(0));
                content.modified = timestamp(head.last_modified());
                content.etag = clean_etag(head.e_tag());
                content.version_id = head.version_id().map(str::to_string);
                content.storage_class = head.storage_class().map(|s| s.as_str().to_string());
                Ok(content)
            }
            Err(err) => {
                let err = map_sdk_error(err, &url.path);
                // a key with children but no object of its own is a directory
                if matches!(err, Error::NotFound(_)) && self.has_prefix(bucket, &format!("{key}/")).await? {
                    return Ok(ClientContent::dir(url.clone()));
                }
                Err(err)
            }
        }
    }

    async fn get(&self, url: &ClientUrl, options: &GetOptions) -> Result<ObjectBody> {
        let (bucket, key) = url.bucket_and_key();
        let request = self
            .inner
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(options.version_id.clone());
        let request = with_customer_key!(request, options.sse.as_ref());
        let response = request.send().await.map_err(|e| map_sdk_error(e, &url.path))?;
        let size = response.content_length().unwrap_or(0).max(0) as u64;
        let path = url.path.clone();
        let chunks = stream::try_unfold(response.body, move |mut body| {
            let path = path.clone();
            async move {
                match body.try_next().await {
                    Ok(Some(bytes)) => Ok(Some((bytes.to_vec(), body))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(Error::Network(format!("{path}: {e}"))),
                }
            }
        });
        Ok(ObjectBody::new(size, chunks.boxed()))
    }

    async fn put(&self, url: &ClientUrl, body: ObjectBody, options: &PutOptions) -> Result<u64> {
        let (bucket, key) = url.bucket_and_key();
        if bucket.is_empty() || key.is_empty() {
            return Err(Error::InvalidPath(format!(
                "{url} does not name an object; use alias/bucket/key"
            )));
        }
        if body.size >= MULTIPART_THRESHOLD {
            return multipart::upload(&self.inner, bucket, key, body, options).await;
        }

        let data = body.into_bytes().await?;
        let size = data.len() as u64;
        let content_type = mime_guess::from_path(key).first_or_octet_stream();
        let request = self
            .inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type.essence_str())
            .set_storage_class(options.storage_class.as_deref().map(StorageClass::from))
            .body(ByteStream::from(data));
        let request = with_target_sse!(request, options.sse.as_ref());
        request.send().await.map_err(|e| map_sdk_error(e, &url.path))?;
        Ok(size)
    }

    async fn copy(&self, source: &ClientUrl, target: &ClientUrl, options: &CopyOptions) -> Result<u64> {
        let (src_bucket, src_key) = source.bucket_and_key();
        let (bucket, key) = target.bucket_and_key();
        let copy_source = encode_copy_source(src_bucket, src_key);
        if options.size > MAX_COPY_SIZE {
            return multipart::copy(&self.inner, &copy_source, bucket, key, options).await;
        }
        let request = self
            .inner
            .copy_object()
            .copy_source(copy_source)
            .bucket(bucket)
            .key(key);
        let request = with_copy_source_key!(request, options.source_sse.as_ref());
        let request = with_target_sse!(request, options.target_sse.as_ref());
        request.send().await.map_err(|e| map_sdk_error(e, &source.path))?;
        Ok(options.size)
    }

    fn remove(
        &self,
        targets: mpsc::Receiver<ClientUrl>,
        options: RemoveOptions,
    ) -> mpsc::Receiver<RemoveOutcome> {
        let (tx, rx) = mpsc::channel(REMOVE_CHANNEL_CAPACITY);
        let remover = Remover {
            client: self.clone(),
            options,
            tx,
        };
        tokio::spawn(remover.run(targets));
        rx
    }

    async fn get_url(&self, url: &ClientUrl, expires: Duration) -> Result<String> {
        let (bucket, key) = url.bucket_and_key();
        let config = aws_sdk_s3::presigning::PresigningConfig::expires_in(expires)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let request = self
            .inner
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| map_sdk_error(e, &url.path))?;
        Ok(request.uri().to_string())
    }
}
