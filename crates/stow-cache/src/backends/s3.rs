//! S3 object-store backend.

use crate::backend::Backend;
use crate::types::{ByteReader, EntryInfo};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use serde::Deserialize;
use std::time::Duration;
use stow_core::{Error, Result};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Upload part size. Every part but the last must be at least 5 MiB.
const PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    #[serde(alias = "Bucket")]
    pub bucket: String,
    #[serde(default, alias = "Region")]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default, alias = "Endpoint")]
    pub endpoint: Option<String>,
    #[serde(default, alias = "PathStyle")]
    pub path_style: bool,
}

impl S3Config {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: S3Config = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid s3 configuration: {}", e)))?;
        if config.bucket.trim().is_empty() {
            return Err(Error::Config("s3 bucket is required".into()));
        }
        Ok(config)
    }
}

/// Cache entries stored as objects in a single bucket.
pub struct S3Backend {
    client: Client,
    bucket: String,
    part_size: usize,
}

impl S3Backend {
    pub fn new(client: Client, bucket: String) -> Self {
        Self {
            client,
            bucket,
            part_size: PART_SIZE,
        }
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Build a client from the AWS environment and the given config.
    pub async fn connect(config: S3Config) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let aws_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            s3_config = s3_config.endpoint_url(endpoint);
        }
        let client = Client::from_conf(s3_config.build());

        info!(
            bucket = %config.bucket,
            region = config.region.as_deref().unwrap_or("default"),
            "S3 client initialised"
        );
        Ok(Self::new(client, config.bucket))
    }

    pub async fn from_json(raw: &str) -> Result<Self> {
        Self::connect(S3Config::from_json(raw)?).await
    }

    /// Upload `first` and the rest of `src` as parts, then complete the upload.
    async fn upload_parts(
        &self,
        path: &str,
        upload_id: &str,
        first: Vec<u8>,
        src: &mut ByteReader,
    ) -> Result<()> {
        let mut parts = Vec::new();
        let mut part = first;
        let mut total = 0;

        while !part.is_empty() {
            let number = parts.len() as i32 + 1;
            total += part.len();
            let resp = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(upload_id)
                .part_number(number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(|e| {
                    Error::Transport(format!("S3 UploadPart {} #{}: {}", path, number, e))
                })?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(resp.e_tag().map(String::from))
                    .part_number(number)
                    .build(),
            );
            part = read_part(src, self.part_size, path).await?;
        }

        let count = parts.len();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Error::Transport(format!("S3 CompleteMultipartUpload {}: {}", path, e)))?;

        debug!(path = %path, bytes = total, parts = count, "object uploaded");
        Ok(())
    }
}

/// Read up to `limit` bytes. Short only at end of stream.
async fn read_part(src: &mut ByteReader, limit: usize, path: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit);
    (&mut *src)
        .take(limit as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| Error::Transport(format!("read upload source for {}: {}", path, e)))?;
    Ok(buf)
}

#[async_trait]
impl Backend for S3Backend {
    fn name(&self) -> &str {
        "s3"
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<EntryInfo>> {
        Err(Error::Unsupported("list is not implemented for s3".into()))
    }

    async fn get(&self, path: &str) -> Result<ByteReader> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    Error::NotFound(path.to_string())
                } else {
                    Error::Transport(format!("S3 GetObject {}: {}", path, e))
                }
            })?;

        debug!(path = %path, bytes = resp.content_length(), "object download started");
        Ok(Box::pin(resp.body.into_async_read()))
    }

    async fn put(&self, path: &str, ttl: Option<Duration>, mut src: ByteReader) -> Result<()> {
        if let Some(ttl) = ttl {
            debug!(path = %path, ttl_secs = ttl.as_secs(), "s3 backend ignores ttl");
        }

        let first = read_part(&mut src, self.part_size, path).await?;
        if first.len() < self.part_size {
            let size = first.len();
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(path)
                .body(ByteStream::from(first))
                .send()
                .await
                .map_err(|e| Error::Transport(format!("S3 PutObject {}: {}", path, e)))?;
            debug!(path = %path, bytes = size, "object uploaded");
            return Ok(());
        }

        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("S3 CreateMultipartUpload {}: {}", path, e)))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| Error::Transport(format!("S3 returned no upload id for {}", path)))?
            .to_string();

        let result = self.upload_parts(path, &upload_id, first, &mut src).await;
        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(path = %path, error = %e, "Failed to abort multipart upload");
            }
        }
        result
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("S3 DeleteObject {}: {}", path, e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_minimal() {
        let cfg = S3Config::from_json(r#"{"bucket": "ci-cache"}"#).unwrap();
        assert_eq!(cfg.bucket, "ci-cache");
        assert!(cfg.region.is_none());
        assert!(cfg.endpoint.is_none());
        assert!(!cfg.path_style);
    }

    #[test]
    fn test_config_capitalised_keys() {
        let cfg = S3Config::from_json(r#"{"Bucket": "ci-cache", "Region": "eu-west-1"}"#).unwrap();
        assert_eq!(cfg.bucket, "ci-cache");
        assert_eq!(cfg.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_config_errors() {
        assert!(matches!(
            S3Config::from_json(r#"{"region": "us-east-1"}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            S3Config::from_json(r#"{"bucket": " "}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(S3Config::from_json("bucket=x"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_list_is_unsupported() {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        let backend = S3Backend::new(Client::from_conf(conf), "ci-cache".into());
        let err = backend.list("org/app").await.unwrap_err();
        assert!(err.is_unsupported());
        backend.close().await.unwrap();
    }

    mod mocked {
        use super::*;
        use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadOutput;
        use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadOutput;
        use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadOutput;
        use aws_sdk_s3::operation::delete_object::DeleteObjectOutput;
        use aws_sdk_s3::operation::get_object::{GetObjectError, GetObjectOutput};
        use aws_sdk_s3::operation::put_object::PutObjectOutput;
        use aws_sdk_s3::operation::upload_part::{UploadPartError, UploadPartOutput};
        use aws_sdk_s3::error::ErrorMetadata;
        use aws_sdk_s3::types::error::NoSuchKey;
        use aws_smithy_mocks::{RuleMode, mock, mock_client};

        fn source(bytes: &'static [u8]) -> ByteReader {
            Box::pin(std::io::Cursor::new(bytes))
        }

        #[tokio::test]
        async fn test_get_missing_key_is_not_found() {
            let rule = mock!(Client::get_object)
                .then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()));
            let backend = S3Backend::new(mock_client!(aws_sdk_s3, [&rule]), "ci-cache".into());

            let err = backend.get("org/app/abc").await.err().unwrap();
            assert!(err.is_not_found(), "{}", err);
            assert_eq!(rule.num_calls(), 1);
        }

        #[tokio::test]
        async fn test_get_streams_body() {
            let rule = mock!(Client::get_object)
                .match_requests(|req| {
                    req.bucket() == Some("ci-cache") && req.key() == Some("org/app/abc")
                })
                .then_output(|| {
                    GetObjectOutput::builder()
                        .body(ByteStream::from_static(b"tar bytes"))
                        .build()
                });
            let backend = S3Backend::new(mock_client!(aws_sdk_s3, [&rule]), "ci-cache".into());

            let mut body = Vec::new();
            backend
                .get("org/app/abc")
                .await
                .unwrap()
                .read_to_end(&mut body)
                .await
                .unwrap();
            assert_eq!(body, b"tar bytes");
        }

        #[tokio::test]
        async fn test_small_put_is_single_object() {
            let put = mock!(Client::put_object)
                .match_requests(|req| req.key() == Some("org/app/abc"))
                .then_output(|| PutObjectOutput::builder().build());
            let backend = S3Backend::new(
                mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&put]),
                "ci-cache".into(),
            );

            backend
                .put("org/app/abc", None, source(b"small"))
                .await
                .unwrap();
            assert_eq!(put.num_calls(), 1);
        }

        #[tokio::test]
        async fn test_large_put_uploads_parts() {
            let create = mock!(Client::create_multipart_upload)
                .then_output(|| CreateMultipartUploadOutput::builder().upload_id("up-1").build());
            let parts: Vec<_> = (1..=3)
                .map(|n| {
                    mock!(Client::upload_part)
                        .match_requests(move |req| {
                            req.upload_id() == Some("up-1") && req.part_number() == Some(n)
                        })
                        .then_output(move || {
                            UploadPartOutput::builder().e_tag(format!("etag-{}", n)).build()
                        })
                })
                .collect();
            let complete = mock!(Client::complete_multipart_upload)
                .match_requests(|req| {
                    req.multipart_upload().map(|m| m.parts().len()) == Some(3)
                })
                .then_output(|| CompleteMultipartUploadOutput::builder().build());
            let client = mock_client!(
                aws_sdk_s3,
                RuleMode::MatchAny,
                [&create, &parts[0], &parts[1], &parts[2], &complete]
            );
            let backend = S3Backend::new(client, "ci-cache".into()).with_part_size(4);

            backend
                .put("org/app/abc", None, source(b"0123456789"))
                .await
                .unwrap();
            assert_eq!(create.num_calls(), 1);
            assert!(parts.iter().all(|p| p.num_calls() == 1));
            assert_eq!(complete.num_calls(), 1);
        }

        #[tokio::test]
        async fn test_failed_part_aborts_upload() {
            let create = mock!(Client::create_multipart_upload)
                .then_output(|| CreateMultipartUploadOutput::builder().upload_id("up-2").build());
            let part = mock!(Client::upload_part).then_error(|| {
                UploadPartError::generic(
                    ErrorMetadata::builder()
                        .code("InternalError")
                        .message("connection reset")
                        .build(),
                )
            });
            let abort = mock!(Client::abort_multipart_upload)
                .match_requests(|req| req.upload_id() == Some("up-2"))
                .then_output(|| AbortMultipartUploadOutput::builder().build());
            let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&create, &part, &abort]);
            let backend = S3Backend::new(client, "ci-cache".into()).with_part_size(4);

            let err = backend
                .put("org/app/abc", None, source(b"0123456789"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Transport(_)));
            assert_eq!(abort.num_calls(), 1);
        }

        #[tokio::test]
        async fn test_remove_deletes_object() {
            let rule = mock!(Client::delete_object)
                .match_requests(|req| req.bucket() == Some("ci-cache") && req.key() == Some("k"))
                .then_output(|| DeleteObjectOutput::builder().build());
            let backend = S3Backend::new(mock_client!(aws_sdk_s3, [&rule]), "ci-cache".into());

            backend.remove("k").await.unwrap();
            assert_eq!(rule.num_calls(), 1);
        }
    }
}
