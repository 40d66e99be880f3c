// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request-scoped S3 clients and bucket operations.
//!
//! Client construction follows the credential chain resolved by the auth
//! plane: an explicit bundle from the JWT/exchange, else the ambient chain
//! (environment, container role, instance profile).  An optional proxy URL
//! replaces the service endpoint; requests are still SigV4-signed.

use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use qmcp_auth::CredentialSource;
use qmcp_error::{ErrorKind, FailureEnvelope, QmcpError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

// ---------------------------------------------------------------------------
// Client construction
// ---------------------------------------------------------------------------

/// Builds request-scoped S3 clients.
#[derive(Debug, Clone, Default)]
pub struct S3ClientFactory {
    /// Proxy endpoint replacing the service URL, when configured.
    pub proxy_url: Option<String>,
    /// AWS profile for the ambient chain.
    pub aws_profile: Option<String>,
}

impl S3ClientFactory {
    /// Build a client for the given credential source.
    pub async fn client_for(&self, source: &CredentialSource) -> Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(profile) = &self.aws_profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let CredentialSource::Bundle(bundle) = source {
            debug!("building S3 client from short-lived credential bundle");
            builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
                bundle.access_key_id.clone(),
                bundle.secret_access_key.clone(),
                Some(bundle.session_token.clone()),
                Some(bundle.expiration.into()),
                "quilt-jwt-exchange",
            ));
        }
        if let Some(proxy) = &self.proxy_url {
            // Proxies rarely speak virtual-hosted style.
            builder = builder.endpoint_url(proxy).force_path_style(true);
        }
        Client::from_conf(builder.build())
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Map an S3 service error code onto the taxonomy.  Versioning mistakes are
/// absence, not authorization: `NoSuchVersion`/`InvalidVersionId` report
/// `NOT_FOUND`.
pub fn kind_for_s3_code(code: &str) -> ErrorKind {
    match code {
        "NoSuchKey" | "NoSuchBucket" | "NotFound" | "NoSuchVersion" | "InvalidVersionId"
        | "NoSuchUpload" => ErrorKind::NotFound,
        "AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
        | "ExpiredToken" | "TokenRefreshRequired" => ErrorKind::PermissionDenied,
        "RequestTimeout" => ErrorKind::Timeout,
        "SlowDown" | "ServiceUnavailable" | "InternalError" => ErrorKind::UpstreamUnavailable,
        _ => ErrorKind::UpstreamUnavailable,
    }
}

fn map_sdk_err<E, R>(err: aws_sdk_s3::error::SdkError<E, R>, what: &str) -> QmcpError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if matches!(err, aws_sdk_s3::error::SdkError::TimeoutError(_)) {
        return QmcpError::new(ErrorKind::Timeout, format!("{what} timed out"));
    }
    let code = err.code().unwrap_or("").to_string();
    let message = err.message().unwrap_or("request failed").to_string();
    QmcpError::new(kind_for_s3_code(&code), format!("{what}: {message}"))
        .with_context("code", code)
}

/// Split a `key?versionId=xyz` form into `(key, version_id)`.
pub fn split_version_suffix(key: &str) -> (&str, Option<&str>) {
    match key.split_once("?versionId=") {
        Some((k, v)) if !v.is_empty() => (k, Some(v)),
        _ => (key, None),
    }
}

// ---------------------------------------------------------------------------
// Result records
// ---------------------------------------------------------------------------

/// One object in a listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last-modified timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
    /// Entity tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// A listing page: the restart state is the continuation token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectList {
    /// Objects on this page.
    pub objects: Vec<ObjectInfo>,
    /// Continuation token for the next page, when more exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Head-object metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Content type, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Last-modified timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
    /// Version id, when the bucket is versioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Entity tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// One item of a batch put.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PutItem {
    /// Write inline text.
    Text {
        /// Destination key.
        key: String,
        /// The content.
        text: String,
    },
    /// Server-side copy from an existing object.
    Copy {
        /// Destination key.
        key: String,
        /// Source `s3://bucket/key` URI.
        source_uri: String,
    },
}

impl PutItem {
    /// Destination key of the item.
    pub fn key(&self) -> &str {
        match self {
            Self::Text { key, .. } | Self::Copy { key, .. } => key,
        }
    }
}

/// Per-item outcome of a batch put.  The batch is not atomic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutItemResult {
    /// Destination key.
    pub key: String,
    /// Whether this item succeeded.
    pub ok: bool,
    /// Failure envelope for this item, when it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureEnvelope>,
}

// ---------------------------------------------------------------------------
// BucketOps
// ---------------------------------------------------------------------------

/// Bucket operations over one request-scoped client.
///
/// Every call is bounded by the request's outbound deadline; exceeding it
/// yields a retriable `TIMEOUT`.
pub struct BucketOps {
    client: Client,
    deadline: Duration,
}

impl BucketOps {
    /// Wrap a client with the request's outbound deadline.
    pub fn new(client: Client, deadline: Duration) -> Self {
        Self { client, deadline }
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, QmcpError>
    where
        F: Future<Output = Result<T, QmcpError>>,
    {
        tokio::time::timeout(self.deadline, fut).await.map_err(|_| {
            QmcpError::new(ErrorKind::Timeout, format!("{what} exceeded the deadline"))
        })?
    }

    /// List up to `max_keys` objects under `prefix`, resuming from
    /// `continuation`.
    pub async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectList, QmcpError> {
        let mut req = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(max_keys.min(1000) as i32);
        if let Some(p) = prefix {
            req = req.prefix(p);
        }
        if let Some(c) = continuation {
            req = req.continuation_token(c);
        }
        self.bounded("list objects", async {
            let out = req
                .send()
                .await
                .map_err(|e| map_sdk_err(e, "list objects"))?;
            let objects = out
                .contents
                .unwrap_or_default()
                .into_iter()
                .filter_map(|o| {
                    Some(ObjectInfo {
                        key: o.key?,
                        size: o.size.unwrap_or(0).max(0) as u64,
                        modified: o.last_modified.and_then(|t| {
                            chrono::DateTime::from_timestamp(t.secs(), t.subsec_nanos())
                        }),
                        etag: o.e_tag,
                    })
                })
                .collect();
            Ok(ObjectList {
                objects,
                next: out.next_continuation_token,
            })
        })
        .await
    }

    /// Head an object.  The `key?versionId=xyz` form is honored.
    pub async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta, QmcpError> {
        let (key, version) = split_version_suffix(key);
        let mut req = self.client.head_object().bucket(bucket).key(key);
        if let Some(v) = version {
            req = req.version_id(v);
        }
        self.bounded("head object", async {
            let out = req.send().await.map_err(|e| map_sdk_err(e, "head object"))?;
            Ok(ObjectMeta {
                key: key.to_string(),
                size: out.content_length.unwrap_or(0).max(0) as u64,
                content_type: out.content_type,
                modified: out
                    .last_modified
                    .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                version_id: out.version_id,
                etag: out.e_tag,
            })
        })
        .await
    }

    /// Fetch raw bytes, optionally version-pinned and range-limited.
    pub async fn get_bytes(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<Vec<u8>, QmcpError> {
        let (key, inline_version) = split_version_suffix(key);
        let version = version_id.or(inline_version);
        let mut req = self.client.get_object().bucket(bucket).key(key);
        if let Some(v) = version {
            req = req.version_id(v);
        }
        if let Some((start, end)) = range {
            let header = match end {
                Some(end) => format!("bytes={start}-{end}"),
                None => format!("bytes={start}-"),
            };
            req = req.range(header);
        }
        self.bounded("get object", async {
            let out = req.send().await.map_err(|e| map_sdk_err(e, "get object"))?;
            let body = out
                .body
                .collect()
                .await
                .map_err(|e| {
                    QmcpError::new(ErrorKind::UpstreamUnavailable, "object body read failed")
                        .with_source(e)
                })?;
            Ok(body.to_vec())
        })
        .await
    }

    /// Fetch an object as UTF-8 text.
    pub async fn get_text(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<String, QmcpError> {
        let bytes = self.get_bytes(bucket, key, version_id, range).await?;
        String::from_utf8(bytes).map_err(|e| {
            QmcpError::validation("object is not valid UTF-8 text; use the bytes form")
                .with_source(e)
        })
    }

    /// Write one object from text.
    pub async fn put_text(&self, bucket: &str, key: &str, text: &str) -> Result<(), QmcpError> {
        let req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(text.as_bytes().to_vec()));
        self.bounded("put object", async {
            req.send().await.map_err(|e| map_sdk_err(e, "put object"))?;
            Ok(())
        })
        .await
    }

    /// Delete one object.
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), QmcpError> {
        let req = self.client.delete_object().bucket(bucket).key(key);
        self.bounded("delete object", async {
            req.send()
                .await
                .map_err(|e| map_sdk_err(e, "delete object"))?;
            Ok(())
        })
        .await
    }

    /// Server-side copy `source_uri` to `bucket/key`.
    pub async fn copy_from(
        &self,
        bucket: &str,
        key: &str,
        source_uri: &str,
    ) -> Result<(), QmcpError> {
        let (src_bucket, src_key) = qmcp_core::package::parse_s3_uri(source_uri)?;
        let req = self
            .client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(format!("{src_bucket}/{src_key}"));
        self.bounded("copy object", async {
            req.send().await.map_err(|e| map_sdk_err(e, "copy object"))?;
            Ok(())
        })
        .await
    }

    /// Batch put.  Items succeed or fail independently; a bucket-level
    /// failure (missing bucket, refused access) short-circuits the batch.
    pub async fn put_batch(
        &self,
        bucket: &str,
        items: Vec<PutItem>,
    ) -> Result<Vec<PutItemResult>, QmcpError> {
        // Global preflight: a missing or forbidden bucket fails the batch
        // as a whole rather than item-by-item.
        let head = self.client.head_bucket().bucket(bucket).send().await;
        if let Err(e) = head {
            return Err(map_sdk_err(e, "head bucket"));
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let key = item.key().to_string();
            let outcome = match &item {
                PutItem::Text { key, text } => self.put_text(bucket, key, text).await,
                PutItem::Copy { key, source_uri } => self.copy_from(bucket, key, source_uri).await,
            };
            results.push(match outcome {
                Ok(()) => PutItemResult {
                    key,
                    ok: true,
                    error: None,
                },
                Err(err) => PutItemResult {
                    key,
                    ok: false,
                    error: Some(err.into()),
                },
            });
        }
        Ok(results)
    }

    /// Presign a GET or PUT for `key`, valid for `ttl`.
    pub async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        method: &str,
    ) -> Result<String, QmcpError> {
        let config = PresigningConfig::expires_in(ttl).map_err(|e| {
            QmcpError::validation("presign ttl out of range").with_source(e)
        })?;
        match method.to_ascii_uppercase().as_str() {
            "GET" => {
                let (key, version) = split_version_suffix(key);
                let mut req = self.client.get_object().bucket(bucket).key(key);
                if let Some(v) = version {
                    req = req.version_id(v);
                }
                let presigned = req
                    .presigned(config)
                    .await
                    .map_err(|e| map_sdk_err(e, "presign get"))?;
                Ok(presigned.uri().to_string())
            }
            "PUT" => {
                let presigned = self
                    .client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .presigned(config)
                    .await
                    .map_err(|e| map_sdk_err(e, "presign put"))?;
                Ok(presigned.uri().to_string())
            }
            other => Err(QmcpError::validation(format!(
                "unsupported presign method '{other}'"
            ))),
        }
    }

    /// The underlying client, for callers composing raw requests.
    pub fn client(&self) -> &Client {
        &self.client
    }
}
