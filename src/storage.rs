use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};

// 1. StorageService Contract
/// StorageService
///
/// The object-storage collaborator holding step images (`training-images` bucket).
/// The real S3 client (Supabase Storage in production, MinIO locally) and the in-memory
/// mock used by tests both sit behind this trait.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the bucket when missing. Only used by local setups.
    async fn ensure_bucket_exists(&self);

    /// Stores `bytes` under `path` and returns the stored path.
    async fn upload_image(&self, path: &str, bytes: Vec<u8>, content_type: &str)
    -> PortalResult<String>;

    /// Publicly readable URL of a stored object. Pure string construction, no I/O.
    fn public_url(&self, path: &str) -> String;
}

// 2. The Real Implementation (S3/MinIO/Supabase)
/// S3StorageClient
///
/// `force_path_style(true)` is required by both MinIO and the Supabase Storage gateway.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3StorageClient {
    /// new
    ///
    /// `public_base_url` is the prefix public objects are served from, e.g.
    /// `https://<project>.supabase.co/storage/v1/object/public`.
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        public_base_url: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        let client = s3::Client::from_conf(config);

        Self {
            client,
            bucket_name: bucket.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket on an existing bucket fails harmlessly.
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!(error = ?e, bucket = %self.bucket_name, "create_bucket skipped");
        }
    }

    async fn upload_image(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> PortalResult<String> {
        let key = sanitize_key(path);
        if key.is_empty() {
            return Err(PortalError::validation("empty object path"));
        }

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, key = %key, "image upload failed");
                PortalError::Persistence(format!("upload of {key} failed"))
            })?;

        tracing::info!(key = %key, "image uploaded");
        Ok(key)
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_base_url,
            self.bucket_name,
            sanitize_key(path)
        )
    }
}

/// sanitize_key
///
/// Drops empty, `.` and `..` segments so a client supplied name can never climb out of
/// the bucket prefix.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// image_object_key
///
/// Object name for a new upload: a random stem keeping the original extension
/// (`<uuid>.<ext>`), `bin` when the file has none.
pub fn image_object_key(filename: &str) -> String {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "bin".to_string());
    format!("{}.{}", Uuid::new_v4(), extension)
}

// 3. The Mock Implementation (For Tests)
/// MockStorageService
///
/// Keeps uploaded objects in memory so tests can assert on what was stored.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, every upload returns a simulated failure.
    pub should_fail: bool,
    uploads: Arc<Mutex<Vec<(String, usize, String)>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// `(path, byte length, content type)` of every successful upload.
    pub fn uploads(&self) -> Vec<(String, usize, String)> {
        self.uploads
            .lock()
            .map(|uploads| uploads.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn upload_image(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> PortalResult<String> {
        if self.should_fail {
            return Err(PortalError::Persistence(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }
        let key = sanitize_key(path);
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push((key.clone(), bytes.len(), content_type.to_string()));
        }
        Ok(key)
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "http://localhost:9000/mock-bucket/{}",
            sanitize_key(path)
        )
    }
}

/// StorageState
///
/// The concrete type used to share the storage service across the application state.
pub type StorageState = Arc<dyn StorageService>;
