//! Configuration types shared across crates.

use crate::expiry::ExpiresIn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body accepted for a single chunk or simple upload, in bytes.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: u64,
    /// Wall-clock limit for one finalize attempt, in seconds.
    #[serde(default = "default_finalize_timeout_secs")]
    pub finalize_timeout_secs: u64,
    /// Sessions without chunk activity for this long are swept.
    #[serde(default = "default_session_inactivity_secs")]
    pub session_inactivity_secs: u64,
    /// How long durable progress records are kept after their last update.
    #[serde(default = "default_progress_ttl_secs")]
    pub progress_ttl_secs: u64,
    /// Bounded retries for slug/id collisions.
    #[serde(default = "default_max_id_attempts")]
    pub max_id_attempts: u32,
    /// Public base URL of the bucket. When set, `GET /{slug}` redirects to
    /// `{public_base_url}/{storage_key}` instead of returning JSON.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_request_bytes() -> u64 {
    // One 10 MiB part plus multipart framing slack.
    12 * 1024 * 1024
}

fn default_finalize_timeout_secs() -> u64 {
    600
}

fn default_session_inactivity_secs() -> u64 {
    86400 // 24 hours
}

fn default_progress_ttl_secs() -> u64 {
    3600
}

fn default_max_id_attempts() -> u32 {
    5
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_request_bytes: default_max_request_bytes(),
            finalize_timeout_secs: default_finalize_timeout_secs(),
            session_inactivity_secs: default_session_inactivity_secs(),
            progress_ttl_secs: default_progress_ttl_secs(),
            max_id_attempts: default_max_id_attempts(),
            public_base_url: None,
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Finalize timeout as a Duration.
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_secs)
    }

    /// Inactivity window after which a session is eligible for sweeping.
    pub fn session_inactivity(&self) -> time::Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_inactivity_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    /// Lifetime of a durable progress record.
    pub fn progress_ttl(&self) -> time::Duration {
        let secs = i64::try_from(self.progress_ttl_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_id_attempts == 0 {
            return Err("server.max_id_attempts must be at least 1".to_string());
        }
        if self.finalize_timeout_secs == 0 {
            return Err("server.finalize_timeout_secs must be at least 1".to_string());
        }
        if self.max_request_bytes == 0 {
            return Err("server.max_request_bytes must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Upload policy: size thresholds, limits and accepted file types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Files at or below this size may use the simple (single request) path.
    /// Advertised to clients; larger files must be chunked.
    #[serde(default = "default_chunking_threshold")]
    pub chunking_threshold: u64,
    /// Payloads at or below this size are committed with one put;
    /// larger payloads use a multipart upload.
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,
    /// Multipart part size in bytes. S3 requires at least 5 MiB for every part but the last.
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    /// Payloads above this size use `large_part_size` instead of `part_size`.
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,
    /// Part size used for payloads above `large_file_threshold`.
    #[serde(default = "default_large_part_size")]
    pub large_part_size: u64,
    /// Parts uploaded concurrently during one multipart commit.
    #[serde(default = "default_part_concurrency")]
    pub part_concurrency: usize,
    /// Expiry applied when the client omits one or sends an unknown value.
    #[serde(default)]
    pub default_expiry: ExpiresIn,
    /// Accepted MIME types.
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    /// Accepted file extensions, lowercase with leading dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

const MIB: u64 = 1024 * 1024;

fn default_max_file_size() -> u64 {
    500 * MIB
}

fn default_chunking_threshold() -> u64 {
    4 * MIB
}

fn default_multipart_threshold() -> u64 {
    5 * MIB
}

fn default_part_size() -> u64 {
    5 * MIB
}

fn default_large_file_threshold() -> u64 {
    100 * MIB
}

fn default_large_part_size() -> u64 {
    10 * MIB
}

fn default_part_concurrency() -> usize {
    4
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "image/png",
        "image/jpeg",
        "image/webp",
        "image/gif",
        "image/bmp",
        "image/tiff",
        "image/svg+xml",
        "image/avif",
        "image/heic",
        "image/heif",
        "image/x-icon",
        "audio/mpeg",
        "audio/wav",
        "audio/ogg",
        "audio/mp4",
        "audio/flac",
        "audio/aac",
        "audio/webm",
        "audio/opus",
        "video/mp4",
        "video/webm",
        "video/ogg",
        "video/quicktime",
        "video/x-matroska",
        "video/x-msvideo",
        "video/x-m4v",
        "video/mp2t",
        "video/3gpp",
        "application/pdf",
        "text/plain",
        "text/markdown",
        "application/rtf",
        "application/msword",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.oasis.opendocument.text",
        "text/csv",
        "application/vnd.ms-excel",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/vnd.ms-powerpoint",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "application/json",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_allowed_extensions() -> Vec<String> {
    [
        ".png", ".jpg", ".jpeg", ".webp", ".gif", ".bmp", ".tiff", ".tif", ".svg", ".avif",
        ".heic", ".heif", ".ico", ".mp3", ".wav", ".ogg", ".m4a", ".flac", ".aac", ".weba",
        ".opus", ".mp4", ".webm", ".ogv", ".mov", ".mkv", ".avi", ".m4v", ".ts", ".3gp", ".pdf",
        ".txt", ".md", ".rtf", ".doc", ".docx", ".odt", ".csv", ".xls", ".xlsx", ".ppt", ".pptx",
        ".json",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            chunking_threshold: default_chunking_threshold(),
            multipart_threshold: default_multipart_threshold(),
            part_size: default_part_size(),
            large_file_threshold: default_large_file_threshold(),
            large_part_size: default_large_part_size(),
            part_concurrency: default_part_concurrency(),
            default_expiry: ExpiresIn::default(),
            allowed_mime_types: default_allowed_mime_types(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl UploadConfig {
    /// Part size to use for a payload of `total` bytes.
    pub fn part_size_for(&self, total: u64) -> u64 {
        if total > self.large_file_threshold {
            self.large_part_size
        } else {
            self.part_size
        }
    }

    /// Validate upload policy invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.part_size == 0 || self.large_part_size == 0 {
            return Err("upload part sizes must be non-zero".to_string());
        }
        if self.part_concurrency == 0 {
            return Err("upload.part_concurrency must be at least 1".to_string());
        }
        if self.max_file_size == 0 {
            return Err("upload.max_file_size must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Public domain allow-list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domains links may be served from. The first entry is the default.
    #[serde(default = "default_allowed_domains")]
    pub allowed: Vec<String>,
}

fn default_allowed_domains() -> Vec<String> {
    vec!["localhost:8080".to_string()]
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            allowed: default_allowed_domains(),
        }
    }
}

impl DomainConfig {
    /// Validate that at least one domain is configured.
    pub fn validate(&self) -> Result<(), String> {
        if self.allowed.iter().all(|d| d.trim().is_empty()) {
            return Err("domains.allowed must contain at least one domain".to_string());
        }
        Ok(())
    }
}

/// Admin token configuration.
///
/// The token authorizes operational endpoints such as the session sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// Create a test configuration with a placeholder token hash.
    ///
    /// **For testing only.** Tests that call admin endpoints set their own
    /// hash for a token they know.
    pub fn for_testing() -> Self {
        Self {
            token_hash: "0".repeat(64),
        }
    }

    /// Validate the token hash format.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_hash.len() != 64 || !self.token_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("admin.token_hash must be a 64 character SHA256 hex digest".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage (AWS, R2, MinIO).
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for R2, MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region. R2 uses "auto".
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        access_key_id: Option<String>,
        /// Secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
    /// Process-local memory. Restricts the service to a single process and
    /// loses all objects on restart.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            _ => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only, slow queries are logged).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL.
        url: String,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(60)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                max_connections,
                ..
            } => {
                if url.trim().is_empty() {
                    return Err("postgres config requires 'url'".to_string());
                }
                if *max_connections == 0 {
                    return Err("postgres max_connections must be at least 1".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload policy.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Public domain allow-list.
    #[serde(default)]
    pub domains: DomainConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Admin token configuration (required).
    pub admin: AdminConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            domains: DomainConfig {
                allowed: vec!["files.test".to_string(), "share.test".to_string()],
            },
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            admin: AdminConfig::for_testing(),
        }
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.upload.validate()?;
        self.domains.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.admin.validate()
    }
}
