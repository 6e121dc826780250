use std::env;
use std::time::Duration;

/// AppConfig
///
/// Immutable configuration loaded once at startup and shared through the application
/// state (pulled into handlers via `FromRef`).
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls the dev bypass header and log format.
    pub env: Env,
    // Postgres connection string. Optional in local runs: without it the in-memory
    // repository is used.
    pub db_url: Option<String>,
    // Supabase project URL, base of the auth (`/auth/v1`) and storage APIs.
    pub supabase_url: String,
    // Anonymous API key sent as `apikey` to the auth API.
    pub supabase_key: String,
    // Secret used to validate incoming access tokens (Supabase-issued HS256 JWTs).
    pub jwt_secret: String,
    // S3-compatible storage endpoint (MinIO locally, Supabase Storage in prod).
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_key: String,
    pub s3_secret: String,
    // Bucket holding step images.
    pub storage_bucket: String,
    // Prefix public objects are served from; `<prefix>/<bucket>/<path>`.
    pub storage_public_url: String,
    // Default timeout for database acquisition and outbound HTTP calls.
    pub request_timeout: Duration,
    pub bind_addr: String,
}

/// Env
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

const DEFAULT_BUCKET: &str = "training-images";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";

impl Default for AppConfig {
    /// default
    ///
    /// Non-panicking configuration for tests: local environment, no database.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: None,
            supabase_url: "http://localhost:54321".to_string(),
            supabase_key: "local-anon-key".to_string(),
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            s3_endpoint: "http://localhost:9000".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_key: "admin".to_string(),
            s3_secret: "password".to_string(),
            storage_bucket: DEFAULT_BUCKET.to_string(),
            storage_public_url: "http://localhost:9000".to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from the environment.
    ///
    /// # Panics
    /// In production, panics when any of `DATABASE_URL`, `SUPABASE_URL`, `SUPABASE_KEY`,
    /// `SUPABASE_JWT_SECRET`, `S3_ACCESS_KEY` or `S3_SECRET_KEY` is missing, so the service
    /// never starts half-configured.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let storage_bucket =
            env::var("STORAGE_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string());
        let request_timeout = Duration::from_secs(
            env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        match env {
            Env::Local => {
                let defaults = Self::default();
                Self {
                    env: Env::Local,
                    db_url: env::var("DATABASE_URL").ok(),
                    supabase_url: env::var("SUPABASE_URL").unwrap_or(defaults.supabase_url),
                    supabase_key: env::var("SUPABASE_KEY").unwrap_or(defaults.supabase_key),
                    jwt_secret: env::var("SUPABASE_JWT_SECRET").unwrap_or(defaults.jwt_secret),
                    storage_bucket,
                    request_timeout,
                    bind_addr,
                    ..defaults
                }
            }
            Env::Production => {
                let supabase_url =
                    env::var("SUPABASE_URL").expect("FATAL: SUPABASE_URL required in prod");
                let supabase_url = supabase_url.trim_end_matches('/').to_string();

                Self {
                    env: Env::Production,
                    db_url: Some(
                        env::var("DATABASE_URL").expect("FATAL: DATABASE_URL required in prod"),
                    ),
                    supabase_key: env::var("SUPABASE_KEY")
                        .expect("FATAL: SUPABASE_KEY required in prod"),
                    jwt_secret: env::var("SUPABASE_JWT_SECRET")
                        .expect("FATAL: SUPABASE_JWT_SECRET must be set in production."),
                    // Supabase exposes its S3 gateway and public objects under the project URL.
                    s3_endpoint: format!("{supabase_url}/storage/v1/s3"),
                    storage_public_url: format!("{supabase_url}/storage/v1/object/public"),
                    s3_region: "stub".to_string(),
                    s3_key: env::var("S3_ACCESS_KEY")
                        .expect("FATAL: S3_ACCESS_KEY required in prod"),
                    s3_secret: env::var("S3_SECRET_KEY")
                        .expect("FATAL: S3_SECRET_KEY required in prod"),
                    supabase_url,
                    storage_bucket,
                    request_timeout,
                    bind_addr,
                }
            }
        }
    }
}
