use anyhow::{Context, Result, bail};
use clap::Parser;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port the node listens on.
    pub an_port: u16,
    pub bucket_name: String,
    pub aws_region: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    /// Optional object-store endpoint override (non-AWS gateways).
    pub s3_gateway: Option<String>,
    pub head_host: String,
    pub head_port: u16,
    /// Minimum age in seconds before an unlinked object may be swept.
    pub anonymous_ttl: u64,
    /// Full-scan cadence in seconds.
    pub s3_sync_interval: u64,
    /// Steady-loop sleep in seconds.
    pub async_sleep_time: u64,
    /// Cluster health-check cadence in seconds.
    pub node_sleep_time: u64,
    pub max_tcp_connections: usize,
    /// Per-call object-store I/O timeout in seconds.
    pub store_timeout: u64,
    /// Overwrite content manifests that already exist in the bucket.
    pub force_content_list: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Async bucket reconciliation node")]
pub struct Args {
    /// Port to listen on (overrides AN_PORT)
    #[arg(long)]
    pub an_port: Option<u16>,

    /// Bucket to reconcile (overrides BUCKET_NAME)
    #[arg(long)]
    pub bucket_name: Option<String>,

    /// Object-store endpoint url (overrides AWS_S3_GATEWAY)
    #[arg(long)]
    pub s3_gateway: Option<String>,

    /// Head node host (overrides HEAD_HOST)
    #[arg(long)]
    pub head_host: Option<String>,

    /// Head node port (overrides HEAD_PORT)
    #[arg(long)]
    pub head_port: Option<u16>,

    /// Minimum object age in seconds before sweep (overrides ANONYMOUS_TTL)
    #[arg(long)]
    pub anonymous_ttl: Option<u64>,

    /// Steady-loop sleep seconds (overrides ASYNC_SLEEP_TIME)
    #[arg(long)]
    pub async_sleep_time: Option<u64>,

    /// Full-scan cadence seconds (overrides S3_SYNC_INTERVAL)
    #[arg(long)]
    pub s3_sync_interval: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::from_env(args)
    }

    fn from_env(args: Args) -> Result<Self> {
        let cfg = Self {
            an_port: args.an_port.map_or_else(|| env_parse("AN_PORT", 6100), Ok)?,
            bucket_name: args
                .bucket_name
                .or_else(|| env::var("BUCKET_NAME").ok())
                .context("BUCKET_NAME is not set")?,
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".into()),
            aws_access_key_id: env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            aws_secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
            s3_gateway: args.s3_gateway.or_else(|| env::var("AWS_S3_GATEWAY").ok()),
            head_host: args
                .head_host
                .or_else(|| env::var("HEAD_HOST").ok())
                .unwrap_or_else(|| "localhost".into()),
            head_port: args
                .head_port
                .map_or_else(|| env_parse("HEAD_PORT", 5100), Ok)?,
            anonymous_ttl: args
                .anonymous_ttl
                .map_or_else(|| env_parse("ANONYMOUS_TTL", 600), Ok)?,
            s3_sync_interval: args
                .s3_sync_interval
                .map_or_else(|| env_parse("S3_SYNC_INTERVAL", 3600), Ok)?,
            async_sleep_time: args
                .async_sleep_time
                .map_or_else(|| env_parse("ASYNC_SLEEP_TIME", 10), Ok)?,
            node_sleep_time: env_parse("NODE_SLEEP_TIME", 10)?,
            max_tcp_connections: env_parse("MAX_TCP_CONNECTIONS", 100)?,
            store_timeout: env_parse("STORE_TIMEOUT", 30)?,
            force_content_list: env_parse("FORCE_CONTENT_LIST", true)?,
        };

        // Placeholder credentials are a configuration mistake; refuse to start.
        if cfg.aws_access_key_id.is_empty() || cfg.aws_access_key_id == "xxx" {
            bail!("invalid AWS access key id");
        }
        if cfg.aws_secret_access_key.is_empty() || cfg.aws_secret_access_key == "xxx" {
            bail!("invalid AWS secret access key");
        }

        Ok(cfg)
    }

    pub fn head_url(&self) -> String {
        format!("http://{}:{}", self.head_host, self.head_port)
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.an_port)
    }
}

/// Read an environment variable, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => match value.parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(err) => bail!("parsing {} value `{}`: {}", name, value, err),
        },
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
