use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use std::{env, str::FromStr};

use crate::services::{
    multipart_decoder::{DEFAULT_MAX_FILE_SIZE, DecoderLimits},
    object_store::{ensure_bucket_name_safe, ensure_region_valid},
};

const ENV_PREFIX: &str = "UPLOAD_GATEWAY_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub region: String,
    pub metadata_table: String,
    pub partition_key: String,
    pub storage_dir: String,
    pub database_url: String,
    pub spool_dir: String,
    pub max_file_size: u64,
    pub max_total_file_size: u64,
    pub public_url: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Multipart file-upload gateway")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket receiving uploaded objects (overrides UPLOAD_GATEWAY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides UPLOAD_GATEWAY_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Metadata table name (overrides UPLOAD_GATEWAY_METADATA_TABLE)
    #[arg(long)]
    pub metadata_table: Option<String>,

    /// Partition-key field of the metadata table (overrides UPLOAD_GATEWAY_PARTITION_KEY)
    #[arg(long)]
    pub partition_key: Option<String>,

    /// Directory where objects are stored (overrides UPLOAD_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides UPLOAD_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for in-flight multipart parts (overrides UPLOAD_GATEWAY_SPOOL_DIR)
    #[arg(long)]
    pub spool_dir: Option<String>,

    /// Per-file size limit in bytes (overrides UPLOAD_GATEWAY_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Per-request size limit in bytes (overrides UPLOAD_GATEWAY_MAX_TOTAL_FILE_SIZE)
    #[arg(long)]
    pub max_total_file_size: Option<u64>,

    /// Prefix for object locations (overrides UPLOAD_GATEWAY_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up through `lookup`, then validate.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        let port = match args.port {
            Some(port) => port,
            None => parse_var(&var, "PORT")?.unwrap_or(3000),
        };
        let max_file_size = match args.max_file_size {
            Some(size) => size,
            None => parse_var(&var, "MAX_FILE_SIZE")?.unwrap_or(DEFAULT_MAX_FILE_SIZE),
        };
        let max_total_file_size = match args.max_total_file_size {
            Some(size) => size,
            None => parse_var(&var, "MAX_TOTAL_FILE_SIZE")?.unwrap_or(max_file_size),
        };

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            bucket: required(args.bucket, &var, "BUCKET")?,
            region: required(args.region, &var, "REGION")?,
            metadata_table: required(args.metadata_table, &var, "METADATA_TABLE")?,
            partition_key: required(args.partition_key, &var, "PARTITION_KEY")?,
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/upload_gateway.db".into()),
            spool_dir: args
                .spool_dir
                .or_else(|| var("SPOOL_DIR"))
                .unwrap_or_else(|| "./data/spool".into()),
            max_file_size,
            max_total_file_size,
            public_url: args
                .public_url
                .or_else(|| var("PUBLIC_URL"))
                .unwrap_or_default(),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.partition_key.trim().is_empty(),
            "{}PARTITION_KEY must not be empty",
            ENV_PREFIX
        );
        ensure!(self.max_file_size > 0, "max file size must be positive");
        ensure_bucket_name_safe(&self.bucket).context("validating bucket name")?;
        ensure_region_valid(&self.region).context("validating region")?;
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn decoder_limits(&self) -> DecoderLimits {
        DecoderLimits {
            max_file_size: self.max_file_size,
            max_total_file_size: self.max_total_file_size,
            allow_empty_files: false,
        }
    }
}

fn required(
    arg: Option<String>,
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<String> {
    match arg.or_else(|| var(name)) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => bail!("missing required setting {}{}", ENV_PREFIX, name),
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, value))
        })
        .transpose()
}
