//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "murmur";
const DEFAULT_KEEP_UNUSED_FOR_SECS: u64 = 60;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 256;
const DEFAULT_API_BASE_URL: &str = "/fakeApi";
const DEFAULT_STREAM_URL: &str = "ws://localhost/socket";
const DEFAULT_DEMO_BATCH_SIZE: usize = 3;

/// Command-line arguments for the murmur binary.
#[derive(Debug, Parser)]
#[command(name = "murmur", version, about = "Normalized query cache demo")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MURMUR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the end-to-end cache scenario against the in-memory backend.
    Demo(DemoArgs),
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub overrides: DemoOverrides,

    /// Number of notifications in each pushed batch.
    #[arg(long, default_value_t = DEFAULT_DEMO_BATCH_SIZE, value_parser = clap::value_parser!(usize))]
    pub batch_size: usize,

    /// User to sign in as before the scenario runs.
    #[arg(long, default_value = "0", value_name = "USER_ID")]
    pub username: String,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            overrides: DemoOverrides::default(),
            batch_size: DEFAULT_DEMO_BATCH_SIZE,
            username: "0".to_string(),
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct DemoOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override how long an unused cache entry is kept.
    #[arg(long = "cache-keep-unused-for-seconds", value_name = "SECONDS")]
    pub cache_keep_unused_for_seconds: Option<u64>,

    /// Override the cache event journal capacity.
    #[arg(long = "cache-event-queue-limit", value_name = "COUNT")]
    pub cache_event_queue_limit: Option<usize>,

    /// Toggle push streams for real-time endpoints.
    #[arg(
        long = "cache-realtime",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_realtime: Option<bool>,

    /// Override the API base URL.
    #[arg(long = "api-base-url", value_name = "URL")]
    pub api_base_url: Option<String>,

    /// Override the push stream URL.
    #[arg(long = "api-stream-url", value_name = "URL")]
    pub api_stream_url: Option<String>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub keep_unused_for: Duration,
    pub event_queue_limit: NonZeroUsize,
    pub realtime_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub stream_url: Url,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("MURMUR").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Demo(args)) => raw.apply_demo_overrides(&args.overrides),
        None => raw.apply_demo_overrides(&DemoOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    api: RawApiSettings,
}

impl RawSettings {
    fn apply_demo_overrides(&mut self, overrides: &DemoOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(seconds) = overrides.cache_keep_unused_for_seconds {
            self.cache.keep_unused_for_secs = Some(seconds);
        }
        if let Some(limit) = overrides.cache_event_queue_limit {
            self.cache.event_queue_limit = Some(limit);
        }
        if let Some(enabled) = overrides.cache_realtime {
            self.cache.realtime_enabled = Some(enabled);
        }
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(url) = overrides.api_stream_url.as_ref() {
            self.api.stream_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            api,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            api: build_api_settings(api)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let keep_unused_for = Duration::from_secs(
        cache
            .keep_unused_for_secs
            .unwrap_or(DEFAULT_KEEP_UNUSED_FOR_SECS),
    );
    let event_queue_limit =
        NonZeroUsize::new(cache.event_queue_limit.unwrap_or(DEFAULT_EVENT_QUEUE_LIMIT))
            .ok_or_else(|| {
                LoadError::invalid("cache.event_queue_limit", "must be greater than zero")
            })?;

    Ok(CacheSettings {
        keep_unused_for,
        event_queue_limit,
        realtime_enabled: cache.realtime_enabled.unwrap_or(true),
    })
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let base_url = api
        .base_url
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    if base_url.is_empty() {
        return Err(LoadError::invalid("api.base_url", "must not be empty"));
    }

    let raw_stream = api
        .stream_url
        .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string());
    let stream_url = Url::parse(raw_stream.trim())
        .map_err(|err| LoadError::invalid("api.stream_url", format!("failed to parse: {err}")))?;
    if !matches!(stream_url.scheme(), "ws" | "wss") {
        return Err(LoadError::invalid(
            "api.stream_url",
            format!("unsupported scheme `{}`", stream_url.scheme()),
        ));
    }

    Ok(ApiSettings {
        base_url,
        stream_url,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    keep_unused_for_secs: Option<u64>,
    event_queue_limit: Option<usize>,
    realtime_enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    stream_url: Option<String>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
