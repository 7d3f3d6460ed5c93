use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf, time::Duration};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub assets: AssetSettings,
    pub defaults_dir: Option<PathBuf>,
    pub auth_tokens: Vec<(String, String)>,
    pub auth_timeout: Duration,
    pub max_upload_bytes: usize,
}

/// Bucket layout the asset layer works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSettings {
    /// User-addressable content buckets.
    pub content_buckets: Vec<String>,
    /// Content bucket whose missing assets fall back to a default.
    pub fallback_bucket: Option<String>,
    /// Derivative namespace.
    pub cache_bucket: String,
    /// Internal bucket holding provisioned fallback assets.
    pub defaults_bucket: String,
}

impl AssetSettings {
    /// Every bucket that must exist in storage.
    pub fn all_buckets(&self) -> impl Iterator<Item = &str> {
        self.content_buckets
            .iter()
            .map(String::as_str)
            .chain([self.cache_bucket.as_str(), self.defaults_bucket.as_str()])
    }

    fn validate(&self) -> Result<()> {
        if self.content_buckets.is_empty() {
            bail!("at least one content bucket must be configured");
        }
        for internal in [&self.cache_bucket, &self.defaults_bucket] {
            if self.content_buckets.contains(internal) {
                bail!("bucket `{}` cannot be both a content and an internal bucket", internal);
            }
        }
        if self.cache_bucket == self.defaults_bucket {
            bail!("cache and defaults buckets must differ");
        }
        if let Some(fallback) = &self.fallback_bucket {
            if !self.content_buckets.contains(fallback) {
                bail!("fallback bucket `{}` is not a content bucket", fallback);
            }
        }
        Ok(())
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Asset server with cached image derivatives")]
pub struct Args {
    /// Host to bind to (overrides ASSET_SERVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ASSET_SERVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides ASSET_SERVER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides ASSET_SERVER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Comma-separated content buckets (overrides ASSET_SERVER_BUCKETS)
    #[arg(long)]
    pub buckets: Option<String>,

    /// Bucket whose missing assets fall back to a default, empty to disable
    /// (overrides ASSET_SERVER_FALLBACK_BUCKET)
    #[arg(long)]
    pub fallback_bucket: Option<String>,

    /// Bucket holding cached derivatives (overrides ASSET_SERVER_CACHE_BUCKET)
    #[arg(long)]
    pub cache_bucket: Option<String>,

    /// Bucket holding fallback assets (overrides ASSET_SERVER_DEFAULTS_BUCKET)
    #[arg(long)]
    pub defaults_bucket: Option<String>,

    /// Directory of `default.<format>` files loaded at startup
    /// (overrides ASSET_SERVER_DEFAULTS_DIR)
    #[arg(long)]
    pub defaults_dir: Option<PathBuf>,

    /// Bearer tokens accepted by the local authority, as `token=owner,...`
    /// (overrides ASSET_SERVER_AUTH_TOKENS)
    #[arg(long)]
    pub auth_tokens: Option<String>,

    /// Milliseconds to wait for a token verification reply
    /// (overrides ASSET_SERVER_AUTH_TIMEOUT_MS)
    #[arg(long)]
    pub auth_timeout_ms: Option<u64>,

    /// Largest accepted upload body in bytes
    /// (overrides ASSET_SERVER_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI arguments over environment lookups over built-in defaults.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };

        let env_port = match var("ASSET_SERVER_PORT")? {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing ASSET_SERVER_PORT value `{}`", value))?,
            None => 3000,
        };
        let env_timeout = match var("ASSET_SERVER_AUTH_TIMEOUT_MS")? {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("parsing ASSET_SERVER_AUTH_TIMEOUT_MS value `{}`", value))?,
            None => 5000,
        };
        let env_max_upload = match var("ASSET_SERVER_MAX_UPLOAD_BYTES")? {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("parsing ASSET_SERVER_MAX_UPLOAD_BYTES value `{}`", value))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let buckets = args
            .buckets
            .or(var("ASSET_SERVER_BUCKETS")?)
            .unwrap_or_else(|| "attachments,avatars".into());
        let fallback_bucket = args
            .fallback_bucket
            .or(var("ASSET_SERVER_FALLBACK_BUCKET")?)
            .unwrap_or_else(|| "avatars".into());
        let auth_tokens = args
            .auth_tokens
            .or(var("ASSET_SERVER_AUTH_TOKENS")?)
            .unwrap_or_default();

        let assets = AssetSettings {
            content_buckets: parse_list(&buckets),
            fallback_bucket: Some(fallback_bucket.trim().to_string()).filter(|b| !b.is_empty()),
            cache_bucket: args
                .cache_bucket
                .or(var("ASSET_SERVER_CACHE_BUCKET")?)
                .unwrap_or_else(|| "derivatives".into()),
            defaults_bucket: args
                .defaults_bucket
                .or(var("ASSET_SERVER_DEFAULTS_BUCKET")?)
                .unwrap_or_else(|| "defaults".into()),
        };
        assets.validate()?;

        Ok(Self {
            host: args
                .host
                .or(var("ASSET_SERVER_HOST")?)
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            storage_dir: args
                .storage_dir
                .or(var("ASSET_SERVER_STORAGE_DIR")?)
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or(var("ASSET_SERVER_DATABASE_URL")?)
                .unwrap_or_else(|| "sqlite://./data/meta/assets.db".into()),
            assets,
            defaults_dir: args
                .defaults_dir
                .or(var("ASSET_SERVER_DEFAULTS_DIR")?.map(PathBuf::from)),
            auth_tokens: parse_token_table(&auth_tokens)?,
            auth_timeout: Duration::from_millis(args.auth_timeout_ms.unwrap_or(env_timeout)),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `token=owner,token=owner` pairs.
fn parse_token_table(raw: &str) -> Result<Vec<(String, String)>> {
    parse_list(raw)
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((token, owner)) if !token.trim().is_empty() && !owner.trim().is_empty() => {
                Ok((token.trim().to_string(), owner.trim().to_string()))
            }
            _ => bail!("auth token entry `{}` must look like token=owner", pair),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_without_input() {
        let cfg = AppConfig::from_sources(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.assets.content_buckets, vec!["attachments", "avatars"]);
        assert_eq!(cfg.assets.fallback_bucket.as_deref(), Some("avatars"));
        assert_eq!(cfg.assets.cache_bucket, "derivatives");
        assert_eq!(cfg.auth_timeout, Duration::from_millis(5000));
        assert!(cfg.auth_tokens.is_empty());
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn cli_overrides_env() {
        let args = Args {
            port: Some(9000),
            buckets: Some("photos, docs".into()),
            fallback_bucket: Some("".into()),
            ..Args::default()
        };
        let env = env_of(&[
            ("ASSET_SERVER_PORT", "8000"),
            ("ASSET_SERVER_HOST", "127.0.0.1"),
            ("ASSET_SERVER_AUTH_TOKENS", "abc=alice, def=bob"),
            ("ASSET_SERVER_MAX_UPLOAD_BYTES", "1024"),
        ]);
        let cfg = AppConfig::from_sources(args, env).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.assets.content_buckets, vec!["photos", "docs"]);
        assert_eq!(cfg.assets.fallback_bucket, None);
        assert_eq!(cfg.max_upload_bytes, 1024);
        assert_eq!(
            cfg.auth_tokens,
            vec![("abc".into(), "alice".into()), ("def".into(), "bob".into())]
        );
    }

    #[test]
    fn rejects_inconsistent_buckets() {
        let args = Args {
            buckets: Some("avatars,derivatives".into()),
            ..Args::default()
        };
        assert!(AppConfig::from_sources(args, env_of(&[])).is_err());

        let args = Args {
            fallback_bucket: Some("nowhere".into()),
            ..Args::default()
        };
        assert!(AppConfig::from_sources(args, env_of(&[])).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(AppConfig::from_sources(Args::default(), env_of(&[("ASSET_SERVER_PORT", "x")])).is_err());
        assert!(
            AppConfig::from_sources(Args::default(), env_of(&[("ASSET_SERVER_AUTH_TOKENS", "nope")]))
                .is_err()
        );
    }
}
