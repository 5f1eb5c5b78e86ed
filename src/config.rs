use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub api_token: Option<String>,
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    pub excludes: Vec<String>,
    /// Emit a progress event every N candidates.
    pub progress_every: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadsConfig {
    pub zip_save_path: String,
    pub compression: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IgdbConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_url: String,
    pub token_url: String,
    pub timeout_secs: u64,
    pub cache_size: usize,
}

impl IgdbConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfig {
    pub enabled: bool,
    pub dir: String,
    pub poll_interval_secs: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub event_threshold_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: Option<SecurityConfig>,
    pub scanner: ScannerConfig,
    pub downloads: DownloadsConfig,
    pub igdb: IgdbConfig,
    pub images: ImagesConfig,
    pub watcher: WatcherConfig,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl AppConfig {
    pub fn api_token(&self) -> Option<&str> {
        self.security
            .as_ref()
            .and_then(|s| s.api_token.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: sharewarez.toml (in CWD)
        .add_source(::config::File::with_name("sharewarez").required(false));

    if let Ok(custom_path) = std::env::var("SHAREWAREZ_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(
        ::config::Environment::with_prefix("SHAREWAREZ")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("scanner.excludes")
            .try_parsing(true),
    );

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    for pat in &cfg.scanner.excludes {
        if let Err(e) = globset::Glob::new(&pat.trim().replace('\\', "/")) {
            return Err(anyhow::anyhow!("invalid scanner.excludes pattern '{}': {}", pat, e));
        }
    }
    if cfg.scanner.progress_every == 0 {
        return Err(anyhow::anyhow!("scanner.progress_every must be > 0"));
    }

    match cfg.downloads.compression.as_str() {
        "stored" | "deflated" => {}
        other => {
            return Err(anyhow::anyhow!(
                "downloads.compression must be 'stored' or 'deflated', got '{}'",
                other
            ))
        }
    }
    if cfg.downloads.zip_save_path.trim().is_empty() {
        return Err(anyhow::anyhow!("downloads.zip_save_path must not be empty"));
    }

    if cfg.igdb.timeout_secs == 0 {
        return Err(anyhow::anyhow!("igdb.timeout_secs must be > 0"));
    }
    if cfg.igdb.cache_size == 0 {
        return Err(anyhow::anyhow!("igdb.cache_size must be > 0"));
    }

    if cfg.images.poll_interval_secs == 0 {
        return Err(anyhow::anyhow!("images.poll_interval_secs must be > 0"));
    }
    if cfg.images.batch_size == 0 || cfg.images.batch_size > 256 {
        return Err(anyhow::anyhow!("images.batch_size must be in 1..=256"));
    }

    if cfg.watcher.debounce_ms == 0 {
        return Err(anyhow::anyhow!("watcher.debounce_ms must be > 0"));
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        // On Windows, handle URLs like sqlite:///C:/... by stripping the leading '/'
        #[cfg(windows)]
        let path = {
            let bytes = path.as_bytes();
            if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' && bytes[1].is_ascii_alphabetic() {
                &path[1..]
            } else {
                path
            }
        };
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
