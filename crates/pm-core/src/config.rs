//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. pm-crawler.toml 設定ファイル (または `--config` で指定したパス)
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::Error;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "pm-crawler.toml";

/// LLM Provider type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Messages API
    Claude,
    /// OpenAI-compatible chat completions API
    #[default]
    OpenAi,
}

impl LlmProvider {
    /// Parse a provider name. Unknown names are `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" | "glm" | "zai" | "minimax" | "groq" | "ollama" => Some(LlmProvider::OpenAi),
            "claude" | "anthropic" => Some(LlmProvider::Claude),
            _ => None,
        }
    }

    /// Split a `provider/model` string such as `openai/gpt-4o-mini`.
    ///
    /// A string without a recognised provider prefix is returned as a bare
    /// model name.
    pub fn split_model(spec: &str) -> (Option<Self>, &str) {
        match spec.split_once('/') {
            Some((provider, model)) => match Self::parse(provider) {
                Some(provider) => (Some(provider), model),
                None => (None, spec),
            },
            None => (None, spec),
        }
    }

    /// Default API endpoint for the provider
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Claude => "https://api.anthropic.com/v1",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key
    pub api_key: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// API provider
    #[serde(default)]
    pub provider: LlmProvider,

    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            provider: LlmProvider::OpenAi,
            base_url: None,
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Port for HTTP API server
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Bearer key required on operation routes. Open when unset.
    pub key: Option<String>,

    /// Allowed CORS origins. Any origin is allowed when unset.
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            key: None,
            allowed_origins: None,
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

/// Headless browser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// How long `acquire()` waits for a free page slot, in seconds
    pub acquire_timeout_secs: u64,
    /// Idle time after which the driver connection is dropped, in seconds
    pub idle_timeout_secs: u64,
    /// Maximum number of pages open at the same time
    pub max_pages: usize,
    pub chrome_path: Option<PathBuf>,
    pub user_agent: Option<String>,
    /// Launch the browser at startup instead of on first use
    pub prelaunch: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1920,
            height: 1080,
            navigation_timeout_secs: 30,
            acquire_timeout_secs: 60,
            idle_timeout_secs: 600,
            max_pages: 4,
            chrome_path: None,
            user_agent: None,
            prelaunch: false,
        }
    }
}

/// Persisted artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Root directory for screenshots, markdown and pdfs
    pub root: PathBuf,
    /// URL prefix the root is served under
    pub mount: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("public"),
            mount: "/public".to_string(),
        }
    }
}

/// Crawl tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Links crawled at the same time by crawl-links (1 = sequential)
    pub link_concurrency: usize,
    /// Timeout for document downloads in seconds
    pub fetch_timeout_secs: u64,
    /// Page text sent to the LLM is cut to this many characters
    pub max_llm_page_chars: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            link_concurrency: 1,
            fetch_timeout_secs: 30,
            max_llm_page_chars: 20_000,
        }
    }
}

/// Job worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Run the in-process job queue next to the HTTP server
    pub enabled: bool,
    /// Pending jobs accepted before submitters wait
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 64,
        }
    }
}

/// Main configuration for pm-crawler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::with_capacity(value.len());
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if !var_name.is_empty() {
                    if let Ok(env_value) = std::env::var(&var_name) {
                        result.push_str(&env_value);
                    }
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// 設定ファイル内の `${VAR_NAME}` は環境変数の値に置換され、
    /// 最後に環境変数による上書きが適用されます。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Parse TOML content (after `${VAR}` expansion) without env overrides
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded_content = Self::expand_env_vars(content);

        let toml: TomlConfig = toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        Ok(Self::from_toml_config(toml))
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// `./pm-crawler.toml` があればそれを使い、なければ環境変数のみ。
    pub fn load() -> crate::Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }

        Ok(Self::from_env())
    }

    /// Load from an explicit path, or fall back to [`Config::load`]
    pub fn load_from(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Self::from_toml_file(path),
            None => Self::load(),
        }
    }

    /// Load configuration from defaults and environment variables
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// TOML 構造から Config を構築
    fn from_toml_config(toml: TomlConfig) -> Self {
        let defaults = Config::default();

        let llm = toml.llm.unwrap_or_default();
        let llm_config = LlmConfig {
            api_key: llm.api_key.unwrap_or_default(),
            model: llm.model.unwrap_or(defaults.llm.model),
            provider: llm
                .provider
                .as_deref()
                .and_then(LlmProvider::parse)
                .unwrap_or(defaults.llm.provider),
            base_url: llm.base_url,
        };

        let api = toml.api.unwrap_or_default();
        let api_config = ApiConfig {
            host: api.host.unwrap_or(defaults.api.host),
            port: api.port.unwrap_or(defaults.api.port),
            key: api.key.filter(|k| !k.is_empty()),
            allowed_origins: api.allowed_origins,
        };

        let browser = toml.browser.unwrap_or_default();
        let b = defaults.browser;
        let browser_settings = BrowserSettings {
            headless: browser.headless.unwrap_or(b.headless),
            width: browser.width.unwrap_or(b.width),
            height: browser.height.unwrap_or(b.height),
            navigation_timeout_secs: browser
                .navigation_timeout_secs
                .unwrap_or(b.navigation_timeout_secs),
            acquire_timeout_secs: browser.acquire_timeout_secs.unwrap_or(b.acquire_timeout_secs),
            idle_timeout_secs: browser.idle_timeout_secs.unwrap_or(b.idle_timeout_secs),
            max_pages: browser.max_pages.unwrap_or(b.max_pages).max(1),
            chrome_path: browser.chrome_path.filter(|p| !p.is_empty()).map(PathBuf::from),
            user_agent: browser.user_agent.filter(|ua| !ua.is_empty()),
            prelaunch: browser.prelaunch.unwrap_or(b.prelaunch),
        };

        let artifacts = toml.artifacts.unwrap_or_default();
        let artifact_config = ArtifactConfig {
            root: artifacts.root.map(PathBuf::from).unwrap_or(defaults.artifacts.root),
            mount: artifacts.mount.unwrap_or(defaults.artifacts.mount),
        };

        let crawl = toml.crawl.unwrap_or_default();
        let crawl_config = CrawlConfig {
            link_concurrency: crawl
                .link_concurrency
                .unwrap_or(defaults.crawl.link_concurrency)
                .max(1),
            fetch_timeout_secs: crawl
                .fetch_timeout_secs
                .unwrap_or(defaults.crawl.fetch_timeout_secs),
            max_llm_page_chars: crawl
                .max_llm_page_chars
                .unwrap_or(defaults.crawl.max_llm_page_chars),
        };

        let worker = toml.worker.unwrap_or_default();
        let worker_config = WorkerConfig {
            enabled: worker.enabled.unwrap_or(defaults.worker.enabled),
            queue_capacity: worker
                .queue_capacity
                .unwrap_or(defaults.worker.queue_capacity)
                .max(1),
        };

        Config {
            api: api_config,
            browser: browser_settings,
            artifacts: artifact_config,
            llm: llm_config,
            crawl: crawl_config,
            worker: worker_config,
        }
    }

    /// 環境変数で設定を上書きする
    fn apply_env_overrides(&mut self) {
        // API 設定
        if let Some(host) = env_string("API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = env_parse("API_PORT") {
            self.api.port = port;
        }
        if let Some(key) = env_string("API_KEY") {
            self.api.key = Some(key);
        }
        if let Some(origins) = env_string("API_ALLOWED_ORIGINS") {
            self.api.allowed_origins =
                Some(origins.split(',').map(|s| s.trim().to_string()).collect());
        }

        // ブラウザ設定
        if let Some(headless) = env_flag("BROWSER_HEADLESS") {
            self.browser.headless = headless;
        }
        if let Some(max_pages) = env_parse::<usize>("BROWSER_MAX_PAGES") {
            self.browser.max_pages = max_pages.max(1);
        }
        if let Some(path) = env_string("CHROME_PATH") {
            self.browser.chrome_path = Some(PathBuf::from(path));
        }
        if let Some(prelaunch) = env_flag("BROWSER_PRELAUNCH") {
            self.browser.prelaunch = prelaunch;
        }

        if let Some(dir) = env_string("ARTIFACTS_DIR") {
            self.artifacts.root = PathBuf::from(dir);
        }

        // LLM 設定
        if let Some(api_key) = env_string("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }
        if let Some(model) = env_string("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(provider) = env_string("LLM_PROVIDER").as_deref().and_then(LlmProvider::parse) {
            self.llm.provider = provider;
        }
        if let Some(base_url) = env_string("LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }

        if let Some(concurrency) = env_parse::<usize>("CRAWL_LINK_CONCURRENCY") {
            self.crawl.link_concurrency = concurrency.max(1);
        }

        // Worker 設定
        if let Some(enabled) = env_flag("WORKER_ENABLED") {
            self.worker.enabled = enabled;
        }
        if let Some(capacity) = env_parse::<usize>("WORKER_QUEUE_CAPACITY") {
            self.worker.queue_capacity = capacity.max(1);
        }
    }
}

/// Non-empty environment variable
fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    env_string(name).map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off"))
}

// ============================================================================
// TOML 構造体定義（ファイル解析用）
// ============================================================================

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    api: Option<TomlApiConfig>,
    browser: Option<TomlBrowserConfig>,
    artifacts: Option<TomlArtifactConfig>,
    llm: Option<TomlLlmConfig>,
    crawl: Option<TomlCrawlConfig>,
    worker: Option<TomlWorkerConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlApiConfig {
    host: Option<String>,
    port: Option<u16>,
    key: Option<String>,
    /// 許可する CORS オリジン
    allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlBrowserConfig {
    headless: Option<bool>,
    width: Option<u32>,
    height: Option<u32>,
    navigation_timeout_secs: Option<u64>,
    acquire_timeout_secs: Option<u64>,
    idle_timeout_secs: Option<u64>,
    /// 同時に開けるページ数
    max_pages: Option<usize>,
    chrome_path: Option<String>,
    user_agent: Option<String>,
    prelaunch: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlArtifactConfig {
    root: Option<String>,
    mount: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlLlmConfig {
    /// API プロバイダー ("claude" または "openai")
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlCrawlConfig {
    link_concurrency: Option<usize>,
    fetch_timeout_secs: Option<u64>,
    max_llm_page_chars: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlWorkerConfig {
    enabled: Option<bool>,
    queue_capacity: Option<usize>,
}
