use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "REVIEWDIGEST_CONFIG";

/// Layered configuration: defaults, then an optional YAML file, then
/// `REVIEWDIGEST_*` environment overrides. Secrets are read from the
/// environment only (see [`Secrets`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub browser: BrowserSettings,
    pub freshness: FreshnessSettings,
    pub store: StoreSettings,
    pub distill: DistillSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub landing_url: String,
    pub reviews_tab_label: String,
    pub element_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub navigation_settle_ms: u64,
    pub max_scroll_iterations: u32,
    pub scroll_stall_ms: u64,
    pub expand_settle_ms: u64,
    pub window_width: u32,
    pub window_height: u32,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            landing_url: "https://www.google.com.tw/maps/preview".to_owned(),
            reviews_tab_label: "評論".to_owned(),
            element_timeout_ms: 15_000,
            poll_interval_ms: 250,
            navigation_settle_ms: 2000,
            max_scroll_iterations: 10,
            scroll_stall_ms: 1500,
            expand_settle_ms: 500,
            window_width: 1920,
            window_height: 1080,
            chrome_executable: None,
        }
    }
}

impl BrowserSettings {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn navigation_settle(&self) -> Duration {
        Duration::from_millis(self.navigation_settle_ms)
    }

    pub fn scroll_stall(&self) -> Duration {
        Duration::from_millis(self.scroll_stall_ms)
    }

    pub fn expand_settle(&self) -> Duration {
        Duration::from_millis(self.expand_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessSettings {
    pub cooldown_days: u32,
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            cooldown_days: crate::freshness::DEFAULT_COOLDOWN_DAYS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Local,
    Memory,
    Firestore,
}

impl StoreBackend {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            "firestore" => Ok(Self::Firestore),
            other => anyhow::bail!("unsupported store backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
    pub reviews_collection: String,
    pub analysis_collection: String,
    pub firestore_project: Option<String>,
    pub firestore_database: String,
    /// `host:port` of a Firestore emulator; requests go over plain http without auth.
    pub firestore_emulator_host: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            data_dir: PathBuf::from("reviewdigest-data"),
            reviews_collection: "reviews".to_owned(),
            analysis_collection: "analyses".to_owned(),
            firestore_project: None,
            firestore_database: "(default)".to_owned(),
            firestore_emulator_host: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmEngine {
    Openai,
    Gemini,
}

impl LlmEngine {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "openai" => Ok(Self::Openai),
            "gemini" => Ok(Self::Gemini),
            other => anyhow::bail!("unsupported llm engine: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillSettings {
    pub qa_endpoint: String,
    pub llm_engine: LlmEngine,
    pub openai_base_url: String,
    pub openai_model: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub request_timeout_secs: u64,
}

impl Default for DistillSettings {
    fn default() -> Self {
        Self {
            qa_endpoint: "http://127.0.0.1:8000/qa".to_owned(),
            llm_engine: LlmEngine::Openai,
            openai_base_url: "https://api.openai.com/v1".to_owned(),
            openai_model: "gpt-4-turbo".to_owned(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_owned(),
            gemini_model: "gemini-1.5-flash-002".to_owned(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub max_concurrency: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            max_concurrency: 2,
        }
    }
}

/// Credentials for the hosted services. Never written to or read from YAML.
#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub qa_token: Option<String>,
    pub firestore_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("openai_api_key", &self.openai_api_key.is_some())
            .field("gemini_api_key", &self.gemini_api_key.is_some())
            .field("qa_token", &self.qa_token.is_some())
            .field("firestore_token", &self.firestore_token.is_some())
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            gemini_api_key: non_empty_env("GEMINI_API_KEY"),
            qa_token: non_empty_env("REVIEWDIGEST_QA_TOKEN"),
            firestore_token: non_empty_env("REVIEWDIGEST_FIRESTORE_TOKEN"),
        }
    }
}

impl AppConfig {
    /// Loads the config file named by `path`, or by `REVIEWDIGEST_CONFIG`, then
    /// applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let env_path = non_empty_env(CONFIG_ENV).map(PathBuf::from);
        let path = path.map(Path::to_path_buf).or(env_path);

        let mut config = match &path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config
            .apply_overrides(non_empty_env)
            .context("apply environment overrides")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(v) = lookup("REVIEWDIGEST_LANDING_URL") {
            self.browser.landing_url = v;
        }
        if let Some(v) = lookup("REVIEWDIGEST_REVIEWS_TAB_LABEL") {
            self.browser.reviews_tab_label = v;
        }
        if let Some(v) = lookup("REVIEWDIGEST_MAX_SCROLL_ITERATIONS") {
            self.browser.max_scroll_iterations =
                parse_env("REVIEWDIGEST_MAX_SCROLL_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("REVIEWDIGEST_CHROME_EXECUTABLE") {
            self.browser.chrome_executable = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("REVIEWDIGEST_COOLDOWN_DAYS") {
            self.freshness.cooldown_days = parse_env("REVIEWDIGEST_COOLDOWN_DAYS", &v)?;
        }
        if let Some(v) = lookup("REVIEWDIGEST_STORE") {
            self.store.backend = StoreBackend::parse(&v)
                .with_context(|| format!("invalid REVIEWDIGEST_STORE={v:?}"))?;
        }
        if let Some(v) = lookup("REVIEWDIGEST_DATA_DIR") {
            self.store.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("REVIEWDIGEST_FIRESTORE_PROJECT") {
            self.store.firestore_project = Some(v);
        }
        if let Some(v) = lookup("REVIEWDIGEST_FIRESTORE_DATABASE") {
            self.store.firestore_database = v;
        }
        if let Some(v) = lookup("FIRESTORE_EMULATOR_HOST") {
            self.store.firestore_emulator_host = Some(v);
        }
        if let Some(v) = lookup("REVIEWDIGEST_QA_ENDPOINT") {
            self.distill.qa_endpoint = v;
        }
        if let Some(v) = lookup("REVIEWDIGEST_LLM_ENGINE") {
            self.distill.llm_engine = LlmEngine::parse(&v)
                .with_context(|| format!("invalid REVIEWDIGEST_LLM_ENGINE={v:?}"))?;
        }
        if let Some(v) = lookup("REVIEWDIGEST_OPENAI_BASE_URL") {
            self.distill.openai_base_url = v;
        }
        if let Some(v) = lookup("REVIEWDIGEST_OPENAI_MODEL") {
            self.distill.openai_model = v;
        }
        if let Some(v) = lookup("REVIEWDIGEST_GEMINI_BASE_URL") {
            self.distill.gemini_base_url = v;
        }
        if let Some(v) = lookup("REVIEWDIGEST_GEMINI_MODEL") {
            self.distill.gemini_model = v;
        }
        if let Some(v) = lookup("REVIEWDIGEST_MAX_CONCURRENCY") {
            self.server.max_concurrency = parse_env("REVIEWDIGEST_MAX_CONCURRENCY", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.browser.landing_url)
            .with_context(|| format!("invalid browser.landing_url: {}", self.browser.landing_url))?;
        if self.browser.reviews_tab_label.trim().is_empty() {
            anyhow::bail!("browser.reviews_tab_label must not be empty");
        }
        if self.browser.reviews_tab_label.contains('\'') {
            anyhow::bail!("browser.reviews_tab_label must not contain a single quote");
        }
        if self.store.backend == StoreBackend::Firestore && self.store.firestore_project.is_none() {
            anyhow::bail!("store.firestore_project is required for the firestore backend");
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| anyhow::anyhow!("invalid {key}={raw:?}: {err}"))
}
