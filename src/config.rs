use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7";

/// HTTP settings shared by every page fetch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub accept_language: String,
    /// Retries on transient failures, not counting the first request.
    pub retries: u32,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            retries: 2,
            connect_timeout_secs: 20,
            request_timeout_secs: 30,
        }
    }
}

impl FetchConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for the hop walk and the static and dynamic resolvers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// How many embed pages may be followed below the content page.
    pub max_hops: u32,
    /// How many new embeds of a single page are queued.
    pub max_embeds_per_page: usize,
    /// Union every pattern matcher instead of stopping at the first hit.
    pub exhaustive: bool,
    /// Host fragments that are never returned, on top of the built-in list.
    pub extra_denylist: Vec<String>,
    /// Fetch master playlists and emit one link per variant.
    pub expand_playlists: bool,
    pub browser: BrowserConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            max_embeds_per_page: 8,
            exhaustive: false,
            extra_denylist: Vec::new(),
            expand_playlists: false,
            browser: BrowserConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    pub headless: bool,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            headless: true,
            timeout_ms: 20_000,
            poll_interval_ms: 250,
        }
    }
}

impl BrowserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Contents of `config.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub resolver: ResolverConfig,
    /// Base url overrides keyed by lowercase site name, e.g.
    /// `superflix = "https://superflix22.lol"`.
    pub sites: BTreeMap<String, String>,
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self, anyhow::Error> {
        let mut config: Self = toml::from_str(contents).context("failed to parse config file")?;
        config.sites = std::mem::take(&mut config.sites)
            .into_iter()
            .map(|(name, base_url)| (name.to_ascii_lowercase(), base_url))
            .collect();

        Ok(config)
    }

    /// Loads the config from `path`, or from the default location if no path
    /// is given. A missing default file yields the built-in defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match crate::dirs::get_config_file() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                log::debug!("Loading config from {}", path.display());
                Self::from_toml(&contents).with_context(|| format!("invalid config file: {}", path.display()))
            }
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("failed to read config file: {}", path.display())),
        }
    }

    pub fn site_base_url(&self, site_name: &str) -> Option<&str> {
        self.sites.get(&site_name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn config_path_hint() -> Option<PathBuf> {
        crate::dirs::get_config_file()
    }
}
