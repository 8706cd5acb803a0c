use std::fmt::Display;

use enum_dispatch::enum_dispatch;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

use self::superflix::SuperFlix;
use self::ultracine::UltraCine;
use crate::config::Config;
use crate::fetch::Fetcher;

pub mod episodes;
pub mod jsonld;
pub mod superflix;
pub mod ultracine;

macro_rules! enum_dispatch {
    {
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $trait:ident $(+ $add_trait:ident)* {
            $($ty:ident),*$(,)?
        }
    } => {
        #[enum_dispatch($trait$(, $add_trait)*)]
        $(#[$meta])*
        $vis enum $name {
            $($ty($ty),)*
        }
    }
}

macro_rules! find_site_for_url {
    ($fetcher:expr, $config:expr, $url:expr, $site:ident $(, $tail:ident)* $(,)?) => {
        match base_url_of::<$site>($config) {
            Some(base_url) if <$site>::supports_url(&base_url, $url) => {
                Some(DispatchSite::from(<$site>::new($fetcher, base_url)))
            }
            _ => find_site_for_url!($fetcher, $config, $url, $($tail),*),
        }
    };
    ($fetcher:expr, $config:expr, $url:expr $(,)?) => {
        None
    };
}

macro_rules! site_with_name {
    ($fetcher:expr, $config:expr, $name:expr, $site:ident $(, $tail:ident)* $(,)?) => {
        if <$site>::NAME.eq_ignore_ascii_case($name) {
            base_url_of::<$site>($config).map(|base_url| DispatchSite::from(<$site>::new($fetcher, base_url)))
        } else {
            site_with_name!($fetcher, $config, $name, $($tail),*)
        }
    };
    ($fetcher:expr, $config:expr, $name:expr $(,)?) => {
        None
    };
}

macro_rules! create_functions_for_sites {
    ($( $site:ident ),* $(,)?) => {
        enum_dispatch! {
            pub enum DispatchSite: Site {
                $($site),*
            }
        }

        pub const SITE_NAMES: &[&str] = &[$(<$site>::NAME),*];

        /// The first registered site whose base url has the host of `url`.
        pub fn find_site_for_url(fetcher: Fetcher, config: &Config, url: &str) -> Option<DispatchSite> {
            find_site_for_url!(fetcher, config, url, $($site),*)
        }

        pub fn site_with_name(fetcher: Fetcher, config: &Config, name: &str) -> Option<DispatchSite> {
            site_with_name!(fetcher, config, name, $($site),*)
        }
    };
    () => {};
}

create_functions_for_sites! {
    SuperFlix,
    UltraCine,
}

fn base_url_of<S: SiteAdapter>(config: &Config) -> Option<Url> {
    let base_url = config.site_base_url(S::NAME).unwrap_or(S::DEFAULT_BASE_URL);

    match Url::parse(base_url) {
        Ok(url) => Some(url),
        Err(err) => {
            log::error!("Invalid base url {:?} for {}: {}", base_url, S::NAME, err);
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleKind {
    Movie,
    Series,
}

impl Display for TitleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TitleKind::Movie => write!(f, "Movie"),
            TitleKind::Series => write!(f, "Series"),
        }
    }
}

/// A listing page of a site, e.g. latest movies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogSection {
    pub name: String,
    pub path: String,
}

impl CatalogSection {
    fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogItem {
    pub title: String,
    pub url: String,
    pub poster: Option<String>,
    pub year: Option<u32>,
    pub kind: TitleKind,
    pub quality_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Episode {
    pub season: u32,
    pub number: u32,
    pub title: Option<String>,
    /// Passed to [Site::link_targets] to play the episode.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleDetails {
    pub title: String,
    pub url: String,
    pub poster: Option<String>,
    pub plot: Option<String>,
    pub year: Option<u32>,
    pub tags: Vec<String>,
    pub actors: Vec<String>,
    pub directors: Vec<String>,
    pub kind: TitleKind,
    /// Player url of a movie.
    pub embed: Option<String>,
    pub episodes: Vec<Episode>,
}

/// A player page to hand to the link resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedTarget {
    pub url: String,
    pub referer: Option<String>,
}

#[enum_dispatch]
pub trait Site {
    fn name(&self) -> &'static str;

    fn base_url(&self) -> &Url;

    fn sections(&self) -> Vec<CatalogSection>;

    async fn catalog(&self, section: &CatalogSection, page: u32) -> Result<Vec<CatalogItem>, anyhow::Error>;

    async fn search(&self, query: &str) -> Result<Vec<CatalogItem>, anyhow::Error>;

    async fn load(&self, url: &str) -> Result<TitleDetails, anyhow::Error>;

    /// Player pages for a movie embed url, an episode target or a title page.
    async fn link_targets(&self, data: &str) -> Result<Vec<EmbedTarget>, anyhow::Error>;
}

pub trait SiteAdapter: Site {
    const NAME: &'static str;
    const DEFAULT_BASE_URL: &'static str;

    fn new(fetcher: Fetcher, base_url: Url) -> Self;

    fn supports_url(base_url: &Url, url: &str) -> bool {
        is_same_site(base_url, url)
    }
}

pub fn is_same_site(base_url: &Url, url: &str) -> bool {
    let strip = |host: &str| host.strip_prefix("www.").unwrap_or(host).to_ascii_lowercase();

    match (base_url.host_str(), Url::parse(url).ok().as_ref().and_then(Url::host_str)) {
        (Some(base_host), Some(host)) => strip(base_host) == strip(host),
        _ => false,
    }
}

/// Splits `"Duna: Parte Dois (2024)"` into the title and the year.
pub fn split_title_year(raw: &str) -> (String, Option<u32>) {
    static YEAR_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d{4})\)").unwrap());

    let year = YEAR_REGEX
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .and_then(|year| year.as_str().parse().ok());
    let title = YEAR_REGEX.replace_all(raw, "").split_whitespace().collect::<Vec<_>>().join(" ");

    (title, year)
}

/// `1` for an empty result, so that `/page/1` is never requested.
fn page_number(page: u32) -> u32 {
    page.max(1)
}
