use std::collections::HashSet;

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use url::Url;

use crate::config::ResolverConfig;
use crate::dom;
use crate::extractors::utils::decode_packed_codes;
use crate::media::{has_media_extension, MediaLink};

/// Host fragments of ad and analytics services. Anything served from them is
/// never a stream, even if the url is `.m3u8` shaped.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "doubleclick",
    "googletagmanager",
    "google-analytics",
    "googlesyndication",
    "googleadservices",
    "adservice",
    "facebook.net",
    "hotjar",
    "scorecardresearch",
    "analytics",
    "popads",
    "adsterra",
];

/// Pattern matchers in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// `"https://.../master.m3u8"` anywhere in the text.
    QuotedLiteral,
    /// `file: "..."`, `src: '...'`, `hls: "..."`, `source: "..."`.
    ObjectKey,
    /// `src` of iframe, video and source elements.
    ElementSrc,
    /// Unquoted media urls.
    BareUrl,
}

impl Matcher {
    pub const PRIORITY: [Matcher; 4] = [
        Matcher::QuotedLiteral,
        Matcher::ObjectKey,
        Matcher::ElementSrc,
        Matcher::BareUrl,
    ];

    fn find(&self, raw: &str, normalized: &str, base: &Url) -> Vec<String> {
        static QUOTED_LITERAL_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"["']((?:https?:)?//[^"'\s<>]+?\.(?:m3u8|mp4|mkv)(?:[?#/][^"'\s<>]*)?)["']"#).unwrap()
        });
        static OBJECT_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"(?i)["']?\b(?:file|src|hls|source)["']?\s*:\s*["']([^"'\s]+)["']"#).unwrap()
        });
        static BARE_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"https?://[^\s"'<>()\\]+?\.(?:m3u8|mp4|mkv)(?:[?#/][^\s"'<>()\\]*)?"#).unwrap()
        });

        let found = match self {
            Matcher::QuotedLiteral => capture_group(&QUOTED_LITERAL_REGEX, normalized),
            Matcher::ObjectKey => capture_group(&OBJECT_KEY_REGEX, normalized),
            Matcher::ElementSrc => {
                let document = Html::parse_document(raw);
                dom::select_all(
                    dom::root(&document),
                    "iframe[src], iframe[data-src], video[src], video source[src], source[src]",
                )
                .into_iter()
                .filter_map(|element| dom::own_attr(element, "src").or_else(|| dom::own_attr(element, "data-src")))
                .collect()
            }
            Matcher::BareUrl => BARE_URL_REGEX
                .find_iter(normalized)
                .map(|found| found.as_str().to_string())
                .collect(),
        };

        found
            .into_iter()
            .filter_map(|value| dom::absolute_url(base, &value))
            .collect()
    }
}

fn capture_group(regex: &Regex, text: &str) -> Vec<String> {
    regex
        .captures_iter(text)
        .filter_map(|captures| captures.get(1).map(|group| group.as_str().to_string()))
        .collect()
}

/// Where a next-hop page was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedSource {
    /// An iframe or a `data-url` player button.
    Frame,
    /// A player url mentioned inside a script.
    Script,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedPage {
    pub url: String,
    pub source: EmbedSource,
}

/// Finds media urls in page text without executing any JavaScript.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    denylist: Vec<String>,
    exhaustive: bool,
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new(&[], false)
    }
}

impl StaticResolver {
    pub fn new(extra_denylist: &[String], exhaustive: bool) -> Self {
        let denylist = DEFAULT_DENYLIST
            .iter()
            .map(|entry| entry.to_string())
            .chain(extra_denylist.iter().map(|entry| entry.trim().to_ascii_lowercase()))
            .filter(|entry| !entry.is_empty())
            .collect();

        Self { denylist, exhaustive }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(&config.extra_denylist, config.exhaustive)
    }

    pub fn is_denied(&self, url: &str) -> bool {
        let haystack = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_else(|| url.to_ascii_lowercase());

        self.denylist.iter().any(|entry| haystack.contains(entry.as_str()))
    }

    /// Plausible stream urls: http(s), not denylisted, media extension.
    pub fn is_plausible(&self, url: &str) -> bool {
        let is_web = Url::parse(url)
            .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
            .unwrap_or(false);

        is_web && has_media_extension(url) && !self.is_denied(url)
    }

    /// Media links found in `text`, which was served from `base`.
    ///
    /// Matchers run in [Matcher::PRIORITY] order and the first one producing
    /// a plausible url wins, unless the resolver is exhaustive. The result is
    /// deduplicated by url.
    pub fn resolve(&self, text: &str, base: &Url) -> Vec<MediaLink> {
        let normalized = normalize(text);
        let referer = base.to_string();
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for matcher in Matcher::PRIORITY {
            let before = links.len();

            for url in matcher.find(text, &normalized, base) {
                if self.is_plausible(&url) && seen.insert(url.clone()) {
                    links.push(MediaLink::new(url, Some(referer.clone())));
                }
            }

            if links.len() > before {
                log::trace!("{:?} matched {} url(s) on {}", matcher, links.len() - before, base);

                if !self.exhaustive {
                    break;
                }
            }
        }

        links
    }

    /// Next-hop candidates: iframes and player buttons first, then player
    /// urls mentioned in scripts.
    pub fn embedded_pages(&self, html: &str, base: &Url) -> Vec<EmbeddedPage> {
        static SCRIPT_EMBED_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"https?://[^\s"'<>\\]+?/(?:e|embed|v)/[A-Za-z0-9_\-]+[^\s"'<>\\]*"#).unwrap()
        });

        let document = Html::parse_document(html);
        let root = dom::root(&document);

        let frames = dom::select_all(root, "iframe")
            .into_iter()
            .filter_map(|element| {
                ["src", "data-src", "data-lazy-src"]
                    .iter()
                    .find_map(|attribute| dom::own_attr(element, attribute))
            })
            .chain(
                dom::select_all(root, "[data-url]")
                    .into_iter()
                    .filter_map(|element| dom::own_attr(element, "data-url")),
            )
            .map(|url| (url, EmbedSource::Frame));

        let normalized = normalize(html);
        let scripts = SCRIPT_EMBED_REGEX
            .find_iter(&normalized)
            .map(|found| (found.as_str().to_string(), EmbedSource::Script))
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        seen.insert(base.to_string());

        frames
            .chain(scripts)
            .filter_map(|(url, source)| dom::absolute_url(base, &url).map(|url| (url, source)))
            .filter(|(url, _)| url.starts_with("http://") || url.starts_with("https://"))
            .filter(|(url, _)| !self.is_denied(url) && !has_media_extension(url))
            .filter(|(url, _)| seen.insert(url.clone()))
            .map(|(url, source)| EmbeddedPage { url, source })
            .collect()
    }
}

/// Undoes JavaScript escaping and appends the contents of packed scripts and
/// `atob` literals, so the matchers see urls hidden by either.
pub fn normalize(text: &str) -> String {
    static PACKED_START_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"eval\(function\(p,a,c,k,e,[a-z]\)").unwrap());
    static ATOB_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"atob\(\s*["']([A-Za-z0-9+/=_\-]{8,})["']\s*\)"#).unwrap());

    let mut normalized = unescape(text);
    let mut appended = String::new();

    for start in PACKED_START_REGEX.find_iter(text) {
        let rest = &text[start.start()..];
        let end = rest.find("</script>").unwrap_or(rest.len());

        if let Some(unpacked) = decode_packed_codes(&rest[..end]) {
            appended.push('\n');
            appended.push_str(&unescape(&unpacked));
        }
    }

    for captures in ATOB_REGEX.captures_iter(&normalized) {
        let Some(encoded) = captures.get(1).map(|group| group.as_str()) else {
            continue;
        };

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(encoded));

        if let Some(decoded) = decoded.ok().and_then(|bytes| String::from_utf8(bytes).ok()) {
            appended.push('\n');
            appended.push_str(&unescape(&decoded));
        }
    }

    normalized.push_str(&appended);
    normalized
}

fn unescape(text: &str) -> String {
    text.replace("\\/", "/")
        .replace("\\u0026", "&")
        .replace("\\u002F", "/")
        .replace("\\u002f", "/")
        .replace("&amp;", "&")
}
