use std::collections::BTreeMap;
use std::fmt::Display;

use enum_iterator::Sequence;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

const MEDIA_EXTENSIONS: &[&str] = &[".m3u8", ".m3u", ".mp4", ".mkv"];

/// Coarse resolution class of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Sequence, Serialize)]
pub enum Quality {
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "360")]
    P360,
    #[serde(rename = "480")]
    P480,
    #[serde(rename = "720")]
    P720,
    #[serde(rename = "1080")]
    P1080,
    #[serde(rename = "2160")]
    P2160,
}

impl Quality {
    pub fn height(&self) -> Option<u32> {
        match self {
            Quality::Unknown => None,
            Quality::P360 => Some(360),
            Quality::P480 => Some(480),
            Quality::P720 => Some(720),
            Quality::P1080 => Some(1080),
            Quality::P2160 => Some(2160),
        }
    }

    /// Maps a pixel height to the closest tier at or below it.
    pub fn from_height(height: u64) -> Self {
        match height {
            0 => Quality::Unknown,
            2160.. => Quality::P2160,
            1080.. => Quality::P1080,
            720.. => Quality::P720,
            480.. => Quality::P480,
            _ => Quality::P360,
        }
    }

    /// Looks for a quality token in the path of the url, e.g. `/720/`,
    /// `_1080p.mp4` or `-4k/`. Host and query are ignored.
    pub fn from_url(url: &str) -> Self {
        static QUALITY_TOKEN_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?i)(?:^|[/_\-.=,])(360|480|720|1080|2160|4k)p?(?:$|[/_\-.,])").unwrap());

        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
        };

        QUALITY_TOKEN_REGEX
            .captures(&path)
            .and_then(|captures| captures.get(1))
            .map(|token| match token.as_str().to_ascii_lowercase().as_str() {
                "360" => Quality::P360,
                "480" => Quality::P480,
                "720" => Quality::P720,
                "1080" => Quality::P1080,
                _ => Quality::P2160,
            })
            .unwrap_or(Quality::Unknown)
    }
}

impl Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.height() {
            Some(height) => write!(f, "{height}p"),
            None => write!(f, "unknown"),
        }
    }
}

/// A playable stream together with the headers the host expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaLink {
    pub url: String,
    pub quality: Quality,
    pub is_playlist: bool,
    pub referer: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl MediaLink {
    pub fn new(url: impl Into<String>, referer: Option<String>) -> Self {
        let url = url.into();

        Self {
            quality: Quality::from_url(&url),
            is_playlist: is_playlist_url(&url),
            url,
            referer,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

impl Display for MediaLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_playlist { "hls" } else { "file" };
        write!(f, "[{}] [{}] {}", self.quality, kind, self.url)?;

        if let Some(referer) = &self.referer {
            write!(f, " (referer: {referer})")?;
        }

        Ok(())
    }
}

fn last_path_segment(url: &str) -> Option<String> {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.last())
            .map(|last| last.to_ascii_lowercase()),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .map(|last| last.to_ascii_lowercase()),
    }
}

pub fn is_playlist_url(url: &str) -> bool {
    last_path_segment(url)
        .map(|last| {
            (last.ends_with(".m3u8") && last.len() != ".m3u8".len())
                || (last.ends_with(".m3u") && last.len() != ".m3u".len())
        })
        .unwrap_or(false)
}

/// True if the url path points at a stream file. Some hosts put the
/// extension in the middle of the path (`.../master.m3u8/index`), so any
/// path segment counts.
pub fn has_media_extension(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase(),
    };

    path.split('/').any(|segment| {
        MEDIA_EXTENSIONS
            .iter()
            .any(|ext| segment.ends_with(ext) && segment.len() != ext.len())
    })
}
