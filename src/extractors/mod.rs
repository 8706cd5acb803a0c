use bitmask_enum::bitmask;

use crate::error::ResolveError;
use crate::extractors::direct::Direct;
use crate::extractors::filemoon::Filemoon;
use crate::fetch::Fetcher;
use crate::media::MediaLink;
use crate::resolve::static_resolver::StaticResolver;

pub mod direct;
pub mod filemoon;

macro_rules! normalized_name {
    ($extractor:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::NAMES.iter().any(|name| $extractor.eq_ignore_ascii_case(name)) {
            Some(<$ext>::DISPLAY_NAME)
        } else {
            normalized_name!($extractor, $($tail),*)
        }
    };
    ($extractor:expr $(,)?) => {
        None
    };
}

macro_rules! find_extractor_for_url {
    ($url:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::supports_url($url).unwrap_or(false) {
            Some(<$ext>::DISPLAY_NAME)
        } else {
            find_extractor_for_url!($url, $($tail),*)
        }
    };
    ($url:expr $(,)?) => {
        None
    };
}

macro_rules! extract_with_extractor {
    ($from:expr, $extractor:expr, $ctx:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::NAMES.iter().any(|name| $extractor.eq_ignore_ascii_case(name)) {
            if !$from.is_source() || <$ext>::supported_from().contains(SupportedFrom::Source) {
                Some(<$ext>::extract($from, $ctx).await)
            } else {
                Some(Err(ResolveError::NotFound(format!("{}: page source is not supported", <$ext>::DISPLAY_NAME))))
            }
        } else {
            extract_with_extractor!($from, $extractor, $ctx, $($tail),*)
        }
    };
    ($from:expr, $extractor:expr, $ctx:expr $(,)?) => {
        None
    };
}

macro_rules! create_functions_for_extractors {
    ($( $ext:ty ),* $(,)?) => {
        pub const EXTRACTOR_NAMES: &[&[&str]] = &[$(<$ext>::NAMES),*];

        pub fn normalized_name(extractor: &str) -> Option<&'static str> {
            normalized_name!(extractor, $($ext),*)
        }

        pub fn exists_extractor_with_name(extractor: &str) -> bool {
            normalized_name(extractor).is_some()
        }

        /// Display name of the first extractor that claims the url.
        pub fn find_extractor_for_url(url: &str) -> Option<&'static str> {
            find_extractor_for_url!(url, $($ext),*)
        }

        /// Runs the extractor with the given name. Returns `None` if no
        /// extractor has that name.
        pub async fn extract_with_extractor(
            from: ExtractFrom,
            extractor: &str,
            ctx: &ExtractContext<'_>,
        ) -> Option<Result<Vec<MediaLink>, ResolveError>> {
            extract_with_extractor!(from, extractor, ctx, $($ext),*)
        }
    };
    () => {};
}

create_functions_for_extractors! {
    Direct,
    Filemoon,
}

/// Shared services an extractor may use.
pub struct ExtractContext<'a> {
    pub fetcher: &'a Fetcher,
    pub static_resolver: &'a StaticResolver,
}

#[derive(Debug, Clone)]
pub enum ExtractFrom {
    Url { url: String, referer: Option<String> },
    Source { source: String, url: Option<String> },
}

impl ExtractFrom {
    pub fn is_source(&self) -> bool {
        matches!(self, ExtractFrom::Source { .. })
    }
}

#[bitmask]
pub enum SupportedFrom {
    Url,
    Source,
}

pub trait Extractor {
    const DISPLAY_NAME: &'static str;
    const NAMES: &'static [&'static str];

    fn supported_from() -> SupportedFrom;

    /// `None` means the extractor cannot tell from the url alone.
    fn supports_url(url: &str) -> Option<bool>;

    async fn extract(from: ExtractFrom, ctx: &ExtractContext<'_>) -> Result<Vec<MediaLink>, ResolveError>;
}

pub mod utils {
    use std::collections::{HashMap, VecDeque};
    use std::num::NonZeroUsize;

    use once_cell::sync::Lazy;
    use regex::Regex;

    /// Embed hosts rotate their top level domain constantly, so families are
    /// matched by the second level label only: `filemoon` matches
    /// `filemoon.sx`, `www.filemoon.in` and `filemoon.to`.
    pub fn is_url_host_family_and_has_path(url: &str, families: &[&str]) -> bool {
        url::Url::parse(url)
            .map(|url| {
                let is_web = matches!(url.scheme(), "http" | "https");
                let path = url.path();
                let has_path = !path.strip_prefix('/').unwrap_or(path).is_empty();
                let in_family = url
                    .host_str()
                    .and_then(|host| {
                        let mut labels = host.rsplit('.');
                        let _tld = labels.next()?;
                        labels.next()
                    })
                    .map(|label| families.iter().any(|family| family.eq_ignore_ascii_case(label)))
                    .unwrap_or(false);

                is_web && has_path && in_family
            })
            .unwrap_or(false)
    }

    /// Port of https://github.com/yt-dlp/yt-dlp/blob/4e38e2ae9d7380015349e6aee59c78bb3938befd/yt_dlp/utils/_utils.py#L4364-L4374
    pub fn encode_base_n(mut num: usize, base: NonZeroUsize) -> Option<String> {
        const TABLE: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

        if base.get() > TABLE.len() {
            return None;
        }

        let table = &TABLE[..base.get()];

        if num == 0 {
            return Some((table[0] as char).to_string());
        }

        let mut result = VecDeque::new();
        let base = table.len();

        while num > 0 {
            result.push_front(table[num % base]);
            num /= base;
        }

        String::from_utf8(result.into()).ok()
    }

    /// Unpacks a Dean Edwards packed script (`eval(function(p,a,c,k,e,d)...)`).
    ///
    /// Port of https://github.com/yt-dlp/yt-dlp/blob/4e38e2ae9d7380015349e6aee59c78bb3938befd/yt_dlp/utils/_utils.py#L4386-L4401
    pub fn decode_packed_codes(code: &str) -> Option<String> {
        static PACKED_CODES_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"}\('(.+)',(\d+),(\d+),'([^']+)'\.split\('\|'\)").unwrap());
        static WORD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\w+)\b").unwrap());

        let mobj = PACKED_CODES_REGEX.captures(code)?;
        let obfuscated_code = mobj.get(1)?.as_str();
        let base = mobj.get(2)?.as_str().parse::<NonZeroUsize>().ok()?;
        let mut count = mobj.get(3)?.as_str().parse::<usize>().ok()?;
        let symbols = mobj.get(4)?.as_str().split('|').collect::<Vec<_>>();
        let mut symbol_table = HashMap::with_capacity(count);

        while count > 0 {
            count -= 1;
            let base_n_count = encode_base_n(count, base)?;
            let value = match symbols.get(count) {
                Some(symbol) if !symbol.is_empty() => symbol.to_string(),
                _ => base_n_count.clone(),
            };
            symbol_table.insert(base_n_count, value);
        }

        let mut replace_errored = false;
        let replaced = WORD_REGEX.replace_all(obfuscated_code, |captures: &regex::Captures| {
            match captures.get(0).and_then(|word| symbol_table.get(word.as_str())) {
                Some(value) => value.clone(),
                None => {
                    replace_errored = true;
                    String::new()
                }
            }
        });

        if replace_errored {
            return None;
        }

        Some(replaced.to_string())
    }

}
