use super::{ExtractContext, ExtractFrom, Extractor, SupportedFrom};
use crate::error::ResolveError;
use crate::media::{has_media_extension, MediaLink};

/// Urls that already point at a stream file.
pub struct Direct;

impl Extractor for Direct {
    const DISPLAY_NAME: &'static str = "Direct";
    const NAMES: &'static [&'static str] = &["Direct"];

    fn supported_from() -> SupportedFrom {
        SupportedFrom::Url
    }

    fn supports_url(url: &str) -> Option<bool> {
        Some(has_media_extension(url))
    }

    async fn extract(from: ExtractFrom, ctx: &ExtractContext<'_>) -> Result<Vec<MediaLink>, ResolveError> {
        match from {
            ExtractFrom::Url { url, referer } => {
                if ctx.static_resolver.is_denied(&url) {
                    return Err(ResolveError::NotFound(format!("Direct: denylisted url {url}")));
                }

                Ok(vec![MediaLink::new(url, referer)])
            }
            ExtractFrom::Source { .. } => Err(ResolveError::NotFound("Direct: page source is not supported".into())),
        }
    }
}
