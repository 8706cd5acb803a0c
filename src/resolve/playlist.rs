use std::collections::HashSet;

use reqwest::header::HeaderName;
use url::Url;

use crate::fetch::Fetcher;
use crate::media::{MediaLink, Quality};

/// Replaces an HLS master playlist link with one link per variant stream.
/// Media playlists, non-playlist links and anything that fails to load or
/// parse are returned unchanged.
pub async fn expand(fetcher: &Fetcher, link: MediaLink) -> Vec<MediaLink> {
    if !link.is_playlist {
        return vec![link];
    }

    let headers = link
        .headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("Referer") && !name.eq_ignore_ascii_case("Origin"))
        .filter_map(|(name, value)| {
            HeaderName::from_bytes(name.as_bytes())
                .ok()
                .map(|name| (name, value.as_str()))
        })
        .collect::<Vec<_>>();

    match fetcher
        .get_page_with_headers(&link.url, link.referer.as_deref(), &headers)
        .await
    {
        Ok(page) => match expand_master(&page.url, page.text.as_bytes(), &link) {
            Some(variants) => {
                log::debug!("Expanded {} into {} variant(s)", link.url, variants.len());
                variants
            }
            None => vec![link],
        },
        Err(err) => {
            log::debug!("Failed to load playlist {}: {}", link.url, err);
            vec![link]
        }
    }
}

/// Variants of a master playlist, best quality first. `None` if the content
/// is not a master playlist with at least one regular variant.
pub fn expand_master(master_url: &Url, content: &[u8], template: &MediaLink) -> Option<Vec<MediaLink>> {
    let playlist = match m3u8_rs::parse_playlist_res(content) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(playlist)) => playlist,
        Ok(m3u8_rs::Playlist::MediaPlaylist(_)) => return None,
        Err(_) => {
            log::debug!("Failed to parse m3u8 from {}", master_url);
            return None;
        }
    };

    let mut seen = HashSet::new();
    let mut variants = playlist
        .variants
        .iter()
        .filter(|variant| !variant.is_i_frame)
        .filter_map(|variant| {
            let url = master_url.join(&variant.uri).ok()?.to_string();

            if !seen.insert(url.clone()) {
                return None;
            }

            let quality = variant
                .resolution
                .as_ref()
                .map(|resolution| Quality::from_height(resolution.height))
                .filter(|quality| *quality != Quality::Unknown)
                .unwrap_or_else(|| Quality::from_url(&url));

            Some(MediaLink {
                url,
                quality,
                is_playlist: true,
                referer: template.referer.clone(),
                headers: template.headers.clone(),
            })
        })
        .collect::<Vec<_>>();

    if variants.is_empty() {
        return None;
    }

    variants.sort_by(|a, b| b.quality.cmp(&a.quality));
    Some(variants)
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::expand_master;
    use crate::media::{MediaLink, Quality};

    const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
index-v1-a1.m3u8?t=abc
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
https://cdn2.example/hls/1080/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720
index-v2-a1.m3u8?t=abc
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=100000,RESOLUTION=1280x720,URI=\"iframes-v2.m3u8\"
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXTINF:6.0,
seg-1.ts
#EXT-X-ENDLIST
";

    fn template() -> MediaLink {
        MediaLink::new("https://cdn.example/hls/x/master.m3u8", Some("https://filemoon.in/e/1".to_string()))
            .header("Referer", "https://filemoon.in/e/1")
    }

    #[test]
    fn test_expand_master() {
        let master_url = Url::parse("https://cdn.example/hls/x/master.m3u8").unwrap();
        let variants = expand_master(&master_url, MASTER.as_bytes(), &template()).unwrap();

        assert_eq!(
            variants
                .iter()
                .map(|variant| (variant.url.as_str(), variant.quality))
                .collect::<Vec<_>>(),
            vec![
                ("https://cdn2.example/hls/1080/index.m3u8", Quality::P1080),
                ("https://cdn.example/hls/x/index-v2-a1.m3u8?t=abc", Quality::P720),
                ("https://cdn.example/hls/x/index-v1-a1.m3u8?t=abc", Quality::P360),
            ]
        );
        assert!(variants.iter().all(|variant| variant.is_playlist));
        assert_eq!(variants[0].referer.as_deref(), Some("https://filemoon.in/e/1"));
        assert_eq!(
            variants[0].headers.get("Referer").map(String::as_str),
            Some("https://filemoon.in/e/1")
        );
    }

    #[test]
    fn test_media_playlist_is_kept() {
        let url = Url::parse("https://cdn.example/hls/x/index.m3u8").unwrap();
        assert!(expand_master(&url, MEDIA.as_bytes(), &template()).is_none());
        assert!(expand_master(&url, b"<html>403 Forbidden</html>", &template()).is_none());
    }
}
