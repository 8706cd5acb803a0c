use std::collections::{HashSet, VecDeque};
use std::fmt::Display;

use anyhow::Context;
use serde::Serialize;
use url::Url;

use self::dynamic::{DynamicResolver, MediaSniffer};
use self::sink::ResultSink;
use self::static_resolver::{EmbedSource, StaticResolver};
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::extractors::{self, ExtractContext, ExtractFrom};
use crate::fetch::Fetcher;
use crate::media::MediaLink;

pub mod dynamic;
pub mod playlist;
pub mod sink;
pub mod static_resolver;

/// How a candidate url was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Hop {
    Page,
    Iframe,
    NestedIframe,
    Script,
    Extractor,
    Browser,
}

impl Hop {
    fn is_embed(&self) -> bool {
        matches!(self, Hop::Iframe | Hop::NestedIframe | Hop::Script | Hop::Extractor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Pending,
    /// Number of new links emitted.
    Resolved(usize),
    NotFound,
    /// Error kind, see [ResolveError::kind].
    Failed(&'static str),
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Pending => write!(f, "pending"),
            Outcome::Resolved(count) => write!(f, "resolved ({count})"),
            Outcome::NotFound => write!(f, "not found"),
            Outcome::Failed(kind) => write!(f, "failed ({kind})"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub url: String,
    pub referer: Option<String>,
    pub hop: Hop,
    pub depth: u32,
    pub outcome: Outcome,
}

/// Every candidate tried during one resolution, in the order they were tried.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionAttempt {
    candidates: Vec<Candidate>,
}

impl ResolutionAttempt {
    fn push(&mut self, url: &str, referer: Option<&str>, hop: Hop, depth: u32) -> usize {
        log::trace!("Trying {:?} {} (depth: {})", hop, url, depth);

        self.candidates.push(Candidate {
            url: url.to_string(),
            referer: referer.map(str::to_string),
            hop,
            depth,
            outcome: Outcome::Pending,
        });

        self.candidates.len() - 1
    }

    fn finish(&mut self, index: usize, outcome: Outcome) {
        if let Some(candidate) = self.candidates.get_mut(index) {
            candidate.outcome = outcome;
        }
    }

    fn fail(&mut self, index: usize, err: &ResolveError) {
        if let Some(candidate) = self.candidates.get(index) {
            if err.is_transient() {
                log::warn!("{} failed: {}", candidate.url, err);
            } else {
                log::debug!("{} failed: {}", candidate.url, err);
            }
        }

        self.finish(index, Outcome::Failed(err.kind()));
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// The page the browser should render when nothing else worked: the
    /// deepest embed page that loaded without yielding a link, otherwise the
    /// deepest embed page at all, otherwise the content page. Ties go to the
    /// candidate tried first.
    pub fn browser_target(&self) -> Option<&Candidate> {
        fn deepest<'a>(candidates: impl Iterator<Item = &'a Candidate>) -> Option<&'a Candidate> {
            candidates.fold(None, |best: Option<&Candidate>, candidate| match best {
                Some(best) if best.depth >= candidate.depth => Some(best),
                _ => Some(candidate),
            })
        }

        let embeds = || self.candidates.iter().filter(|candidate| candidate.hop.is_embed());

        deepest(embeds().filter(|candidate| candidate.outcome == Outcome::NotFound))
            .or_else(|| deepest(embeds()))
            .or_else(|| self.candidates.iter().find(|candidate| candidate.hop == Hop::Page))
    }
}

/// Links found for a url, plus the trail of candidates behind them.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub links: Vec<MediaLink>,
    pub attempt: ResolutionAttempt,
}

/// Walks from a content page through embed pages to playable streams.
///
/// Pages are visited breadth first: host extractors get the first try on a
/// url, then the static resolver runs on the fetched page, then the page's
/// iframes, player buttons and script-embedded player urls are queued, up to
/// `max_hops` below the content page. The walk stops at the first candidate
/// that yields links. If none does, the browser renders the deepest embed
/// page.
pub struct LinkResolver<S> {
    fetcher: Fetcher,
    static_resolver: StaticResolver,
    dynamic: Option<DynamicResolver<S>>,
    max_hops: u32,
    max_embeds_per_page: usize,
    expand_playlists: bool,
}

impl<S: MediaSniffer> LinkResolver<S> {
    pub fn new(fetcher: Fetcher, config: &ResolverConfig, sniffer: Option<S>) -> Self {
        let dynamic = if config.browser.enabled {
            sniffer.map(|sniffer| DynamicResolver::new(sniffer, &config.browser))
        } else {
            None
        };

        Self {
            fetcher,
            static_resolver: StaticResolver::from_config(config),
            dynamic,
            max_hops: config.max_hops,
            max_embeds_per_page: config.max_embeds_per_page,
            expand_playlists: config.expand_playlists,
        }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn into_sniffer(self) -> Option<S> {
        self.dynamic.map(DynamicResolver::into_sniffer)
    }

    /// Fails only for an unusable input url. Every other failure is recorded
    /// in the attempt and the links may be empty.
    pub async fn resolve(&mut self, url: &str, referer: Option<&str>) -> Result<Resolution, anyhow::Error> {
        let start = Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
        if !matches!(start.scheme(), "http" | "https") {
            anyhow::bail!("unsupported url scheme: {}", start.scheme());
        }

        let mut attempt = ResolutionAttempt::default();
        let mut sink = ResultSink::new(Some(self.fetcher.user_agent().to_string()));
        let mut visited = HashSet::from([start.to_string()]);
        let mut queue = VecDeque::from([(start.to_string(), referer.map(str::to_string), Hop::Page, 0)]);

        while let Some((url, referer, hop, depth)) = queue.pop_front() {
            if self.try_extractor(&url, referer.as_deref(), depth, &mut attempt, &mut sink).await {
                break;
            }

            let index = attempt.push(&url, referer.as_deref(), hop, depth);
            if self.static_resolver.is_denied(&url) {
                log::debug!("Not loading denylisted page {}", url);
                attempt.finish(index, Outcome::NotFound);
                continue;
            }

            let page = match self.fetcher.get_page(&url, referer.as_deref()).await {
                Ok(page) => page,
                Err(err) => {
                    attempt.fail(index, &err);
                    continue;
                }
            };

            let links = self.static_resolver.resolve(&page.text, &page.url);
            if !links.is_empty() {
                let count = self.emit(links, &mut sink).await;
                attempt.finish(index, Outcome::Resolved(count));
                break;
            }

            attempt.finish(index, Outcome::NotFound);

            if depth >= self.max_hops {
                log::debug!("Not following embeds of {}: hop limit {} reached", page.url, self.max_hops);
                continue;
            }

            let embeds = self
                .static_resolver
                .embedded_pages(&page.text, &page.url)
                .into_iter()
                .filter(|embed| visited.insert(embed.url.clone()))
                .take(self.max_embeds_per_page);

            for embed in embeds {

                let hop = match embed.source {
                    EmbedSource::Frame if depth == 0 => Hop::Iframe,
                    EmbedSource::Frame => Hop::NestedIframe,
                    EmbedSource::Script => Hop::Script,
                };

                queue.push_back((embed.url, Some(page.url.to_string()), hop, depth + 1));
            }
        }

        if sink.is_empty() {
            self.try_browser(&mut attempt, &mut sink).await;
        }

        if sink.is_empty() {
            log::warn!("No media found for {}", url);
        }

        Ok(Resolution {
            links: sink.into_links(),
            attempt,
        })
    }

    /// Runs the named extractor on `url` without walking the page.
    pub async fn extract_with(
        &self,
        extractor: &str,
        url: &str,
        referer: Option<&str>,
    ) -> Result<Vec<MediaLink>, anyhow::Error> {
        let Some(name) = extractors::normalized_name(extractor) else {
            anyhow::bail!("no extractor with name: {}", extractor);
        };

        let ctx = ExtractContext {
            fetcher: &self.fetcher,
            static_resolver: &self.static_resolver,
        };
        let from = ExtractFrom::Url {
            url: url.to_string(),
            referer: referer.map(str::to_string),
        };

        let links = match extractors::extract_with_extractor(from, name, &ctx).await {
            Some(result) => result.with_context(|| format!("{name} failed for {url}"))?,
            None => anyhow::bail!("no extractor with name: {}", name),
        };

        let mut sink = ResultSink::new(Some(self.fetcher.user_agent().to_string()));
        self.emit(links, &mut sink).await;

        Ok(sink.into_links())
    }

    /// Returns true if an extractor produced links.
    async fn try_extractor(
        &self,
        url: &str,
        referer: Option<&str>,
        depth: u32,
        attempt: &mut ResolutionAttempt,
        sink: &mut ResultSink,
    ) -> bool {
        let Some(extractor) = extractors::find_extractor_for_url(url) else {
            return false;
        };

        log::debug!("Using extractor {} for {}", extractor, url);
        let index = attempt.push(url, referer, Hop::Extractor, depth);
        let ctx = ExtractContext {
            fetcher: &self.fetcher,
            static_resolver: &self.static_resolver,
        };
        let from = ExtractFrom::Url {
            url: url.to_string(),
            referer: referer.map(str::to_string),
        };

        match extractors::extract_with_extractor(from, extractor, &ctx).await {
            Some(Ok(links)) if !links.is_empty() => {
                let count = self.emit(links, sink).await;
                attempt.finish(index, Outcome::Resolved(count));
                true
            }
            Some(Err(err)) => {
                attempt.fail(index, &err);
                false
            }
            Some(Ok(_)) | None => {
                attempt.finish(index, Outcome::NotFound);
                false
            }
        }
    }

    async fn try_browser(&mut self, attempt: &mut ResolutionAttempt, sink: &mut ResultSink) {
        let Some(dynamic) = self.dynamic.as_mut() else {
            log::debug!("Browser fallback disabled");
            return;
        };

        let Some(target) = attempt.browser_target().cloned() else {
            return;
        };

        if self.static_resolver.is_denied(&target.url) {
            return;
        }

        let index = attempt.push(&target.url, target.referer.as_deref(), Hop::Browser, target.depth);

        match dynamic
            .resolve(&target.url, target.referer.as_deref(), &self.static_resolver)
            .await
        {
            Ok(links) => {
                let count = self.emit(links, sink).await;
                attempt.finish(index, Outcome::Resolved(count));
            }
            Err(err) => attempt.fail(index, &err),
        }
    }

    async fn emit(&self, links: Vec<MediaLink>, sink: &mut ResultSink) -> usize {
        if !self.expand_playlists {
            return sink.extend(links);
        }

        let mut count = 0;
        for link in links {
            count += sink.extend(playlist::expand(&self.fetcher, link).await);
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{Hop, LinkResolver, Outcome, ResolutionAttempt};
    use crate::config::{FetchConfig, ResolverConfig};
    use crate::error::ResolveError;
    use crate::fetch::Fetcher;
    use crate::media::Quality;
    use crate::resolve::dynamic::MediaSniffer;

    struct OneShotSniffer {
        media: Vec<String>,
        opened: Vec<String>,
    }

    impl MediaSniffer for OneShotSniffer {
        async fn open(&mut self, url: &str, _referer: Option<&str>) -> Result<(), ResolveError> {
            self.opened.push(url.to_string());
            Ok(())
        }

        async fn drain_requests(&mut self) -> Result<Vec<String>, ResolveError> {
            Ok(std::mem::take(&mut self.media))
        }

        async fn reset(&mut self) -> Result<(), ResolveError> {
            Ok(())
        }

        async fn user_agent(&mut self) -> Option<String> {
            None
        }
    }

    fn resolver(sniffer: Option<OneShotSniffer>) -> LinkResolver<OneShotSniffer> {
        resolver_with(ResolverConfig::default(), sniffer)
    }

    fn resolver_with(mut config: ResolverConfig, sniffer: Option<OneShotSniffer>) -> LinkResolver<OneShotSniffer> {
        let fetch_config = FetchConfig {
            retries: 0,
            connect_timeout_secs: 2,
            request_timeout_secs: 2,
            ..Default::default()
        };
        config.browser.timeout_ms = 1000;
        config.browser.poll_interval_ms = 10;

        LinkResolver::new(Fetcher::new(&fetch_config).unwrap(), &config, sniffer)
    }

    /// Serves `pages` by path on a local port until the test process exits.
    /// Unknown paths get a 404. Returns the base url without trailing slash.
    fn serve_pages(pages: &[(&str, &str)]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let pages = Arc::new(
            pages
                .iter()
                .map(|(path, body)| (path.to_string(), body.to_string()))
                .collect::<HashMap<_, _>>(),
        );

        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let pages = Arc::clone(&pages);
                thread::spawn(move || serve_page(stream, &pages));
            }
        });

        format!("http://127.0.0.1:{port}")
    }

    fn serve_page(mut stream: TcpStream, pages: &HashMap<String, String>) {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut buf = [0u8; 8192];
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };

        let request = String::from_utf8_lossy(&buf[..n]);
        let path = request.split_whitespace().nth(1).unwrap_or("/");

        let response = match pages.get(path) {
            Some(body) => format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            ),
            None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
        };
        let _ = stream.write_all(response.as_bytes());
    }

    #[tokio::test]
    async fn test_direct_media_url() {
        let mut resolver = resolver(None);
        let resolution = resolver
            .resolve("https://cdn.example/hls/720/master.m3u8", Some("https://superflix21.lol/filme/x"))
            .await
            .unwrap();

        assert_eq!(resolution.links.len(), 1);
        assert_eq!(resolution.links[0].quality, Quality::P720);
        assert_eq!(
            resolution.links[0].headers.get("Referer").map(String::as_str),
            Some("https://superflix21.lol/filme/x")
        );
        assert_eq!(resolution.attempt.candidates().len(), 1);
        assert_eq!(resolution.attempt.candidates()[0].hop, Hop::Extractor);
        assert_eq!(resolution.attempt.candidates()[0].outcome, Outcome::Resolved(1));
    }

    #[tokio::test]
    async fn test_nested_iframes() {
        let base = serve_pages(&[
            ("/filme/x", r#"<html><body><h1>X</h1><iframe src="/embed/1"></iframe></body></html>"#),
            ("/embed/1", r#"<html><body><iframe src="/inner/2" allowfullscreen></iframe></body></html>"#),
            (
                "/inner/2",
                r#"<html><body><script>
                    var tag = "https://www.googletagmanager.com/gtm/master.m3u8";
                    jwplayer("player").setup({ file: "https://cdn.example/hls/720/master.m3u8" });
                </script></body></html>"#,
            ),
        ]);
        let content_url = format!("{base}/filme/x");
        let embed_url = format!("{base}/embed/1");
        let inner_url = format!("{base}/inner/2");

        let mut resolver = resolver(None);
        let resolution = resolver.resolve(&content_url, None).await.unwrap();

        assert_eq!(resolution.links.len(), 1);
        assert_eq!(resolution.links[0].url, "https://cdn.example/hls/720/master.m3u8");
        assert_eq!(resolution.links[0].quality, Quality::P720);
        assert_eq!(resolution.links[0].referer.as_deref(), Some(inner_url.as_str()));

        let candidates = resolution.attempt.candidates();
        let hops = candidates.iter().map(|candidate| candidate.hop).collect::<Vec<_>>();
        assert_eq!(hops, vec![Hop::Page, Hop::Iframe, Hop::NestedIframe]);

        let outcomes = candidates
            .iter()
            .map(|candidate| candidate.outcome.clone())
            .collect::<Vec<_>>();
        assert_eq!(outcomes, vec![Outcome::NotFound, Outcome::NotFound, Outcome::Resolved(1)]);

        let referers = candidates
            .iter()
            .map(|candidate| candidate.referer.clone())
            .collect::<Vec<_>>();
        assert_eq!(referers, vec![None, Some(content_url), Some(embed_url)]);
    }

    #[tokio::test]
    async fn test_hop_limit() {
        let base = serve_pages(&[
            ("/p/0", r#"<iframe src="/p/1"></iframe>"#),
            ("/p/1", r#"<iframe src="/p/2"></iframe>"#),
            ("/p/2", r#"<iframe src="/p/3"></iframe>"#),
            ("/p/3", r#"<iframe src="/p/4"></iframe>"#),
            ("/p/4", r#"<script>var file = "https://cdn.example/hls/1080/master.m3u8";</script>"#),
        ]);

        let config = ResolverConfig {
            max_hops: 2,
            ..Default::default()
        };
        let mut resolver = resolver_with(config, None);
        let resolution = resolver.resolve(&format!("{base}/p/0"), None).await.unwrap();

        assert!(resolution.links.is_empty());

        let candidates = resolution.attempt.candidates();
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|candidate| candidate.depth <= 2));
        assert!(candidates.iter().all(|candidate| candidate.outcome == Outcome::NotFound));
        assert_eq!(candidates[2].url, format!("{base}/p/2"));
    }

    #[tokio::test]
    async fn test_embeds_per_page_limit() {
        let base = serve_pages(&[(
            "/filme/x",
            r#"<iframe src="/e/a"></iframe><iframe src="/e/b"></iframe><iframe src="/e/c"></iframe>
               <iframe src="/e/d"></iframe><iframe src="/e/e"></iframe>"#,
        )]);

        let config = ResolverConfig {
            max_embeds_per_page: 2,
            ..Default::default()
        };
        let mut resolver = resolver_with(config, None);
        let resolution = resolver.resolve(&format!("{base}/filme/x"), None).await.unwrap();

        assert!(resolution.links.is_empty());

        let frames = resolution
            .attempt
            .candidates()
            .iter()
            .filter(|candidate| candidate.hop == Hop::Iframe)
            .map(|candidate| candidate.url.clone())
            .collect::<Vec<_>>();
        assert_eq!(frames, vec![format!("{base}/e/a"), format!("{base}/e/b")]);
        assert!(resolution
            .attempt
            .candidates()
            .iter()
            .filter(|candidate| candidate.hop == Hop::Iframe)
            .all(|candidate| candidate.outcome == Outcome::Failed("status")));
    }

    #[tokio::test]
    async fn test_denylisted_page_is_not_loaded() {
        let sniffer = OneShotSniffer {
            media: vec!["https://cdn.example/1080/video.mp4".to_string()],
            opened: Vec::new(),
        };
        let mut resolver = resolver(Some(sniffer));
        let resolution = resolver
            .resolve("https://www.googletagmanager.com/ns.html?id=GTM-X", None)
            .await
            .unwrap();

        assert!(resolution.links.is_empty());
        assert_eq!(resolution.attempt.candidates().len(), 1);
        assert_eq!(resolution.attempt.candidates()[0].hop, Hop::Page);
        assert_eq!(resolution.attempt.candidates()[0].outcome, Outcome::NotFound);

        let sniffer = resolver.into_sniffer().unwrap();
        assert!(sniffer.opened.is_empty());
    }

    #[tokio::test]
    async fn test_browser_fallback_after_failed_fetch() {
        let sniffer = OneShotSniffer {
            media: vec!["https://cdn.example/1080/video.mp4".to_string()],
            opened: Vec::new(),
        };
        let mut resolver = resolver(Some(sniffer));

        let resolution = resolver.resolve("http://127.0.0.1:1/embed/abc", None).await.unwrap();

        assert_eq!(resolution.links.len(), 1);
        assert_eq!(resolution.links[0].quality, Quality::P1080);
        assert_eq!(resolution.links[0].referer.as_deref(), Some("http://127.0.0.1:1/embed/abc"));

        let hops = resolution
            .attempt
            .candidates()
            .iter()
            .map(|candidate| candidate.hop)
            .collect::<Vec<_>>();
        assert_eq!(hops, vec![Hop::Page, Hop::Browser]);
        assert!(!matches!(resolution.attempt.candidates()[0].outcome, Outcome::Resolved(_)));

        let sniffer = resolver.into_sniffer().unwrap();
        assert_eq!(sniffer.opened, vec!["http://127.0.0.1:1/embed/abc".to_string()]);
    }

    #[tokio::test]
    async fn test_named_extractor() {
        let resolver = resolver(None);
        let links = resolver
            .extract_with("direct", "https://cdn.example/movie_480p.mp4", None)
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].quality, Quality::P480);
        assert!(links[0].headers.contains_key("User-Agent"));

        assert!(resolver
            .extract_with("direct", "https://www.googletagmanager.com/x/video.mp4", None)
            .await
            .is_err());
        assert!(resolver.extract_with("nope", "https://cdn.example/a.mp4", None).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_input_url() {
        let mut resolver = resolver(None);
        assert!(resolver.resolve("not a url", None).await.is_err());
        assert!(resolver.resolve("ftp://host/file.mp4", None).await.is_err());
    }

    #[test]
    fn test_browser_target() {
        let mut attempt = ResolutionAttempt::default();
        let page = attempt.push("https://site.example/filme/x", None, Hop::Page, 0);
        attempt.finish(page, Outcome::NotFound);
        let first = attempt.push("https://a.example/e/1", Some("https://site.example/filme/x"), Hop::Iframe, 1);
        attempt.finish(first, Outcome::NotFound);
        let second = attempt.push("https://b.example/e/2", Some("https://site.example/filme/x"), Hop::Iframe, 1);
        attempt.finish(second, Outcome::NotFound);
        let nested = attempt.push("https://c.example/e/3", Some("https://a.example/e/1"), Hop::NestedIframe, 2);
        attempt.finish(nested, Outcome::Failed("status"));

        assert_eq!(attempt.browser_target().map(|c| c.url.as_str()), Some("https://a.example/e/1"));

        let mut attempt = ResolutionAttempt::default();
        let page = attempt.push("https://site.example/filme/x", None, Hop::Page, 0);
        attempt.finish(page, Outcome::NotFound);
        assert_eq!(
            attempt.browser_target().map(|c| c.url.as_str()),
            Some("https://site.example/filme/x")
        );
    }
}
