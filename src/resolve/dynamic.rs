use std::collections::HashSet;
use std::time::Duration;

use crate::config::BrowserConfig;
use crate::error::ResolveError;
use crate::media::MediaLink;
use crate::resolve::static_resolver::StaticResolver;

/// A scriptable browser that records the urls of the requests a page makes.
pub trait MediaSniffer {
    /// Navigates to `url`. Request recording starts before any page script
    /// runs.
    async fn open(&mut self, url: &str, referer: Option<&str>) -> Result<(), ResolveError>;

    /// Urls requested since the last call.
    async fn drain_requests(&mut self) -> Result<Vec<String>, ResolveError>;

    /// Leaves the current page so that its player stops.
    async fn reset(&mut self) -> Result<(), ResolveError>;

    async fn user_agent(&mut self) -> Option<String>;
}

/// Loads a page in a browser and waits for the first media request.
pub struct DynamicResolver<S> {
    sniffer: S,
    timeout: Duration,
    poll_interval: Duration,
}

impl<S: MediaSniffer> DynamicResolver<S> {
    pub fn new(sniffer: S, config: &BrowserConfig) -> Self {
        Self {
            sniffer,
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn sniffer_mut(&mut self) -> &mut S {
        &mut self.sniffer
    }

    pub fn into_sniffer(self) -> S {
        self.sniffer
    }

    /// Returns the media requests of the first poll that saw any, with the
    /// page as referer. Fails with [ResolveError::Timeout] if none arrive
    /// within the timeout.
    pub async fn resolve(
        &mut self,
        url: &str,
        referer: Option<&str>,
        filter: &StaticResolver,
    ) -> Result<Vec<MediaLink>, ResolveError> {
        log::debug!("Loading {} in browser (timeout: {:?})", url, self.timeout);

        let result = match tokio::time::timeout(self.timeout, self.wait_for_media(url, referer, filter)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(self.timeout)),
        };

        if let Err(err) = self.sniffer.reset().await {
            log::trace!("Failed to reset browser page: {}", err);
        }

        let user_agent = self.sniffer.user_agent().await;

        result.map(|links| {
            links
                .into_iter()
                .map(|link| match &user_agent {
                    Some(user_agent) => link.header("User-Agent", user_agent.clone()),
                    None => link,
                })
                .collect()
        })
    }

    async fn wait_for_media(
        &mut self,
        url: &str,
        referer: Option<&str>,
        filter: &StaticResolver,
    ) -> Result<Vec<MediaLink>, ResolveError> {
        self.sniffer.open(url, referer).await?;

        let mut seen = HashSet::new();

        loop {
            let links = self
                .sniffer
                .drain_requests()
                .await?
                .into_iter()
                .filter(|request| filter.is_plausible(request))
                .filter(|request| seen.insert(request.clone()))
                .map(|request| MediaLink::new(request, Some(url.to_string())))
                .collect::<Vec<_>>();

            if !links.is_empty() {
                log::debug!("Browser captured {} media request(s)", links.len());
                return Ok(links);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
