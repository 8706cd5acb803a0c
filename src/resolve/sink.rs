use std::collections::HashSet;

use crate::fetch::origin_of;
use crate::media::MediaLink;

/// Collects the links of one resolution call. Links are deduplicated by url
/// and completed with the request headers the host needs.
#[derive(Debug, Default)]
pub struct ResultSink {
    user_agent: Option<String>,
    seen: HashSet<String>,
    links: Vec<MediaLink>,
}

impl ResultSink {
    pub fn new(user_agent: Option<String>) -> Self {
        Self {
            user_agent,
            ..Default::default()
        }
    }

    /// Returns false if the url was already emitted.
    pub fn push(&mut self, link: MediaLink) -> bool {
        if !self.seen.insert(link.url.clone()) {
            return false;
        }

        let mut link = link;

        if let Some(user_agent) = &self.user_agent {
            link.headers
                .entry("User-Agent".to_string())
                .or_insert_with(|| user_agent.clone());
        }

        if let Some(referer) = link.referer.clone() {
            if let Some(origin) = origin_of(&referer) {
                link.headers.entry("Origin".to_string()).or_insert(origin);
            }

            link.headers.entry("Referer".to_string()).or_insert(referer);
        }

        log::debug!("Found {}", link);
        self.links.push(link);
        true
    }

    /// Number of links that were new.
    pub fn extend(&mut self, links: impl IntoIterator<Item = MediaLink>) -> usize {
        links.into_iter().map(|link| self.push(link)).filter(|added| *added).count()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn into_links(self) -> Vec<MediaLink> {
        self.links
    }
}
