use std::collections::HashMap;

use scraper::{ElementRef, Html};
use url::Url;

use super::{jsonld, Episode};
use crate::dom;

/// Where a series page keeps its episode list.
#[derive(Debug, Clone, Copy)]
pub enum EpisodeSource {
    /// Buttons carrying `data-url` and optionally `data-season`,
    /// `data-episode`/`data-ep` and `data-title`.
    DataButtons { selector: &'static str },
    /// Season containers holding episode items.
    SeasonBlocks {
        season: &'static str,
        episode: &'static str,
        number: &'static str,
        title: &'static str,
        link: &'static str,
    },
    /// schema.org `TVSeries` with `containsSeason[].episode[]`.
    JsonLd,
}

/// An episode as found on the page, before numbering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeDraft {
    pub season: Option<u32>,
    /// 1-based index of the season container the episode was found in.
    pub container: Option<u32>,
    pub number: Option<u32>,
    pub title: Option<String>,
    pub target: Option<String>,
}

impl EpisodeSource {
    pub fn drafts(&self, document: &Html, base: &Url) -> Vec<EpisodeDraft> {
        let root = dom::root(document);

        match self {
            EpisodeSource::DataButtons { selector } => dom::select_all(root, selector)
                .into_iter()
                .map(|button| EpisodeDraft {
                    season: dom::own_attr(button, "data-season").and_then(|season| dom::parse_leading_int(&season)),
                    container: None,
                    number: ["data-episode", "data-ep"]
                        .iter()
                        .find_map(|attribute| dom::own_attr(button, attribute))
                        .and_then(|number| dom::parse_leading_int(&number)),
                    title: dom::own_attr(button, "data-title")
                        .or_else(|| Some(dom::element_text(button)).filter(|text| !text.is_empty())),
                    target: dom::own_attr(button, "data-url").and_then(|url| dom::absolute_url(base, &url)),
                })
                .collect(),
            EpisodeSource::SeasonBlocks {
                season,
                episode,
                number,
                title,
                link,
            } => dom::select_all(root, season)
                .into_iter()
                .enumerate()
                .flat_map(|(index, block)| {
                    let season = dom::own_attr(block, "data-season").and_then(|season| dom::parse_leading_int(&season));

                    dom::select_all(block, episode)
                        .into_iter()
                        .map(move |item| EpisodeDraft {
                            season,
                            container: Some(index as u32 + 1),
                            number: dom::int(item, number),
                            title: dom::text(item, title),
                            target: item_link(item, link, base),
                        })
                        .collect::<Vec<_>>()
                })
                .collect(),
            EpisodeSource::JsonLd => json_ld_drafts(document, base),
        }
    }

    pub fn extract(&self, document: &Html, base: &Url) -> Vec<Episode> {
        number_episodes(self.drafts(document, base), |_, _| None)
    }
}

fn item_link(item: ElementRef<'_>, link: &str, base: &Url) -> Option<String> {
    let own_href = if item.value().name() == "a" {
        dom::own_attr(item, "href")
    } else {
        None
    };

    own_href
        .or_else(|| dom::attr(item, link, "href"))
        .and_then(|href| dom::absolute_url(base, &href))
}

fn json_ld_drafts(document: &Html, base: &Url) -> Vec<EpisodeDraft> {
    let Some(series) = jsonld::find_typed(document, &["TVSeries"]) else {
        return Vec::new();
    };

    let seasons = match series.get("containsSeason") {
        Some(serde_json::Value::Array(seasons)) => seasons.clone(),
        Some(season) => vec![season.clone()],
        None => Vec::new(),
    };

    seasons
        .iter()
        .enumerate()
        .flat_map(|(index, season)| {
            let season_number = jsonld::number(season, "seasonNumber");
            let episodes = match season.get("episode") {
                Some(serde_json::Value::Array(episodes)) => episodes.clone(),
                Some(episode) => vec![episode.clone()],
                None => Vec::new(),
            };

            episodes
                .into_iter()
                .map(|episode| EpisodeDraft {
                    season: season_number,
                    container: Some(index as u32 + 1),
                    number: jsonld::number(&episode, "episodeNumber"),
                    title: jsonld::string(&episode, "name"),
                    target: jsonld::string(&episode, "url").and_then(|url| dom::absolute_url(base, &url)),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Assigns season and episode numbers. A missing season falls back to the
/// container index, then to 1. A missing episode number is the 1-based
/// position among the episodes of the same season, in document order.
/// Drafts without a target get one from `fallback_target(season, number)`,
/// or are dropped.
pub fn number_episodes(
    drafts: Vec<EpisodeDraft>,
    fallback_target: impl Fn(u32, u32) -> Option<String>,
) -> Vec<Episode> {
    let mut positions = HashMap::<u32, u32>::new();

    drafts
        .into_iter()
        .filter_map(|draft| {
            let season = draft.season.or(draft.container).unwrap_or(1);
            let position = positions.entry(season).or_insert(0);
            *position += 1;

            let number = draft.number.unwrap_or(*position);
            let target = draft.target.or_else(|| fallback_target(season, number))?;

            Some(Episode {
                season,
                number,
                title: draft.title,
                target,
            })
        })
        .collect()
}
