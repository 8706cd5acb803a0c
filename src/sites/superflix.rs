use std::collections::HashSet;

use anyhow::Context;
use scraper::{ElementRef, Html};
use url::Url;

use super::episodes::EpisodeSource;
use super::{
    page_number, split_title_year, CatalogItem, CatalogSection, EmbedTarget, Episode, Site, SiteAdapter, TitleDetails,
    TitleKind,
};
use crate::dom;
use crate::extractors;
use crate::fetch::Fetcher;

const CATALOG_CARDS: &str = "a.card";
const SEARCH_CARDS: &str = "a.card, div.card";
const EPISODE_BUTTONS: EpisodeSource = EpisodeSource::DataButtons {
    selector: r#"button[data-url*="fembed"]"#,
};
const MAX_ACTORS: usize = 15;

pub struct SuperFlix {
    fetcher: Fetcher,
    base_url: Url,
}

impl SiteAdapter for SuperFlix {
    const NAME: &'static str = "SuperFlix";
    const DEFAULT_BASE_URL: &'static str = "https://superflix21.lol";

    fn new(fetcher: Fetcher, base_url: Url) -> Self {
        Self { fetcher, base_url }
    }
}

impl Site for SuperFlix {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn sections(&self) -> Vec<CatalogSection> {
        vec![
            CatalogSection::new("Lançamentos", "/lancamentos"),
            CatalogSection::new("Últimos Filmes", "/filmes"),
            CatalogSection::new("Últimas Séries", "/series"),
            CatalogSection::new("Últimos Animes", "/animes"),
        ]
    }

    async fn catalog(&self, section: &CatalogSection, page: u32) -> Result<Vec<CatalogItem>, anyhow::Error> {
        let path = section.path.trim_end_matches('/');
        let path = match page_number(page) {
            1 => path.to_string(),
            page => format!("{path}/page/{page}"),
        };
        let url = self.base_url.join(&path).context("invalid catalog path")?;

        let html = self.get(url.as_str()).await?;
        Ok(parse_cards(&html, &url, CATALOG_CARDS))
    }

    async fn search(&self, query: &str) -> Result<Vec<CatalogItem>, anyhow::Error> {
        let mut url = self.base_url.join("/").context("invalid base url")?;
        url.query_pairs_mut().append_pair("s", query);

        let html = self.get(url.as_str()).await?;
        let results = parse_cards(&html, &url, SEARCH_CARDS);

        if results.is_empty() {
            let preview = html.chars().take(150).collect::<String>();
            anyhow::bail!("no search results for {:?} (received: {})", query, preview.trim());
        }

        Ok(results)
    }

    async fn load(&self, url: &str) -> Result<TitleDetails, anyhow::Error> {
        let page_url = Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
        let html = self.get(url).await?;

        parse_details(&html, &page_url)
    }

    async fn link_targets(&self, data: &str) -> Result<Vec<EmbedTarget>, anyhow::Error> {
        if extractors::find_extractor_for_url(data).is_some() {
            return Ok(vec![EmbedTarget {
                url: data.to_string(),
                referer: Some(self.base_url.to_string()),
            }]);
        }

        let page_url = self.base_url.join(data).with_context(|| format!("invalid url: {data}"))?;
        let html = self.get(page_url.as_str()).await?;
        let targets = player_targets(&html, &page_url);

        if targets.is_empty() {
            anyhow::bail!("no player found on {}", page_url);
        }

        Ok(targets)
    }
}

impl SuperFlix {
    async fn get(&self, url: &str) -> Result<String, anyhow::Error> {
        let page = self
            .fetcher
            .get_page(url, Some(self.base_url.as_str()))
            .await
            .with_context(|| format!("failed to load {url}"))?;

        Ok(page.text)
    }
}

fn parse_cards(html: &str, base: &Url, selector: &str) -> Vec<CatalogItem> {
    let document = Html::parse_document(html);

    dom::select_all(dom::root(&document), selector)
        .into_iter()
        .filter_map(|card| parse_card(card, base))
        .collect()
}

fn parse_card(card: ElementRef<'_>, base: &Url) -> Option<CatalogItem> {
    let href = dom::own_attr(card, "href").or_else(|| dom::attr(card, "a[href]", "href"))?;
    let url = dom::absolute_url(base, &href)?;
    let raw_title = dom::own_attr(card, "title")
        .or_else(|| dom::text(card, ".title, h2, h3"))
        .or_else(|| dom::attr(card, "img", "alt"))?;
    let (title, year) = split_title_year(&raw_title);

    if title.is_empty() {
        return None;
    }

    let kind = if url.contains("/filme/") {
        TitleKind::Movie
    } else {
        TitleKind::Series
    };

    Some(CatalogItem {
        title,
        poster: dom::url_attr(card, "img", &["data-src", "src"], base),
        year,
        kind,
        quality_label: dom::text(card, ".quality, .badge"),
        url,
    })
}

/// Title from the page `<title>`, e.g. `Assistir Duna (2021) Online Grátis`.
fn title_from_head(full_title: &str) -> String {
    let before_free = full_title.split("Grátis").next().unwrap_or(full_title);

    match before_free.split_once("Assistir") {
        Some((_, title)) if !title.trim().is_empty() => title.trim().to_string(),
        _ => before_free.trim().to_string(),
    }
}

fn parse_details(html: &str, page_url: &Url) -> Result<TitleDetails, anyhow::Error> {
    let document = Html::parse_document(html);
    let root = dom::root(&document);

    let raw_title = match dom::text(root, ".title") {
        Some(title) => title,
        None => {
            let Some(full_title) = dom::text(root, "title") else {
                anyhow::bail!("could not find a title on {}", page_url);
            };
            title_from_head(&full_title)
        }
    };
    let (title, year) = split_title_year(&raw_title);

    let poster = dom::url_attr(root, ".poster img", &["src", "data-src"], page_url)
        .or_else(|| dom::url_attr(root, ".poster", &["src"], page_url));
    let plot = dom::text(root, ".syn");
    let tags = dom::texts(root, "a.chip");

    let mut seen = tags.iter().cloned().collect::<HashSet<_>>();
    let actors = dom::texts(root, "div a")
        .into_iter()
        .filter(|name| name.chars().count() > 2 && !name.contains("Assista sem anúncios"))
        .filter(|name| seen.insert(name.clone()))
        .take(MAX_ACTORS)
        .collect();

    let kind = if page_url.path().contains("/filme/") {
        TitleKind::Movie
    } else {
        TitleKind::Series
    };

    let (embed, episodes) = match kind {
        TitleKind::Movie => (fembed_url(root, page_url), Vec::new()),
        TitleKind::Series => (None, series_episodes(&document, page_url)),
    };

    Ok(TitleDetails {
        title,
        url: page_url.to_string(),
        poster,
        plot,
        year,
        tags,
        actors,
        directors: Vec::new(),
        kind,
        embed,
        episodes,
    })
}

/// Episode buttons if the page has them, otherwise one entry per season tab
/// pointing back at the series page.
fn series_episodes(document: &Html, page_url: &Url) -> Vec<Episode> {
    let episodes = EPISODE_BUTTONS.extract(document, page_url);
    if !episodes.is_empty() {
        return episodes;
    }

    dom::select_all(dom::root(document), "div#season-tabs button")
        .into_iter()
        .enumerate()
        .map(|(index, tab)| Episode {
            season: index as u32 + 1,
            number: 1,
            title: Some(dom::element_text(tab)).filter(|text| !text.is_empty()),
            target: page_url.to_string(),
        })
        .collect()
}

fn fembed_url(root: ElementRef<'_>, page_url: &Url) -> Option<String> {
    dom::url_attr(root, "iframe#player", &["src", "data-src"], page_url)
        .filter(|url| url.contains("fembed"))
        .or_else(|| dom::url_attr(root, "button[data-url]", &["data-url"], page_url).filter(|url| url.contains("fembed")))
}

fn player_targets(html: &str, page_url: &Url) -> Vec<EmbedTarget> {
    let document = Html::parse_document(html);
    let root = dom::root(&document);
    let mut seen = HashSet::new();

    fembed_url(root, page_url)
        .into_iter()
        .chain(
            dom::select_all(root, r#"button[data-url*="fembed"]"#)
                .into_iter()
                .filter_map(|button| dom::own_attr(button, "data-url"))
                .filter_map(|url| dom::absolute_url(page_url, &url)),
        )
        .filter(|url| seen.insert(url.clone()))
        .map(|url| EmbedTarget {
            url,
            referer: Some(page_url.to_string()),
        })
        .collect()
}
