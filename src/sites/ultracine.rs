use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde_json::Value;
use url::Url;

use super::episodes::{number_episodes, EpisodeSource};
use super::{
    jsonld, page_number, split_title_year, CatalogItem, CatalogSection, EmbedTarget, Episode, Site, SiteAdapter,
    TitleDetails, TitleKind,
};
use crate::dom;
use crate::extractors;
use crate::fetch::Fetcher;

const CATALOG_CARDS: &str = "div.movie-card, article.movie, .item";
const SEARCH_CARDS: &str = "div.movie-card, article, .item";
const FEMBED_BASE_URL: &str = "https://fembed.sx/e/";
const SEASON_BLOCKS: EpisodeSource = EpisodeSource::SeasonBlocks {
    season: ".season, .temporada",
    episode: ".episode, .episodio",
    number: ".number, .ep",
    title: ".title, .name",
    link: "a",
};

/// Layout of the same upstream that publishes schema.org metadata and
/// plays everything through Fembed, keyed by TMDB id.
pub struct UltraCine {
    fetcher: Fetcher,
    base_url: Url,
}

impl SiteAdapter for UltraCine {
    const NAME: &'static str = "UltraCine";
    const DEFAULT_BASE_URL: &'static str = "https://superflix21.lol";

    fn new(fetcher: Fetcher, base_url: Url) -> Self {
        Self { fetcher, base_url }
    }
}

impl Site for UltraCine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn sections(&self) -> Vec<CatalogSection> {
        [
            ("Filmes", "/filmes"),
            ("Séries", "/series"),
            ("Lançamentos", "/lancamentos"),
            ("Ação", "/acao"),
            ("Animação", "/animacao"),
            ("Aventura", "/aventura"),
            ("Comédia", "/comedia"),
            ("Documentário", "/documentario"),
            ("Drama", "/drama"),
            ("Terror", "/terror"),
            ("Suspense", "/suspense"),
        ]
        .into_iter()
        .map(|(name, path)| CatalogSection::new(name, path))
        .collect()
    }

    async fn catalog(&self, section: &CatalogSection, page: u32) -> Result<Vec<CatalogItem>, anyhow::Error> {
        let mut url = self.base_url.join(&section.path).context("invalid catalog path")?;
        if page_number(page) > 1 {
            url.query_pairs_mut().append_pair("page", &page.to_string());
        }

        let html = self.get(url.as_str()).await?;
        Ok(parse_cards(&html, &url, CATALOG_CARDS))
    }

    async fn search(&self, query: &str) -> Result<Vec<CatalogItem>, anyhow::Error> {
        let mut url = self.base_url.join("/").context("invalid base url")?;
        url.query_pairs_mut().append_pair("s", query);

        let html = self.get(url.as_str()).await?;
        Ok(parse_cards(&html, &url, SEARCH_CARDS))
    }

    async fn load(&self, url: &str) -> Result<TitleDetails, anyhow::Error> {
        let page_url = Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
        let html = self.get(url).await?;

        parse_details(&html, &page_url)
    }

    async fn link_targets(&self, data: &str) -> Result<Vec<EmbedTarget>, anyhow::Error> {
        let data = data.trim();
        if data.is_empty() {
            anyhow::bail!("nothing to play");
        }

        if data.contains("fembed.sx") || extractors::find_extractor_for_url(data).is_some() {
            let url = if data.starts_with("http") {
                data.to_string()
            } else {
                format!("https://{}", data.trim_start_matches('/'))
            };

            return Ok(vec![EmbedTarget {
                url,
                referer: Some(self.base_url.to_string()),
            }]);
        }

        let page_url = self.base_url.join(data).with_context(|| format!("invalid url: {data}"))?;
        let html = self.get(page_url.as_str()).await?;

        match find_fembed(&html, &page_url) {
            Some(url) => Ok(vec![EmbedTarget {
                url,
                referer: Some(page_url.to_string()),
            }]),
            None => anyhow::bail!("no Fembed player found on {}", page_url),
        }
    }
}

impl UltraCine {
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
    let raw_title = dom::text(card, "div.movie-title, h2, h3, .title")?;
    let href = dom::attr(card, "a", "href").or_else(|| dom::own_attr(card, "href"))?;
    let url = dom::absolute_url(base, &href)?;
    let (title, year) = split_title_year(&raw_title);
    let year = year.or_else(|| dom::text(card, ".movie-year, .year").and_then(|year| year.parse().ok()));

    let kind = if url.contains("/serie/") {
        TitleKind::Series
    } else {
        TitleKind::Movie
    };

    Some(CatalogItem {
        title,
        poster: dom::url_attr(card, "img", &["src"], base),
        year,
        kind,
        quality_label: dom::text(card, "div.quality-tag, .quality"),
        url,
    })
}

fn parse_details(html: &str, page_url: &Url) -> Result<TitleDetails, anyhow::Error> {
    let document = Html::parse_document(html);
    let root = dom::root(&document);
    let metadata = jsonld::find_typed(&document, &["Movie", "TVSeries"]).unwrap_or(Value::Null);

    let Some(raw_title) = jsonld::string(&metadata, "name").or_else(|| dom::text(root, "h1")) else {
        anyhow::bail!("could not find a title on {}", page_url);
    };
    let (title, title_year) = split_title_year(&raw_title);
    let year = jsonld::string(&metadata, "datePublished")
        .and_then(|date| date.get(..4).and_then(|year| year.parse().ok()))
        .or(title_year);

    let poster = jsonld::string(&metadata, "image")
        .map(|image| image.replace("/w500/", "/original/"))
        .or_else(|| dom::url_attr(root, "meta[property='og:image']", &["content"], page_url));
    let plot = jsonld::string(&metadata, "description").or_else(|| dom::text(root, ".description, .sinopse, p"));

    let tags = Some(jsonld::names(&metadata, "genre"))
        .filter(|genres| !genres.is_empty())
        .unwrap_or_else(|| dom::texts(root, "a[href*='/genero/']"));
    let actors = Some(jsonld::names(&metadata, "actor"))
        .filter(|actors| !actors.is_empty())
        .unwrap_or_else(|| dom::texts(root, ".cast a, .actors a"));
    let directors = jsonld::names(&metadata, "director");

    let tmdb_id = tmdb_id_from_metadata(&metadata)
        .or_else(|| tmdb_id_from_url(page_url))
        .or_else(|| tmdb_id_from_html(html));

    let is_series = page_url.path().contains("/serie/") || jsonld::has_type(&metadata, &["TVSeries"]);

    let (kind, embed, episodes) = if is_series {
        (TitleKind::Series, None, series_episodes(&document, page_url, tmdb_id))
    } else {
        let embed = tmdb_id
            .map(|id| format!("{FEMBED_BASE_URL}{id}"))
            .or_else(|| dom::url_attr(root, "iframe[src*='fembed']", &["src"], page_url));
        (TitleKind::Movie, embed, Vec::new())
    };

    Ok(TitleDetails {
        title,
        url: page_url.to_string(),
        poster,
        plot,
        year,
        tags,
        actors,
        directors,
        kind,
        embed,
        episodes,
    })
}

/// Season blocks, with `?ep=N` Fembed urls for episodes without a link,
/// falling back to the JSON-LD season list.
fn series_episodes(document: &Html, page_url: &Url, tmdb_id: Option<u32>) -> Vec<Episode> {
    let episodes = number_episodes(SEASON_BLOCKS.drafts(document, page_url), |_, number| {
        tmdb_id.map(|id| format!("{FEMBED_BASE_URL}{id}?ep={number}"))
    });

    if !episodes.is_empty() {
        return episodes;
    }

    EpisodeSource::JsonLd.extract(document, page_url)
}

fn tmdb_id_from_metadata(metadata: &Value) -> Option<u32> {
    jsonld::strings(metadata, "sameAs")
        .iter()
        .filter(|url| url.contains("themoviedb.org"))
        .find_map(|url| url.trim_end_matches('/').rsplit('/').next().and_then(dom::parse_leading_int))
}

/// Slugs like `/filme/duna-parte-dois-693134`.
fn tmdb_id_from_url(page_url: &Url) -> Option<u32> {
    let slug = page_url.path().trim_end_matches('/').rsplit('/').next()?;
    let (_, suffix) = slug.rsplit_once('-')?;

    suffix.parse().ok()
}

fn tmdb_id_from_html(html: &str) -> Option<u32> {
    static TMDB_ID_REGEXES: Lazy<[Regex; 4]> = Lazy::new(|| {
        [
            Regex::new(r"https://www\.themoviedb\.org/movie/(\d+)").unwrap(),
            Regex::new(r"tmdb\.org/movie/(\d+)").unwrap(),
            Regex::new(r#"data-id=["'](\d+)["']"#).unwrap(),
            Regex::new(r#"id=["']movie_(\d+)["']"#).unwrap(),
        ]
    });

    TMDB_ID_REGEXES
        .iter()
        .filter_map(|regex| regex.captures(html).and_then(|captures| captures.get(1)))
        .map(|id| id.as_str())
        .find(|id| (4..=10).contains(&id.len()))
        .and_then(|id| id.parse().ok())
}

/// A Fembed player mentioned anywhere on the page, else a Fembed iframe.
fn find_fembed(html: &str, page_url: &Url) -> Option<String> {
    static FEMBED_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://fembed\.sx/e/\d+").unwrap());

    if let Some(found) = FEMBED_REGEX.find(html) {
        return Some(found.as_str().to_string());
    }

    let document = Html::parse_document(html);
    dom::url_attr(dom::root(&document), "iframe[src*='fembed']", &["src"], page_url)
}
