#![cfg_attr(not(debug_assertions), allow(warnings, unused))]

use clap::Parser;
use cli::{Args, Command};
use serde::Serialize;
use vidhop::chrome::ChromeSniffer;
use vidhop::config::Config;
use vidhop::fetch::Fetcher;
use vidhop::media::MediaLink;
use vidhop::resolve::{LinkResolver, Resolution};
use vidhop::sites::{self, CatalogItem, DispatchSite, Site, TitleDetails};

pub(crate) mod cli;
pub(crate) mod logger;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse arguments
    let args = cli::Args::parse();

    // Set up logger
    if let Err(err) = logger::init(args.debug) {
        eprintln!("Failed to set up logger: {err}");
    }

    // Load config, flags take precedence
    let mut config = match Config::load(args.config.as_deref()).await {
        Ok(config) => config,
        Err(err) => {
            log::error!("{:#}", err);
            if let Some(path) = Config::config_path_hint() {
                log::info!("Default config location: {}", path.display());
            }
            std::process::exit(1);
        }
    };
    args.resolver.apply(&mut config);

    let fetcher = match Fetcher::new(&config.fetch) {
        Ok(fetcher) => fetcher,
        Err(err) => {
            log::error!("Failed to create HTTP client: {:#}", err);
            std::process::exit(1);
        }
    };

    // Chrome is only started once a page needs it
    let sniffer = config
        .resolver
        .browser
        .enabled
        .then(|| ChromeSniffer::new(config.resolver.browser.headless));
    let mut resolver = LinkResolver::new(fetcher, &config.resolver, sniffer);

    let result = run(&args, &config, &mut resolver).await;

    // Quit ChromeDriver
    if let Some(mut sniffer) = resolver.into_sniffer() {
        sniffer.shutdown().await;
    }

    if let Err(err) = result {
        log::error!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run(args: &Args, config: &Config, resolver: &mut LinkResolver<ChromeSniffer>) -> Result<(), anyhow::Error> {
    let fetcher = resolver.fetcher().clone();

    match &args.command {
        Command::Resolve {
            url,
            referer,
            extractor: Some(extractor),
            ..
        } => {
            let mut links = resolver.extract_with(extractor, url, referer.as_deref()).await?;
            links.retain(|link| args.resolver.keep_link(link));

            if args.json {
                print_json(&links)?;
            } else {
                print_links(&links);
            }
        }
        Command::Resolve {
            url,
            referer,
            trace,
            extractor: None,
        } => {
            let mut resolution = resolver.resolve(url, referer.as_deref()).await?;
            resolution.links.retain(|link| args.resolver.keep_link(link));

            if args.json {
                print_json(&resolution)?;
            } else {
                if *trace {
                    print_trace(&resolution);
                }
                print_links(&resolution.links);
            }
        }
        Command::Catalog { site, section, page } => {
            let site = named_site(fetcher, config, site)?;
            let sections = site.sections();
            let section = match section {
                Some(name) => sections
                    .iter()
                    .find(|section| section.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| {
                        let names = sections.iter().map(|section| section.name.as_str()).collect::<Vec<_>>();
                        anyhow::anyhow!("{} has no section {:?} (available: {})", site.name(), name, names.join(", "))
                    })?,
                None => sections
                    .first()
                    .ok_or_else(|| anyhow::anyhow!("{} has no sections", site.name()))?,
            };

            log::debug!("Listing {} page {} of {}", section.name, page, site.name());
            let items = site.catalog(section, *page).await?;
            print_items(args.json, &items)?;
        }
        Command::Search { site, query } => {
            let site = named_site(fetcher, config, site)?;
            let items = site.search(query).await?;
            print_items(args.json, &items)?;
        }
        Command::Details { url, site } => {
            let site = match site {
                Some(name) => named_site(fetcher, config, name)?,
                None => sites::find_site_for_url(fetcher, config, url)
                    .ok_or_else(|| anyhow::anyhow!("No site found for the url: {}", url))?,
            };

            let details = site.load(url).await?;
            if args.json {
                print_json(&details)?;
            } else {
                print_details(&details);
            }
        }
        Command::Links { data, site } => {
            let site = named_site(fetcher, config, site)?;
            let targets = site.link_targets(data).await?;
            let mut links: Vec<MediaLink> = Vec::new();

            for target in targets {
                log::debug!("Resolving player {}", target.url);
                let resolution = resolver.resolve(&target.url, target.referer.as_deref()).await?;

                for link in resolution.links {
                    if args.resolver.keep_link(&link) && !links.iter().any(|known| known.url == link.url) {
                        links.push(link);
                    }
                }
            }

            if args.json {
                print_json(&links)?;
            } else {
                print_links(&links);
            }
        }
    }

    Ok(())
}

fn named_site(fetcher: Fetcher, config: &Config, name: &str) -> Result<DispatchSite, anyhow::Error> {
    sites::site_with_name(fetcher, config, name).ok_or_else(|| anyhow::anyhow!("Failed to set up the site: {}", name))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), anyhow::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_links(links: &[MediaLink]) {
    if links.is_empty() {
        log::info!("No links found");
        return;
    }

    for link in links {
        println!("{link}");
    }
}

fn print_trace(resolution: &Resolution) {
    for candidate in resolution.attempt.candidates() {
        let indent = "  ".repeat(candidate.depth as usize);
        println!("{indent}{:?} {} -> {}", candidate.hop, candidate.url, candidate.outcome);
    }
}

fn print_items(json: bool, items: &[CatalogItem]) -> Result<(), anyhow::Error> {
    if json {
        return print_json(items);
    }

    if items.is_empty() {
        log::info!("Nothing found");
    }

    for item in items {
        let year = item.year.map(|year| format!(" ({year})")).unwrap_or_default();
        let quality = item
            .quality_label
            .as_ref()
            .map(|quality| format!(" [{quality}]"))
            .unwrap_or_default();

        println!("[{}] {}{}{} {}", item.kind, item.title, year, quality, item.url);
    }

    Ok(())
}

fn print_details(details: &TitleDetails) {
    match details.year {
        Some(year) => println!("{} ({year}) [{}]", details.title, details.kind),
        None => println!("{} [{}]", details.title, details.kind),
    }

    if let Some(plot) = &details.plot {
        println!("{plot}");
    }

    for (label, values) in [
        ("Genres", &details.tags),
        ("Cast", &details.actors),
        ("Directors", &details.directors),
    ] {
        if !values.is_empty() {
            println!("{label}: {}", values.join(", "));
        }
    }

    if let Some(poster) = &details.poster {
        println!("Poster: {poster}");
    }

    if let Some(embed) = &details.embed {
        println!("Player: {embed}");
    }

    for episode in &details.episodes {
        let title = episode
            .title
            .clone()
            .unwrap_or_else(|| format!("Episódio {}", episode.number));

        println!("S{:02}E{:02} {} {}", episode.season, episode.number, title, episode.target);
    }
}
