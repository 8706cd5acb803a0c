use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use vidhop::config::Config;
use vidhop::extractors::{exists_extractor_with_name, EXTRACTOR_NAMES};
use vidhop::media::{MediaLink, Quality};
use vidhop::sites::SITE_NAMES;

#[derive(Parser, Debug)]
#[command(version)]
/// Find playable video streams behind streaming sites and their players
pub(crate) struct Args {
    #[command(subcommand)]
    pub(crate) command: Command,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub(crate) debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub(crate) json: bool,

    /// Config file to use instead of the default one
    #[arg(short, long, global = true, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,

    #[command(flatten)]
    pub(crate) resolver: ResolverArgs,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Resolve a content or player page to stream links
    Resolve {
        /// Page URL
        url: String,

        /// Referer to send with the first request
        #[arg(long, value_name = "URL")]
        referer: Option<String>,

        /// Show every visited page and its outcome
        #[arg(long, conflicts_with = "extractor")]
        trace: bool,

        /// Use this host extractor directly instead of walking the page
        #[arg(short = 'u', long, value_parser = parse_extractor_name, value_name = "NAME")]
        extractor: Option<String>,
    },

    /// List a catalog section of a site
    Catalog {
        #[arg(short, long, value_parser = parse_site_name)]
        site: String,

        /// Section name, the first section if omitted
        #[arg(long)]
        section: Option<String>,

        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },

    /// Search a site
    Search {
        #[arg(short, long, value_parser = parse_site_name)]
        site: String,

        query: String,
    },

    /// Show the details of a movie or series page
    Details {
        /// Title page URL
        url: String,

        /// Site to use instead of the one matching the url
        #[arg(short, long, value_parser = parse_site_name)]
        site: Option<String>,
    },

    /// Resolve a movie embed, an episode target or a title page to stream links
    Links {
        /// Embed URL, episode target or title page
        data: String,

        #[arg(short, long, value_parser = parse_site_name)]
        site: String,
    },
}

/// Overrides for the `[resolver]` and `[fetch]` config sections.
#[derive(ClapArgs, Debug)]
pub(crate) struct ResolverArgs {
    /// Never start Chrome
    #[arg(long, global = true)]
    pub(crate) no_browser: bool,

    /// Show the Chrome window
    #[arg(long, global = true, conflicts_with = "no_browser")]
    pub(crate) headed: bool,

    /// How long Chrome may wait for a stream request
    #[arg(long, global = true, value_name = "MILLISECONDS")]
    pub(crate) browser_timeout: Option<u64>,

    /// How many embed pages to follow below the first page
    #[arg(long, global = true, value_name = "NUMBER")]
    pub(crate) max_hops: Option<u32>,

    /// Number of retries for failed page requests
    #[arg(short = 'R', long, global = true, value_name = "NUMBER")]
    pub(crate) retries: Option<u32>,

    /// Run every link pattern instead of stopping at the first match
    #[arg(long, global = true)]
    pub(crate) exhaustive: bool,

    /// Replace master playlists by their variants
    #[arg(long, global = true)]
    pub(crate) expand_playlists: bool,

    /// Drop links below this quality, e.g. 720 or 1080p. Links of unknown
    /// quality are kept
    #[arg(short = 'q', long, global = true, value_parser = parse_quality, value_name = "QUALITY")]
    pub(crate) min_quality: Option<Quality>,
}

impl ResolverArgs {
    pub(crate) fn apply(&self, config: &mut Config) {
        let resolver = &mut config.resolver;

        if self.no_browser {
            resolver.browser.enabled = false;
        }

        if self.headed {
            resolver.browser.headless = false;
        }

        if let Some(timeout) = self.browser_timeout {
            resolver.browser.timeout_ms = timeout;
        }

        if let Some(max_hops) = self.max_hops {
            resolver.max_hops = max_hops;
        }

        if let Some(retries) = self.retries {
            config.fetch.retries = retries;
        }

        resolver.exhaustive |= self.exhaustive;
        resolver.expand_playlists |= self.expand_playlists;
    }

    pub(crate) fn keep_link(&self, link: &MediaLink) -> bool {
        match self.min_quality {
            Some(min_quality) => link.quality == Quality::Unknown || link.quality >= min_quality,
            None => true,
        }
    }
}

fn parse_site_name(input: &str) -> Result<String, String> {
    SITE_NAMES
        .iter()
        .find(|name| name.eq_ignore_ascii_case(input))
        .map(|name| name.to_string())
        .ok_or_else(|| format!("no site with name: {input} (available: {})", SITE_NAMES.join(", ")))
}

fn parse_extractor_name(input: &str) -> Result<String, String> {
    if exists_extractor_with_name(input) {
        Ok(input.to_string())
    } else {
        let names = EXTRACTOR_NAMES.iter().flat_map(|names| names.iter().copied()).collect::<Vec<_>>();
        Err(format!("no extractor with name: {input} (available: {})", names.join(", ")))
    }
}

fn parse_quality(input: &str) -> Result<Quality, String> {
    let input_lower = input.to_ascii_lowercase();
    let height = input_lower.strip_suffix('p').unwrap_or(&input_lower);

    if height == "4k" {
        return Ok(Quality::P2160);
    }

    for quality in enum_iterator::all::<Quality>() {
        if quality.height().is_some_and(|h| h.to_string() == height) {
            return Ok(quality);
        }
    }

    Err(format!("failed to parse \"{input}\" as quality"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use vidhop::config::Config;
    use vidhop::media::{MediaLink, Quality};

    use super::{parse_extractor_name, parse_quality, parse_site_name, Args, Command};

    #[test]
    fn test_parse_quality() {
        assert_eq!(parse_quality("720"), Ok(Quality::P720));
        assert_eq!(parse_quality("1080p"), Ok(Quality::P1080));
        assert_eq!(parse_quality("4K"), Ok(Quality::P2160));
        assert!(parse_quality("unknown").is_err());
        assert!(parse_quality("999").is_err());
    }

    #[test]
    fn test_parse_site_name() {
        assert_eq!(parse_site_name("superflix"), Ok("SuperFlix".to_string()));
        assert!(parse_site_name("aniwave").is_err());

        assert_eq!(parse_extractor_name("fembed"), Ok("fembed".to_string()));
        assert!(parse_extractor_name("voe").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "vidhop",
            "resolve",
            "https://superflix21.lol/filme/duna",
            "--no-browser",
            "--max-hops",
            "1",
            "-R",
            "0",
            "--expand-playlists",
            "-q",
            "720",
        ])
        .unwrap();

        let Command::Resolve {
            url,
            referer,
            trace,
            extractor,
        } = &args.command
        else {
            panic!("expected resolve");
        };
        assert_eq!(url, "https://superflix21.lol/filme/duna");
        assert_eq!(referer, &None);
        assert!(!trace);
        assert_eq!(extractor, &None);

        let mut config = Config::default();
        args.resolver.apply(&mut config);
        assert!(!config.resolver.browser.enabled);
        assert!(config.resolver.browser.headless);
        assert_eq!(config.resolver.max_hops, 1);
        assert_eq!(config.fetch.retries, 0);
        assert!(config.resolver.expand_playlists);
        assert!(!config.resolver.exhaustive);

        assert!(args.resolver.keep_link(&MediaLink::new("https://cdn.example/1080/master.m3u8", None)));
        assert!(args.resolver.keep_link(&MediaLink::new("https://cdn.example/hls/master.m3u8", None)));
        assert!(!args.resolver.keep_link(&MediaLink::new("https://cdn.example/480/master.m3u8", None)));
    }

    #[test]
    fn test_headed_conflicts_with_no_browser() {
        assert!(Args::try_parse_from(["vidhop", "resolve", "https://a.example/", "--headed", "--no-browser"]).is_err());
        assert!(Args::try_parse_from(["vidhop", "catalog", "--site", "nope"]).is_err());
    }
}
