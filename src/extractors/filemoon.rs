use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderName, ORIGIN};
use scraper::Html;
use url::Url;

use super::utils::is_url_host_family_and_has_path;
use super::{ExtractContext, ExtractFrom, Extractor, SupportedFrom};
use crate::dom;
use crate::error::ResolveError;
use crate::media::MediaLink;

const MAIN_URL: &str = "https://filemoon.in";
const DEFAULT_REFERER: &str = "https://fembed.sx/";
const FEMBED_ORIGIN: &str = "https://fembed.sx";

/// Filemoon and its mirrors. Fembed embeds are served by Filemoon under the
/// same video id.
pub struct Filemoon;

impl Extractor for Filemoon {
    const DISPLAY_NAME: &'static str = "Filemoon";
    const NAMES: &'static [&'static str] = &["Filemoon", "Fembed"];

    fn supported_from() -> SupportedFrom {
        SupportedFrom::all_bits()
    }

    fn supports_url(url: &str) -> Option<bool> {
        Some(is_url_host_family_and_has_path(url, &["filemoon", "fembed", "ico3c"]))
    }

    async fn extract(from: ExtractFrom, ctx: &ExtractContext<'_>) -> Result<Vec<MediaLink>, ResolveError> {
        match from {
            ExtractFrom::Source { source, url } => {
                let base = url
                    .as_deref()
                    .and_then(|url| Url::parse(url).ok())
                    .or_else(|| Url::parse(MAIN_URL).ok())
                    .ok_or_else(|| ResolveError::NotFound("Filemoon: invalid base url".into()))?;

                let links = ctx.static_resolver.resolve(&source, &base);
                if links.is_empty() {
                    return Err(ResolveError::NotFound("Filemoon: failed to retrieve sources".into()));
                }

                Ok(links)
            }
            ExtractFrom::Url { url, referer } => {
                let player_url = player_url(&url)
                    .ok_or_else(|| ResolveError::NotFound(format!("Filemoon: no video id in {url}")))?;
                let referer = referer.unwrap_or_else(|| DEFAULT_REFERER.to_string());
                log::debug!("Filemoon: loading {} (referer: {})", player_url, referer);

                let headers = filemoon_headers();
                let page = ctx
                    .fetcher
                    .get_page_with_headers(&player_url, Some(&referer), &headers)
                    .await?;

                if let Some(iframe_url) = first_iframe(&page.text, &page.url) {
                    log::debug!("Filemoon: following iframe {}", iframe_url);

                    match ctx
                        .fetcher
                        .get_page_with_headers(&iframe_url, Some(page.url.as_str()), &headers)
                        .await
                    {
                        Ok(frame) => {
                            let links = ctx.static_resolver.resolve(&frame.text, &frame.url);
                            if !links.is_empty() {
                                return Ok(links);
                            }
                        }
                        Err(err) => log::debug!("Filemoon: iframe {} failed: {}", iframe_url, err),
                    }
                }

                let links = ctx.static_resolver.resolve(&page.text, &page.url);
                if links.is_empty() {
                    return Err(ResolveError::NotFound("Filemoon: failed to retrieve sources".into()));
                }

                Ok(links)
            }
        }
    }
}

/// The player only answers requests that look like they come from a Fembed
/// embed, including the nested iframe request.
fn filemoon_headers() -> [(HeaderName, &'static str); 1] {
    [(ORIGIN, FEMBED_ORIGIN)]
}

/// Video id of an embed url: `/e/1421`, `/v/abc123`, `embed/abc123` or,
/// failing those, the last path segment up to the first `-`.
fn video_id(url: &str) -> Option<String> {
    static ID_REGEXES: Lazy<[Regex; 3]> = Lazy::new(|| {
        [
            Regex::new(r"/e/(\d+)").unwrap(),
            Regex::new(r"/v/([a-zA-Z0-9]+)").unwrap(),
            Regex::new(r"embed/([a-zA-Z0-9]+)").unwrap(),
        ]
    });

    let path = url.split(['?', '#']).next().unwrap_or(url);

    ID_REGEXES
        .iter()
        .find_map(|regex| regex.captures(path).and_then(|captures| captures.get(1)))
        .map(|id| id.as_str().to_string())
        .or_else(|| {
            path.trim_end_matches('/')
                .rsplit('/')
                .next()
                .and_then(|last| last.split('-').next())
                .filter(|id| !id.is_empty() && !id.contains('.'))
                .map(str::to_string)
        })
}

/// Fembed urls are rewritten to the Filemoon player, keeping the query
/// (`?ep=2` selects the episode).
fn player_url(url: &str) -> Option<String> {
    let id = video_id(url)?;

    if !is_url_host_family_and_has_path(url, &["fembed"]) {
        return Some(url.to_string());
    }

    let query = Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.query().map(|query| format!("?{query}")))
        .unwrap_or_default();

    Some(format!("{MAIN_URL}/e/{id}{query}"))
}

fn first_iframe(html: &str, base: &Url) -> Option<String> {
    let document = Html::parse_document(html);

    dom::url_attr(dom::root(&document), "iframe[src], iframe[data-src]", &["src", "data-src"], base)
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
}

#[cfg(test)]
mod tests {
    use reqwest::header::{ORIGIN, REFERER};
    use url::Url;

    use super::{filemoon_headers, first_iframe, player_url, video_id, Filemoon, DEFAULT_REFERER};
    use crate::config::FetchConfig;
    use crate::extractors::{ExtractContext, ExtractFrom, Extractor, SupportedFrom};
    use crate::fetch::{request_headers, Fetcher};
    use crate::media::Quality;
    use crate::resolve::static_resolver::StaticResolver;

    #[test]
    fn test_supports_url() {
        assert_eq!(Filemoon::supports_url("https://filemoon.sx/e/ed0p89ndlpl6?autostart=true"), Some(true));
        assert_eq!(Filemoon::supports_url("https://fembed.sx/e/1421"), Some(true));
        assert_eq!(Filemoon::supports_url("https://ico3c.com/v/abc123"), Some(true));
        assert_eq!(Filemoon::supports_url("https://fembed.sx/"), Some(false));
        assert_eq!(Filemoon::supports_url("https://superflix21.lol/filme/duna"), Some(false));
    }

    #[test]
    fn test_video_id_and_player_url() {
        assert_eq!(video_id("https://fembed.sx/e/1421"), Some("1421".to_string()));
        assert_eq!(video_id("https://fembed.sx/v/abc123"), Some("abc123".to_string()));
        assert_eq!(video_id("https://filemoon.in/embed/Zx9k"), Some("Zx9k".to_string()));
        assert_eq!(video_id("https://filemoon.sx/d/ed0p89ndlpl6-trailer?t=1"), Some("ed0p89ndlpl6".to_string()));

        assert_eq!(player_url("https://fembed.sx/e/1421"), Some("https://filemoon.in/e/1421".to_string()));
        assert_eq!(
            player_url("https://fembed.sx/e/1421?ep=3"),
            Some("https://filemoon.in/e/1421?ep=3".to_string())
        );
        assert_eq!(
            player_url("https://filemoon.sx/e/ed0p89ndlpl6"),
            Some("https://filemoon.sx/e/ed0p89ndlpl6".to_string())
        );
    }

    #[test]
    fn test_supported_from() {
        assert!(Filemoon::supported_from().contains(SupportedFrom::Url));
        assert!(Filemoon::supported_from().contains(SupportedFrom::Source));
    }

    #[test]
    fn test_filemoon_headers() {
        let headers = request_headers("pt-BR", Some(DEFAULT_REFERER), &filemoon_headers());
        assert_eq!(headers[REFERER], "https://fembed.sx/");
        assert_eq!(headers[ORIGIN], "https://fembed.sx");

        let headers = request_headers("pt-BR", Some("https://superflix21.lol/filme/duna"), &filemoon_headers());
        assert_eq!(headers[REFERER], "https://superflix21.lol/filme/duna");
        assert_eq!(headers[ORIGIN], "https://fembed.sx");

        // iframe request
        let headers = request_headers("pt-BR", Some("https://filemoon.in/e/1421"), &filemoon_headers());
        assert_eq!(headers[REFERER], "https://filemoon.in/e/1421");
        assert_eq!(headers[ORIGIN], "https://fembed.sx");
    }

    #[test]
    fn test_first_iframe() {
        let base = Url::parse("https://filemoon.in/e/1421").unwrap();
        let html = r#"<div><iframe src="//ico3c.com/bkg/1421?ref=fembed.sx" frameborder="0"></iframe></div>"#;

        assert_eq!(first_iframe(html, &base), Some("https://ico3c.com/bkg/1421?ref=fembed.sx".to_string()));
        assert_eq!(first_iframe("<div></div>", &base), None);
    }

    #[tokio::test]
    async fn test_filemoon_source() {
        let source = r#"<script data-cfasync="false" type="text/javascript">eval(function(p,a,c,k,e,d){while(c--)if(k[c])p=p.replace(new RegExp('\\b'+c.toString(a)+'\\b','g'),k[c]);return p}('n 47={9i:{9h:50,9g:"y"},3w:{9f:\'9e://9d.42.1r\',9c:9b,9a:48,99:3,98:50,97:20,96:1,95:p,94:9,93:0.92,91:48,90:p,}};m 1d=8z 1u.1t.2k(47);m 44=0,43=0;1d.k("8y",1s=>17.16("8x",1s.8w,1s.8v));1d.k("8u",(46,2i)=>17.16("8t 8s",2i?`1s ${2i}`:"8r",46.40));1d.k("8q",8(45,2h){g(45==\'8p\')44+=2h;2u 43+=2h});m c=u("1n");c.8o({8n:[{41:"1a://8m.8l.8k.42.1r/8j/8i/8h/8g/8f.8e?t=8d&s=3r&e=8c&f=3s&8b=30&8a=89&88=87"}],86:"1a://3z-3y.1r/85.3x",2d:"1c%",2c:"1c%",84:"83",82:\'81\',80:"7z",l:[{41:"/26?b=7y&11=7x&40=1a://3z-3y.1r/7w.3x",7v:"7u"}],7t:{7s:1,2l:\'#7r\',7q:\'#7p\',7o:"7n",7m:30,7l:1c,},\'7k\':{"7j":"7i"},7h:"7g",7f:"1a://33.32",7e:{},7d:p,7c:[0.25,0.50,0.75,1,1.25,1.5,2],7b:{7a:7,3w:1d.79()}});m 2f,2g,78;m 77=0,76=0;m c=u("1n");m 3v=0,74=0,73=0,v=0;$.72({71:{\'70-6z\':\'3j-6y\'}});c.k(\'6x\',8(x){g(5>0&&x.15>=5&&2g!=1){2g=1;$(\'1p.6w\').6v(\'6u\')}g(x.15>=v+5||x.15<v){v=x.15;2e.6t(\'y\',6s.6r(v),{6q:60*60*24*7})}});c.k(\'1j\',8(x){3v=x.15});c.k(\'3h\',8(x){3u(x)});c.k(\'6p\',8(){$(\'1p.3t\').6o();2e.3i(\'y\')});8 3u(x){$(\'1p.3t\').6n();g(2f)1x;2f=1;1q=0;g(6m.6l===p){1q=1}$.3p(\'/26?b=6k&3k=y&6j=3s-6i-6h-3r-6g&6f=1&6e=&6d=&1q=\'+1q,8(3q){$(\'#6c\').6b(3q)});m v=2e.3p(\'y\');g(6a(v)>0){2r(8(){c.1j(v)},69)}$(\'.6-d-68-67:66("65")\').19(8(e){3o();u().64(0);u().63(p)});8 3o(){m $1o=$("<1p />").3n({15:"62",2d:"1c%",2c:"1c%",61:0,3l:0,3m:5z,5y:"5x(10%, 10%, 10%, 0.4)","5w-5v":"5u"});$("<5t />").3n({2d:"60%",2c:"60%",3m:5s,"5r-3l":"5q"}).5p({\'5o\':\'/?b=5n&3k=y\',\'5m\':\'0\',\'5l\':\'3j\'}).3g($1o);$1o.19(8(){$(5k).3i();u().3h()});$1o.3g($(\'#1n\'))}u().1j(0);}8 5j(){m l=c.1z(3f);17.16(l);g(l.11>1){2o(i=0;i<l.11;i++){g(l[i].1y==3f){17.16(\'!!=\'+i);c.2m(i)}}}}c.k(\'5i\',8(){n 1i=u("1n");n 1b=1i.5h();n 3e=1b.14(".6-1m-w-29");n 2b=3e.3b(p);n 1k=2b.14(".6-w-29");1k.28.3a="39(-1)";1k.38="37 10 36";n 2a=1b.14(".6-1m-w-3d");2a.35.34(2b,2a);1b.14(".6-1m-w-3d").28.1m="5g";n 3c=1b.14(".6-1f-5f");n 1l=3c.14(".6-w-29");n 13=1l.3b(p);13.28.3a="39(-1)";13.38="37 10 36";13.5e.5d("5c");1l.35.34(13,1l.5b);[1k,13].5a((1f)=>{1f.59=()=>{1i.1j(1i.58()+10)}})});8 27(){}c.k(\'57\',8(){27()});c.k(\'56\',8(){27()});u().2z("/2y/26.2x","55 54 53",8(){n 12=23.52(\'a\');12.31(\'51\',\'1a://33.32/4z/y\');12.31(\'4y\',\'4x\');23.1v.4w(12);12.19();23.1v.4v(12)},"4u");c.k("h",8(1h){m l=c.1z();g(l.11<2)1x;$(\'.6-d-4t-4s\').4r(8(){$(\'#6-d-j-h\').1g(\'6-d-j-18\');$(\'.6-j-h\').r(\'o-q\',\'z\')});c.2z("/2y/4q.2x","2t 2s",8(e){$(\'.6-2w\').4p(\'6-d-2v\');g($(\'.6-2w\').4o(\'6-d-2v\')){$(\'.6-d-h\').r(\'o-q\',\'p\');$(\'.6-d-j-h \').r(\'o-q\',\'p\');$(\'.6-d-j-h \').4n(\'6-d-j-18\')}2u{$(\'.6-d-h\').r(\'o-q\',\'z\');$(\'.6-d-j-h \').r(\'o-q\',\'z\');$(\'.6-d-j-h \').1g(\'6-d-j-18\')}$(\'.6-4m .6-w:4l([o-4k="2t 2s"])\').k(\'19\',8(){$(\'.6-d-h\').r(\'o-q\',\'z\');$(\'.6-d-j-h \').r(\'o-q\',\'z\');$(\'.6-d-j-h \').1g(\'6-d-j-18\')})},"4j");c.k("4i",8(1h){22.4h(\'21\',1h.l[1h.4g].1y)});g(22.2q(\'21\')){2r("2p(22.2q(\'21\'));",4f)}});m 1w;8 2p(2n){m l=c.1z();g(l.11>1){2o(i=0;i<l.11;i++){g(l[i].1y==2n){g(i==1w){1x}1w=i;c.2m(i)}}}}$(\'1v\').k(\'19\',\'.6-w-d\',8(){$(\'.6-d-j-h \').1g(\'6-d-j-18\');$(\'.6-1f-2l.6-d-h\').r(\'o-q\',\'z\')});n 2j=4e(()=>{17.16(c.1e);g(c.1e&&c.1e.4d&&1u.1t.2k.4c()){4b(2j);1u.1t.4a(c.1e)}},49);',36,343,'||||||jw||function||||videop|settings|||if|audioTracks||submenu|on|tracks|var|const|aria|true|expanded|attr|||jwplayer|lastt|icon||ed0p89ndlpl6|false||length|dl_item|forwardControlBarButton|querySelector|position|log|console|active|click|https|playerContainer|100|engine|hls|button|removeClass|event|player|seek|forwardDisplayButton|rewindControlBarButton|display|vplayer|dd|div|adb|com|peer|hlsjs|p2pml|body|current_audio|return|name|getAudioTracks||default_audio|localStorage|document|||dl|callMeMaybe|style|rewind|nextContainer|forwardContainer|height|width|ls|vvplay|vvad|size|peerId|iid|Engine|color|setCurrentAudioTrack|audio_name|for|audio_set|getItem|setTimeout|Track|Audio|else|open|controls|svg|images|addButton||setAttribute|sx|filemoon|insertBefore|parentNode|Seconds|Forward|ariaLabel|scaleX|transform|cloneNode|buttonContainer|next|rewindContainer|track_name|appendTo|play|remove|no|file_code|top|zIndex|css|showCCform|get|data|1697939838|24152475|video_ad|doPlay|prevt|loader|jpg|place|img|url|file|cdn112|loaded_p2p|loaded_http|method|segment|p2pconfig|1000|200|initHlsJsPlayer|clearInterval|isSupported|config|setInterval|300|currentTrack|setItem|audioTrackChanged|dualSound|label|not|controlbar|addClass|hasClass|toggleClass|dualy|mousedown|buttons|topbar|download11|removeChild|appendChild|_blank|target|download||href|createElement|Video|This|Download|playAttemptFailed|beforePlay|getPosition|onclick|forEach|nextElementSibling|forward|add|classList|container|none|getContainer|ready|set_audio_track|this|scrolling|frameborder|upload_srt|src|prop|50px|margin|1000001|iframe|center|align|text|rgba|background|1000000||left|absolute|pause|setCurrentCaptions|Upload|contains|item|content|500|parseInt|html|fviews|referer|prem|embed|c884d699a1bd4b2bfc17f583c904e1f6|249|185|hash|view|ZorDon|window|hide|show|complete|ttl|round|Math|set|slow|fadeIn|video_ad_fadein|time|cache|Cache|Content|headers|ajaxSetup|v2done|tott||vastdone2|vastdone1|vvbefore|createLoaderClass|liveSyncDurationCount|hlsjsConfig|playbackRates|playbackRateControls|cast|aboutlink|FileMoon|abouttext|1080p|1415|qualityLabels|fontOpacity|backgroundOpacity|Tahoma|fontFamily|303030|backgroundColor|FFFFFF|userFontScale|captions|thumbnails|kind|ed0p89ndlpl60000|1418|get_slides|start|startparam|auto|preload|uniform|stretching|ed0p89ndlpl6_xt|image|2500|sp|12329|asn|srv|43200|rvm0EjVpGO2BKMaUJjRPEKrxndDmKgV6VrdJ3HnPsp4|m3u8|master|ed0p89ndlpl6_x|04830|01|hls2|waw05|rcr82|be7713|sources|setup|http|piece_bytes_downloaded|HTTP|from|p2p_segment_loaded|segment_loaded|remoteAddress|id|p2p_peer_connect|peer_connect|new|httpDownloadProbabilitySkipIfNoPeers|httpDownloadProbabilityInterval|06|httpDownloadProbability|httpDownloadMaxPriority|httpUseRanges|simultaneousHttpDownloads|simultaneousP2PDownloads|p2pDownloadMaxPriority|requiredSegmentsPriority|cachedSegmentsCount|86400000|cachedSegmentExpiration|metrika|wss|trackerAnnounce|swarmId|forwardSegmentCount|segments'.split('|')))</script>"#;

        let expected = "https://be7713.rcr82.waw05.cdn112.com/hls2/01/04830/ed0p89ndlpl6_x/master.m3u8?t=rvm0EjVpGO2BKMaUJjRPEKrxndDmKgV6VrdJ3HnPsp4&s=1697939838&e=43200&f=24152475&srv=30&asn=12329&sp=2500";

        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
        let static_resolver = StaticResolver::default();
        let ctx = ExtractContext {
            fetcher: &fetcher,
            static_resolver: &static_resolver,
        };
        let from = ExtractFrom::Source {
            source: source.to_string(),
            url: Some("https://filemoon.sx/e/ed0p89ndlpl6".to_string()),
        };

        let links = Filemoon::extract(from, &ctx).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, expected);
        assert!(links[0].is_playlist);
        assert_eq!(links[0].quality, Quality::Unknown);
        assert_eq!(links[0].referer.as_deref(), Some("https://filemoon.sx/e/ed0p89ndlpl6"));

        let from = ExtractFrom::Source {
            source: "<html><body>File was deleted</body></html>".to_string(),
            url: None,
        };
        assert!(Filemoon::extract(from, &ctx).await.is_err());
    }
}
