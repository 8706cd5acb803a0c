use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use url::Url;

use self::retry::PageRetryStrategy;
use crate::config::FetchConfig;
use crate::error::ResolveError;

const MAX_REDIRECTS: u32 = 10;
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// A fetched page together with the url it was served from after redirects.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub text: String,
}

/// Issues GET requests with browser-like headers.
#[derive(Clone)]
pub struct Fetcher {
    client: ClientWithMiddleware,
    user_agent: String,
    accept_language: String,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .redirect(Policy::none()) // redirects handled in get_page
            .build()?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.retries);
        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                PageRetryStrategy,
            ))
            .build();

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn get_page(&self, url: &str, referer: Option<&str>) -> Result<Page, ResolveError> {
        self.get_page_with_headers(url, referer, &[]).await
    }

    pub async fn get_page_with_headers(
        &self,
        url: &str,
        referer: Option<&str>,
        extra_headers: &[(HeaderName, &str)],
    ) -> Result<Page, ResolveError> {
        // We need to handle redirects ourself, because reqwest changes the
        // Referer header on redirection
        let mut last_url = Url::parse(url).map_err(|err| ResolveError::NotFound(format!("invalid url {url}: {err}")))?;
        let mut redirect_count = 0u32;

        loop {
            let headers = request_headers(&self.accept_language, referer, extra_headers);
            let response = self.client.get(last_url.clone()).headers(headers).send().await?;
            let status = response.status();

            if status.is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|location| location.to_str().ok())
                else {
                    return Err(ResolveError::Status(status.as_u16()));
                };

                if redirect_count >= MAX_REDIRECTS {
                    return Err(ResolveError::Network {
                        transient: false,
                        message: format!("more than {MAX_REDIRECTS} redirects"),
                    });
                }

                redirect_count += 1;
                last_url = last_url.join(location).map_err(|err| ResolveError::Network {
                    transient: false,
                    message: format!("invalid redirect location {location}: {err}"),
                })?;
                log::trace!("Redirected to {}", last_url);
                continue;
            }

            if !status.is_success() {
                return Err(ResolveError::Status(status.as_u16()));
            }

            let final_url = response.url().clone();
            let text = response.text().await?;

            return Ok(Page { url: final_url, text });
        }
    }
}

/// Headers for one page request. `Origin` is derived from the referer
/// unless `extra_headers` names one, and extra headers replace defaults.
pub(crate) fn request_headers(
    accept_language: &str,
    referer: Option<&str>,
    extra_headers: &[(HeaderName, &str)],
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static(ACCEPT_HTML));

    if let Ok(value) = HeaderValue::from_str(accept_language) {
        headers.insert(reqwest::header::ACCEPT_LANGUAGE, value);
    }

    if let Some(referer) = referer {
        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert(reqwest::header::REFERER, value);
        }

        if let Some(value) = origin_of(referer).and_then(|origin| HeaderValue::from_str(&origin).ok()) {
            headers.insert(reqwest::header::ORIGIN, value);
        }
    }

    for (name, value) in extra_headers {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(name.clone(), value);
            }
            Err(_) => log::debug!("Skipping invalid value for header {}", name),
        }
    }

    headers
}

/// `scheme://host[:port]` of a url.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();

    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

mod retry {
    use reqwest_retry::{default_on_request_failure, default_on_request_success, Retryable, RetryableStrategy};

    /// Same as the default strategy, except redirects are not fatal because
    /// they are followed by hand.
    pub struct PageRetryStrategy;

    impl RetryableStrategy for PageRetryStrategy {
        fn handle(&self, res: &Result<reqwest::Response, reqwest_middleware::Error>) -> Option<Retryable> {
            match res {
                Ok(success) if success.status().is_redirection() => None,
                Ok(success) => default_on_request_success(success),
                Err(error) => default_on_request_failure(error),
            }
        }
    }
}
