//! Typed extraction helpers on top of `scraper`.
//!
//! Site adapters describe fields as selector lists; the helpers return the
//! first non-empty value in selector order so that a page which moved a field
//! to a different element still works as long as one selector matches.

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Parses a comma separated selector list. Invalid selectors are a bug in the
/// adapter, so they are logged and treated as matching nothing.
pub fn selector(selectors: &str) -> Option<Selector> {
    match Selector::parse(selectors) {
        Ok(selector) => Some(selector),
        Err(err) => {
            log::error!("Invalid selector {:?}: {:?}", selectors, err);
            None
        }
    }
}

pub fn select_all<'a>(root: ElementRef<'a>, selectors: &str) -> Vec<ElementRef<'a>> {
    selector(selectors)
        .map(|selector| root.select(&selector).collect())
        .unwrap_or_default()
}

/// Whitespace-normalised text content of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn text(root: ElementRef<'_>, selectors: &str) -> Option<String> {
    select_all(root, selectors)
        .into_iter()
        .map(element_text)
        .find(|text| !text.is_empty())
}

pub fn texts(root: ElementRef<'_>, selectors: &str) -> Vec<String> {
    select_all(root, selectors)
        .into_iter()
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect()
}

/// First non-blank value of `attribute` on an element matching `selectors`.
pub fn attr(root: ElementRef<'_>, selectors: &str, attribute: &str) -> Option<String> {
    select_all(root, selectors)
        .into_iter()
        .filter_map(|element| own_attr(element, attribute))
        .next()
}

pub fn own_attr(element: ElementRef<'_>, attribute: &str) -> Option<String> {
    element
        .value()
        .attr(attribute)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Like [attr], but tries each attribute in order on every element, e.g.
/// `["data-src", "src"]` for lazily loaded images.
pub fn attr_any(root: ElementRef<'_>, selectors: &str, attributes: &[&str]) -> Option<String> {
    select_all(root, selectors).into_iter().find_map(|element| {
        attributes
            .iter()
            .find_map(|attribute| own_attr(element, attribute))
    })
}

/// An attribute resolved against `base`. Values that do not form a valid
/// url are dropped.
pub fn url_attr(root: ElementRef<'_>, selectors: &str, attributes: &[&str], base: &Url) -> Option<String> {
    attr_any(root, selectors, attributes).and_then(|value| absolute_url(base, &value))
}

pub fn int(root: ElementRef<'_>, selectors: &str) -> Option<u32> {
    text(root, selectors).and_then(|text| parse_leading_int(&text))
}

/// Parses the first run of digits, so `"Episódio 12"` yields 12.
pub fn parse_leading_int(text: &str) -> Option<u32> {
    let digits = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect::<String>();
    digits.parse().ok()
}

pub fn absolute_url(base: &Url, value: &str) -> Option<String> {
    let value = value.trim();

    if value.is_empty() || value.starts_with("javascript:") || value.starts_with('#') {
        return None;
    }

    base.join(value).ok().map(String::from)
}

pub fn root(document: &Html) -> ElementRef<'_> {
    document.root_element()
}
