//! Page fetching and signal extraction.
//!
//! Two retrieval strategies in strict order: a headless-Chrome render with
//! a mobile profile (many storefronts only paint critical content
//! client-side), then a plain HTTP GET fallback. Extraction itself is pure
//! and strategy-independent, and every textual output is length-capped
//! before it is handed downstream. The caps protect report generation
//! from unbounded token cost.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use futures::StreamExt;
use reqwest::header;
use select::document::Document;
use select::node::Node;
use select::predicate::{Attr, Class, Name, Predicate};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::detect::{
    self, truncate_chars, ShippingReturnsMentions, TrustSignals, ADD_TO_CART_RE, CTA_RE,
    CURRENCY_RE, PRICE_RE,
};
use crate::entities::Platform;

const MAIN_TEXT_CAP: usize = 12_000;
const ABOVE_FOLD_CAP: usize = 2_000;
const CTA_CAP: usize = 20;
const PRICE_CAP: usize = 20;

const NAV_TIMEOUT: Duration = Duration::from_secs(20);
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Mobile/15E148 Safari/604.1";
const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";
const ACCEPT_HEADER: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Elements whose subtrees never contribute to body text or CTA/heading
/// extraction, plus the Shopify/Woo theme wrappers that repeat nav/footer
/// content.
const STRIP_TAGS: &[&str] = &[
    "nav", "footer", "header", "script", "style", "noscript", "svg", "iframe",
];
const STRIP_IDS: &[&str] = &["shopify-section-header", "shopify-section-footer"];
const STRIP_CLASSES: &[&str] = &["site-footer", "site-header"];

#[derive(Debug)]
pub enum ScrapeError {
    /// Network failure, connect error, or non-2xx response.
    Fetch(String),
    /// Navigation or request exceeded its wall-clock budget.
    Timeout(String),
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeError::Fetch(msg) => write!(f, "fetch failed: {}", msg),
            ScrapeError::Timeout(msg) => write!(f, "fetch timed out: {}", msg),
        }
    }
}

impl std::error::Error for ScrapeError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Cta {
    pub text: String,
    pub href: Option<String>,
}

/// The bounded, typed signal record derived from one fetched page.
/// Immutable once produced; embedded in its job row as `scraped_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedPage {
    pub final_url: String,
    pub title: String,
    pub meta_description: String,
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub ctas: Vec<Cta>,
    pub price_texts: Vec<String>,
    pub shipping_returns_mentions: ShippingReturnsMentions,
    pub trust_signals: TrustSignals,
    pub images_count: i64,
    pub missing_alt_count: i64,
    pub scripts_count: i64,
    pub styles_count: i64,
    pub total_text_length: i64,
    pub main_text_sample: String,
    pub detected_platform: Platform,
    pub canonical_url: Option<String>,
    pub og_title: Option<String>,
    pub og_description: Option<String>,
    pub viewport_meta_present: bool,
    pub word_count_estimate: i64,
    pub above_fold_text_sample: String,
    pub primary_cta_text: Option<String>,
    pub add_to_cart_present: bool,
    pub price_present: bool,
    pub price_sample: Option<String>,
    pub shipping_returns_text_sample: Option<String>,
    pub reviews_count_hint: Option<i64>,
    pub currency_detected: Option<String>,
    pub internal_links_count: i64,
    pub external_links_count: i64,
}

/// Collapse runs of whitespace (including NBSP) into single spaces.
fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_boilerplate(node: &Node) -> bool {
    match node.name() {
        Some(name) if STRIP_TAGS.contains(&name) => true,
        Some(_) => {
            if let Some(id) = node.attr("id") {
                if STRIP_IDS.contains(&id) {
                    return true;
                }
            }
            if let Some(classes) = node.attr("class") {
                if classes.split_whitespace().any(|c| STRIP_CLASSES.contains(&c)) {
                    return true;
                }
            }
            false
        }
        None => false,
    }
}

fn in_boilerplate(node: &Node) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        if is_boilerplate(&parent) {
            return true;
        }
        current = parent.parent();
    }
    false
}

/// Depth-first text collection that skips boilerplate subtrees.
fn collect_text(node: Node, out: &mut String) {
    if is_boilerplate(&node) {
        return;
    }
    if let Some(text) = node.as_text() {
        out.push_str(text);
        out.push(' ');
        return;
    }
    for child in node.children() {
        collect_text(child, out);
    }
}

/// Derive the full signal record from raw HTML. Pure and deterministic:
/// the same document and final URL always produce the same record.
pub fn extract_from_html(html: &str, final_url: &str) -> ScrapedPage {
    let document = Document::from(html);

    // Metadata is read before any boilerplate handling; the canonical link
    // and OG tags usually live in <head>, which the stripping rules would
    // otherwise never visit anyway, but titles can be duplicated in-body.
    let title = document
        .find(Name("title"))
        .next()
        .map(|n| clean_text(&n.text()))
        .unwrap_or_default();
    let meta_description = document
        .find(Name("meta").and(Attr("name", "description")))
        .next()
        .and_then(|n| n.attr("content"))
        .map(clean_text)
        .unwrap_or_default();
    let canonical_url = document
        .find(Name("link").and(Attr("rel", "canonical")))
        .next()
        .and_then(|n| n.attr("href"))
        .map(str::to_string);
    let og_title = document
        .find(Name("meta").and(Attr("property", "og:title")))
        .next()
        .and_then(|n| n.attr("content"))
        .map(str::to_string);
    let og_description = document
        .find(Name("meta").and(Attr("property", "og:description")))
        .next()
        .and_then(|n| n.attr("content"))
        .map(str::to_string);
    let viewport_meta_present = document
        .find(Name("meta").and(Attr("name", "viewport")))
        .next()
        .is_some();

    // Link counts compare each anchor's resolved host against the final
    // (post-redirect) page host. Fragment-only and javascript: hrefs are
    // skipped; malformed relative hrefs count as internal.
    let mut internal_links_count = 0i64;
    let mut external_links_count = 0i64;
    if let Ok(base) = Url::parse(final_url) {
        let base_host = base
            .host_str()
            .map(|h| h.trim_start_matches("www.").to_string());
        for node in document.find(Name("a")) {
            let Some(href) = node.attr("href") else { continue };
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                continue;
            }
            match base.join(href) {
                Ok(joined) => {
                    let link_host = joined
                        .host_str()
                        .map(|h| h.trim_start_matches("www.").to_string());
                    if link_host == base_host {
                        internal_links_count += 1;
                    } else {
                        external_links_count += 1;
                    }
                }
                Err(_) => internal_links_count += 1,
            }
        }
    }

    let mut images_count = 0i64;
    let mut missing_alt_count = 0i64;
    for node in document.find(Name("img")) {
        images_count += 1;
        if node.attr("alt").map_or(true, |alt| alt.is_empty()) {
            missing_alt_count += 1;
        }
    }
    let scripts_count = document.find(Name("script")).count() as i64;
    let styles_count = (document
        .find(Name("link").and(Attr("rel", "stylesheet")))
        .count()
        + document.find(Name("style")).count()) as i64;

    let detected_platform = detect::detect_platform(html);

    // Body text with boilerplate subtrees skipped.
    let mut raw_text = String::new();
    if let Some(body) = document.find(Name("body")).next() {
        collect_text(body, &mut raw_text);
    }
    let text_content = clean_text(&raw_text);
    let total_text_length = text_content.chars().count() as i64;
    let main_text_sample = truncate_chars(&text_content, MAIN_TEXT_CAP);
    let word_count_estimate = text_content.split_whitespace().count() as i64;

    let heading_texts = |tag: &'static str| {
        document
            .find(Name(tag))
            .filter(|n| !in_boilerplate(n))
            .map(|n| clean_text(&n.text()))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
    };
    let h1 = heading_texts("h1");
    let h2 = heading_texts("h2");

    // CTA candidates: interactive elements whose visible text matches the
    // curated keyword set, outside boilerplate, capped.
    let cta_predicate = Name("a")
        .or(Name("button"))
        .or(Attr("role", "button"))
        .or(Name("input").and(Attr("type", "submit")))
        .or(Name("input").and(Attr("type", "button")));
    let mut ctas: Vec<Cta> = Vec::new();
    for node in document.find(cta_predicate) {
        if ctas.len() >= CTA_CAP {
            break;
        }
        if is_boilerplate(&node) || in_boilerplate(&node) {
            continue;
        }
        let text = if node.name() == Some("input") {
            clean_text(node.attr("value").unwrap_or(""))
        } else {
            clean_text(&node.text())
        };
        if text.is_empty() || !CTA_RE.is_match(&text) {
            continue;
        }
        ctas.push(Cta {
            text,
            href: node.attr("href").map(str::to_string),
        });
    }
    let primary_cta_text = ctas.first().map(|cta| cta.text.clone());

    let add_to_cart_present = ADD_TO_CART_RE.is_match(&text_content)
        || document
            .find(Name("form"))
            .any(|form| form.attr("action").is_some_and(|a| a.contains("cart")))
        || document
            .find(Attr("data-action", "add-to-cart"))
            .next()
            .is_some();

    let mut seen_prices = HashSet::new();
    let mut price_texts = Vec::new();
    for price in PRICE_RE.find_iter(&text_content) {
        if price_texts.len() >= PRICE_CAP {
            break;
        }
        let price = price.as_str().to_string();
        if seen_prices.insert(price.clone()) {
            price_texts.push(price);
        }
    }
    let price_present = !price_texts.is_empty();
    let price_sample = price_texts.first().cloned();
    let currency_detected = CURRENCY_RE
        .captures(&text_content)
        .map(|caps| caps[1].to_string());

    let shipping_returns_mentions = detect::shipping_returns_mentions(&text_content);
    let shipping_returns_text_sample = detect::shipping_returns_snippet(&text_content);
    let trust_signals = detect::trust_signals(&text_content);
    let reviews_count_hint = detect::review_count_hint(&text_content);

    // Above-the-fold sample: prefer a main-content landmark, else the
    // first paragraphs/headings until the cap is reached.
    let main_predicate = Name("main")
        .or(Attr("role", "main"))
        .or(Attr("id", "main"))
        .or(Class("main-content"))
        .or(Attr("id", "MainContent"));
    let mut above_fold_text_sample = String::new();
    if let Some(main_node) = document.find(main_predicate).next() {
        let mut raw = String::new();
        collect_text(main_node, &mut raw);
        above_fold_text_sample = truncate_chars(&clean_text(&raw), ABOVE_FOLD_CAP);
    }
    if above_fold_text_sample.is_empty() {
        let mut paragraphs: Vec<String> = Vec::new();
        let mut running_len = 0usize;
        for node in document.find(Name("p").or(Name("h1")).or(Name("h2")).or(Name("h3"))) {
            if running_len >= ABOVE_FOLD_CAP {
                break;
            }
            if in_boilerplate(&node) {
                continue;
            }
            let text = clean_text(&node.text());
            if text.chars().count() > 10 {
                running_len += text.chars().count() + 1;
                paragraphs.push(text);
            }
        }
        above_fold_text_sample = truncate_chars(&paragraphs.join(" "), ABOVE_FOLD_CAP);
    }

    ScrapedPage {
        final_url: final_url.to_string(),
        title,
        meta_description,
        h1,
        h2,
        ctas,
        price_texts,
        shipping_returns_mentions,
        trust_signals,
        images_count,
        missing_alt_count,
        scripts_count,
        styles_count,
        total_text_length,
        main_text_sample,
        detected_platform,
        canonical_url,
        og_title,
        og_description,
        viewport_meta_present,
        word_count_estimate,
        above_fold_text_sample,
        primary_cta_text,
        add_to_cart_present,
        price_present,
        price_sample,
        shipping_returns_text_sample,
        reviews_count_hint,
        currency_detected,
        internal_links_count,
        external_links_count,
    }
}

fn to_fetch(err: impl fmt::Display) -> ScrapeError {
    ScrapeError::Fetch(err.to_string())
}

async fn render_page(browser: &Browser, url: &str) -> Result<(String, String), ScrapeError> {
    let page = browser.new_page("about:blank").await.map_err(to_fetch)?;
    page.set_user_agent(MOBILE_USER_AGENT).await.map_err(to_fetch)?;
    page.execute(
        SetDeviceMetricsOverrideParams::builder()
            .width(390)
            .height(844)
            .device_scale_factor(3.0)
            .mobile(true)
            .build()
            .map_err(ScrapeError::Fetch)?,
    )
    .await
    .map_err(to_fetch)?;

    page.goto(url).await.map_err(to_fetch)?;
    page.wait_for_navigation().await.map_err(to_fetch)?;
    let final_url = page
        .url()
        .await
        .map_err(to_fetch)?
        .unwrap_or_else(|| url.to_string());
    let html = page.content().await.map_err(to_fetch)?;
    Ok((html, final_url))
}

/// Headless render with a mobile profile, bounded by a hard navigation
/// timeout. The event handler task must be aborted or it outlives the
/// browser process.
#[tracing::instrument(skip(url), fields(url = %url))]
async fn scrape_with_browser(url: &str) -> Result<ScrapedPage, ScrapeError> {
    let config = BrowserConfig::builder()
        .no_sandbox()
        .build()
        .map_err(ScrapeError::Fetch)?;
    let (mut browser, mut handler) = Browser::launch(config).await.map_err(to_fetch)?;
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            let _ = event;
        }
    });

    let rendered = tokio::time::timeout(NAV_TIMEOUT, render_page(&browser, url)).await;

    let _ = browser.close().await;
    let _ = browser.wait().await;
    handler_task.abort();

    match rendered {
        Ok(Ok((html, final_url))) => Ok(extract_from_html(&html, &final_url)),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(ScrapeError::Timeout(format!(
            "navigation did not settle within {}s",
            NAV_TIMEOUT.as_secs()
        ))),
    }
}

#[tracing::instrument(skip(url, client), fields(url = %url))]
async fn scrape_with_http(url: &str, client: &reqwest::Client) -> Result<ScrapedPage, ScrapeError> {
    let response = client
        .get(url)
        .header(header::USER_AGENT, DESKTOP_USER_AGENT)
        .header(header::ACCEPT, ACCEPT_HEADER)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(classify_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        return Err(ScrapeError::Fetch(format!(
            "fetch failed with status {}",
            status
        )));
    }

    let final_url = response.url().to_string();
    let html = response.text().await.map_err(classify_reqwest)?;
    Ok(extract_from_html(&html, &final_url))
}

fn classify_reqwest(err: reqwest::Error) -> ScrapeError {
    if err.is_timeout() {
        ScrapeError::Timeout(err.to_string())
    } else {
        ScrapeError::Fetch(err.to_string())
    }
}

/// Fetch a validated URL and derive its signal record. The headless render
/// is tried first (unless disabled); any failure there falls through to
/// the plain fetch. A failed plain fetch fails the job.
pub async fn scrape_page(
    url: &str,
    config: &AppConfig,
    client: &reqwest::Client,
) -> Result<ScrapedPage, ScrapeError> {
    if config.browser_enabled {
        match scrape_with_browser(url).await {
            Ok(page) => return Ok(page),
            Err(err) => {
                tracing::warn!("headless render failed for {}: {}; using plain fetch", url, err);
            }
        }
    }
    scrape_with_http(url, client).await
}
