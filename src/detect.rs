//! Pure keyword/regex classification over plain text, kept separate from
//! the HTML walking in `scraper` so the keyword tables can grow without
//! touching extraction logic.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::Platform;

pub static CTA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(add to cart|buy now|checkout|get started|start|subscribe|shop now|order|try|claim|add to bag)",
    )
    .expect("cta regex")
});

pub static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\$|€|£|¥|₹|CA\$|AU\$|USD|EUR|GBP)\s?\d{1,6}(?:[\d,]*)(?:\.\d{2})?")
        .expect("price regex")
});

pub static CURRENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$|€|£|¥|₹|CA\$|AU\$|USD|EUR|GBP)").expect("currency regex"));

pub static REVIEW_COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,6})\s*(?:reviews?|ratings?|verified buyers?)").expect("review regex")
});

pub static ADD_TO_CART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)add\s*to\s*(?:cart|bag)|buy\s*now").expect("add-to-cart regex"));

pub static SHIPPING_RETURNS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:free\s+)?shipping|delivery|ship\s+to|returns?\s*(?:policy)?|refund|exchange|warrant|guarant",
    )
    .expect("shipping regex")
});

static SHIPPING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)shipping|delivery|ship to").expect("shipping mention regex"));
static RETURNS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)returns|return policy|refund").expect("returns regex"));
static WARRANTY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)warranty|guarantee").expect("warranty regex"));

static REVIEWS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)reviews|testimonials").expect("reviews regex"));
static RATINGS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rating|stars").expect("ratings regex"));
static BADGES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)secure|ssl|trusted|verified|badge").expect("badges regex"));
static GUARANTEE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)money-back|guarantee|risk-free").expect("guarantee regex"));

/// Substring markers checked against lowercased raw HTML. Order matters:
/// Shopify markers win over WooCommerce ones.
const SHOPIFY_MARKERS: &[&str] = &["cdn.shopify", "myshopify"];
const WOOCOMMERCE_MARKERS: &[&str] = &["woocommerce", "wp-content", "wp-json"];

const SNIPPET_CONTEXT: usize = 120;
const SNIPPET_CAP: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShippingReturnsMentions {
    pub shipping: bool,
    pub returns: bool,
    pub warranty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TrustSignals {
    pub reviews: bool,
    pub ratings: bool,
    pub badges: bool,
    pub guarantee: bool,
}

pub fn detect_platform(html: &str) -> Platform {
    let lowered = html.to_lowercase();
    if SHOPIFY_MARKERS.iter().any(|m| lowered.contains(m)) {
        Platform::Shopify
    } else if WOOCOMMERCE_MARKERS.iter().any(|m| lowered.contains(m)) {
        Platform::Woocommerce
    } else {
        Platform::Unknown
    }
}

pub fn shipping_returns_mentions(text: &str) -> ShippingReturnsMentions {
    ShippingReturnsMentions {
        shipping: SHIPPING_RE.is_match(text),
        returns: RETURNS_RE.is_match(text),
        warranty: WARRANTY_RE.is_match(text),
    }
}

pub fn trust_signals(text: &str) -> TrustSignals {
    TrustSignals {
        reviews: REVIEWS_RE.is_match(text),
        ratings: RATINGS_RE.is_match(text),
        badges: BADGES_RE.is_match(text),
        guarantee: GUARANTEE_RE.is_match(text),
    }
}

/// Numeric "N reviews" style hint, when one is present.
pub fn review_count_hint(text: &str) -> Option<i64> {
    REVIEW_COUNT_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A bounded context window around the first shipping/returns/warranty
/// mention, for the report prompt's evidence field.
pub fn shipping_returns_snippet(text: &str) -> Option<String> {
    let m = SHIPPING_RETURNS_RE.find(text)?;
    let start = floor_char_boundary(text, m.start().saturating_sub(SNIPPET_CONTEXT));
    let end = ceil_char_boundary(text, (m.end() + SNIPPET_CONTEXT).min(text.len()));
    Some(truncate_chars(text[start..end].trim(), SNIPPET_CAP))
}

/// Cap a string at `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_precedence_is_shopify_first() {
        assert_eq!(
            detect_platform("<script src='https://cdn.shopify.com/a.js'></script> wp-content"),
            Platform::Shopify
        );
        assert_eq!(
            detect_platform("<link href='/wp-content/themes/x.css'>"),
            Platform::Woocommerce
        );
        assert_eq!(detect_platform("<html><body>plain</body></html>"), Platform::Unknown);
    }

    #[test]
    fn cta_keywords_match() {
        assert!(CTA_RE.is_match("Add to Cart"));
        assert!(CTA_RE.is_match("BUY NOW"));
        assert!(CTA_RE.is_match("Shop now"));
        assert!(!CTA_RE.is_match("Read more"));
    }

    #[test]
    fn price_patterns() {
        for sample in ["$39.99", "€ 120", "CA$ 1,299.00", "USD 45", "₹999"] {
            assert!(PRICE_RE.is_match(sample), "{sample} should match");
        }
        assert!(!PRICE_RE.is_match("price on request"));
    }

    #[test]
    fn review_hint_parses_count() {
        assert_eq!(review_count_hint("rated by 3200 reviews"), Some(3200));
        assert_eq!(review_count_hint("1 review"), Some(1));
        assert_eq!(review_count_hint("loved by many"), None);
    }

    #[test]
    fn trust_and_shipping_flags() {
        let text = "Free shipping on all orders. 30-day returns. Verified reviews.";
        let mentions = shipping_returns_mentions(text);
        assert!(mentions.shipping);
        assert!(mentions.returns);
        assert!(!mentions.warranty);
        let trust = trust_signals(text);
        assert!(trust.reviews);
        assert!(trust.badges);
        assert!(!trust.guarantee);
    }

    #[test]
    fn snippet_is_bounded_and_contextual() {
        let text = format!("{} free shipping over $50 {}", "a".repeat(400), "b".repeat(400));
        let snippet = shipping_returns_snippet(&text).unwrap();
        assert!(snippet.contains("free shipping"));
        assert!(snippet.chars().count() <= 500);
        assert!(shipping_returns_snippet("nothing relevant here at all").is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "é".repeat(10);
        assert_eq!(truncate_chars(&text, 4).chars().count(), 4);
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
