use crosignal::entities::Platform;
use crosignal::scraper::extract_from_html;

const PRODUCT_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>Acme Anvil | Acme Store</title>
<meta name="description" content="The classic anvil, now 20% off.">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta property="og:title" content="Acme Anvil">
<meta property="og:description" content="Drop-forged steel anvil.">
<link rel="canonical" href="https://acme.example.com/products/anvil">
<script src="https://cdn.shopify.com/s/files/theme.js"></script>
</head>
<body>
<header><nav><a href="/collections">Shop</a></nav></header>
<main id="MainContent">
<h1>Acme Anvil</h1>
<h2>Built to last</h2>
<p>Price: $129.99 for a limited time.</p>
<p>Free shipping on orders over $50. 30-day returns, no questions asked.</p>
<p>Rated 4.8 from 1243 reviews by verified buyers.</p>
<img src="/a.jpg" alt="Anvil front view">
<img src="/b.jpg">
<a href="/cart" class="button">Add to cart</a>
<a href="https://instagram.com/acme">Follow us</a>
<button>Buy now</button>
</main>
<footer><p>Footer junk that should never appear in samples.</p></footer>
</body>
</html>"#;

#[test]
fn extracts_metadata_and_headings() {
    let page = extract_from_html(PRODUCT_PAGE, "https://acme.example.com/products/anvil");

    assert_eq!(page.title, "Acme Anvil | Acme Store");
    assert_eq!(page.meta_description, "The classic anvil, now 20% off.");
    assert_eq!(
        page.canonical_url.as_deref(),
        Some("https://acme.example.com/products/anvil")
    );
    assert_eq!(page.og_title.as_deref(), Some("Acme Anvil"));
    assert!(page.viewport_meta_present);
    assert_eq!(page.h1, vec!["Acme Anvil"]);
    assert_eq!(page.h2, vec!["Built to last"]);
}

#[test]
fn extracts_commerce_signals() {
    let page = extract_from_html(PRODUCT_PAGE, "https://acme.example.com/products/anvil");

    assert_eq!(page.detected_platform, Platform::Shopify);
    assert!(page.add_to_cart_present);
    assert!(page.price_present);
    assert!(page.price_texts.iter().any(|p| p.contains("129.99")));
    assert_eq!(page.currency_detected.as_deref(), Some("$"));
    assert_eq!(page.primary_cta_text.as_deref(), Some("Add to cart"));
    assert!(page.ctas.iter().any(|c| c.text == "Buy now"));

    assert!(page.shipping_returns_mentions.shipping);
    assert!(page.shipping_returns_mentions.returns);
    assert!(page.trust_signals.reviews);
    assert_eq!(page.reviews_count_hint, Some(1243));
}

#[test]
fn counts_images_links_and_scripts() {
    let page = extract_from_html(PRODUCT_PAGE, "https://acme.example.com/products/anvil");

    assert_eq!(page.images_count, 2);
    assert_eq!(page.missing_alt_count, 1);
    assert_eq!(page.scripts_count, 1);
    assert_eq!(page.internal_links_count, 2);
    assert_eq!(page.external_links_count, 1);
}

#[test]
fn skips_boilerplate_in_text_samples() {
    let page = extract_from_html(PRODUCT_PAGE, "https://acme.example.com/products/anvil");

    assert!(page.main_text_sample.contains("Free shipping"));
    assert!(!page.main_text_sample.contains("Footer junk"));
    assert!(page.above_fold_text_sample.contains("Acme Anvil"));
    assert!(!page.above_fold_text_sample.contains("Footer junk"));
}

#[test]
fn woocommerce_page_without_shopify_markers() {
    let html = r#"<html><head><title>Shop</title>
<link rel="stylesheet" href="/wp-content/themes/store/style.css">
</head><body class="woocommerce"><p>Welcome to the shop.</p></body></html>"#;
    let page = extract_from_html(html, "https://shop.example.com");
    assert_eq!(page.detected_platform, Platform::Woocommerce);
}

#[test]
fn all_text_outputs_stay_within_caps() {
    let mut body = String::new();
    body.push_str("<p>");
    for i in 0..450_000 {
        body.push_str("filler word number ");
        body.push_str(&i.to_string());
        body.push(' ');
    }
    body.push_str("</p>");
    for i in 0..50 {
        body.push_str(&format!("<p>only ${}.99 today</p>", 100 + i));
        body.push_str("<button>Buy now</button>");
    }
    let html = format!("<html><head><title>big</title></head><body>{}</body></html>", body);
    assert!(html.len() > 10 * 1024 * 1024);

    let page = extract_from_html(&html, "https://example.com");

    assert!(page.main_text_sample.chars().count() <= 12_000);
    assert!(page.above_fold_text_sample.chars().count() <= 2_000);
    assert!(page.ctas.len() <= 20);
    assert!(page.price_texts.len() <= 20);
    assert!(page.total_text_length > 12_000);
}
