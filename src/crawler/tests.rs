use super::*;

const SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset>
    <url><loc>https://ortahaus.com/products/curl-cream</loc></url>
    <url><loc>https://ortahaus.com/pages/about</loc></url>
    <url><loc> https://ortahaus.com/products/sea-salt-spray </loc></url>
    <url><loc>https://ortahaus.com/products/curl-cream</loc></url>
</urlset>"#;

#[test]
fn sitemap_parse_keeps_only_product_urls() {
    let mut urls = BTreeSet::new();
    collect_product_locs(SITEMAP, &mut urls);

    let urls: Vec<String> = urls.into_iter().collect();
    assert_eq!(
        urls,
        vec![
            "https://ortahaus.com/products/curl-cream".to_string(),
            "https://ortahaus.com/products/sea-salt-spray".to_string(),
        ]
    );
}

#[test]
fn sitemap_parse_is_order_independent() {
    let reversed = r#"<urlset>
        <url><loc>https://ortahaus.com/products/z-pomade</loc></url>
        <url><loc>https://ortahaus.com/products/a-clay</loc></url>
    </urlset>"#;

    let mut urls = BTreeSet::new();
    collect_product_locs(reversed, &mut urls);

    let urls: Vec<String> = urls.into_iter().collect();
    assert_eq!(urls[0], "https://ortahaus.com/products/a-clay");
    assert_eq!(urls[1], "https://ortahaus.com/products/z-pomade");
}

#[test]
fn crawler_rejects_invalid_base_url() {
    let mut config = Config::default();
    config.catalog.base_url = "not a url".to_string();
    assert!(CatalogCrawler::new(&config).is_err());
}
