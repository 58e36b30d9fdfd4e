use std::sync::Arc;
use sumi_trawl::cache::OptimisticConnectivityCache;
use sumi_trawl::config::{ConnectivityConfig, RuntimeConfig, SiteConfig, TransportConfig};
use sumi_trawl::crawler::{HttpFetcher, HttpFetcherFactory};
use sumi_trawl::indexer::SiteDefinition;
use sumi_trawl::Runner;

/// Connectivity cache that treats every URL as reachable until invalidated
pub fn connectivity() -> Arc<OptimisticConnectivityCache> {
    let probe = Arc::new(HttpFetcher::new(&TransportConfig::default()).unwrap());
    Arc::new(OptimisticConnectivityCache::new(&ConnectivityConfig::default(), probe).unwrap())
}

pub fn factory() -> Arc<HttpFetcherFactory> {
    Arc::new(HttpFetcherFactory::new(TransportConfig::default()))
}

/// Parses a definition, substituting `{base}` with the mock server URI
pub fn definition(id: &str, base: &str, body: &str) -> SiteDefinition {
    let text = format!(
        "id = \"{}\"\nlinks = [\"{}/\"]\n{}",
        id,
        base,
        body.replace("{base}", base)
    );
    SiteDefinition::from_toml(id, &text).unwrap()
}

pub fn site_config(pairs: &[(&str, &str)]) -> SiteConfig {
    SiteConfig {
        url: None,
        settings: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn runner(definition: SiteDefinition) -> Runner {
    Runner::new(
        definition,
        SiteConfig::default(),
        &RuntimeConfig::default(),
        factory(),
        connectivity(),
    )
}

/// A result table with one `tr.row` per title
pub fn result_page(titles: &[String]) -> String {
    let rows: String = titles
        .iter()
        .map(|t| {
            format!(
                r#"<tr class="row"><td><a class="title" href="/dl?t={t}">{t}</a></td></tr>"#,
                t = t
            )
        })
        .collect();
    format!("<html><body><table>{}</table></body></html>", rows)
}

pub fn titles(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|n| format!("{} {}", prefix, n)).collect()
}

/// Search block shared by the crawl tests
pub const SEARCH: &str = r#"
[search]
path = "/search"
inputs = { q = "{{ .Keywords }}", page = "{{ .Page }}" }
rows = { selector = "tr.row" }

[search.fields.title]
selector = "a.title"

[search.fields.download]
selector = "a.title"
attribute = "href"
"#;
