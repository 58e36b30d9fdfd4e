//! Integration tests for searches and crawls
//!
//! Each mock server plays one site; runners, aggregates and the worker pool are
//! driven against them end-to-end.

use crate::common::{connectivity, definition, factory, result_page, runner, titles, SEARCH};
use std::sync::Arc;
use std::time::Duration;
use sumi_trawl::config::{Config, RuntimeConfig, SiteConfig};
use sumi_trawl::crawler::{CrawlSummary, WorkerPool};
use sumi_trawl::indexer::{Indexer, IndexerScope, MemorySource};
use sumi_trawl::storage::{MemoryStorage, SqliteStorage, Storage};
use sumi_trawl::{Query, Runner};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .set_body_string(body)
}

/// Serves `pages[n]` as page `n + 1`; later pages are empty
async fn mount_pages(server: &MockServer, prefix: &str, pages: &[usize]) {
    for (index, count) in pages.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("page", (index + 1).to_string()))
            .respond_with(html(result_page(&titles(
                &format!("{} p{}", prefix, index + 1),
                *count,
            ))))
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(html(result_page(&[])))
        .mount(server)
        .await;
}

/// Serves `count` fresh rows on every page
async fn mount_endless(server: &MockServer, prefix: &str, count: usize) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(html(result_page(&titles(prefix, count))))
        .mount(server)
        .await;
}

fn scope(sites: &[(&str, &MockServer)]) -> IndexerScope {
    let mut source = MemorySource::new();
    for (id, server) in sites {
        source.insert(definition(id, &server.uri(), SEARCH));
    }
    IndexerScope::new(Config::default(), Arc::new(source), factory()).unwrap()
}

async fn crawl(indexers: Vec<Arc<dyn Indexer>>, query: Query) -> CrawlSummary {
    let pool = WorkerPool::new(
        indexers,
        query,
        &RuntimeConfig::default(),
        CancellationToken::new(),
    )
    .unwrap();
    tokio::time::timeout(Duration::from_secs(30), pool.collect())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_runner_continues_from_context() {
    let server = MockServer::start().await;
    mount_pages(&server, "alpha", &[2, 1]).await;
    let runner = runner(definition("alpha", &server.uri(), SEARCH));
    let query = Query::new("linux");

    let first = runner.search(&query, None).await.unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].title, "alpha p1 0");
    assert!(first.items[0]
        .link
        .as_deref()
        .is_some_and(|l| l.starts_with(&server.uri())));

    let second = runner.search(&query, Some(first.context)).await.unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].title, "alpha p2 0");
    assert_eq!(second.context.start_index, 3);

    let third = runner.search(&query, Some(second.context)).await.unwrap();
    assert!(third.items.is_empty());
}

#[tokio::test]
async fn test_failed_search_invalidates_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cache = connectivity();
    let runner = Runner::new(
        definition("flaky", &server.uri(), SEARCH),
        SiteConfig::default(),
        &RuntimeConfig::default(),
        factory(),
        Arc::clone(&cache),
    );
    let base = format!("{}/", server.uri());
    assert!(cache.is_ok(&base));

    let err = runner.search(&Query::new("x"), None).await.unwrap_err();
    assert!(err.is_fetch_error());
    assert!(!cache.is_ok(&base));
}

#[tokio::test]
async fn test_unparseable_page_invalidates_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(html(result_page(&titles("row", 1))))
        .mount(&server)
        .await;

    let cache = connectivity();
    let broken_selector = SEARCH.replace(r#"rows = { selector = "tr.row" }"#, r#"rows = { selector = "tr[" }"#);
    let runner = Runner::new(
        definition("garbled", &server.uri(), &broken_selector),
        SiteConfig::default(),
        &RuntimeConfig::default(),
        factory(),
        Arc::clone(&cache),
    );

    let err = runner.search(&Query::new("x"), None).await.unwrap_err();
    assert!(err.is_fetch_error());
    assert!(!cache.is_ok(&format!("{}/", server.uri())));
}

#[tokio::test]
async fn test_pool_walks_pages_until_empty() {
    let alpha = MockServer::start().await;
    let beta = MockServer::start().await;
    mount_pages(&alpha, "alpha", &[2, 2, 1]).await;
    mount_pages(&beta, "beta", &[3]).await;

    let scope = scope(&[("alpha", &alpha), ("beta", &beta)]);
    let summary = crawl(scope.lookup(None).unwrap(), Query::new("x")).await;

    assert!(summary.failures.is_empty());
    assert_eq!(summary.items.len(), 8);
    // Three pages plus the empty one for alpha, one plus the empty one for beta
    assert_eq!(summary.pages, 6);
}

#[tokio::test]
async fn test_pool_respects_page_limit() {
    let server = MockServer::start().await;
    mount_endless(&server, "deep", 4).await;

    let limited = definition(
        "deep",
        &server.uri(),
        &SEARCH.replace("[search]\n", "[search]\nmax-pages = 2\n"),
    );
    assert_eq!(limited.search.max_pages, Some(2));

    let indexers: Vec<Arc<dyn Indexer>> = vec![Arc::new(runner(limited))];
    let summary = crawl(indexers, Query::new("x")).await;
    assert_eq!(summary.pages, 2);
    assert_eq!(summary.items.len(), 8);
}

#[tokio::test]
async fn test_pool_limit_caps_results_across_sites() {
    let alpha = MockServer::start().await;
    let beta = MockServer::start().await;
    mount_endless(&alpha, "alpha", 5).await;
    mount_endless(&beta, "beta", 5).await;

    let scope = scope(&[("alpha", &alpha), ("beta", &beta)]);
    let summary = crawl(scope.lookup(None).unwrap(), Query::new("x").with_limit(6)).await;

    assert_eq!(summary.items.len(), 6);
}

#[tokio::test]
async fn test_range_field_pagination() {
    let server = MockServer::start().await;
    for offset in ["00", "01", "02"] {
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("offset", offset))
            .respond_with(html(result_page(&[format!("offset {}", offset)])))
            .expect(1)
            .mount(&server)
            .await;
    }

    let runner: Arc<dyn Indexer> = Arc::new(runner(definition("ranged", &server.uri(), SEARCH)));
    let summary = crawl(vec![runner], Query::new("x").with_range("offset", "00", "02")).await;

    let mut found: Vec<String> = summary.items.into_iter().map(|i| i.title).collect();
    found.sort();
    assert_eq!(found, vec!["offset 00", "offset 01", "offset 02"]);
}

#[tokio::test]
async fn test_aggregate_interleaves_sites() {
    let alpha = MockServer::start().await;
    let beta = MockServer::start().await;
    mount_pages(&alpha, "alpha", &[2]).await;
    mount_pages(&beta, "beta", &[1]).await;

    let scope = scope(&[("alpha", &alpha), ("beta", &beta)]);
    let aggregate = scope.aggregate(None).unwrap();
    let outcome = aggregate.search(&Query::new("x"), None).await.unwrap();

    let found: Vec<&str> = outcome.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(found, vec!["alpha p1 0", "beta p1 0", "alpha p1 1"]);
    assert_eq!(outcome.context.children["alpha"].page, 2);
    assert_eq!(outcome.context.children["beta"].start_index, 1);
}

#[tokio::test]
async fn test_aggregate_tolerates_failing_site() {
    let healthy = MockServer::start().await;
    let broken = MockServer::start().await;
    mount_pages(&healthy, "healthy", &[2]).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;

    let scope = scope(&[("broken", &broken), ("healthy", &healthy)]);
    let outcome = scope
        .aggregate(None)
        .unwrap()
        .search(&Query::new("x"), None)
        .await
        .unwrap();

    assert_eq!(outcome.items.len(), 2);
    assert!(outcome.items.iter().all(|i| i.site == "healthy"));
}

#[tokio::test]
async fn test_repeat_crawl_stops_on_stale_results() {
    let server = MockServer::start().await;
    mount_pages(&server, "stale", &[2, 2, 2]).await;

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let stop_on_stale = definition(
        "stale",
        &server.uri(),
        &SEARCH.replace("[search]\n", "[search]\nstop-on-stale = true\n"),
    );
    let indexer: Arc<dyn Indexer> = Arc::new(
        runner(stop_on_stale).with_storage(Arc::clone(&storage)),
    );

    let first = crawl(vec![Arc::clone(&indexer)], Query::new("x")).await;
    assert_eq!(first.items.len(), 6);
    assert!(first.items.iter().all(|i| i.is_new));

    let second = crawl(vec![indexer], Query::new("x")).await;
    assert_eq!(second.pages, 1);
    assert!(second.items.iter().all(|i| i.is_stale()));
    assert_eq!(storage.size().unwrap(), 6);
}

#[tokio::test]
async fn test_sqlite_storage_classifies_updates() {
    let dir = TempDir::new().unwrap();
    let storage: Arc<dyn Storage> =
        Arc::new(SqliteStorage::new(&dir.path().join("results.db")).unwrap());

    let server = MockServer::start().await;
    let definition = definition(
        "sizes",
        &server.uri(),
        &format!(
            "{}\n[search.fields.size]\nselector = \"td.size\"\noptional = true\n",
            SEARCH
        ),
    );
    let runner = runner(definition).with_storage(Arc::clone(&storage));

    let row = |size: &str| {
        format!(
            r#"<html><body><table><tr class="row"><td><a class="title" href="/dl/1">Item</a></td><td class="size">{}</td></tr></table></body></html>"#,
            size
        )
    };
    Mock::given(method("GET"))
        .respond_with(html(row("1 GB")))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html(row("2 GB")))
        .mount(&server)
        .await;

    let query = Query::new("item");
    let first = runner.search(&query, None).await.unwrap().items;
    let second = runner.search(&query, None).await.unwrap().items;
    let third = runner.search(&query, None).await.unwrap().items;

    assert!(first[0].is_new);
    assert!(second[0].is_stale());
    assert!(!third[0].is_new && third[0].is_update);
    assert_eq!(third[0].size, Some(2 * 1024 * 1024 * 1024));
    assert_eq!(first[0].uuid, third[0].uuid);
    storage.close().unwrap();
}
