//! Session pool and login state tests

use crate::common::{connectivity, definition, factory, site_config};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use sumi_trawl::config::SiteConfig;
use sumi_trawl::session::{LoginError, SessionMultiplexer, SessionTemplate};
use sumi_trawl::state::DomainPacer;
use sumi_trawl::{LoginState, TrawlError};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const POST_LOGIN: &str = r#"
[login]
method = "post"
path = "/login"
inputs = { username = "{{ .Config.username }}", password = "{{ .Config.password }}" }
error = [{ selector = "div.error" }]
test = { path = "/account", selector = "a.logout" }

[search]
path = "/search"
rows = { selector = "tr" }

[search.fields.title]
selector = "td"
"#;

fn template(base: &str, site: SiteConfig) -> SessionTemplate {
    SessionTemplate {
        definition: Arc::new(definition("private", base, POST_LOGIN)),
        site_config: Arc::new(site),
        factory: factory(),
        connectivity: connectivity(),
        pacer: Arc::new(DomainPacer::new(Duration::ZERO)),
        verify_interval: Duration::from_secs(300),
    }
}

fn credentials() -> SiteConfig {
    site_config(&[("username", "alice"), ("password", "hunter2")])
}

/// Accepts alice's login and serves the account page to her cookie only
async fn mount_login_site(server: &MockServer, expected_logins: u64) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("username=alice"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "sid=ok; Path=/")
                .insert_header("content-type", "text/html")
                .set_body_string("<html><body>Welcome</body></html>"),
        )
        .expect(expected_logins)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("cookie", "sid=ok"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(r#"<html><body><a class="logout" href="/logout">Log out</a></body></html>"#),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_multiplexer_hands_out_sessions_round_robin() {
    let server = MockServer::start().await;
    mount_login_site(&server, 3).await;

    let pool = SessionMultiplexer::new(3, template(&server.uri(), credentials()))
        .await
        .unwrap();
    assert_eq!(pool.size(), 3);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.state(), LoginState::LoggedIn);
        ids.push(lease.id());
    }
    let distinct: BTreeSet<usize> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), 3);

    // The fourth acquire wraps around to the first session, already logged in
    let again = pool.acquire().await.unwrap();
    assert_eq!(again.id(), ids[0]);
    assert_eq!(again.state(), LoginState::LoggedIn);
}

#[tokio::test]
async fn test_zero_sessions_rejected() {
    let server = MockServer::start().await;
    let result = SessionMultiplexer::new(0, template(&server.uri(), credentials())).await;
    assert!(matches!(result, Err(TrawlError::Session(_))));
}

#[tokio::test]
async fn test_missing_credential_is_login_error() {
    let server = MockServer::start().await;
    let site = site_config(&[("username", "alice"), ("password", "  ")]);
    let pool = SessionMultiplexer::new(1, template(&server.uri(), site))
        .await
        .unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(err.is_login_error());
    assert!(matches!(
        err,
        TrawlError::Login(LoginError::MissingCredential { ref key, .. }) if key == "password"
    ));
}

#[tokio::test]
async fn test_error_pattern_rejects_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(r#"<html><body><div class="error"> Wrong password </div></body></html>"#),
        )
        .expect(2)
        .mount(&server)
        .await;

    let pool = SessionMultiplexer::new(1, template(&server.uri(), credentials()))
        .await
        .unwrap();

    let err = pool.acquire().await.unwrap_err();
    match err {
        TrawlError::Login(LoginError::Rejected { message, .. }) => {
            assert_eq!(message, "Wrong password")
        }
        other => panic!("unexpected error: {}", other),
    }

    // A failed session tries again on the next acquire
    assert!(pool.acquire().await.unwrap_err().is_login_error());
}

#[tokio::test]
async fn test_unverified_login_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;
    // No cookie is set, so the account page never shows the logout link
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Please log in</html>"))
        .mount(&server)
        .await;

    let pool = SessionMultiplexer::new(1, template(&server.uri(), credentials()))
        .await
        .unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(
        err,
        TrawlError::Login(LoginError::VerificationFailed { .. })
    ));
}

#[tokio::test]
async fn test_expired_login_is_renewed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "sid=ok; Path=/")
                .set_body_string("<html><body>Welcome</body></html>"),
        )
        .expect(2)
        .mount(&server)
        .await;

    // Mocks match in mount order: verified, then expired once, then verified again
    let logged_in = || {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html")
            .set_body_string(r#"<html><body><a class="logout">Log out</a></body></html>"#)
    };
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(logged_in())
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Please log in</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(logged_in())
        .mount(&server)
        .await;

    let mut template = template(&server.uri(), credentials());
    template.verify_interval = Duration::ZERO;
    let pool = SessionMultiplexer::new(1, template).await.unwrap();

    drop(pool.acquire().await.unwrap());

    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.state(), LoginState::LoggedIn);
}

#[tokio::test]
async fn test_unreachable_site() {
    // Nothing listens on the discard port
    let definition = definition("offline", "http://127.0.0.1:9", POST_LOGIN);
    let connectivity = connectivity();
    connectivity.invalidate("http://127.0.0.1:9/");

    let template = SessionTemplate {
        definition: Arc::new(definition),
        site_config: Arc::new(credentials()),
        factory: factory(),
        connectivity,
        pacer: Arc::new(DomainPacer::new(Duration::ZERO)),
        verify_interval: Duration::from_secs(300),
    };

    let result = SessionMultiplexer::new(1, template).await;
    assert!(matches!(result, Err(TrawlError::Unreachable { .. })));
}
