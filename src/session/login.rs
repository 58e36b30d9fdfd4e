//! Login strategies
//!
//! A definition selects exactly one strategy through its `method` field. Each
//! strategy performs the login request(s) with already-resolved input values and
//! hands the final response back to the session for error matching and
//! verification.

use crate::crawler::parser::find_form;
use crate::crawler::{ContentFetcher, FetchResult, RequestOptions};
use crate::indexer::{LoginBlock, LoginMethod};
use crate::search::TemplateError;
use crate::TrawlError;
use thiserror::Error;
use url::Url;

/// Authentication failures
///
/// These are fatal to a search call and stop watch loops. Network failures
/// during login surface as fetch errors instead.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Missing credential '{key}' for site {site}")]
    MissingCredential { site: String, key: String },

    #[error("Login rejected by {site}: {message}")]
    Rejected { site: String, message: String },

    #[error("Login to {site} could not be verified")]
    VerificationFailed { site: String },

    #[error("Login to {site} failed earlier, not retrying")]
    Abandoned { site: String },

    #[error("Login form '{selector}' not found")]
    FormNotFound { selector: String },

    #[error("Login template error: {0}")]
    Template(#[from] TemplateError),
}

const DEFAULT_FORM_SELECTOR: &str = "form";

/// How a session authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStrategy {
    /// Fetch the login page, fill the named form and submit it
    Form {
        path: String,
        selector: String,
        submit_path: Option<String>,
    },
    /// Post the inputs to the login endpoint
    Post { path: String },
    /// Inject the `cookie` input into the jar and load a page
    Cookie { path: String },
}

impl LoginStrategy {
    pub fn from_block(block: &LoginBlock) -> Self {
        match block.method {
            LoginMethod::Form => Self::Form {
                path: block.path.clone(),
                selector: block
                    .form
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FORM_SELECTOR.to_string()),
                submit_path: block.submit_path.clone(),
            },
            LoginMethod::Post => Self::Post {
                path: block.path.clone(),
            },
            LoginMethod::Cookie => Self::Cookie {
                path: block.path.clone(),
            },
        }
    }

    pub fn method(&self) -> LoginMethod {
        match self {
            Self::Form { .. } => LoginMethod::Form,
            Self::Post { .. } => LoginMethod::Post,
            Self::Cookie { .. } => LoginMethod::Cookie,
        }
    }

    /// Performs the login and returns the final response
    ///
    /// # Arguments
    ///
    /// * `fetcher` - The session's fetcher, whose cookie jar receives the session
    /// * `base` - Base URL of the site
    /// * `inputs` - Resolved input values
    pub async fn perform(
        &self,
        fetcher: &dyn ContentFetcher,
        base: &Url,
        inputs: &[(String, String)],
    ) -> Result<FetchResult, TrawlError> {
        let result = match self {
            Self::Form {
                path,
                selector,
                submit_path,
            } => {
                let login_url = base.join(path)?;
                let page = fetcher
                    .fetch(&RequestOptions::get(login_url.clone()))
                    .await?
                    .ensure_success()?;
                let html = page.html().unwrap_or_default();
                let form = find_form(html, selector)
                    .map_err(|message| crate::crawler::FetchError::Content {
                        url: login_url.to_string(),
                        message,
                    })?
                    .ok_or_else(|| LoginError::FormNotFound {
                        selector: selector.clone(),
                    })?;

                let mut values = form.inputs;
                for (name, value) in inputs {
                    match values.iter_mut().find(|(existing, _)| existing == name) {
                        Some(slot) => slot.1 = value.clone(),
                        None => values.push((name.clone(), value.clone())),
                    }
                }

                let action = match (submit_path, &form.action) {
                    (Some(submit), _) => base.join(submit)?,
                    (None, Some(action)) if !action.is_empty() => page.url().join(action)?,
                    _ => page.url().clone(),
                };
                tracing::debug!("Submitting login form to {}", action);

                let request = if form.method == "get" {
                    RequestOptions::get(action).with_form(values)
                } else {
                    RequestOptions::post(action, values)
                };
                fetcher
                    .fetch(&request.with_referer(login_url.as_str()))
                    .await?
            }
            Self::Post { path } => {
                let url = base.join(path)?;
                fetcher
                    .fetch(&RequestOptions::post(url, inputs.to_vec()).with_referer(base.as_str()))
                    .await?
            }
            Self::Cookie { path } => {
                let cookie = inputs
                    .iter()
                    .find(|(name, _)| name == "cookie")
                    .map(|(_, value)| value.as_str())
                    .unwrap_or_default();
                fetcher.set_cookies(base, cookie);
                let url = if path.is_empty() {
                    base.clone()
                } else {
                    base.join(path)?
                };
                fetcher.fetch(&RequestOptions::get(url)).await?
            }
        };

        Ok(result.ensure_success()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::crawler::HttpFetcher;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn block(method: LoginMethod) -> LoginBlock {
        LoginBlock {
            method,
            path: "/login".to_string(),
            form: Some("form#login".to_string()),
            submit_path: None,
            init: None,
            inputs: BTreeMap::new(),
            error: Vec::new(),
            test: None,
        }
    }

    fn inputs() -> Vec<(String, String)> {
        vec![
            ("username".to_string(), "alice".to_string()),
            ("password".to_string(), "secret".to_string()),
        ]
    }

    #[test]
    fn test_from_block() {
        assert_eq!(
            LoginStrategy::from_block(&block(LoginMethod::Form)),
            LoginStrategy::Form {
                path: "/login".to_string(),
                selector: "form#login".to_string(),
                submit_path: None,
            }
        );

        let mut post = block(LoginMethod::Post);
        post.form = None;
        assert_eq!(LoginStrategy::from_block(&post).method(), LoginMethod::Post);

        let mut form = block(LoginMethod::Form);
        form.form = None;
        match LoginStrategy::from_block(&form) {
            LoginStrategy::Form { selector, .. } => assert_eq!(selector, "form"),
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_form_login_keeps_hidden_inputs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<form id="login" action="/takelogin" method="post">
                     <input type="hidden" name="csrf" value="tok123">
                     <input name="username"><input type="password" name="password">
                   </form>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/takelogin"))
            .and(body_string_contains("csrf=tok123"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("password=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&TransportConfig::default()).unwrap();
        let base = Url::parse(&server.uri()).unwrap();
        let strategy = LoginStrategy::from_block(&block(LoginMethod::Form));

        let result = strategy.perform(&fetcher, &base, &inputs()).await.unwrap();
        assert_eq!(result.html(), Some("welcome"));
    }

    #[tokio::test]
    async fn test_form_login_missing_form() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>maintenance</p>"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&TransportConfig::default()).unwrap();
        let base = Url::parse(&server.uri()).unwrap();
        let strategy = LoginStrategy::from_block(&block(LoginMethod::Form));

        let error = strategy.perform(&fetcher, &base, &inputs()).await.unwrap_err();
        assert!(error.is_login_error());
    }

    #[tokio::test]
    async fn test_post_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("username=alice"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&TransportConfig::default()).unwrap();
        let base = Url::parse(&server.uri()).unwrap();
        let strategy = LoginStrategy::from_block(&block(LoginMethod::Post));

        assert!(strategy.perform(&fetcher, &base, &inputs()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cookie_login_sends_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .and(header("cookie", "uid=7"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello uid 7"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&TransportConfig::default()).unwrap();
        let base = Url::parse(&server.uri()).unwrap();
        let strategy = LoginStrategy::from_block(&block(LoginMethod::Cookie));
        let inputs = vec![("cookie".to_string(), "uid=7".to_string())];

        let result = strategy.perform(&fetcher, &base, &inputs).await.unwrap();
        assert_eq!(result.html(), Some("hello uid 7"));
    }

    #[tokio::test]
    async fn test_login_error_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&TransportConfig::default()).unwrap();
        let base = Url::parse(&server.uri()).unwrap();
        let strategy = LoginStrategy::from_block(&block(LoginMethod::Post));

        let error = strategy.perform(&fetcher, &base, &inputs()).await.unwrap_err();
        assert!(error.is_fetch_error());
        assert!(!error.is_login_error());
    }
}
