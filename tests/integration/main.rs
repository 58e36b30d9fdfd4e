//! Integration tests for Sumi-Trawl
//!
//! These tests use wiremock to stand in for target sites and drive logins,
//! searches and crawls end-to-end.

mod common;
mod crawl_tests;
mod session_tests;
