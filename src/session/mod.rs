//! Session module for site authentication
//!
//! This module manages authenticated access to sites:
//! - Login strategies (form, post, cookie)
//! - Per-session login state machine and verification
//! - Round-robin pools of independently logged-in sessions

mod browser;
mod login;
mod multiplexer;

pub use browser::{BrowsingSession, DEFAULT_VERIFY_INTERVAL};
pub use login::{LoginError, LoginStrategy};
pub use multiplexer::{SessionLease, SessionMultiplexer, SessionTemplate};
