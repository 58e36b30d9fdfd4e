//! State module for session and host bookkeeping
//!
//! # Components
//!
//! - `LoginState`: authentication state machine of a browsing session
//! - `DomainState`: per-host request timing
//! - `DomainPacer`: enforces a minimum delay between requests to one host

mod domain_state;
mod login_state;

pub use domain_state::{DomainPacer, DomainState};
pub use login_state::LoginState;
