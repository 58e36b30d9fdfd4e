//! Search data model
//!
//! Queries going in, result items coming out, the continuation context passed
//! between paginated calls and the placeholder templates definitions use to build
//! requests.

mod context;
mod query;
mod result;
pub mod template;

pub use context::SearchContext;
pub use query::{Query, RangeField};
pub use result::{fingerprint, parse_size, ResultItem};
pub use template::{TemplateError, TemplateVars};
