//! HTTP adapters for the task coordination core.
//!
//! Speaks a Graph-style API: list items tagged with `@odata.etag`,
//! conditional `If-Match` PATCH (412 on mismatch), bearer tokens from a
//! client-credentials exchange, binary content GET that may 429 under
//! throttling. Everything flows through [`auth::AuthSession`], which owns the
//! credential lifecycle and paces outbound calls.

pub mod auth;
pub mod document;
pub mod files;
pub mod list;

pub use auth::{AuthConfig, AuthSession};
pub use document::GraphDocumentStore;
pub use files::{GraphBinaryFetcher, HttpBinaryFetcher};
pub use list::GraphListStore;
