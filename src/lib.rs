//! Resolve MediaFire file pages to their direct download links.
//!
//! Request flow: [`validate`] gate, then a [`fetch::PageFetcher`], then the
//! [`extract`] strategy chain, then [`compose`] into an HTTP response.

pub mod compose;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod routes;
pub mod validate;
