/// Clipforge - TikTok account linking, publishing and generation callbacks
///
/// Links creator accounts through PKCE OAuth, publishes videos with
/// idempotent, quota-limited semantics and reconciles completion callbacks
/// of the video generation automation.
pub mod accounts;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod error;
pub mod generation;
pub mod jobs;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod tiktok;
