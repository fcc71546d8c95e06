//! HTTP handlers for the acceptor service

mod articles;

pub use articles::{ApiError, compact, health, save_article};
