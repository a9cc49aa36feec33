//! Feed access: opening the upstream byte stream and pulling raw records out of it.

pub mod parser;
pub mod source;

use std::io;

use reqwest::StatusCode;
use thiserror::Error;

pub use parser::{FeedItems, ItemLocation, MatchedShape, DEFAULT_LOCATIONS};
pub use source::{FeedReader, FeedSource, FileFeedSource, HttpFeedSource, StaticFeedSource};

/// Fatal feed failures. Anything recoverable (a bad line, an unroutable record,
/// a document that breaks off midway) is handled locally and never surfaces here.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("feed returned HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("feed read failed: {0}")]
    Io(#[from] io::Error),
}
