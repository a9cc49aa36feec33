use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use async_compression::tokio::bufread::GzipDecoder;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;
use tracing::info;

use super::FeedError;

/// Decompressed document bytes, ready to be parsed.
pub type FeedReader = Pin<Box<dyn AsyncBufRead + Send>>;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const SNIFF_LEN: u64 = 4;

/// Something that can hand out the feed document as a byte stream.
///
/// Every call to `open` must return an independent stream positioned at the
/// start of the document: the parser reopens the feed once per candidate shape
/// because a partially consumed stream cannot be rewound.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn open(&self) -> Result<FeedReader, FeedError>;

    /// Human readable origin, safe to log (never includes credentials).
    fn describe(&self) -> String;
}

pub struct HttpFeedSource {
    client: Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpFeedSource {
    pub fn new(
        url: impl Into<String>,
        bearer_token: Option<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, FeedError> {
        let url = url.into();
        let client = Client::builder()
            .user_agent(concat!("market-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|source| FeedError::Transport {
                url: url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            url,
            bearer_token,
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn open(&self) -> Result<FeedReader, FeedError> {
        let mut req = self.client.get(&self.url).header(ACCEPT, "application/json");
        if let Some(token) = self.bearer_token.as_deref() {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|source| FeedError::Transport {
            url: self.url.clone(),
            source,
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let body: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>> =
            Box::pin(resp.bytes_stream().map_err(io::Error::other));
        let (reader, gzip) = sniff_decode(StreamReader::new(body)).await?;
        info!(target: "feed.source", url = %self.url, gzip, "feed stream opened");
        Ok(reader)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Feed document stored on local disk (plain or gzip).
pub struct FileFeedSource {
    path: PathBuf,
}

impl FileFeedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeedSource for FileFeedSource {
    async fn open(&self) -> Result<FeedReader, FeedError> {
        let file = tokio::fs::File::open(&self.path).await?;
        let (reader, gzip) = sniff_decode(file).await?;
        info!(target: "feed.source", path = %self.path.display(), gzip, "feed file opened");
        Ok(reader)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Feed document held in memory.
#[derive(Clone)]
pub struct StaticFeedSource {
    body: Bytes,
}

impl StaticFeedSource {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn open(&self) -> Result<FeedReader, FeedError> {
        let (reader, _) = sniff_decode(io::Cursor::new(self.body.clone())).await?;
        Ok(reader)
    }

    fn describe(&self) -> String {
        format!("static({} bytes)", self.body.len())
    }
}

/// Peek at the leading bytes and wrap the stream in a gzip decoder when the
/// magic number is present. The peeked bytes are always put back in front.
pub async fn sniff_decode<R>(mut reader: R) -> io::Result<(FeedReader, bool)>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    (&mut reader).take(SNIFF_LEN).read_to_end(&mut head).await?;
    let gzip = head.starts_with(&GZIP_MAGIC);
    let restored = io::Cursor::new(head).chain(reader);

    let out: FeedReader = if gzip {
        let mut decoder = GzipDecoder::new(BufReader::new(restored));
        decoder.multiple_members(true);
        Box::pin(BufReader::new(decoder))
    } else {
        Box::pin(BufReader::new(restored))
    };
    Ok((out, gzip))
}
