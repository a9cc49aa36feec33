//! Incremental extraction of raw records from a feed document.
//!
//! The root shape of the feed is not contractually fixed, so extraction runs a
//! prioritized list of candidate item locations. Each candidate gets a freshly
//! opened stream and is scanned byte by byte; only one item is buffered at a
//! time. The first candidate that yields a record is kept for the rest of the
//! run. When none matches the document is re-read as newline-delimited JSON.

use std::fmt;
use std::io;

use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info, warn};

use super::source::{FeedReader, FeedSource};
use super::FeedError;
use crate::record::RawProductRecord;

/// Where the item array lives inside the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemLocation {
    /// The document itself is the array: `[ {...}, ... ]`.
    RootArray,
    /// The array is the value of a top-level field: `{ "<field>": [ ... ] }`.
    Field(&'static str),
}

impl ItemLocation {
    pub fn label(self) -> &'static str {
        match self {
            ItemLocation::RootArray => "root",
            ItemLocation::Field(name) => name,
        }
    }
}

pub const DEFAULT_LOCATIONS: [ItemLocation; 3] = [
    ItemLocation::RootArray,
    ItemLocation::Field("products"),
    ItemLocation::Field("data"),
];

/// Document shape that ended up producing the records of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedShape {
    Location(ItemLocation),
    Ndjson,
}

impl fmt::Display for MatchedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchedShape::Location(loc) => f.write_str(loc.label()),
            MatchedShape::Ndjson => f.write_str("ndjson"),
        }
    }
}

/// Lazy, non-restartable sequence of records pulled from a [`FeedSource`].
pub struct FeedItems<'a> {
    source: &'a dyn FeedSource,
    locations: Vec<ItemLocation>,
    next_location: usize,
    stage: Stage,
    shape: Option<MatchedShape>,
    yielded: u64,
    skipped: u64,
    truncated: bool,
}

enum Stage {
    Locating,
    Array(ArrayItems),
    Lines(LineItems),
    Finished,
}

impl<'a> FeedItems<'a> {
    pub fn new(source: &'a dyn FeedSource) -> Self {
        Self::with_locations(source, DEFAULT_LOCATIONS.to_vec())
    }

    pub fn with_locations(source: &'a dyn FeedSource, locations: Vec<ItemLocation>) -> Self {
        Self {
            source,
            locations,
            next_location: 0,
            stage: Stage::Locating,
            shape: None,
            yielded: 0,
            skipped: 0,
            truncated: false,
        }
    }

    /// Shape accepted so far; `None` until the first record (or the fallback) is reached.
    pub fn shape(&self) -> Option<MatchedShape> {
        self.shape
    }

    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Items or lines that were present but could not be decoded into a record.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// True when the accepted document broke off before its item array closed.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub async fn next(&mut self) -> Result<Option<RawProductRecord>, FeedError> {
        loop {
            match &mut self.stage {
                Stage::Locating => {
                    let Some(location) = self.locations.get(self.next_location).copied() else {
                        warn!(
                            target: "feed.parser",
                            source = %self.source.describe(),
                            "no item location matched; falling back to line-delimited JSON"
                        );
                        let reader = self.source.open().await?;
                        self.shape = Some(MatchedShape::Ndjson);
                        self.stage = Stage::Lines(LineItems::new(reader));
                        continue;
                    };
                    self.next_location += 1;

                    let reader = self.source.open().await?;
                    let mut items = ArrayItems::new(reader, location);
                    match items.next_item().await {
                        Ok(Some(record)) => {
                            info!(
                                target: "feed.parser",
                                location = location.label(),
                                "item location accepted"
                            );
                            self.shape = Some(MatchedShape::Location(location));
                            self.stage = Stage::Array(items);
                            self.yielded += 1;
                            return Ok(Some(record));
                        }
                        Ok(None) => {
                            debug!(
                                target: "feed.parser",
                                location = location.label(),
                                "no items at location"
                            );
                        }
                        Err(ScanError::Syntax(reason)) => {
                            debug!(
                                target: "feed.parser",
                                location = location.label(),
                                %reason,
                                "location rejected"
                            );
                        }
                        Err(ScanError::Io(e)) => return Err(e.into()),
                    }
                }
                Stage::Array(items) => match items.next_item().await {
                    Ok(Some(record)) => {
                        self.yielded += 1;
                        return Ok(Some(record));
                    }
                    Ok(None) => {
                        self.skipped += items.skipped;
                        self.stage = Stage::Finished;
                    }
                    Err(ScanError::Io(e)) => return Err(e.into()),
                    Err(ScanError::Syntax(reason)) => {
                        // Keep what was already read; the broken tail counts as one skip.
                        warn!(
                            target: "feed.parser",
                            records = self.yielded,
                            %reason,
                            "feed document broken after accepted items; stopping early"
                        );
                        self.skipped += items.skipped + 1;
                        self.truncated = true;
                        self.stage = Stage::Finished;
                    }
                },
                Stage::Lines(lines) => match lines.next_record().await? {
                    Some(record) => {
                        self.yielded += 1;
                        return Ok(Some(record));
                    }
                    None => {
                        self.skipped += lines.skipped;
                        self.stage = Stage::Finished;
                    }
                },
                Stage::Finished => return Ok(None),
            }
        }
    }
}

#[derive(Debug)]
enum ScanError {
    Io(io::Error),
    Syntax(String),
}

impl From<io::Error> for ScanError {
    fn from(e: io::Error) -> Self {
        ScanError::Io(e)
    }
}

enum ArrayState {
    Seek,
    Items { first: bool },
    Done,
}

/// Streaming walker over the items of one array location.
struct ArrayItems {
    reader: FeedReader,
    location: ItemLocation,
    state: ArrayState,
    item_buf: Vec<u8>,
    skipped: u64,
}

impl ArrayItems {
    fn new(reader: FeedReader, location: ItemLocation) -> Self {
        Self {
            reader,
            location,
            state: ArrayState::Seek,
            item_buf: Vec::new(),
            skipped: 0,
        }
    }

    async fn next_item(&mut self) -> Result<Option<RawProductRecord>, ScanError> {
        loop {
            match self.state {
                ArrayState::Done => return Ok(None),
                ArrayState::Seek => {
                    self.state = if self.seek().await? {
                        ArrayState::Items { first: true }
                    } else {
                        ArrayState::Done
                    };
                }
                ArrayState::Items { first } => {
                    self.skip_ws().await?;
                    match self.peek().await? {
                        None => {
                            return Err(ScanError::Syntax(
                                "document ended inside the item array".into(),
                            ))
                        }
                        Some(b']') => {
                            self.reader.consume(1);
                            self.state = ArrayState::Done;
                            continue;
                        }
                        Some(b',') if !first => self.reader.consume(1),
                        Some(_) if first => {}
                        Some(b) => {
                            return Err(ScanError::Syntax(format!(
                                "unexpected {:?} between items",
                                b as char
                            )))
                        }
                    }
                    self.state = ArrayState::Items { first: false };

                    let mut buf = std::mem::take(&mut self.item_buf);
                    buf.clear();
                    let scanned = self.scan_value(Some(&mut buf)).await;
                    let parsed = scanned.map(|_| serde_json::from_slice::<Value>(&buf));
                    self.item_buf = buf;
                    match parsed? {
                        Ok(Value::Object(fields)) => return Ok(Some(fields.into())),
                        Ok(_) => {
                            self.skipped += 1;
                        }
                        Err(e) => {
                            self.skipped += 1;
                            debug!(target: "feed.parser", error = %e, "skipping malformed item");
                        }
                    }
                }
            }
        }
    }

    /// Position the reader just inside the target array. `Ok(false)` means the
    /// location does not exist in this document.
    async fn seek(&mut self) -> Result<bool, ScanError> {
        self.skip_ws().await?;
        match self.location {
            ItemLocation::RootArray => {
                if self.peek().await? == Some(b'[') {
                    self.reader.consume(1);
                    return Ok(true);
                }
                Ok(false)
            }
            ItemLocation::Field(wanted) => {
                if self.peek().await? != Some(b'{') {
                    return Ok(false);
                }
                self.reader.consume(1);
                loop {
                    self.skip_ws().await?;
                    match self.peek().await? {
                        Some(b'"') => {}
                        Some(b'}') | None => return Ok(false),
                        Some(_) => return Err(ScanError::Syntax("expected an object key".into())),
                    }
                    let key = self.read_key().await?;
                    self.skip_ws().await?;
                    if self.peek().await? != Some(b':') {
                        return Err(ScanError::Syntax(format!("missing ':' after key {key:?}")));
                    }
                    self.reader.consume(1);
                    self.skip_ws().await?;

                    if key == wanted {
                        if self.peek().await? == Some(b'[') {
                            self.reader.consume(1);
                            return Ok(true);
                        }
                        return Ok(false);
                    }

                    self.scan_value(None).await?;
                    self.skip_ws().await?;
                    match self.peek().await? {
                        Some(b',') => self.reader.consume(1),
                        _ => return Ok(false),
                    }
                }
            }
        }
    }

    async fn read_key(&mut self) -> Result<String, ScanError> {
        let mut raw = Vec::new();
        self.scan_value(Some(&mut raw)).await?;
        serde_json::from_slice::<String>(&raw)
            .map_err(|e| ScanError::Syntax(format!("invalid object key: {e}")))
    }

    async fn peek(&mut self) -> io::Result<Option<u8>> {
        let buf = self.reader.fill_buf().await?;
        Ok(buf.first().copied())
    }

    async fn skip_ws(&mut self) -> io::Result<()> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(());
            }
            let ws = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            let exhausted = ws == buf.len();
            self.reader.consume(ws);
            if !exhausted {
                return Ok(());
            }
        }
    }

    /// Consume exactly one JSON value, copying its bytes into `out` when given.
    async fn scan_value(&mut self, mut out: Option<&mut Vec<u8>>) -> Result<(), ScanError> {
        self.skip_ws().await?;
        let first = match self.peek().await? {
            None => return Err(ScanError::Syntax("expected a value, found end of document".into())),
            Some(b @ (b',' | b':' | b']' | b'}')) => {
                return Err(ScanError::Syntax(format!("expected a value, found {:?}", b as char)))
            }
            Some(b) => b,
        };
        let mut scan = ValueScan::starting_with(first);
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return if scan.scalar {
                    Ok(())
                } else {
                    Err(ScanError::Syntax("document ended inside a value".into()))
                };
            }
            let (used, done) = scan.feed(buf);
            if let Some(out) = out.as_deref_mut() {
                out.extend_from_slice(&buf[..used]);
            }
            self.reader.consume(used);
            if done {
                return Ok(());
            }
        }
    }
}

/// Byte-level boundary tracker for one JSON value.
struct ValueScan {
    scalar: bool,
    depth: u32,
    in_string: bool,
    escaped: bool,
}

impl ValueScan {
    fn starting_with(first: u8) -> Self {
        Self {
            scalar: !matches!(first, b'{' | b'[' | b'"'),
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Returns how many bytes of `buf` belong to the value and whether it ended.
    fn feed(&mut self, buf: &[u8]) -> (usize, bool) {
        for (i, &b) in buf.iter().enumerate() {
            if self.scalar {
                if matches!(b, b',' | b']' | b'}') || b.is_ascii_whitespace() {
                    return (i, true);
                }
                continue;
            }
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return (i + 1, true);
                    }
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return (i + 1, true);
                    }
                }
                _ => {}
            }
        }
        (buf.len(), false)
    }
}

/// Newline-delimited fallback: every non-empty line is an independent record.
struct LineItems {
    reader: FeedReader,
    line: Vec<u8>,
    skipped: u64,
}

impl LineItems {
    fn new(reader: FeedReader) -> Self {
        Self {
            reader,
            line: Vec::new(),
            skipped: 0,
        }
    }

    async fn next_record(&mut self) -> io::Result<Option<RawProductRecord>> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
                return Ok(None);
            }
            let text = String::from_utf8_lossy(&self.line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(fields)) => return Ok(Some(fields.into())),
                Ok(_) => self.skipped += 1,
                Err(e) => {
                    self.skipped += 1;
                    debug!(target: "feed.parser", error = %e, "skipping malformed line");
                }
            }
        }
    }
}
