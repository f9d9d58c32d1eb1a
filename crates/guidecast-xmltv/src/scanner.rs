//! Chunk-boundary-safe scanner for top-level XMLTV elements.
//!
//! The scanner accepts arbitrary byte chunks and yields [`Segment`]s: bytes
//! outside tracked elements, complete `<channel>` / `<programme>` elements,
//! and the closing `</tv>` tag. A marker or element split across chunks is
//! retained until it is complete. Retention is bounded by the size of the
//! largest single element (plus a marker-length look-back), never by the
//! document.

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::Event;

use crate::error::{Result, XmltvError};

/// Default ceiling for one buffered element.
pub const DEFAULT_MAX_ELEMENT_LEN: usize = 4 * 1024 * 1024;

/// Top-level element kinds the scanner tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// `<channel id="...">`
    Channel,
    /// `<programme channel="..." start="...">`
    Programme,
}

impl ElementKind {
    /// XML element name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Programme => "programme",
        }
    }

    const fn close_tag(self) -> &'static [u8] {
        match self {
            Self::Channel => b"</channel",
            Self::Programme => b"</programme",
        }
    }

    /// Length of `<name`.
    const fn open_marker_len(self) -> usize {
        match self {
            Self::Channel => 8,
            Self::Programme => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Open(ElementKind),
    RootClose,
}

const MARKERS: [(&[u8], Marker); 3] = [
    (b"<channel", Marker::Open(ElementKind::Channel)),
    (b"<programme", Marker::Open(ElementKind::Programme)),
    (b"</tv", Marker::RootClose),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Marker(Marker),
    /// The buffer ends with a prefix of some marker.
    Partial,
}

/// One complete tracked element with its key attributes decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    kind: ElementKind,
    raw: Vec<u8>,
    channel_id: Option<String>,
    start: Option<String>,
}

impl Element {
    /// Element kind.
    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Exact source bytes from `<` to the closing `>`.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Consumes the element, returning its source bytes.
    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    /// `id` of a channel, or `channel` of a programme.
    #[must_use]
    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    /// Raw `start` attribute of a programme.
    #[must_use]
    pub fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }

    /// Text of the first `<display-name>` child, unescaped.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        const OPEN: &[u8] = b"<display-name";
        const CLOSE: &[u8] = b"</display-name";

        let open = find(&self.raw, OPEN, 0)?;
        let text_start = find_tag_end(&self.raw, open.checked_add(OPEN.len())?)?;
        let text_end = find(&self.raw, CLOSE, text_start)?;
        let text = std::str::from_utf8(self.raw.get(text_start..text_end)?).ok()?;
        let name = unescape(text.trim()).ok()?;
        (!name.is_empty()).then(|| name.into_owned())
    }
}

/// Unit of scanner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Bytes outside tracked elements, to be forwarded verbatim.
    Text(Vec<u8>),
    /// A complete `<channel>` or `<programme>` element.
    Element(Element),
    /// The `</tv>` closing tag.
    RootClose(Vec<u8>),
}

/// Incremental tokenizer over a stream of byte chunks.
///
/// Drive it with [`feed`](Self::feed), then call
/// [`next_segment`](Self::next_segment) until it returns `Ok(None)`. After
/// the last chunk, call [`finish`](Self::finish) once.
#[derive(Debug)]
pub struct TagScanner {
    buffer: Vec<u8>,
    /// Start of the unconsumed bytes in `buffer`.
    offset: usize,
    max_element_len: usize,
}

impl Default for TagScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl TagScanner {
    /// Scanner with the default element size ceiling.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_element_len(DEFAULT_MAX_ELEMENT_LEN)
    }

    /// Scanner that rejects elements longer than `max_element_len` bytes.
    #[must_use]
    pub const fn with_max_element_len(max_element_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            offset: 0,
            max_element_len,
        }
    }

    /// Appends a chunk to the pending input.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.compact();
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes currently retained awaiting completion.
    #[must_use]
    pub fn retained_len(&self) -> usize {
        self.pending().len()
    }

    /// Returns the next complete segment, or `Ok(None)` when more input is
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`XmltvError::Structural`] when a tracked element grows past
    /// the size ceiling or its opening tag cannot be parsed.
    pub fn next_segment(&mut self) -> Result<Option<Segment>> {
        let pending = self.pending();
        if pending.is_empty() {
            return Ok(None);
        }
        match find_boundary(pending) {
            None => {
                let all = pending.len();
                Ok(Some(Segment::Text(self.take(all))))
            }
            Some((pos, _)) if pos > 0 => Ok(Some(Segment::Text(self.take(pos)))),
            Some((_, Boundary::Partial)) => Ok(None),
            Some((_, Boundary::Marker(Marker::RootClose))) => self.next_root_close(),
            Some((_, Boundary::Marker(Marker::Open(kind)))) => self.next_element(kind),
        }
    }

    /// Flushes whatever remains after the last chunk.
    ///
    /// Call only once [`next_segment`](Self::next_segment) has returned
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`XmltvError::Structural`] if a tracked element or the root
    /// closing tag was left unterminated.
    pub fn finish(&mut self) -> Result<Option<Segment>> {
        let pending = self.pending();
        if pending.is_empty() {
            return Ok(None);
        }
        for (token, marker) in MARKERS {
            if pending.starts_with(token) {
                let what = match marker {
                    Marker::Open(kind) => format!("<{}> element", kind.name()),
                    Marker::RootClose => String::from("</tv> tag"),
                };
                return Err(XmltvError::Structural(format!(
                    "unterminated {what} at end of input ({} bytes pending)",
                    pending.len()
                )));
            }
        }
        let all = pending.len();
        Ok(Some(Segment::Text(self.take(all))))
    }

    fn pending(&self) -> &[u8] {
        self.buffer.get(self.offset..).unwrap_or_default()
    }

    /// Drops consumed bytes once they make up at least half the buffer.
    fn compact(&mut self) {
        if self.offset == 0 {
            return;
        }
        if self.offset >= self.buffer.len() {
            self.buffer.clear();
            self.offset = 0;
        } else if self.offset >= self.buffer.len() / 2 {
            self.buffer.drain(..self.offset);
            self.offset = 0;
        }
    }

    fn take(&mut self, len: usize) -> Vec<u8> {
        let segment = self.pending().get(..len).unwrap_or_default().to_vec();
        self.offset = self.offset.saturating_add(segment.len());
        segment
    }

    fn next_element(&mut self, kind: ElementKind) -> Result<Option<Segment>> {
        let pending = self.pending();
        let Some(open_end) = find_tag_end(pending, kind.open_marker_len()) else {
            return self.need_more(kind.name());
        };
        let self_closing = open_end
            .checked_sub(2)
            .and_then(|idx| pending.get(idx))
            .is_some_and(|&b| b == b'/');

        let end = if self_closing {
            open_end
        } else {
            match find_close(pending, open_end, kind.close_tag()) {
                Some(end) => end,
                None => return self.need_more(kind.name()),
            }
        };

        let raw = self.take(end);
        let (channel_id, start) =
            parse_key_attributes(kind, raw.get(..open_end).unwrap_or_default())?;
        Ok(Some(Segment::Element(Element {
            kind,
            raw,
            channel_id,
            start,
        })))
    }

    fn next_root_close(&mut self) -> Result<Option<Segment>> {
        match find(self.pending(), b">", 0) {
            Some(idx) => {
                let end = idx.saturating_add(1);
                Ok(Some(Segment::RootClose(self.take(end))))
            }
            None => self.need_more("tv"),
        }
    }

    fn need_more(&self, name: &str) -> Result<Option<Segment>> {
        if self.retained_len() > self.max_element_len {
            return Err(XmltvError::Structural(format!(
                "<{name}> element exceeds {} bytes without terminating",
                self.max_element_len
            )));
        }
        Ok(None)
    }
}

const fn is_delimiter(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'>' | b'/')
}

/// Classifies the bytes starting at a `<`.
fn classify(rest: &[u8]) -> Option<Boundary> {
    let mut partial = false;
    for (token, marker) in MARKERS {
        if rest.len() > token.len() {
            let delimited = rest.get(token.len()).is_some_and(|&b| is_delimiter(b));
            if rest.starts_with(token) && delimited {
                return Some(Boundary::Marker(marker));
            }
        } else if token.starts_with(rest) {
            partial = true;
        }
    }
    partial.then_some(Boundary::Partial)
}

/// Position of the first complete or partial marker.
fn find_boundary(buf: &[u8]) -> Option<(usize, Boundary)> {
    buf.iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'<')
        .find_map(|(pos, _)| classify(buf.get(pos..)?).map(|boundary| (pos, boundary)))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    let window = haystack.get(from..)?;
    window
        .windows(needle.len())
        .position(|w| w == needle)
        .and_then(|idx| idx.checked_add(from))
}

/// Index one past the `>` closing the tag that started before `from`,
/// ignoring `>` inside quoted attribute values.
fn find_tag_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (idx, &b) in buf.iter().enumerate().skip(from) {
        match quote {
            Some(q) if q == b => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return idx.checked_add(1),
            None => {}
        }
    }
    None
}

/// Index one past the `>` of `close_tag` (e.g. `</programme  >`).
fn find_close(buf: &[u8], from: usize, close_tag: &[u8]) -> Option<usize> {
    let mut search = from;
    loop {
        let after = find(buf, close_tag, search)?.checked_add(close_tag.len())?;
        let mut idx = after;
        loop {
            match buf.get(idx) {
                None => return None,
                Some(b'>') => return idx.checked_add(1),
                Some(b) if b.is_ascii_whitespace() => idx = idx.checked_add(1)?,
                Some(_) => break,
            }
        }
        search = after;
    }
}

type KeyAttributes = (Option<String>, Option<String>);

fn parse_key_attributes(kind: ElementKind, open_tag: &[u8]) -> Result<KeyAttributes> {
    let malformed = |detail: String| {
        XmltvError::Structural(format!("<{}> opening tag: {detail}", kind.name()))
    };

    let mut reader = Reader::from_reader(open_tag);
    let tag = match reader.read_event() {
        Ok(Event::Start(tag) | Event::Empty(tag)) => tag,
        Ok(other) => return Err(malformed(format!("unexpected event {other:?}"))),
        Err(e) => return Err(malformed(e.to_string())),
    };

    let mut channel_id = None;
    let mut start = None;
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| malformed(e.to_string()))?;
        let slot = match (kind, attr.key.as_ref()) {
            (ElementKind::Channel, b"id") | (ElementKind::Programme, b"channel") => &mut channel_id,
            (ElementKind::Programme, b"start") => &mut start,
            _ => continue,
        };
        let value = std::str::from_utf8(&attr.value).map_err(|e| malformed(e.to_string()))?;
        let value = unescape(value).map_err(|e| malformed(e.to_string()))?;
        *slot = Some(value.into_owned());
    }
    Ok((channel_id, start))
}
