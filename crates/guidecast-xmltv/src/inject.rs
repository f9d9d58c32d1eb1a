//! Placeholder injector: fills channels that have no programmes with
//! back-to-back filler blocks, and adds lineup channels missing from the
//! document.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use chrono::{NaiveDateTime, TimeDelta};
use quick_xml::escape::escape;

use crate::duration::{DEFAULT_BLOCK_MINUTES, parse_block_duration};
use crate::error::{Result, XmltvError};
use crate::scanner::{Element, ElementKind, Segment, TagScanner};
use crate::timestamp::GuideClock;
use crate::transform::{self, SegmentSink, Transform};

/// Default placeholder title.
pub const DEFAULT_TITLE: &str = "No Information";

/// Default placeholder description; `{channel}` is replaced per channel.
pub const DEFAULT_DESCRIPTION: &str = "No guide data available for {channel}.";

/// Default number of days covered by placeholders.
pub const DEFAULT_DAYS: u32 = 7;

/// Token replaced by the channel's display name.
const CHANNEL_TOKEN: &str = "{channel}";

/// How placeholder programmes look and how far they reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSpec {
    /// Length of every block.
    pub block: TimeDelta,
    /// Programme title.
    pub title: String,
    /// Description template.
    pub description: String,
    /// Days covered starting at day 0's local midnight.
    pub days: u32,
}

impl Default for PlaceholderSpec {
    fn default() -> Self {
        Self {
            block: TimeDelta::minutes(DEFAULT_BLOCK_MINUTES),
            title: String::from(DEFAULT_TITLE),
            description: String::from(DEFAULT_DESCRIPTION),
            days: DEFAULT_DAYS,
        }
    }
}

impl PlaceholderSpec {
    /// Spec for a duration token, or `None` when the token disables
    /// placeholders.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        parse_block_duration(token).map(|block| Self {
            block,
            ..Self::default()
        })
    }

    /// Description for one channel.
    #[must_use]
    pub fn description_for(&self, display_name: &str) -> String {
        self.description.replace(CHANNEL_TOKEN, display_name)
    }

    /// Start/stop pairs covering `days` from day 0's midnight. The last
    /// block may run past the horizon.
    #[must_use]
    pub fn blocks(&self, clock: &GuideClock) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        let mut blocks = Vec::new();
        let Some(horizon) = clock.day_start(self.days) else {
            return blocks;
        };
        if self.block <= TimeDelta::zero() {
            return blocks;
        }
        let mut start = clock.midnight();
        while start < horizon {
            let Some(stop) = start.checked_add_signed(self.block) else {
                break;
            };
            blocks.push((start, stop));
            start = stop;
        }
        blocks
    }
}

/// One lineup entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Channel id used in the document.
    pub channel_id: String,
    /// Human-readable name.
    pub display_name: String,
}

impl RosterEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(channel_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Streaming stage that synthesizes channels and placeholder programmes.
///
/// Lineup channels absent from the document are inserted just before the
/// first `<programme>` (or before `</tv>` when there is none). Every channel
/// without a programme gets a run of placeholders just before `</tv>`,
/// existing channels first, in document order, then inserted channels in
/// lineup order.
#[derive(Debug)]
pub struct PlaceholderInjector {
    scanner: TagScanner,
    state: InjectState,
}

#[derive(Debug)]
struct InjectState {
    spec: PlaceholderSpec,
    clock: GuideClock,
    roster: Vec<RosterEntry>,
    roster_names: HashMap<String, String>,
    /// Channels seen in the input, in order, with their resolved names.
    input_channels: Vec<(String, String)>,
    input_ids: HashSet<String>,
    covered: HashSet<String>,
    /// Lineup channels this stage added.
    inserted: Vec<RosterEntry>,
    roster_flushed: bool,
    root_closed: bool,
}

impl PlaceholderInjector {
    /// Creates an injector. Without a lineup, only channels already in the
    /// document are filled.
    #[must_use]
    pub fn new(spec: PlaceholderSpec, clock: GuideClock, roster: Option<Vec<RosterEntry>>) -> Self {
        let roster = roster.unwrap_or_else(|| {
            tracing::debug!("No channel lineup, placeholders limited to channels already in the guide");
            Vec::new()
        });
        let roster_names = roster
            .iter()
            .map(|e| (e.channel_id.clone(), e.display_name.clone()))
            .collect();
        Self {
            scanner: TagScanner::new(),
            state: InjectState {
                spec,
                clock,
                roster,
                roster_names,
                input_channels: Vec::new(),
                input_ids: HashSet::new(),
                covered: HashSet::new(),
                inserted: Vec::new(),
                roster_flushed: false,
                root_closed: false,
            },
        }
    }

    /// Replaces the scanner (e.g. with a different element size ceiling).
    #[must_use]
    pub fn with_scanner(mut self, scanner: TagScanner) -> Self {
        self.scanner = scanner;
        self
    }
}

impl InjectState {
    fn record_channel(&mut self, element: &Element) {
        let Some(id) = element.channel_id() else {
            return;
        };
        if self.roster_flushed && self.inserted.iter().any(|e| e.channel_id == id) {
            tracing::warn!(channel = id, "Channel element follows programmes and duplicates a lineup channel");
        }
        if self.input_ids.insert(id.to_owned()) {
            let name = self
                .roster_names
                .get(id)
                .cloned()
                .or_else(|| element.display_name())
                .unwrap_or_else(|| id.to_owned());
            self.input_channels.push((id.to_owned(), name));
        }
    }

    /// Writes lineup channels not yet seen in the input.
    fn flush_roster(&mut self, out: &mut Vec<u8>, before_programme: bool) {
        if self.roster_flushed {
            return;
        }
        self.roster_flushed = true;

        let mut fragment = String::new();
        for entry in &self.roster {
            let new_id = !self.input_ids.contains(&entry.channel_id)
                && !self.inserted.iter().any(|e| e.channel_id == entry.channel_id);
            if new_id {
                write_channel(&mut fragment, entry);
                self.inserted.push(entry.clone());
            }
        }
        if fragment.is_empty() {
            return;
        }
        tracing::debug!(channels = self.inserted.len(), "Inserted lineup channels");

        if before_programme {
            // Preceding indentation already went out with the text segment.
            out.extend_from_slice(fragment.trim_start().as_bytes());
            out.extend_from_slice(b"  ");
        } else {
            out.extend_from_slice(fragment.as_bytes());
        }
    }

    fn write_placeholders(&self, out: &mut Vec<u8>) {
        let blocks = self.spec.blocks(&self.clock);
        let pending = self
            .input_channels
            .iter()
            .map(|(id, name)| (id.as_str(), name.as_str()))
            .chain(
                self.inserted
                    .iter()
                    .map(|e| (e.channel_id.as_str(), e.display_name.as_str())),
            )
            .filter(|(id, _)| !self.covered.contains(*id));

        let mut fragment = String::new();
        let mut filled: usize = 0;
        for (id, name) in pending {
            let title = escape(self.spec.title.as_str());
            let description = self.spec.description_for(name);
            let description = escape(description.as_str());
            for (start, stop) in &blocks {
                let _ = write!(
                    fragment,
                    "  <programme start=\"{}\" stop=\"{}\" channel=\"{}\">\n    <title>{title}</title>\n    <desc>{description}</desc>\n  </programme>\n",
                    self.clock.format(*start),
                    self.clock.format(*stop),
                    escape(id),
                );
            }
            filled = filled.saturating_add(1);
        }
        tracing::debug!(
            channels = filled,
            blocks_per_channel = blocks.len(),
            "Placeholder programmes synthesized"
        );
        out.extend_from_slice(fragment.as_bytes());
    }
}

fn write_channel(fragment: &mut String, entry: &RosterEntry) {
    let _ = write!(
        fragment,
        "  <channel id=\"{}\">\n    <display-name>{}</display-name>\n  </channel>\n",
        escape(entry.channel_id.as_str()),
        escape(entry.display_name.as_str()),
    );
}

impl SegmentSink for InjectState {
    fn segment(&mut self, segment: Segment, out: &mut Vec<u8>) -> Result<()> {
        match segment {
            Segment::Text(bytes) => out.extend_from_slice(&bytes),
            Segment::Element(element) => {
                if self.root_closed {
                    return Err(XmltvError::Structural(format!(
                        "<{}> element after </tv>",
                        element.kind().name()
                    )));
                }
                match element.kind() {
                    ElementKind::Channel => self.record_channel(&element),
                    ElementKind::Programme => {
                        self.flush_roster(out, true);
                        if let Some(id) = element.channel_id() {
                            self.covered.insert(id.to_owned());
                        }
                    }
                }
                out.extend_from_slice(element.raw());
            }
            Segment::RootClose(bytes) => {
                if self.root_closed {
                    return Err(XmltvError::Structural(String::from("duplicate </tv>")));
                }
                self.flush_roster(out, false);
                self.write_placeholders(out);
                self.root_closed = true;
                out.extend_from_slice(&bytes);
            }
        }
        Ok(())
    }

    fn end(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        if !self.root_closed {
            return Err(XmltvError::Structural(String::from(
                "input ended without a closing </tv> tag",
            )));
        }
        Ok(())
    }
}

impl Transform for PlaceholderInjector {
    fn push(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.scanner.feed(chunk);
        transform::drain(&mut self.scanner, &mut self.state, out)
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        transform::finish(&mut self.scanner, &mut self.state, out)
    }
}
