//! Date-range filter: drops programmes starting at or after a cutoff.

use std::io::{Read, Write};

use chrono::NaiveDateTime;

use crate::error::Result;
use crate::scanner::{Element, ElementKind, Segment, TagScanner};
use crate::timestamp::{GuideClock, parse_wall_clock};
use crate::transform::{self, SegmentSink, Transform, TransformPipeline};

/// Keeps a programme only when its start is strictly before the cutoff.
/// Everything else passes through byte-for-byte.
#[derive(Debug)]
pub struct DateRangeFilter {
    scanner: TagScanner,
    rule: CutoffRule,
}

#[derive(Debug)]
struct CutoffRule {
    cutoff: NaiveDateTime,
    kept: usize,
    dropped: usize,
    unparsed: usize,
}

impl CutoffRule {
    fn keeps(&mut self, element: &Element) -> bool {
        if element.kind() != ElementKind::Programme {
            return true;
        }
        match element.start().and_then(parse_wall_clock) {
            Some(start) if start >= self.cutoff => {
                self.dropped = self.dropped.saturating_add(1);
                false
            }
            Some(_) => {
                self.kept = self.kept.saturating_add(1);
                true
            }
            None => {
                self.unparsed = self.unparsed.saturating_add(1);
                true
            }
        }
    }
}

impl SegmentSink for CutoffRule {
    fn segment(&mut self, segment: Segment, out: &mut Vec<u8>) -> Result<()> {
        match segment {
            Segment::Text(bytes) | Segment::RootClose(bytes) => out.extend_from_slice(&bytes),
            Segment::Element(element) => {
                if self.keeps(&element) {
                    out.extend_from_slice(element.raw());
                }
            }
        }
        Ok(())
    }

    fn end(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        tracing::debug!(
            cutoff = %self.cutoff,
            kept = self.kept,
            dropped = self.dropped,
            unparsed = self.unparsed,
            "Date-range filter finished"
        );
        Ok(())
    }
}

impl DateRangeFilter {
    /// Filter with an explicit local wall-clock cutoff.
    #[must_use]
    pub fn new(cutoff: NaiveDateTime) -> Self {
        Self {
            scanner: TagScanner::new(),
            rule: CutoffRule {
                cutoff,
                kept: 0,
                dropped: 0,
                unparsed: 0,
            },
        }
    }

    /// Filter keeping `days` whole days starting at day 0's local midnight.
    ///
    /// `days = 0` keeps nothing dated; `days = 2` keeps today and tomorrow.
    #[must_use]
    pub fn for_days(clock: &GuideClock, days: u32) -> Option<Self> {
        clock.day_start(days).map(Self::new)
    }

    /// Replaces the scanner (e.g. with a different element size ceiling).
    #[must_use]
    pub fn with_scanner(mut self, scanner: TagScanner) -> Self {
        self.scanner = scanner;
        self
    }

    /// Cutoff instant.
    #[must_use]
    pub const fn cutoff(&self) -> NaiveDateTime {
        self.rule.cutoff
    }

    /// Number of programmes dropped so far.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.rule.dropped
    }
}

impl Transform for DateRangeFilter {
    fn push(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.scanner.feed(chunk);
        transform::drain(&mut self.scanner, &mut self.rule, out)
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        transform::finish(&mut self.scanner, &mut self.rule, out)
    }
}

/// Streams `input` to `output`, dropping programmes at or after `cutoff`.
/// Without a cutoff the document is copied unchanged.
///
/// # Errors
///
/// Returns [`XmltvError::Structural`](crate::XmltvError::Structural) for an
/// unterminated element and I/O errors from either side.
pub fn filter_document<R: Read, W: Write>(
    input: R,
    output: W,
    cutoff: Option<NaiveDateTime>,
) -> Result<u64> {
    TransformPipeline::new()
        .maybe_stage(cutoff.map(DateRangeFilter::new))
        .run(input, output)
}
