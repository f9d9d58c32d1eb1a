//! Push-based transform stages and the pipeline that chains them.

use std::fmt;
use std::io::{self, Read, Write};

use crate::error::Result;
use crate::scanner::{Segment, TagScanner};

/// Read size used when a pipeline drives itself from a reader.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// A streaming document stage.
///
/// Output appended to `out` is final: a stage only retains bytes it cannot
/// decide on yet.
pub trait Transform {
    /// Consumes one chunk of input.
    ///
    /// # Errors
    ///
    /// Returns an error when the input is structurally malformed.
    fn push(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Signals end of input and flushes everything retained.
    ///
    /// # Errors
    ///
    /// Returns an error when the input ended inside an element or is
    /// otherwise incomplete.
    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

/// Segment-level hook shared by scanner-backed stages.
pub(crate) trait SegmentSink {
    /// Handles one scanner segment.
    fn segment(&mut self, segment: Segment, out: &mut Vec<u8>) -> Result<()>;

    /// Runs after the scanner has been flushed.
    fn end(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// Drains every complete segment from `scanner` into `sink`.
pub(crate) fn drain(
    scanner: &mut TagScanner,
    sink: &mut impl SegmentSink,
    out: &mut Vec<u8>,
) -> Result<()> {
    while let Some(segment) = scanner.next_segment()? {
        sink.segment(segment, out)?;
    }
    Ok(())
}

/// Flushes `scanner` at end of input and notifies `sink`.
pub(crate) fn finish(
    scanner: &mut TagScanner,
    sink: &mut impl SegmentSink,
    out: &mut Vec<u8>,
) -> Result<()> {
    drain(scanner, sink, out)?;
    if let Some(segment) = scanner.finish()? {
        sink.segment(segment, out)?;
    }
    sink.end(out)
}

/// Ordered chain of stages. Each stage's output is the next one's input.
#[derive(Default)]
pub struct TransformPipeline {
    stages: Vec<Box<dyn Transform + Send>>,
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl TransformPipeline {
    /// Empty pipeline (identity).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: impl Transform + Send + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Appends a stage if present.
    #[must_use]
    pub fn maybe_stage(self, stage: Option<impl Transform + Send + 'static>) -> Self {
        match stage {
            Some(stage) => self.stage(stage),
            None => self,
        }
    }

    /// `true` when no stage is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Number of configured stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Runs one chunk through every stage.
    ///
    /// # Errors
    ///
    /// Propagates the first stage error.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut data = chunk.to_vec();
        for stage in &mut self.stages {
            let mut out = Vec::new();
            stage.push(&data, &mut out)?;
            data = out;
        }
        Ok(data)
    }

    /// Flushes every stage in order, feeding each flush to the next stage.
    ///
    /// # Errors
    ///
    /// Propagates the first stage error.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        let mut carried = Vec::new();
        for stage in &mut self.stages {
            let mut out = Vec::new();
            if !carried.is_empty() {
                stage.push(&carried, &mut out)?;
            }
            stage.finish(&mut out)?;
            carried = out;
        }
        Ok(carried)
    }

    /// Streams `input` through the pipeline into `output`, returning the
    /// number of bytes written. An empty pipeline is a plain copy.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from either side and structural errors from any
    /// stage. On error, output already written is left as is.
    pub fn run<R: Read, W: Write>(mut self, mut input: R, mut output: W) -> Result<u64> {
        if self.is_empty() {
            let copied = io::copy(&mut input, &mut output)?;
            output.flush()?;
            return Ok(copied);
        }

        let mut buf = vec![0_u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let out = self.push(buf.get(..n).unwrap_or_default())?;
            output.write_all(&out)?;
            written = written.saturating_add(byte_len(&out));
        }

        let out = self.finish()?;
        output.write_all(&out)?;
        output.flush()?;
        Ok(written.saturating_add(byte_len(&out)))
    }
}

fn byte_len(bytes: &[u8]) -> u64 {
    u64::try_from(bytes.len()).unwrap_or(u64::MAX)
}
