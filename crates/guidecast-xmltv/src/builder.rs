//! Serializes merged guide data into an XMLTV document.

use std::fmt::Write as _;
use std::io::{BufWriter, Write};
use std::sync::LazyLock;

use chrono::DateTime;
use guidecast_api::guide::{Guide, GuideChannel, GuideProgram};
use quick_xml::escape::escape;
use regex::Regex;

use crate::error::Result;
use crate::timestamp::GuideClock;

/// `generator-info-name` written on the root element.
pub const GENERATOR_NAME: &str = "guidecast";

/// `S01E02` style episode numbers.
#[allow(clippy::expect_used)]
static EPISODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[Ss](\d+)\s*[Ee](\d+)$").expect("failed to compile episode regex")
});

/// Counters reported by [`write_guide`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Channel elements written.
    pub channels: usize,
    /// Programme elements written.
    pub programmes: usize,
    /// Programmes skipped for out-of-range timestamps.
    pub skipped: usize,
}

/// Converts `S01E02` into the zero-based `xmltv_ns` form `0.1.`.
#[must_use]
pub fn xmltv_ns_episode(onscreen: &str) -> Option<String> {
    let caps = EPISODE_RE.captures(onscreen.trim())?;
    let season: u32 = caps.get(1)?.as_str().parse().ok()?;
    let episode: u32 = caps.get(2)?.as_str().parse().ok()?;
    Some(format!(
        "{}.{}.",
        season.saturating_sub(1),
        episode.saturating_sub(1)
    ))
}

fn push_text_element(buf: &mut String, indent: &str, name: &str, text: &str) {
    let _ = writeln!(buf, "{indent}<{name}>{}</{name}>", escape(text));
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn channel_element(channel: &GuideChannel) -> String {
    let number = channel.guide_number.as_str();
    let mut buf = String::new();
    let _ = writeln!(buf, "  <channel id=\"{}\">", escape(number));
    if let Some(name) = non_empty(channel.guide_name.as_ref()) {
        push_text_element(&mut buf, "    ", "display-name", name);
        push_text_element(&mut buf, "    ", "display-name", &format!("{number} {name}"));
    }
    push_text_element(&mut buf, "    ", "display-name", number);
    if let Some(affiliate) = non_empty(channel.affiliate.as_ref()) {
        push_text_element(&mut buf, "    ", "display-name", affiliate);
    }
    if let Some(icon) = non_empty(channel.image_url.as_ref()) {
        let _ = writeln!(buf, "    <icon src=\"{}\"/>", escape(icon));
    }
    buf.push_str("  </channel>\n");
    buf
}

fn programme_element(channel: &str, program: &GuideProgram, clock: &GuideClock) -> Option<String> {
    let start = clock.format_unix(program.start_time)?;
    let stop = clock.format_unix(program.end_time)?;

    let mut buf = String::new();
    let _ = writeln!(
        buf,
        "  <programme start=\"{start}\" stop=\"{stop}\" channel=\"{}\">",
        escape(channel)
    );
    push_text_element(&mut buf, "    ", "title", &program.title);
    if let Some(sub_title) = non_empty(program.episode_title.as_ref()) {
        push_text_element(&mut buf, "    ", "sub-title", sub_title);
    }
    if let Some(desc) = non_empty(program.synopsis.as_ref()) {
        push_text_element(&mut buf, "    ", "desc", desc);
    }
    let airdate = program
        .original_airdate
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.date_naive());
    if let Some(date) = airdate {
        let _ = writeln!(buf, "    <date>{}</date>", date.format("%Y%m%d"));
    }
    for category in program.filter.iter().filter(|c| !c.trim().is_empty()) {
        push_text_element(&mut buf, "    ", "category", category.trim());
    }
    if let Some(icon) = non_empty(program.image_url.as_ref()) {
        let _ = writeln!(buf, "    <icon src=\"{}\"/>", escape(icon));
    }
    if let Some(onscreen) = non_empty(program.episode_number.as_ref()) {
        if let Some(ns) = xmltv_ns_episode(onscreen) {
            let _ = writeln!(buf, "    <episode-num system=\"xmltv_ns\">{ns}</episode-num>");
        }
        let _ = writeln!(
            buf,
            "    <episode-num system=\"onscreen\">{}</episode-num>",
            escape(onscreen)
        );
    }
    if let Some(date) = airdate {
        if clock.date_of_unix(program.start_time) == Some(date) {
            buf.push_str("    <new/>\n");
        } else {
            let _ = writeln!(
                buf,
                "    <previously-shown start=\"{}000000\"/>",
                date.format("%Y%m%d")
            );
        }
    }
    buf.push_str("  </programme>\n");
    Some(buf)
}

/// Writes `guide` as an XMLTV document: declaration, `<tv>` root, all
/// channels, then all programmes grouped by channel in start order.
///
/// # Errors
///
/// Returns [`XmltvError::Io`](crate::XmltvError::Io) if writing fails.
pub fn write_guide<W: Write>(guide: &Guide, clock: &GuideClock, out: W) -> Result<BuildStats> {
    let mut out = BufWriter::new(out);
    let mut stats = BuildStats::default();

    out.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")?;
    out.write_all(b"<!DOCTYPE tv SYSTEM \"xmltv.dtd\">\n")?;
    writeln!(out, "<tv generator-info-name=\"{GENERATOR_NAME}\">")?;

    for channel in &guide.channels {
        out.write_all(channel_element(channel).as_bytes())?;
        stats.channels = stats.channels.saturating_add(1);
    }

    for channel in &guide.channels {
        let mut programs: Vec<&GuideProgram> = channel.programs.iter().collect();
        programs.sort_by_key(|p| p.start_time);
        for program in programs {
            match programme_element(&channel.guide_number, program, clock) {
                Some(element) => {
                    out.write_all(element.as_bytes())?;
                    stats.programmes = stats.programmes.saturating_add(1);
                }
                None => {
                    tracing::warn!(
                        channel = %channel.guide_number,
                        start = program.start_time,
                        "Programme timestamp out of range, skipped"
                    );
                    stats.skipped = stats.skipped.saturating_add(1);
                }
            }
        }
    }

    out.write_all(b"</tv>\n")?;
    out.flush()?;
    tracing::debug!(
        channels = stats.channels,
        programmes = stats.programmes,
        skipped = stats.skipped,
        "XMLTV document written"
    );
    Ok(stats)
}
