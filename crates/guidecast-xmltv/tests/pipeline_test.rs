//! End-to-end tests for the filter and injector pipeline.
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]
#![allow(missing_docs)]

use chrono::{FixedOffset, NaiveDate};
use guidecast_xmltv::{
    DateRangeFilter, GuideClock, PlaceholderInjector, PlaceholderSpec, RosterEntry,
    TransformPipeline, XmltvError, validate_document,
};

fn clock() -> GuideClock {
    GuideClock::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        FixedOffset::east_opt(0).unwrap(),
    )
}

fn document() -> String {
    let mut doc = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE tv SYSTEM \"xmltv.dtd\">\n<tv generator-info-name=\"test\">\n",
    );
    doc.push_str("  <channel id=\"A\">\n    <display-name>Alpha</display-name>\n  </channel>\n");
    doc.push_str("  <channel id=\"B\">\n    <display-name>Bravo</display-name>\n  </channel>\n");
    for day in 1..=5 {
        doc.push_str(&format!(
            "  <programme start=\"2024010{day}120000 +0000\" stop=\"2024010{day}130000 +0000\" channel=\"A\">\n    <title>Day {day} &amp; more</title>\n  </programme>\n"
        ));
    }
    doc.push_str("</tv>\n");
    doc
}

fn roster() -> Vec<RosterEntry> {
    vec![
        RosterEntry::new("A", "Alpha"),
        RosterEntry::new("B", "Bravo"),
        RosterEntry::new("C", "Charlie"),
    ]
}

fn pipeline() -> TransformPipeline {
    let spec = PlaceholderSpec {
        days: 2,
        ..PlaceholderSpec::from_token("6hr").unwrap()
    };
    TransformPipeline::new()
        .maybe_stage(DateRangeFilter::for_days(&clock(), 2))
        .stage(PlaceholderInjector::new(spec, clock(), Some(roster())))
}

fn run_chunked(doc: &str, chunk: usize) -> String {
    let mut pipeline = pipeline();
    let mut out = Vec::new();
    for piece in doc.as_bytes().chunks(chunk) {
        out.extend(pipeline.push(piece).unwrap());
    }
    out.extend(pipeline.finish().unwrap());
    String::from_utf8(out).unwrap()
}

#[test]
fn test_filter_then_inject() {
    // Arrange
    let doc = document();
    let mut out = Vec::new();

    // Act
    pipeline().run(doc.as_bytes(), &mut out).unwrap();
    let out = String::from_utf8(out).unwrap();

    // Assert: only days 1 and 2 survive
    assert!(out.contains("Day 1 &amp; more"));
    assert!(out.contains("Day 2 &amp; more"));
    assert!(!out.contains("Day 3"));

    // B and C get 8 blocks each (2 days / 6h); A keeps its own programmes
    assert_eq!(out.matches("channel=\"A\"").count(), 2);
    assert_eq!(out.matches("channel=\"B\"").count(), 8);
    assert_eq!(out.matches("channel=\"C\"").count(), 8);
    assert!(out.find("<channel id=\"C\">").unwrap() < out.find("<programme").unwrap());

    validate_document(out.as_bytes()).unwrap();
}

#[test]
fn test_output_does_not_depend_on_chunking() {
    // Arrange
    let doc = document();
    let reference = run_chunked(&doc, doc.len());

    // Act & Assert
    for chunk in [1, 2, 3, 7, 10, 11, 64, 1000] {
        assert_eq!(run_chunked(&doc, chunk), reference, "chunk size {chunk}");
    }
}

#[test]
fn test_identity_pipeline_preserves_bytes() {
    // Arrange
    let doc = document();
    let mut out = Vec::new();

    // Act
    TransformPipeline::new().run(doc.as_bytes(), &mut out).unwrap();

    // Assert
    assert_eq!(out, doc.as_bytes());
}

#[test]
fn test_filter_alone_preserves_untouched_bytes() {
    // Arrange: a cutoff far in the future keeps everything
    let doc = document();
    let mut out = Vec::new();

    // Act
    TransformPipeline::new()
        .maybe_stage(DateRangeFilter::for_days(&clock(), 365))
        .run(doc.as_bytes(), &mut out)
        .unwrap();

    // Assert
    assert_eq!(out, doc.as_bytes());
}

#[test]
fn test_truncated_input_is_structural() {
    // Arrange
    let doc = document();
    let cut = doc.find("<title>Day 2").unwrap();
    let mut out = Vec::new();

    // Act
    let result = pipeline().run(&doc.as_bytes()[..cut], &mut out);

    // Assert
    assert!(matches!(result, Err(XmltvError::Structural(_))));
}
