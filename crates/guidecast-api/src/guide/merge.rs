//! Window merger: folds later guide windows into the base window.

use std::collections::{HashMap, HashSet};

use super::types::Guide;

/// Counters reported by [`Guide::merge_window`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Programmes appended to base channels.
    pub added: usize,
    /// Programmes skipped because their (channel, start) was already present.
    pub duplicates: usize,
    /// Later-window channels absent from the base window (dropped).
    pub unmatched_channels: usize,
}

impl Guide {
    /// Removes programmes that repeat an earlier start time on the same
    /// channel, keeping the first occurrence.
    pub fn dedup_programs(&mut self) -> usize {
        let mut removed: usize = 0;
        for channel in &mut self.channels {
            let before = channel.programs.len();
            let mut seen = HashSet::new();
            channel.programs.retain(|p| seen.insert(p.start_time));
            removed = removed.saturating_add(before.saturating_sub(channel.programs.len()));
        }
        removed
    }

    /// Appends the programmes of `later` to matching channels of `self`.
    ///
    /// Channels are matched by guide number. For each (channel, start time)
    /// the first-seen programme wins. Channels that only appear in `later`
    /// are ignored. Never fails.
    pub fn merge_window(&mut self, later: Self) -> MergeStats {
        let mut stats = MergeStats::default();

        let mut index: HashMap<String, usize> = HashMap::new();
        for (pos, channel) in self.channels.iter().enumerate() {
            index.entry(channel.guide_number.clone()).or_insert(pos);
        }
        let mut starts: HashMap<usize, HashSet<i64>> = HashMap::new();

        for channel in later.channels {
            let Some(&pos) = index.get(&channel.guide_number) else {
                tracing::debug!(
                    channel = %channel.guide_number,
                    programs = channel.programs.len(),
                    "channel missing from base window, dropped"
                );
                stats.unmatched_channels = stats.unmatched_channels.saturating_add(1);
                continue;
            };
            let Some(target) = self.channels.get_mut(pos) else {
                continue;
            };
            let seen = starts
                .entry(pos)
                .or_insert_with(|| target.programs.iter().map(|p| p.start_time).collect());

            for program in channel.programs {
                if seen.insert(program.start_time) {
                    target.programs.push(program);
                    stats.added = stats.added.saturating_add(1);
                } else {
                    stats.duplicates = stats.duplicates.saturating_add(1);
                }
            }
        }
        stats
    }
}

/// Merges `windows` into `base` in order. The result's channel set is the
/// base window's.
#[must_use]
pub fn merge_windows(mut base: Guide, windows: impl IntoIterator<Item = Guide>) -> Guide {
    base.dedup_programs();
    for window in windows {
        base.merge_window(window);
    }
    base
}

#[cfg(test)]
mod tests {
    #![allow(clippy::indexing_slicing)]

    use super::*;
    use crate::guide::types::{GuideChannel, GuideProgram};

    fn program(start: i64, title: &str) -> GuideProgram {
        GuideProgram {
            start_time: start,
            end_time: start + 1_800,
            title: String::from(title),
            episode_title: None,
            episode_number: None,
            synopsis: None,
            image_url: None,
            original_airdate: None,
            series_id: None,
            filter: Vec::new(),
        }
    }

    fn channel(number: &str, programs: Vec<GuideProgram>) -> GuideChannel {
        GuideChannel {
            guide_number: String::from(number),
            guide_name: Some(format!("Channel {number}")),
            affiliate: None,
            image_url: None,
            programs,
        }
    }

    #[test]
    fn test_merge_appends_and_first_seen_wins() {
        // Arrange
        let mut base = Guide::new(vec![channel("2.1", vec![program(0, "a"), program(1_800, "b")])]);
        let later = Guide::new(vec![channel(
            "2.1",
            vec![program(1_800, "b-late"), program(3_600, "c")],
        )]);

        // Act
        let stats = base.merge_window(later);

        // Assert
        assert_eq!(stats.added, 1);
        assert_eq!(stats.duplicates, 1);
        let titles: Vec<&str> = base.channels[0]
            .programs
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles, ["a", "b", "c"]);
    }

    #[test]
    fn test_merge_ignores_channels_missing_from_base() {
        // Arrange
        let mut base = Guide::new(vec![channel("2.1", vec![program(0, "a")])]);
        let later = Guide::new(vec![
            channel("2.1", vec![program(1_800, "b")]),
            channel("9.1", vec![program(1_800, "x")]),
        ]);

        // Act
        let stats = base.merge_window(later);

        // Assert
        assert_eq!(stats.unmatched_channels, 1);
        assert_eq!(base.channels.len(), 1);
        assert!(base.channel("9.1").is_none());
    }

    #[test]
    fn test_merge_windows_dedups_base_and_keeps_order() {
        // Arrange
        let base = Guide::new(vec![
            channel("2.1", vec![program(0, "a"), program(0, "a-dup")]),
            channel("4.1", vec![program(0, "n")]),
        ]);
        let w1 = Guide::new(vec![channel("4.1", vec![program(1_800, "n2")])]);
        let w2 = Guide::new(vec![channel("2.1", vec![program(1_800, "b")])]);

        // Act
        let merged = merge_windows(base, [w1, w2]);

        // Assert
        assert_eq!(merged.channels[0].guide_number, "2.1");
        assert_eq!(merged.channels[0].programs.len(), 2);
        assert_eq!(merged.channels[0].programs[0].title, "a");
        assert_eq!(merged.channels[1].programs.len(), 2);
        assert_eq!(merged.program_count(), 4);
    }

    #[test]
    fn test_merge_empty_window_is_noop() {
        let mut base = Guide::new(vec![channel("2.1", vec![program(0, "a")])]);
        let stats = base.merge_window(Guide::default());
        assert_eq!(stats, MergeStats::default());
        assert_eq!(base.program_count(), 1);
    }
}
