//! Frame labels for each identity and behavior of a video.
//!
//! Labels are exchanged as integer codes: 1 behavior, 0 not behavior, -1 no
//! label. On disk a video's labels are JSON with one block list per
//! identity and behavior.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Label {
    None = -1,
    NotBehavior = 0,
    Behavior = 1,
}

impl Label {
    pub fn code(self) -> i8 {
        self as i8
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(Self::None),
            0 => Some(Self::NotBehavior),
            1 => Some(Self::Behavior),
            _ => None,
        }
    }
}

/// A run of frames carrying the same label, `end` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub start: usize,
    pub end: usize,
    /// Behavior when true, not behavior when false
    pub present: bool,
}

/// Labeled frame and bout totals for one identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelCounts {
    pub behavior_frames: usize,
    pub not_behavior_frames: usize,
    pub behavior_bouts: usize,
    pub not_behavior_bouts: usize,
}

/// Labels of one identity for one behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackLabels {
    labels: Vec<Label>,
}

impl TrackLabels {
    pub fn new(num_frames: usize) -> Self {
        Self {
            labels: vec![Label::None; num_frames],
        }
    }

    pub fn from_blocks(num_frames: usize, blocks: &[Block]) -> Result<Self> {
        let mut track = Self::new(num_frames);
        for block in blocks {
            if block.start > block.end || block.end >= num_frames {
                return Err(Error::InvalidLabels {
                    reason: format!(
                        "block {}..={} outside {num_frames} frames",
                        block.start, block.end
                    ),
                });
            }
            let label = if block.present {
                Label::Behavior
            } else {
                Label::NotBehavior
            };
            track.fill(block.start, block.end, label);
        }
        Ok(track)
    }

    pub fn num_frames(&self) -> usize {
        self.labels.len()
    }

    pub fn label_behavior(&mut self, start: usize, end: usize) {
        self.fill(start, end, Label::Behavior);
    }

    pub fn label_not_behavior(&mut self, start: usize, end: usize) {
        self.fill(start, end, Label::NotBehavior);
    }

    pub fn clear_labels(&mut self, start: usize, end: usize) {
        self.fill(start, end, Label::None);
    }

    /// `start..=end`, clipped to the track
    fn fill(&mut self, start: usize, end: usize, label: Label) {
        let Some(last) = self.labels.len().checked_sub(1) else {
            return;
        };
        let end = end.min(last);
        if start > end {
            return;
        }
        self.labels[start..=end].fill(label);
    }

    pub fn get(&self, frame: usize) -> Option<Label> {
        self.labels.get(frame).copied()
    }

    /// Frame-aligned label codes
    pub fn labels(&self) -> Array1<i8> {
        self.labels.iter().map(|l| l.code()).collect()
    }

    /// Maximal runs of labeled frames, in frame order
    pub fn blocks(&self) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for (frame, &label) in self.labels.iter().enumerate() {
            let present = match label {
                Label::None => continue,
                Label::Behavior => true,
                Label::NotBehavior => false,
            };
            match blocks.last_mut() {
                Some(block) if block.end + 1 == frame && block.present == present => {
                    block.end = frame;
                }
                _ => blocks.push(Block {
                    start: frame,
                    end: frame,
                    present,
                }),
            }
        }
        blocks
    }

    /// (behavior bouts, not behavior bouts)
    pub fn bout_counts(&self) -> (usize, usize) {
        self.blocks().iter().fold((0, 0), |(b, n), block| {
            if block.present {
                (b + 1, n)
            } else {
                (b, n + 1)
            }
        })
    }

    pub fn counts(&self) -> LabelCounts {
        let (behavior_bouts, not_behavior_bouts) = self.bout_counts();
        LabelCounts {
            behavior_frames: self.labels.iter().filter(|&&l| l == Label::Behavior).count(),
            not_behavior_frames: self
                .labels
                .iter()
                .filter(|&&l| l == Label::NotBehavior)
                .count(),
            behavior_bouts,
            not_behavior_bouts,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct VideoLabelsFile {
    file: String,
    num_frames: usize,
    labels: BTreeMap<usize, BTreeMap<String, Vec<Block>>>,
}

/// All labels of one video, keyed by identity then behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VideoLabelsFile", into = "VideoLabelsFile")]
pub struct VideoLabels {
    file: String,
    num_frames: usize,
    tracks: BTreeMap<usize, BTreeMap<String, TrackLabels>>,
}

impl TryFrom<VideoLabelsFile> for VideoLabels {
    type Error = Error;

    fn try_from(exported: VideoLabelsFile) -> Result<Self> {
        let mut labels = Self::new(exported.file, exported.num_frames);
        for (identity, behaviors) in exported.labels {
            for (behavior, blocks) in behaviors {
                let track = TrackLabels::from_blocks(exported.num_frames, &blocks)?;
                labels
                    .tracks
                    .entry(identity)
                    .or_default()
                    .insert(behavior, track);
            }
        }
        Ok(labels)
    }
}

impl From<VideoLabels> for VideoLabelsFile {
    fn from(labels: VideoLabels) -> Self {
        Self {
            file: labels.file,
            num_frames: labels.num_frames,
            labels: labels
                .tracks
                .into_iter()
                .map(|(identity, behaviors)| {
                    let behaviors = behaviors
                        .into_iter()
                        .map(|(behavior, track)| (behavior, track.blocks()))
                        .collect();
                    (identity, behaviors)
                })
                .collect(),
        }
    }
}

impl VideoLabels {
    pub fn new(file: impl Into<String>, num_frames: usize) -> Self {
        Self {
            file: file.into(),
            num_frames,
            tracks: BTreeMap::new(),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn track(&self, identity: usize, behavior: &str) -> Option<&TrackLabels> {
        self.tracks.get(&identity)?.get(behavior)
    }

    /// The track for `identity` and `behavior`, created empty if needed
    pub fn track_mut(&mut self, identity: usize, behavior: &str) -> &mut TrackLabels {
        let num_frames = self.num_frames;
        self.tracks
            .entry(identity)
            .or_default()
            .entry(behavior.to_string())
            .or_insert_with(|| TrackLabels::new(num_frames))
    }

    /// Label codes for one identity, all NONE when it has no track
    pub fn labels_for(&self, identity: usize, behavior: &str) -> Array1<i8> {
        match self.track(identity, behavior) {
            Some(track) => track.labels(),
            None => Array1::from_elem(self.num_frames, Label::None.code()),
        }
    }

    /// Identities that have a track for `behavior`
    pub fn identities(&self, behavior: &str) -> Vec<usize> {
        self.tracks
            .iter()
            .filter(|(_, behaviors)| behaviors.contains_key(behavior))
            .map(|(&identity, _)| identity)
            .collect()
    }

    /// Label totals per identity for `behavior`
    pub fn counts(&self, behavior: &str) -> BTreeMap<usize, LabelCounts> {
        self.tracks
            .iter()
            .filter_map(|(&identity, behaviors)| {
                behaviors.get(behavior).map(|track| (identity, track.counts()))
            })
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let labels: Self = serde_json::from_reader(BufReader::new(file)).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), identities = labels.tracks.len(), "loaded labels");
        Ok(labels)
    }

    /// Writes through a temporary file next to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, self).map_err(|source| Error::Json {
                path: path.to_path_buf(),
                source,
            })?;
            writer.flush().map_err(|e| Error::io(tmp.path(), e))?;
        }
        tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_codes() {
        assert_eq!(Label::Behavior.code(), 1);
        assert_eq!(Label::NotBehavior.code(), 0);
        assert_eq!(Label::None.code(), -1);
        assert_eq!(Label::from_code(0), Some(Label::NotBehavior));
        assert_eq!(Label::from_code(2), None);
    }

    #[test]
    fn test_blocks_and_counts() {
        let mut track = TrackLabels::new(20);
        track.label_behavior(2, 5);
        track.label_not_behavior(6, 8);
        track.label_behavior(12, 14);
        track.label_behavior(15, 15);
        track.clear_labels(13, 13);

        assert_eq!(
            track.blocks(),
            vec![
                Block { start: 2, end: 5, present: true },
                Block { start: 6, end: 8, present: false },
                Block { start: 12, end: 12, present: true },
                Block { start: 14, end: 15, present: true },
            ]
        );
        assert_eq!(track.bout_counts(), (3, 1));
        let counts = track.counts();
        assert_eq!(counts.behavior_frames, 7);
        assert_eq!(counts.not_behavior_frames, 3);

        let codes = track.labels();
        assert_eq!(codes[1], -1);
        assert_eq!(codes[2], 1);
        assert_eq!(codes[7], 0);
    }

    #[test]
    fn test_fill_is_clipped() {
        let mut track = TrackLabels::new(5);
        track.label_behavior(3, 100);
        track.label_behavior(9, 12);
        assert_eq!(track.blocks(), vec![Block { start: 3, end: 4, present: true }]);
        TrackLabels::new(0).label_behavior(0, 3);
    }

    #[test]
    fn test_invalid_block_rejected() {
        let err = TrackLabels::from_blocks(10, &[Block { start: 8, end: 10, present: true }]).unwrap_err();
        assert!(matches!(err, Error::InvalidLabels { .. }));
    }

    #[test]
    fn test_video_labels_json() {
        let mut labels = VideoLabels::new("video1.avi", 30);
        labels.track_mut(0, "Grooming").label_behavior(1, 4);
        labels.track_mut(2, "Grooming").label_not_behavior(10, 19);
        labels.track_mut(2, "Rearing").label_behavior(0, 0);

        let json = serde_json::to_value(&labels).unwrap();
        assert_eq!(json["file"], "video1.avi");
        assert_eq!(json["num_frames"], 30);
        assert_eq!(json["labels"]["2"]["Grooming"][0]["start"], 10);
        assert_eq!(json["labels"]["2"]["Grooming"][0]["present"], false);

        let restored: VideoLabels = serde_json::from_value(json).unwrap();
        assert_eq!(restored, labels);

        assert_eq!(labels.identities("Grooming"), vec![0, 2]);
        let counts = labels.counts("Rearing");
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&2].behavior_frames, 1);
        assert_eq!(labels.labels_for(1, "Grooming").len(), 30);
        assert!(labels.labels_for(1, "Grooming").iter().all(|&c| c == -1));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video1.json");
        let mut labels = VideoLabels::new("video1.avi", 12);
        labels.track_mut(1, "Grooming").label_behavior(3, 7);
        labels.save(&path).unwrap();

        let loaded = VideoLabels::load(&path).unwrap();
        assert_eq!(loaded.track(1, "Grooming"), labels.track(1, "Grooming"));

        let err = VideoLabels::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
