//! Clip representation shared by the session model and snapshots

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unique identifier for clips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipKind {
    Wave,
    Midi,
}

/// A positioned reference to audio or MIDI content on a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub name: String,
    pub kind: ClipKind,
    /// Timeline start in seconds
    pub start_seconds: f64,
    /// Timeline end in seconds
    pub end_seconds: f64,
    /// Offset into the source file where playback begins
    pub offset_seconds: f64,
    /// Source audio file (wave clips only)
    pub source_file: Option<PathBuf>,
    pub gain_db: f64,
}

impl Clip {
    pub fn wave(
        id: ClipId,
        name: impl Into<String>,
        source_file: impl Into<PathBuf>,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind: ClipKind::Wave,
            start_seconds,
            end_seconds,
            offset_seconds: 0.0,
            source_file: Some(source_file.into()),
            gain_db: 0.0,
        }
    }

    pub fn midi(id: ClipId, name: impl Into<String>, start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            id,
            name: name.into(),
            kind: ClipKind::Midi,
            start_seconds,
            end_seconds,
            offset_seconds: 0.0,
            source_file: None,
            gain_db: 0.0,
        }
    }

    pub fn length_seconds(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    pub fn is_wave(&self) -> bool {
        self.kind == ClipKind::Wave
    }

    /// Source file of a wave clip, if it still exists on disk
    pub fn readable_source(&self) -> Option<&PathBuf> {
        if !self.is_wave() {
            return None;
        }
        self.source_file.as_ref().filter(|p| p.is_file())
    }

    /// Move the clip start, either keeping its length or trimming against a fixed end
    pub fn set_start(&mut self, start_seconds: f64, keep_length: bool) {
        let start_seconds = start_seconds.max(0.0);
        if keep_length {
            let length = self.length_seconds();
            self.start_seconds = start_seconds;
            self.end_seconds = start_seconds + length;
        } else {
            self.offset_seconds = (self.offset_seconds + start_seconds - self.start_seconds).max(0.0);
            self.start_seconds = start_seconds.min(self.end_seconds);
        }
    }

    pub fn set_end(&mut self, end_seconds: f64) {
        self.end_seconds = end_seconds.max(self.start_seconds);
    }
}
