//! Session read model and the host seams tools plan and apply against

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clip::{Clip, ClipId};
use crate::error::Result;
use crate::track::Track;

/// Value-typed copy of one track, as seen by planners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackView {
    pub index: usize,
    pub name: String,
    pub volume_db: f64,
    pub pan: f64,
    pub clips: Vec<Clip>,
}

impl TrackView {
    pub fn from_track(index: usize, track: &Track) -> Self {
        Self {
            index,
            name: track.name.clone(),
            volume_db: track.volume_db,
            pan: track.pan,
            clips: track.clips.clone(),
        }
    }

    /// Clip with the minimum start time; ties keep the first
    pub fn earliest_clip(&self) -> Option<&Clip> {
        self.clips
            .iter()
            .min_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds))
    }
}

/// Immutable snapshot of the session handed to planners.
///
/// Planner closures capture this (or values derived from it) by value and
/// never hold a reference into the live session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub tracks: Vec<TrackView>,
    /// Selected clip IDs in selection order
    pub selection: Vec<ClipId>,
    pub cache_dir: Option<PathBuf>,
}

impl SessionView {
    /// Track index and clip for a clip ID
    pub fn find_clip(&self, id: ClipId) -> Option<(usize, &Clip)> {
        self.tracks.iter().find_map(|t| {
            t.clips.iter().find(|c| c.id == id).map(|c| (t.index, c))
        })
    }

    /// Selected clips that still exist, in selection order
    pub fn selected_clips(&self) -> Vec<(usize, &Clip)> {
        self.selection
            .iter()
            .filter_map(|id| self.find_clip(*id))
            .collect()
    }

    pub fn track(&self, index: usize) -> Option<&TrackView> {
        self.tracks.get(index)
    }
}

/// Mutations a plan applier may perform inside one transaction
pub trait SessionEditor {
    fn find_clip(&self, id: ClipId) -> Option<&Clip>;
    /// Move (`keep_length`) or trim the start of a clip
    fn set_clip_start_seconds(&mut self, id: ClipId, seconds: f64, keep_length: bool) -> bool;
    fn set_clip_end_seconds(&mut self, id: ClipId, seconds: f64) -> bool;
    fn set_clip_gain_db(&mut self, id: ClipId, gain_db: f64) -> bool;
    fn set_clip_name(&mut self, id: ClipId, name: &str) -> bool;

    fn track_count(&self) -> usize;
    fn ensure_track_count(&mut self, count: usize);
    fn track(&self, index: usize) -> Option<&Track>;
    fn set_track_name(&mut self, index: usize, name: &str) -> bool;
    fn set_track_volume_db(&mut self, index: usize, volume_db: f64) -> bool;
    fn set_track_pan(&mut self, index: usize, pan: f64) -> bool;
    fn insert_wave_clip(
        &mut self,
        track_index: usize,
        name: &str,
        file: &Path,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Option<ClipId>;

    /// Index of the first track named `name`, appending one if none exists
    fn find_or_create_track(&mut self, name: &str) -> usize {
        let existing = (0..self.track_count())
            .find(|&i| self.track(i).is_some_and(|t| t.name == name));
        if let Some(index) = existing {
            return index;
        }
        let index = self.track_count();
        self.ensure_track_count(index + 1);
        self.set_track_name(index, name);
        index
    }
}

/// Body run inside one undoable transaction
pub type EditBody<'a> = dyn FnMut(&mut dyn SessionEditor) -> Result<()> + 'a;

/// The host DAW session as seen by the tool core
pub trait SessionHost {
    fn snapshot(&self) -> SessionView;

    fn selection(&self) -> Vec<ClipId> {
        self.snapshot().selection
    }

    /// Run `body` as one undo step. With `coalesce`, consecutive edits with
    /// the same label merge into a single step. A failing body leaves the
    /// session unchanged.
    fn perform_edit(&mut self, label: &str, coalesce: bool, body: &mut EditBody<'_>) -> Result<()>;
}
