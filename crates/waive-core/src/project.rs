//! In-memory project: tracks, clips, selection, cache directory

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clip::{Clip, ClipId};
use crate::session::{SessionEditor, SessionView, TrackView};
use crate::track::Track;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub tracks: Vec<Track>,
    pub selection: Vec<ClipId>,
    pub cache_dir: Option<PathBuf>,
    next_clip_id: u64,
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

impl Project {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            selection: Vec::new(),
            cache_dir: None,
            next_clip_id: 1,
        }
    }

    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..Self::new()
        }
    }

    pub fn add_track(&mut self, name: impl Into<String>) -> usize {
        self.tracks.push(Track::new(name));
        self.tracks.len() - 1
    }

    fn allocate_clip_id(&mut self) -> ClipId {
        let id = ClipId(self.next_clip_id);
        self.next_clip_id += 1;
        id
    }

    /// Add a wave clip to an existing track
    pub fn add_wave_clip(
        &mut self,
        track_index: usize,
        name: impl Into<String>,
        file: impl Into<PathBuf>,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Option<ClipId> {
        if track_index >= self.tracks.len() {
            return None;
        }
        let id = self.allocate_clip_id();
        let clip = Clip::wave(id, name, file, start_seconds, end_seconds);
        self.tracks[track_index].add_clip(clip);
        Some(id)
    }

    pub fn add_midi_clip(
        &mut self,
        track_index: usize,
        name: impl Into<String>,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Option<ClipId> {
        if track_index >= self.tracks.len() {
            return None;
        }
        let id = self.allocate_clip_id();
        self.tracks[track_index].add_clip(Clip::midi(id, name, start_seconds, end_seconds));
        Some(id)
    }

    pub fn select(&mut self, ids: impl IntoIterator<Item = ClipId>) {
        self.selection = ids.into_iter().collect();
    }

    pub fn get_clip(&self, id: ClipId) -> Option<&Clip> {
        self.tracks.iter().find_map(|t| t.get_clip(id))
    }

    fn get_clip_mut(&mut self, id: ClipId) -> Option<&mut Clip> {
        self.tracks.iter_mut().find_map(|t| t.get_clip_mut(id))
    }

    pub fn snapshot(&self) -> SessionView {
        SessionView {
            tracks: self
                .tracks
                .iter()
                .enumerate()
                .map(|(i, t)| TrackView::from_track(i, t))
                .collect(),
            selection: self.selection.clone(),
            cache_dir: self.cache_dir.clone(),
        }
    }
}

impl SessionEditor for Project {
    fn find_clip(&self, id: ClipId) -> Option<&Clip> {
        self.get_clip(id)
    }

    fn set_clip_start_seconds(&mut self, id: ClipId, seconds: f64, keep_length: bool) -> bool {
        let Some(clip) = self.get_clip_mut(id) else { return false };
        clip.set_start(seconds, keep_length);
        true
    }

    fn set_clip_end_seconds(&mut self, id: ClipId, seconds: f64) -> bool {
        let Some(clip) = self.get_clip_mut(id) else { return false };
        clip.set_end(seconds);
        true
    }

    fn set_clip_gain_db(&mut self, id: ClipId, gain_db: f64) -> bool {
        let Some(clip) = self.get_clip_mut(id) else { return false };
        clip.gain_db = gain_db;
        true
    }

    fn set_clip_name(&mut self, id: ClipId, name: &str) -> bool {
        let Some(clip) = self.get_clip_mut(id) else { return false };
        clip.name = name.to_string();
        true
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn ensure_track_count(&mut self, count: usize) {
        while self.tracks.len() < count {
            let name = format!("Track {}", self.tracks.len() + 1);
            self.tracks.push(Track::new(name));
        }
    }

    fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    fn set_track_name(&mut self, index: usize, name: &str) -> bool {
        let Some(track) = self.tracks.get_mut(index) else { return false };
        track.name = name.to_string();
        true
    }

    fn set_track_volume_db(&mut self, index: usize, volume_db: f64) -> bool {
        let Some(track) = self.tracks.get_mut(index) else { return false };
        track.volume_db = volume_db;
        true
    }

    fn set_track_pan(&mut self, index: usize, pan: f64) -> bool {
        let Some(track) = self.tracks.get_mut(index) else { return false };
        track.pan = pan.clamp(-1.0, 1.0);
        true
    }

    fn insert_wave_clip(
        &mut self,
        track_index: usize,
        name: &str,
        file: &Path,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Option<ClipId> {
        self.add_wave_clip(track_index, name, file, start_seconds, end_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_resolves_selection() {
        let mut project = Project::new();
        let t0 = project.add_track("Drums");
        let t1 = project.add_track("Bass");
        let a = project.add_wave_clip(t0, "kick", "kick.wav", 0.0, 1.0).unwrap();
        let b = project.add_wave_clip(t1, "bass", "bass.wav", 1.0, 2.0).unwrap();
        project.select([b, a, ClipId(999)]);

        let view = project.snapshot();
        let selected = view.selected_clips();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].0, 1);
        assert_eq!(selected[0].1.name, "bass");
        assert_eq!(selected[1].0, 0);
    }

    #[test]
    fn test_find_or_create_track() {
        let mut project = Project::new();
        project.add_track("Vocals");
        assert_eq!(project.find_or_create_track("Vocals"), 0);
        assert_eq!(project.find_or_create_track("Stem Low"), 1);
        assert_eq!(project.find_or_create_track("Stem Low"), 1);
        assert_eq!(project.tracks.len(), 2);
    }

    #[test]
    fn test_ensure_track_count_names_new_tracks() {
        let mut project = Project::new();
        project.ensure_track_count(2);
        assert_eq!(project.tracks[1].name, "Track 2");
    }
}
