//! Track library: the read-only playlist the selector draws from.

use crate::types::{EnergyCategory, Track};
use log::info;
use std::path::Path;

/// Ordered, read-only list of tracks. Order matters: natural end-of-track
/// advances to the next entry, wrapping at the end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackLibrary {
    tracks: Vec<Track>,
}

impl TrackLibrary {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    /// Load a JSON array of tracks. Track ids must be unique.
    pub fn load(path: &Path) -> Result<Self, String> {
        let data = std::fs::read_to_string(path).map_err(|e| format!("read {:?}: {}", path, e))?;
        let lib = Self::from_json(&data)?;
        info!("Loaded {} tracks from {:?}", lib.len(), path);
        Ok(lib)
    }

    pub fn from_json(data: &str) -> Result<Self, String> {
        let tracks: Vec<Track> =
            serde_json::from_str(data).map_err(|e| format!("parse library: {}", e))?;
        for (i, t) in tracks.iter().enumerate() {
            if tracks[..i].iter().any(|o| o.id == t.id) {
                return Err(format!("duplicate track id: {}", t.id));
            }
        }
        Ok(Self { tracks })
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn first(&self) -> Option<&Track> {
        self.tracks.first()
    }

    pub fn get(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    /// The track after `id` in library order, cyclic.
    pub fn next_after(&self, id: &str) -> Option<&Track> {
        let i = self.index_of(id)?;
        self.tracks.get((i + 1) % self.tracks.len())
    }
}

/// The built-in synth playlist used when no library file is given.
pub fn demo_library() -> TrackLibrary {
    let t = |id: &str, name: &str, energy, duration_secs| Track {
        id: id.to_string(),
        name: name.to_string(),
        energy,
        duration_secs,
        handle: format!("synth:{}", id),
    };
    TrackLibrary::new(vec![
        t("synth-drum-1", "Beat Energique", EnergyCategory::High, 16.0),
        t("synth-bass-1", "Groove Bass", EnergyCategory::Medium, 12.0),
        t("synth-ambient-1", "Ambiance Calme", EnergyCategory::Low, 20.0),
        t("synth-energetic-1", "Montée Dynamique", EnergyCategory::High, 10.0),
        t("synth-calm-1", "Détente", EnergyCategory::Low, 15.0),
    ])
}
