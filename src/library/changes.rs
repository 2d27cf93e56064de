//! Per-transaction change accumulation.
//!
//! The store records every row it touches here and drains the tracker into
//! bus notifications once the surrounding transaction has committed.

use std::collections::HashSet;

/// Insertion-ordered id set. Order determines notification order, the
/// hash set keeps repeated recordings idempotent.
#[derive(Debug, Default)]
pub struct IdSet {
    order: Vec<u64>,
    seen: HashSet<u64>,
}

impl IdSet {
    pub fn insert(&mut self, id: u64) {
        if self.seen.insert(id) {
            self.order.push(id);
        }
    }

    pub fn remove(&mut self, id: u64) {
        if self.seen.remove(&id) {
            self.order.retain(|candidate| *candidate != id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    /// Empties the set, returning the ids in recording order.
    pub fn drain(&mut self) -> Vec<u64> {
        self.seen.clear();
        std::mem::take(&mut self.order)
    }
}

/// Everything one write transaction inserted, modified, or removed.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    pub inserted_tracks: IdSet,
    pub inserted_albums: IdSet,
    pub inserted_artists: IdSet,
    pub inserted_composers: IdSet,
    pub inserted_lyricists: IdSet,
    pub inserted_genres: IdSet,
    pub modified_tracks: IdSet,
    pub modified_albums: IdSet,
    pub removed_tracks: IdSet,
    pub removed_albums: IdSet,
    pub removed_artists: IdSet,
}

impl ChangeTracker {
    pub fn reset(&mut self) {
        self.inserted_tracks.clear();
        self.inserted_albums.clear();
        self.inserted_artists.clear();
        self.inserted_composers.clear();
        self.inserted_lyricists.clear();
        self.inserted_genres.clear();
        self.modified_tracks.clear();
        self.modified_albums.clear();
        self.removed_tracks.clear();
        self.removed_albums.clear();
        self.removed_artists.clear();
    }

    pub fn record_inserted_track(&mut self, id: u64) {
        self.inserted_tracks.insert(id);
    }

    pub fn record_inserted_album(&mut self, id: u64) {
        self.inserted_albums.insert(id);
    }

    pub fn record_inserted_artist(&mut self, id: u64) {
        self.inserted_artists.insert(id);
    }

    pub fn record_inserted_composer(&mut self, id: u64) {
        self.inserted_composers.insert(id);
    }

    pub fn record_inserted_lyricist(&mut self, id: u64) {
        self.inserted_lyricists.insert(id);
    }

    pub fn record_inserted_genre(&mut self, id: u64) {
        self.inserted_genres.insert(id);
    }

    pub fn record_modified_track(&mut self, id: u64) {
        self.modified_tracks.insert(id);
    }

    pub fn record_modified_album(&mut self, id: u64) {
        self.modified_albums.insert(id);
    }

    /// A removed track never also reports as inserted or modified.
    pub fn record_removed_track(&mut self, id: u64) {
        self.inserted_tracks.remove(id);
        self.modified_tracks.remove(id);
        self.removed_tracks.insert(id);
    }

    /// A removed album never also reports as inserted or modified.
    pub fn record_removed_album(&mut self, id: u64) {
        self.inserted_albums.remove(id);
        self.modified_albums.remove(id);
        self.removed_albums.insert(id);
    }

    pub fn record_removed_artist(&mut self, id: u64) {
        self.inserted_artists.remove(id);
        self.removed_artists.insert(id);
    }
}
