//! Track storage

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::{StoreId, Track, TrackId, TrackSample, VisibleTrack};
use crate::error::{CoreError, Result};
use crate::timestamp::TimeStamp;

/// Tracks keyed by id, kept in insertion order
#[derive(Debug)]
pub struct TrackStore {
    id: StoreId,
    tracks: IndexMap<TrackId, Track>,
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackStore {
    pub fn new() -> Self {
        Self {
            id: StoreId::new(),
            tracks: IndexMap::new(),
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    /// Add a track; a track bound elsewhere is re-bound to this store
    pub fn add_track(&mut self, mut track: Track) -> Result<()> {
        if self.tracks.contains_key(&track.id()) {
            return Err(CoreError::DuplicateId(track.id()));
        }

        match track.binding() {
            Some(other) if other != self.id => {
                warn!(
                    track = track.id(),
                    from = %other,
                    to = %self.id,
                    "Track was bound to another store, re-binding"
                );
            }
            _ => {}
        }
        track.bind(self.id);

        debug!(track = track.id(), samples = track.samples().len(), "Adding track");
        self.tracks.insert(track.id(), track);
        Ok(())
    }

    pub fn remove_track(&mut self, id: TrackId) -> Result<Track> {
        self.tracks.shift_remove(&id).ok_or(CoreError::NotFound(id))
    }

    /// Bind a detached track to this store so samples can be pushed onto it
    pub fn initialize_track(&self, track: &mut Track) {
        track.bind(self.id);
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    /// All tracks in insertion order; the iterator can be cloned to restart
    pub fn all_tracks(&self) -> impl Iterator<Item = &Track> + Clone + '_ {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.tracks.len();
        self.tracks.clear();
        count
    }

    /// Append a sample to a stored track; nothing changes on failure
    pub fn append_sample(&mut self, id: TrackId, sample: TrackSample) -> Result<()> {
        let track = self.tracks.get_mut(&id).ok_or(CoreError::NotFound(id))?;
        track.check_next(&sample.timestamp)?;
        track.push_unchecked(sample);
        Ok(())
    }

    /// Remove tracks whose last sample precedes `current - offset`
    ///
    /// Tracks without samples never expire.
    pub fn evict_older_than(&mut self, current: &TimeStamp, offset: &TimeStamp) -> Vec<TrackId> {
        if !current.is_valid() {
            return Vec::new();
        }
        let mut evicted = Vec::new();
        self.tracks.retain(|id, track| {
            let threshold = track.position_of(current).shifted_backward(offset);
            match track.last_timestamp() {
                Some(last) if last < threshold => {
                    evicted.push(*id);
                    false
                }
                _ => true,
            }
        });

        if !evicted.is_empty() {
            debug!(count = evicted.len(), current = %current, "Evicted expired tracks");
        }
        evicted
    }

    /// Tracks alive at `timestamp`, in store order
    ///
    /// A track is alive from its first sample until its last sample plus the
    /// expiration offset.
    pub fn visible_at(
        &self,
        timestamp: &TimeStamp,
        offset: &TimeStamp,
        show_trails: bool,
    ) -> Vec<VisibleTrack> {
        self.tracks
            .values()
            .filter_map(|track| {
                let first = track.first_timestamp()?;
                let last = track.last_timestamp()?;
                let at = track.position_of(timestamp);
                if at < first || at > last.shifted_forward(offset) {
                    return None;
                }
                let head = track.head_at(&at)?.clone();
                Some(VisibleTrack {
                    id: track.id(),
                    head,
                    trail: if show_trails {
                        track.trail_until(&at)
                    } else {
                        Vec::new()
                    },
                    classification: track
                        .best_classification()
                        .map(|(name, _)| name.to_string()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracks::Point2;

    fn sample(t: f64) -> TrackSample {
        TrackSample::new(TimeStamp::from_time(t), Point2::new(t, 0.0))
    }

    fn track(id: TrackId, times: &[f64]) -> Track {
        Track::from_samples(id, times.iter().map(|t| sample(*t)).collect()).unwrap()
    }

    #[test]
    fn test_add_and_remove() {
        let mut store = TrackStore::new();
        store.add_track(track(1, &[1.0])).unwrap();
        assert_eq!(store.add_track(track(1, &[2.0])), Err(CoreError::DuplicateId(1)));
        assert_eq!(store.len(), 1);

        assert!(store.remove_track(1).is_ok());
        assert_eq!(store.remove_track(1).unwrap_err(), CoreError::NotFound(1));
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_then_remove_restores_order() {
        let mut store = TrackStore::new();
        for id in [4, 8, 1, 6] {
            store.add_track(track(id, &[1.0])).unwrap();
        }
        let before: Vec<_> = store.all_tracks().map(|t| t.id()).collect();

        store.add_track(track(3, &[2.0])).unwrap();
        store.remove_track(3).unwrap();
        assert_eq!(store.all_tracks().map(|t| t.id()).collect::<Vec<_>>(), before);

        // Removing from the middle keeps the rest in place
        let removed = store.remove_track(8).unwrap();
        store.add_track(removed).unwrap();
        assert_eq!(
            store.all_tracks().map(|t| t.id()).collect::<Vec<_>>(),
            vec![4, 1, 6, 8]
        );
    }

    #[test]
    fn test_time_only_position_on_framed_samples() {
        let mut store = TrackStore::new();
        let samples = vec![
            TrackSample::new(TimeStamp::with_time_and_frame(500.0, 5), Point2::new(1.0, 0.0)),
            TrackSample::new(TimeStamp::with_time_and_frame(600.0, 6), Point2::new(2.0, 0.0)),
        ];
        store.add_track(Track::from_samples(2, samples).unwrap()).unwrap();
        let offset = TimeStamp::from_time(100.0);

        let visible = store.visible_at(&TimeStamp::from_time(500.0), &offset, true);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].head.timestamp.frame_number(), Some(5));

        let visible = store.visible_at(&TimeStamp::from_time(600.0), &offset, true);
        assert_eq!(visible[0].head.timestamp.frame_number(), Some(6));
        assert_eq!(visible[0].trail.len(), 2);

        // Last sample exactly on the threshold stays
        assert!(store.evict_older_than(&TimeStamp::from_time(700.0), &offset).is_empty());
        assert_eq!(store.evict_older_than(&TimeStamp::from_time(701.0), &offset), vec![2]);
    }

    #[test]
    fn test_traversal_is_restartable() {
        let mut store = TrackStore::new();
        for id in [5, 2, 9] {
            store.add_track(track(id, &[1.0])).unwrap();
        }
        let iter = store.all_tracks();
        let first: Vec<_> = iter.clone().map(|t| t.id()).collect();
        let second: Vec<_> = iter.map(|t| t.id()).collect();
        assert_eq!(first, vec![5, 2, 9]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_rebinding() {
        let mut a = TrackStore::new();
        let mut b = TrackStore::new();
        let mut t = Track::new(4);
        a.initialize_track(&mut t);
        assert_eq!(t.binding(), Some(a.id()));

        b.add_track(t).unwrap();
        assert_eq!(b.get(4).unwrap().binding(), Some(b.id()));
        assert!(a.is_empty());
    }

    #[test]
    fn test_append_sample() {
        let mut store = TrackStore::new();
        store.add_track(track(1, &[1.0, 2.0])).unwrap();

        store.append_sample(1, sample(3.0)).unwrap();
        let err = store.append_sample(1, sample(3.0)).unwrap_err();
        assert!(matches!(err, CoreError::OutOfOrder { .. }));
        assert_eq!(store.get(1).unwrap().samples().len(), 3);

        assert_eq!(store.append_sample(7, sample(1.0)), Err(CoreError::NotFound(7)));
    }

    #[test]
    fn test_eviction() {
        let mut store = TrackStore::new();
        store.add_track(track(1, &[0.0, 1.0e6])).unwrap();
        store.add_track(track(2, &[0.0, 4.0e6])).unwrap();
        store.add_track(Track::new(3)).unwrap();

        let current = TimeStamp::from_time(3.0e6);
        let offset = TimeStamp::from_time(1.5e6);
        assert_eq!(store.evict_older_than(&current, &offset), vec![1]);
        assert!(store.evict_older_than(&current, &offset).is_empty());

        let ids: Vec<_> = store.all_tracks().map(|t| t.id()).collect();
        assert_eq!(ids, vec![2, 3]);
        for t in store.all_tracks() {
            if let Some(last) = t.last_timestamp() {
                assert!(last >= current.shifted_backward(&offset));
            }
        }
    }

    #[test]
    fn test_visible_at() {
        let mut store = TrackStore::new();
        store.add_track(track(1, &[0.0, 1.0e6])).unwrap();
        store.add_track(track(2, &[5.0e6, 6.0e6])).unwrap();
        let offset = TimeStamp::from_time(1.5e6);

        let visible = store.visible_at(&TimeStamp::from_time(2.0e6), &offset, true);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, 1);
        assert_eq!(visible[0].trail.len(), 2);

        let visible = store.visible_at(&TimeStamp::from_time(3.0e6), &offset, true);
        assert!(visible.is_empty());

        let visible = store.visible_at(&TimeStamp::from_time(5.5e6), &offset, false);
        assert_eq!(visible[0].id, 2);
        assert!(visible[0].trail.is_empty());
    }

    #[test]
    fn test_frame_only_tracks_follow_timed_playback() {
        let mut store = TrackStore::new();
        let samples = (10..=12)
            .map(|n| TrackSample::new(TimeStamp::from_frame(n), Point2::new(n as f64, 0.0)))
            .collect();
        store.add_track(Track::from_samples(8, samples).unwrap()).unwrap();
        let offset = TimeStamp::with_time_and_frame(1.5e6, 15);

        let visible = store.visible_at(&TimeStamp::with_time_and_frame(3.6e5, 11), &offset, true);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].head.timestamp, TimeStamp::from_frame(11));
        assert!(store.visible_at(&TimeStamp::with_time_and_frame(0.0, 9), &offset, true).is_empty());

        let current = TimeStamp::with_time_and_frame(9.9e6, 40);
        assert_eq!(store.evict_older_than(&current, &offset), vec![8]);
    }
}
