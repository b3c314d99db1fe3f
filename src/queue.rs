//! Keeps enough upcoming station tracks in the shared play queue.
//!
//! The queue is shared with other services, so the tracks of a station, its
//! *station block*, need not be contiguous. Whenever a track starts playing,
//! the [`Reconciler`] tops the block up with fresh tracks from upstream,
//! moves it to the tail of the queue where that keeps playback continuous,
//! and picks the oldest played tracks to evict once the block grew past the
//! configured maximum.

use std::{collections::HashSet, fmt};

use crate::{
    config::{BandFilter, Config},
    error::Result,
    host::{queue_index, Host, QueueItem, StateSnapshot},
    track::{Station, StationId, Track},
    upstream::{self, StationSource},
};

/// What made a track start playing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The user picked a station from the browse menu, which appended a
    /// fresh batch of tracks headed by the current one.
    ManualBrowse,
    /// The host advanced through the queue.
    ContinuousPlayback,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManualBrowse => write!(f, "manual browse"),
            Self::ContinuousPlayback => write!(f, "continuous playback"),
        }
    }
}

/// Position of a station block in the queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StationInfo {
    /// Position of the current track within the station block.
    pub sq_pos: usize,
    /// Number of station tracks in the queue.
    pub len: usize,
    /// Whether the station tracks are the trailing contiguous slots of the
    /// queue.
    pub is_tail: bool,
}

impl StationInfo {
    /// Locates the station block of `station` and the current track in it.
    ///
    /// Returns `None` when `current_uri` is not a track of the station.
    #[must_use]
    pub fn compute(queue: &[QueueItem], station: StationId, current_uri: &str) -> Option<Self> {
        let indices: Vec<usize> = queue
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_on_station(station))
            .map(|(i, _)| i)
            .collect();

        let sq_pos = indices.iter().position(|&i| queue[i].uri == current_uri)?;
        let len = indices.len();
        let tail_start = queue.len() - len;
        let is_tail = indices.iter().copied().eq(tail_start..queue.len());

        Some(Self {
            sq_pos,
            len,
            is_tail,
        })
    }

    /// Station tracks queued after the current one.
    #[must_use]
    pub fn upcoming(&self) -> usize {
        self.len - self.sq_pos - 1
    }

    /// Whether to fetch more tracks: playback moved past the head of the
    /// block, or fewer than `max` tracks are queued.
    #[must_use]
    pub fn needs_fetch(&self, max: usize) -> bool {
        self.sq_pos != 0 || self.len < max
    }

    /// Number of tracks to request so that `max` tracks are upcoming.
    #[must_use]
    pub fn fetch_count(&self, max: usize) -> usize {
        max.saturating_sub(self.upcoming()).max(1)
    }

    /// Number of station tracks queued beyond `max`.
    #[must_use]
    pub fn excess(&self, max: usize) -> usize {
        self.len.saturating_sub(max)
    }
}

/// What a reconciliation did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Tracks fetched and appended to the queue.
    pub fetched: Vec<Track>,
    /// Whether the station block was moved.
    pub relocated: bool,
    /// Queue URIs of played tracks to remove, oldest first.
    pub evictions: Vec<String>,
}

impl Outcome {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.fetched.is_empty() && !self.relocated && self.evictions.is_empty()
    }
}

/// Selects the oldest tracks of `station` to evict when the block exceeds
/// its maximum by `excess`: at most `min(sq_pos, excess)` of them, all
/// queued before the current track at `sq_pos`.
#[must_use]
pub fn eviction_candidates(
    queue: &[QueueItem],
    station: StationId,
    sq_pos: usize,
    excess: usize,
) -> Vec<String> {
    queue
        .iter()
        .filter(|item| item.is_on_station(station))
        .take(sq_pos.min(excess))
        .map(|item| item.uri.clone())
        .collect()
}

/// Drops fetched tracks that are already queued, served recently, repeated
/// within the batch or by an artist the band filter excludes.
#[must_use]
pub fn dedup(
    fetched: Vec<Track>,
    queue: &[QueueItem],
    station: &Station,
    band_filter: &BandFilter,
) -> Vec<Track> {
    let mut seen: HashSet<String> = queue.iter().map(|item| item.uri.clone()).collect();

    fetched
        .into_iter()
        .filter(|track| {
            if band_filter.excludes(&track.artist) {
                debug!("not queueing {track}: {} is filtered", track.artist);
                return false;
            }
            let served =
                !track.track_token.is_empty() && station.recently_served(&track.track_token);
            if served {
                debug!("not queueing recently served track {track}");
            }
            !served && seen.insert(track.uri.clone())
        })
        .collect()
}

pub struct Reconciler<'a> {
    pub host: &'a dyn Host,
    pub source: &'a dyn StationSource,
    pub config: &'a Config,
}

impl Reconciler<'_> {
    /// Makes sure that enough tracks of `station` follow `current_uri`.
    ///
    /// Evictions are only selected; the caller schedules them. Calling this
    /// twice without the queue changing in between fetches at most once
    /// more and does not relocate again.
    ///
    /// # Errors
    ///
    /// Returns the upstream error when fetching failed or timed out.
    /// Inconsistencies in the queue are logged and yield a no-op outcome.
    pub async fn ensure_upcoming_tracks(
        &self,
        station: &mut Station,
        current_uri: &str,
        origin: Origin,
        snapshot: Option<&StateSnapshot>,
    ) -> Result<Outcome> {
        let max = self.config.max_station_tracks;

        let queue = self.host.queue();
        let Some(info) = StationInfo::compute(&queue, station.id, current_uri) else {
            warn!("{current_uri} is not queued as a track of station {station}");
            return Ok(Outcome::default());
        };
        trace!(
            "station {station}: position {} of {}, tail aligned: {}",
            info.sq_pos,
            info.len,
            info.is_tail
        );

        let fetched = if info.needs_fetch(max) {
            let count = info.fetch_count(max);
            debug!("fetching {count} tracks for station {station}");
            upstream::with_deadline(
                self.config.upstream_timeout,
                self.source
                    .fetch_tracks(station.id, count, &self.config.band_filter),
            )
            .await?
        } else {
            debug!("not fetching tracks for station {station}");
            Vec::new()
        };

        let relocated = if !self.config.flush_on_station_change && !info.is_tail {
            self.relocate(&info, station.id, current_uri, origin, snapshot)
        } else {
            false
        };

        let added = dedup(
            fetched,
            &self.host.queue(),
            station,
            &self.config.band_filter,
        );
        if added.is_empty() {
            return Ok(Outcome {
                relocated,
                ..Default::default()
            });
        }

        for track in &added {
            station.remember(track.track_token.clone());
        }
        self.host
            .add_queue_items(added.iter().cloned().map(QueueItem::from_track).collect());
        info!("queued {} tracks of station {station}", added.len());

        let queue = self.host.queue();
        let evictions = match StationInfo::compute(&queue, station.id, current_uri) {
            Some(info) if info.excess(max) > 0 => {
                eviction_candidates(&queue, station.id, info.sq_pos, info.excess(max))
            }
            _ => Vec::new(),
        };

        Ok(Outcome {
            fetched: added,
            relocated,
            evictions,
        })
    }

    /// Gathers a station block that is not tail aligned.
    ///
    /// During continuous playback the whole block moves to the end of the
    /// queue and the cursor follows the current track. After browsing, the
    /// fresh batch already sits at the end, so only older tracks of the
    /// station are moved in front of it and the cursor stays put.
    fn relocate(
        &self,
        info: &StationInfo,
        station: StationId,
        current_uri: &str,
        origin: Origin,
        snapshot: Option<&StateSnapshot>,
    ) -> bool {
        let queue = self.host.queue();

        match origin {
            Origin::ContinuousPlayback => {
                let uris: Vec<&str> = queue
                    .iter()
                    .filter(|item| item.is_on_station(station))
                    .map(|item| item.uri.as_str())
                    .collect();
                let to = queue.len() - 1;

                for uri in &uris {
                    if let Some(from) = queue_index(&self.host.queue(), uri) {
                        self.host.move_queue_item(from, to);
                    }
                }

                let position = queue.len() - uris.len() + info.sq_pos;
                self.host.set_position(position);
                debug!(
                    "moved {} tracks of station {station} to the end; position is now {position}",
                    uris.len()
                );

                if let Some(snapshot) = snapshot {
                    self.host.push_state(snapshot);
                }
                true
            }

            Origin::ManualBrowse => {
                let Some(current) = queue_index(&queue, current_uri) else {
                    return false;
                };
                let older: Vec<&str> = queue[..current]
                    .iter()
                    .filter(|item| item.is_on_station(station))
                    .map(|item| item.uri.as_str())
                    .collect();

                for uri in &older {
                    let queue = self.host.queue();
                    if let (Some(from), Some(current)) =
                        (queue_index(&queue, uri), queue_index(&queue, current_uri))
                    {
                        self.host.move_queue_item(from, current - 1);
                    }
                }

                debug!(
                    "moved {} older tracks of station {station} before the new batch",
                    older.len()
                );
                !older.is_empty()
            }
        }
    }
}
