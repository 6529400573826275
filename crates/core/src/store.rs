//! Canonical in-memory store for detections, events and episodes
//!
//! Stands in for the canonical database the serving layer reads from. The
//! store owns id allocation, enforces the membership invariants (one
//! episode per event, one region-summary row per event and region) and
//! provides the claim ledger the parallel index backfill relies on.
//! Snapshots persist as JSON files; load/save are the only blocking I/O
//! boundaries of the batch jobs.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clustering::EventDraft;
use crate::config::VersionRegistry;
use crate::core_types::detection::Detection;
use crate::core_types::episode::Episode;
use crate::core_types::event::{Event, EventStatus};
use crate::core_types::geo::GeoPoint;

/// Store-level failures. Load/parse/save errors are fatal for a batch job;
/// the membership errors fail only their unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Failed to read snapshot file
    LoadFailed(String),
    /// Failed to parse snapshot contents
    ParseFailed(String),
    /// Failed to serialize snapshot
    SerializeFailed(String),
    /// Failed to write snapshot file
    SaveFailed(String),
    /// Referenced event does not exist
    MissingEvent(u64),
    /// Membership uniqueness violation: the event already belongs to
    /// another episode
    EventAlreadyLinked { event_id: u64, episode_id: u64 },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::LoadFailed(msg) => write!(f, "failed to load store: {msg}"),
            StoreError::ParseFailed(msg) => write!(f, "failed to parse store: {msg}"),
            StoreError::SerializeFailed(msg) => write!(f, "failed to serialize store: {msg}"),
            StoreError::SaveFailed(msg) => write!(f, "failed to save store: {msg}"),
            StoreError::MissingEvent(id) => write!(f, "event {id} does not exist"),
            StoreError::EventAlreadyLinked {
                event_id,
                episode_id,
            } => write!(f, "event {event_id} already linked to episode {episode_id}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Canonical store snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Store {
    detections: BTreeMap<u64, Detection>,
    events: BTreeMap<u64, Event>,
    episodes: BTreeMap<u64, Episode>,
    /// Per-(event, region) detection counts; the inner map key makes the
    /// uniqueness constraint structural
    region_summaries: BTreeMap<u64, BTreeMap<String, u64>>,
    pub versions: VersionRegistry,
    next_detection_id: u64,
    next_event_id: u64,
    next_episode_id: u64,
    /// Backfill claim ledger; transient, never persisted
    #[serde(skip)]
    claimed_events: FxHashSet<u64>,
    #[serde(skip)]
    claimed_detections: FxHashSet<u64>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            next_detection_id: 1,
            next_event_id: 1,
            next_episode_id: 1,
            ..Store::default()
        }
    }

    /// Load a snapshot from a JSON file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let contents =
            fs::read_to_string(path).map_err(|e| StoreError::LoadFailed(e.to_string()))?;
        let store: Self =
            serde_json::from_str(&contents).map_err(|e| StoreError::ParseFailed(e.to_string()))?;
        Ok(store)
    }

    /// Save a snapshot to a JSON file
    ///
    /// # Errors
    /// Returns error if the file cannot be written or the store serialized
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::SerializeFailed(e.to_string()))?;
        fs::write(path, contents).map_err(|e| StoreError::SaveFailed(e.to_string()))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Detections

    /// Ingest a batch of detections from the external feed. Invalid rows
    /// are logged and skipped; the batch never fails. Returns
    /// (added, skipped).
    pub fn ingest_detections(&mut self, batch: Vec<Detection>) -> (u64, u64) {
        let mut added = 0;
        let mut skipped = 0;
        for mut detection in batch {
            if let Err(reason) = detection.validate() {
                warn!(%reason, "skipping detection at ingestion boundary");
                skipped += 1;
                continue;
            }
            detection.id = self.next_detection_id;
            detection.event_id = None;
            self.next_detection_id += 1;
            self.detections.insert(detection.id, detection);
            added += 1;
        }
        (added, skipped)
    }

    pub fn detection(&self, id: u64) -> Option<&Detection> {
        self.detections.get(&id)
    }

    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }

    /// Detections not yet clustered into any event, in id order
    pub fn unassigned_detections(&self) -> Vec<Detection> {
        self.detections
            .values()
            .filter(|d| d.event_id.is_none())
            .cloned()
            .collect()
    }

    pub fn detections_of_event(&self, event_id: u64) -> Vec<&Detection> {
        self.detections
            .values()
            .filter(|d| d.event_id == Some(event_id))
            .collect()
    }

    // ------------------------------------------------------------------
    // Events

    /// Persist clustering drafts as active events, linking their member
    /// detections and building the per-region summary rows
    pub fn persist_drafts(&mut self, drafts: Vec<EventDraft>) -> Vec<u64> {
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let id = self.next_event_id;
            self.next_event_id += 1;

            let event = Event {
                id,
                centroid: draft.centroid,
                bbox: draft.bbox,
                perimeter: draft.perimeter,
                started_at: draft.started_at,
                ended_at: draft.ended_at,
                last_seen_at: draft.ended_at,
                status: EventStatus::Active,
                total_detections: draft.total_detections,
                frp_sum: draft.frp_sum,
                frp_max: draft.frp_max,
                mean_confidence: draft.mean_confidence,
                region: draft.region,
                cell_id: None,
                episode_id: None,
            };

            let mut summary: BTreeMap<String, u64> = BTreeMap::new();
            for detection_id in &draft.detection_ids {
                if let Some(detection) = self.detections.get_mut(detection_id) {
                    detection.event_id = Some(id);
                    if let Some(region) = &detection.region {
                        *summary.entry(region.clone()).or_insert(0) += 1;
                    }
                }
            }
            if !summary.is_empty() {
                self.region_summaries.insert(id, summary);
            }

            self.events.insert(id, event);
            created.push(id);
        }
        created
    }

    pub fn event(&self, id: u64) -> Option<&Event> {
        self.events.get(&id)
    }

    pub fn event_mut(&mut self, id: u64) -> Option<&mut Event> {
        self.events.get_mut(&id)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    /// Ids of active events in ascending start order (ties by id)
    pub fn active_event_ids(&self) -> Vec<u64> {
        let mut ids: Vec<(chrono::DateTime<chrono::Utc>, u64)> = self
            .events
            .values()
            .filter(|e| e.status.is_active())
            .map(|e| (e.started_at, e.id))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub fn region_summary(&self, event_id: u64) -> Option<&BTreeMap<String, u64>> {
        self.region_summaries.get(&event_id)
    }

    /// Merge the victim event into the survivor: reassign detections and
    /// region-summary rows (deleting the victim's conflicting rows first so
    /// the survivor's existing relation is kept), recompute the survivor's
    /// aggregates from its post-merge detection set, then delete the victim.
    ///
    /// # Errors
    /// Returns `MissingEvent` when either side vanished; callers treat that
    /// as a skippable referential race, not a fatal failure.
    pub fn merge_events(&mut self, survivor_id: u64, victim_id: u64) -> Result<(), StoreError> {
        if !self.events.contains_key(&survivor_id) {
            return Err(StoreError::MissingEvent(survivor_id));
        }
        let victim = self
            .events
            .remove(&victim_id)
            .ok_or(StoreError::MissingEvent(victim_id))?;

        // Reassign the victim's detections
        for detection in self.detections.values_mut() {
            if detection.event_id == Some(victim_id) {
                detection.event_id = Some(survivor_id);
            }
        }

        // Move region-summary rows; rows whose region the survivor already
        // has are deleted (survivor wins the uniqueness conflict)
        if let Some(victim_rows) = self.region_summaries.remove(&victim_id) {
            let survivor_rows = self.region_summaries.entry(survivor_id).or_default();
            for (region, count) in victim_rows {
                if survivor_rows.contains_key(&region) {
                    debug!(
                        survivor = survivor_id,
                        victim = victim_id,
                        %region,
                        "dropping victim region summary row on uniqueness conflict"
                    );
                } else {
                    survivor_rows.insert(region, count);
                }
            }
        }

        // The victim's episode membership edge disappears with it
        if let Some(episode_id) = victim.episode_id {
            if let Some(episode) = self.episodes.get_mut(&episode_id) {
                episode.event_ids.retain(|&id| id != victim_id);
            }
        }

        // Full recompute from the merged detection set
        let members: Vec<Detection> = self
            .detections
            .values()
            .filter(|d| d.event_id == Some(survivor_id))
            .cloned()
            .collect();
        let member_refs: Vec<&Detection> = members.iter().collect();
        if let Some(survivor) = self.events.get_mut(&survivor_id) {
            if !member_refs.is_empty() {
                survivor.recompute_from_detections(&member_refs);
            }
            if survivor.region.is_none() {
                survivor.region = victim.region;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Episodes

    pub fn episode(&self, id: u64) -> Option<&Episode> {
        self.episodes.get(&id)
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn episodes(&self) -> impl Iterator<Item = &Episode> {
        self.episodes.values()
    }

    /// Next id an aggregation pass may allocate episodes from
    pub fn next_episode_id(&self) -> u64 {
        self.next_episode_id
    }

    /// Replace the episode set wholesale and relink event memberships from
    /// the provided episodes. The uniqueness constraint is enforced here:
    /// an event appearing in two episodes fails the commit.
    ///
    /// # Errors
    /// Returns `EventAlreadyLinked` on a membership conflict and
    /// `MissingEvent` when a membership references a deleted event.
    pub fn replace_episodes(&mut self, episodes: Vec<Episode>) -> Result<(), StoreError> {
        // Validate exclusivity before mutating anything
        let mut seen: FxHashSet<u64> = FxHashSet::default();
        for episode in &episodes {
            for &event_id in &episode.event_ids {
                if !self.events.contains_key(&event_id) {
                    return Err(StoreError::MissingEvent(event_id));
                }
                if !seen.insert(event_id) {
                    return Err(StoreError::EventAlreadyLinked {
                        event_id,
                        episode_id: episode.id,
                    });
                }
            }
        }

        for event in self.events.values_mut() {
            event.episode_id = None;
        }
        self.episodes.clear();
        for episode in episodes {
            self.next_episode_id = self.next_episode_id.max(episode.id + 1);
            for &event_id in &episode.event_ids {
                if let Some(event) = self.events.get_mut(&event_id) {
                    event.episode_id = Some(episode.id);
                }
            }
            self.episodes.insert(episode.id, episode);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Spatial-index backfill claims

    /// Claim up to `batch` events that have no cell id and are not claimed
    /// by another worker. Claimed rows are skipped by every subsequent
    /// claim until the ledger is cleared, which gives at-most-once
    /// processing per row.
    pub fn claim_unindexed_events(&mut self, batch: usize) -> Vec<(u64, GeoPoint)> {
        let claimed: Vec<(u64, GeoPoint)> = self
            .events
            .values()
            .filter(|e| e.cell_id.is_none() && !self.claimed_events.contains(&e.id))
            .take(batch)
            .map(|e| (e.id, e.centroid))
            .collect();
        for (id, _) in &claimed {
            self.claimed_events.insert(*id);
        }
        claimed
    }

    /// Same claim-and-skip semantics over detections
    pub fn claim_unindexed_detections(&mut self, batch: usize) -> Vec<(u64, GeoPoint)> {
        let claimed: Vec<(u64, GeoPoint)> = self
            .detections
            .values()
            .filter(|d| d.cell_id.is_none() && !self.claimed_detections.contains(&d.id))
            .take(batch)
            .map(|d| (d.id, d.position()))
            .collect();
        for (id, _) in &claimed {
            self.claimed_detections.insert(*id);
        }
        claimed
    }

    /// Write computed cell ids back in one batch
    pub fn set_event_cells(&mut self, cells: &[(u64, u64)]) {
        for &(event_id, cell) in cells {
            if let Some(event) = self.events.get_mut(&event_id) {
                event.cell_id = Some(cell);
            }
        }
    }

    pub fn set_detection_cells(&mut self, cells: &[(u64, u64)]) {
        for &(detection_id, cell) in cells {
            if let Some(detection) = self.detections.get_mut(&detection_id) {
                detection.cell_id = Some(cell);
            }
        }
    }

    /// Drop the transient claim ledger (end of a backfill run)
    pub fn clear_claims(&mut self) {
        self.claimed_events.clear();
        self.claimed_detections.clear();
    }
}
