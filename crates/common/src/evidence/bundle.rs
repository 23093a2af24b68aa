//! Per-query evidence bundle
//!
//! A bundle lives exactly as long as one query. It keeps units in the order
//! they were added and never holds two units for the same record.

use super::unit::{EvidenceKind, EvidenceUnit};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceBundle {
    query_id: Uuid,
    units: Vec<EvidenceUnit>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl EvidenceBundle {
    pub fn new(query_id: Uuid) -> Self {
        Self {
            query_id,
            units: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    /// Add a unit. Returns `true` if the record was not yet present;
    /// a duplicate keeps its position and the higher of the two scores.
    pub fn push(&mut self, unit: EvidenceUnit) -> bool {
        let key = unit.key();
        match self.positions.get(&key) {
            Some(&idx) => {
                let existing = &mut self.units[idx];
                if unit.score > existing.score {
                    existing.score = unit.score;
                }
                false
            }
            None => {
                self.positions.insert(key, self.units.len());
                self.units.push(unit);
                true
            }
        }
    }

    /// Add many units; returns how many were new
    pub fn extend(&mut self, units: impl IntoIterator<Item = EvidenceUnit>) -> usize {
        let mut added = 0;
        for unit in units {
            if self.push(unit) {
                added += 1;
            }
        }
        added
    }

    /// Drop units scoring below `floor`
    pub fn retain_above(&mut self, floor: f32) {
        self.units.retain(|u| u.score >= floor);
        self.reindex();
    }

    /// Keep the first `max` units
    pub fn truncate(&mut self, max: usize) {
        self.units.truncate(max);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.positions = self
            .units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.key(), i))
            .collect();
    }

    pub fn units(&self) -> &[EvidenceUnit] {
        &self.units
    }

    pub fn get(&self, key: &str) -> Option<&EvidenceUnit> {
        self.positions.get(key).map(|&i| &self.units[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn count_of(&self, kind: EvidenceKind) -> usize {
        self.units.iter().filter(|u| u.kind() == kind).count()
    }

    /// Order-independent digest of the bundle's record keys, for log
    /// correlation between recall runs
    pub fn fingerprint(&self) -> String {
        let mut keys: Vec<String> = self.units.iter().map(|u| u.key()).collect();
        keys.sort();

        let mut hasher = Sha256::new();
        for key in &keys {
            hasher.update(key.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(&hasher.finalize()[..8])
    }
}
