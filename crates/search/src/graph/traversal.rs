//! Bounded breadth-first traversal
//!
//! Termination: the visited set only grows, a hop expands only entities
//! first discovered in the previous hop, and the walk stops at `max_hops`
//! or an empty frontier.

use futures::future::join_all;
use manualqa_common::config::TraversalConfig;
use manualqa_common::context::{IntentTag, QueryDescriptor};
use manualqa_common::evidence::{
    normalize_entity, AtomicFact, EvidenceOrigin, EvidenceUnit, RelationKind, RelationTriplet,
};
use manualqa_common::metrics::{record_stage, record_subsearch_failure};
use manualqa_common::store::StoredRecord;
use manualqa_common::EvidenceStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Relation kinds to follow first for the question's intents, best first
pub fn preferred_kinds(descriptor: &QueryDescriptor) -> Vec<RelationKind> {
    let mut kinds = Vec::new();
    if descriptor.has_intent(IntentTag::Safety) {
        kinds.push(RelationKind::ConflictsWith);
        kinds.push(RelationKind::Affects);
    }
    if descriptor.has_intent(IntentTag::Dependency) || descriptor.has_intent(IntentTag::Procedural)
    {
        kinds.push(RelationKind::Requires);
    }
    kinds
}

/// What one traversal produced
#[derive(Debug, Clone, Default)]
pub struct TraversalOutcome {
    /// Relation units, each followed by its justifying facts
    pub units: Vec<EvidenceUnit>,

    /// Hops actually expanded
    pub hops: usize,

    /// Size of the visited set after seeding and after each hop
    pub visited_per_hop: Vec<usize>,

    /// Edges followed
    pub edges: usize,
}

/// Entity on the frontier
#[derive(Debug, Clone)]
struct Node {
    key: String,
    name: String,
    score: f32,
}

pub struct GraphTraversalEngine {
    store: Arc<dyn EvidenceStore>,
    config: TraversalConfig,
}

impl GraphTraversalEngine {
    pub fn new(store: Arc<dyn EvidenceStore>, config: TraversalConfig) -> Self {
        Self { store, config }
    }

    /// Seed entities: the question's own mentions (scored like the best
    /// recalled unit), then entities of the top recalled units
    fn seeds(&self, descriptor: &QueryDescriptor, recalled: &[EvidenceUnit]) -> Vec<Node> {
        let query_score = recalled.first().map(|u| u.score).unwrap_or(1.0);

        let mentioned = descriptor
            .entities
            .iter()
            .map(|name| (name.clone(), query_score));
        let from_units = recalled
            .iter()
            .take(self.config.seed_top_n)
            .flat_map(|unit| unit.entities().into_iter().map(move |name| (name, unit.score)));

        let mut seeds: Vec<Node> = Vec::new();
        for (name, score) in mentioned.chain(from_units) {
            let key = normalize_entity(&name);
            if key.is_empty() {
                continue;
            }
            match seeds.iter_mut().find(|n| n.key == key) {
                Some(existing) => existing.score = existing.score.max(score),
                None => seeds.push(Node { key, name, score }),
            }
        }
        seeds
    }

    /// Expand the relation graph around the question's entities
    #[instrument(skip_all, fields(entities = descriptor.entities.len(), recalled = recalled.len()))]
    pub async fn expand(
        &self,
        descriptor: &QueryDescriptor,
        recalled: &[EvidenceUnit],
    ) -> TraversalOutcome {
        let start = Instant::now();
        let preferred = preferred_kinds(descriptor);

        let mut frontier = self.seeds(descriptor, recalled);
        let mut visited: HashSet<String> = frontier.iter().map(|n| n.key.clone()).collect();
        let mut followed: HashSet<String> = HashSet::new();
        let mut outcome = TraversalOutcome {
            visited_per_hop: vec![visited.len()],
            ..TraversalOutcome::default()
        };

        for hop in 1..=self.config.max_hops {
            if frontier.is_empty() {
                break;
            }

            let adjacency = self.lookup_all(&frontier).await;
            let mut next = Vec::new();

            for (node, mut edges) in frontier.iter().zip(adjacency) {
                edges.retain(|t| !followed.contains(&t.id));
                // Stable: equal ranks keep discovery order
                edges.sort_by_key(|t| kind_rank(&preferred, t.kind));
                edges.truncate(self.config.max_fanout);

                let score = node.score * self.config.hop_decay;
                let loaded = join_all(
                    edges
                        .iter()
                        .map(|triplet| self.edge_units(triplet, score, hop)),
                )
                .await;

                for (triplet, units) in edges.into_iter().zip(loaded) {
                    let Some(units) = units else {
                        continue;
                    };
                    followed.insert(triplet.id.clone());
                    outcome.units.extend(units);
                    outcome.edges += 1;

                    if let Some(other) = triplet.other_end(&node.key) {
                        let key = normalize_entity(other);
                        if visited.insert(key.clone()) {
                            next.push(Node {
                                key,
                                name: other.to_string(),
                                score,
                            });
                        }
                    }
                }
            }

            outcome.hops = hop;
            outcome.visited_per_hop.push(visited.len());
            debug!(
                hop = hop,
                frontier = frontier.len(),
                discovered = next.len(),
                visited = visited.len(),
                "Traversal hop complete"
            );
            frontier = next;
        }

        record_stage("traversal", start.elapsed().as_secs_f64());
        debug!(
            hops = outcome.hops,
            edges = outcome.edges,
            units = outcome.units.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Traversal complete"
        );
        outcome
    }

    /// Adjacency of every frontier node, looked up concurrently. A failed or
    /// timed-out lookup yields no edges for that node.
    async fn lookup_all(&self, frontier: &[Node]) -> Vec<Vec<Arc<RelationTriplet>>> {
        let timeout = Duration::from_millis(self.config.lookup_timeout_ms);
        let lookups = frontier
            .iter()
            .map(|node| tokio::time::timeout(timeout, self.store.get_adjacent(&node.name, None)));

        join_all(lookups)
            .await
            .into_iter()
            .zip(frontier)
            .map(|(result, node)| match result {
                Ok(Ok(edges)) => edges,
                Ok(Err(e)) => {
                    warn!(entity = %node.name, error = %e, "Adjacency lookup failed");
                    record_subsearch_failure("graph", "error");
                    Vec::new()
                }
                Err(_) => {
                    warn!(entity = %node.name, "Adjacency lookup timed out");
                    record_subsearch_failure("graph", "timeout");
                    Vec::new()
                }
            })
            .collect()
    }

    /// Relation unit plus justifying fact units; `None` when no justifying
    /// fact can be loaded, since the relation would be uncitable
    async fn edge_units(
        &self,
        triplet: &Arc<RelationTriplet>,
        score: f32,
        hop: usize,
    ) -> Option<Vec<EvidenceUnit>> {
        let lookups = triplet
            .justification
            .iter()
            .map(|id| self.store.get_by_id(id));

        let facts: Vec<Arc<AtomicFact>> = join_all(lookups)
            .await
            .into_iter()
            .filter_map(|record| match record {
                Ok(Some(StoredRecord::Fact(fact))) => Some(fact),
                Ok(_) => None,
                Err(e) => {
                    warn!(triplet = %triplet.id, error = %e, "Failed to load justifying fact");
                    None
                }
            })
            .collect();

        let Some(first) = facts.first() else {
            warn!(triplet = %triplet.id, "Relation has no loadable justification, skipping");
            return None;
        };

        let mut units = Vec::with_capacity(facts.len() + 1);
        units.push(EvidenceUnit::relation(triplet.clone(), first, score, hop));
        for fact in &facts {
            units.push(EvidenceUnit::fact(
                fact.clone(),
                score,
                EvidenceOrigin::Graph { hop },
            ));
        }
        Some(units)
    }
}

fn kind_rank(preferred: &[RelationKind], kind: RelationKind) -> usize {
    preferred
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(preferred.len())
}
