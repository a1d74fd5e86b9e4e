//! Shared types, traits, query synthesis and latency recording for photocube-bench.
//!
//! The crate times the same Photocube browsing-state queries against a graph
//! store (Neo4j) and a relational store (PostgreSQL). Everything a workload
//! needs is defined here; the backends live in [`adapters`], the benchmark
//! drivers in [`workloads`] and the aggregation/export in [`report`].

pub mod adapters;
pub mod config;
pub mod report;
pub mod workloads;

use hdrhistogram::Histogram;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────────
// Error type
// ────────────────────────────────────────────────────────────────────────────────

pub type BenchResult<T> = std::result::Result<T, BenchError>;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    /// A state query failed on a backend. `state` is the query shape.
    #[error("{backend} query failed for {state}: {message}")]
    Query {
        backend: String,
        state: String,
        message: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    /// Materialized index lifecycle was used out of order.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0} connection is closed")]
    Closed(String),
}

// ────────────────────────────────────────────────────────────────────────────────
// Browsing-state model
// ────────────────────────────────────────────────────────────────────────────────

/// Upper bound on the number of dimensions accepted from external input.
pub const MAX_DIMS: usize = 8;

/// The kind of facet a dimension filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetKind {
    /// Tagset-scoped filter, code `S`.
    #[serde(rename = "S")]
    Tagset,
    /// Hierarchy-node-scoped filter, code `H`.
    #[serde(rename = "H")]
    Hierarchy,
}

impl FacetKind {
    pub fn code(&self) -> &'static str {
        match self {
            FacetKind::Tagset => "S",
            FacetKind::Hierarchy => "H",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(FacetKind::Tagset),
            "H" => Some(FacetKind::Hierarchy),
            _ => None,
        }
    }
}

impl fmt::Display for FacetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One axis of a browsing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    pub kind: FacetKind,
    pub filter_id: u32,
}

impl Dimension {
    pub fn tagset(filter_id: u32) -> Self {
        Self {
            kind: FacetKind::Tagset,
            filter_id,
        }
    }

    pub fn hierarchy(filter_id: u32) -> Self {
        Self {
            kind: FacetKind::Hierarchy,
            filter_id,
        }
    }
}

/// A multi-dimensional browsing-state query.
///
/// `numtots` is handed to the backends untouched; each adapter decides what
/// it means for its query language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateQuery {
    dims: Vec<Dimension>,
    numtots: usize,
}

impl StateQuery {
    /// Build a state from explicit dimensions, validating its shape.
    pub fn new(dims: Vec<Dimension>, numtots: usize) -> BenchResult<Self> {
        Self::check_shape(dims.len(), numtots)?;
        if let Some(d) = dims.iter().find(|d| d.filter_id == 0) {
            return Err(BenchError::Config(format!(
                "filter ids are 1-based, got 0 for a {} dimension",
                d.kind
            )));
        }
        Ok(Self { dims, numtots })
    }

    /// Reject a shape no backend can express: 1..=MAX_DIMS dimensions and
    /// `numtots <= numdims`.
    pub fn check_shape(numdims: usize, numtots: usize) -> BenchResult<()> {
        if numdims == 0 || numdims > MAX_DIMS {
            return Err(BenchError::Config(format!(
                "state must have 1..={} dimensions, got {}",
                MAX_DIMS, numdims
            )));
        }
        if numtots > numdims {
            return Err(BenchError::Config(format!(
                "numtots {} exceeds numdims {}",
                numtots, numdims
            )));
        }
        Ok(())
    }

    /// Build a state from the `types`/`filters` pair used by the Photocube client.
    pub fn from_codes(types: &[&str], filters: &[u32], numtots: usize) -> BenchResult<Self> {
        if types.len() != filters.len() {
            return Err(BenchError::Config(format!(
                "{} types but {} filters",
                types.len(),
                filters.len()
            )));
        }
        let dims = types
            .iter()
            .zip(filters)
            .map(|(code, &filter_id)| {
                FacetKind::from_code(code)
                    .map(|kind| Dimension { kind, filter_id })
                    .ok_or_else(|| BenchError::Config(format!("unknown facet type {:?}", code)))
            })
            .collect::<BenchResult<Vec<_>>>()?;
        Self::new(dims, numtots)
    }

    pub fn numdims(&self) -> usize {
        self.dims.len()
    }

    pub fn numtots(&self) -> usize {
        self.numtots
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn types(&self) -> Vec<FacetKind> {
        self.dims.iter().map(|d| d.kind).collect()
    }

    pub fn filters(&self) -> Vec<u32> {
        self.dims.iter().map(|d| d.filter_id).collect()
    }
}

impl fmt::Display for StateQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<&str> = self.dims.iter().map(|d| d.kind.code()).collect();
        let filters: Vec<String> = self.dims.iter().map(|d| d.filter_id.to_string()).collect();
        write!(
            f,
            "types=[{}] filters=[{}]",
            types.join(", "),
            filters.join(", ")
        )
    }
}

/// Identifier space of the loaded Photocube dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cardinalities {
    pub max_tag_id: u32,
    pub max_tagset_id: u32,
    pub max_hierarchy_id: u32,
    pub max_node_id: u32,
    pub max_object_id: u32,
}

impl Default for Cardinalities {
    fn default() -> Self {
        Self {
            max_tag_id: 193_189,
            max_tagset_id: 21,
            max_hierarchy_id: 3,
            max_node_id: 8_842,
            max_object_id: 183_386,
        }
    }
}

impl Cardinalities {
    pub fn validate(&self) -> BenchResult<()> {
        let fields = [
            ("max_tag_id", self.max_tag_id),
            ("max_tagset_id", self.max_tagset_id),
            ("max_hierarchy_id", self.max_hierarchy_id),
            ("max_node_id", self.max_node_id),
            ("max_object_id", self.max_object_id),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(BenchError::Config(format!("{} must be at least 1", name)));
            }
            // Ids are stored as 32-bit signed integers in both databases.
            if value > i32::MAX as u32 {
                return Err(BenchError::Config(format!(
                    "{} must not exceed {}, got {}",
                    name,
                    i32::MAX,
                    value
                )));
            }
        }
        Ok(())
    }

    /// Largest filter id valid for a dimension of `kind`.
    pub fn max_filter(&self, kind: FacetKind) -> u32 {
        match kind {
            FacetKind::Tagset => self.max_tagset_id,
            FacetKind::Hierarchy => self.max_node_id,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Backend traits — every adapter implements PhotocubeBackend
// ────────────────────────────────────────────────────────────────────────────────

/// Point-lookup query families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    TagById,
    TagsInTagset,
    NodeTagSubtree,
}

impl Lookup {
    /// Observation label for this family.
    pub fn label(&self) -> &'static str {
        match self {
            Lookup::TagById => "Tag by id",
            Lookup::TagsInTagset => "Tags in tagset",
            Lookup::NodeTagSubtree => "Node tag subtree",
        }
    }

    /// Upper bound of the id space this lookup draws from.
    pub fn max_id(&self, bounds: &Cardinalities) -> u32 {
        match self {
            Lookup::TagById => bounds.max_tag_id,
            Lookup::TagsInTagset => bounds.max_tagset_id,
            Lookup::NodeTagSubtree => bounds.max_node_id,
        }
    }
}

/// Which form of a state query to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryForm {
    /// Computed from base tables, no precomputation.
    Baseline,
    /// Reads the materialized views where the backend has them.
    Materialized,
}

/// A backend-native query built from a [`StateQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHandle {
    pub statement: String,
    pub form: QueryForm,
    pub state: StateQuery,
}

/// Unified backend adapter trait.
pub trait PhotocubeBackend {
    fn name(&self) -> &str;

    /// Run a point lookup and drain its rows, returning the row count.
    fn lookup(&mut self, kind: Lookup, id: u32) -> BenchResult<usize>;

    /// Translate a state into this backend's query language.
    fn build_state_query(&self, state: &StateQuery, form: QueryForm) -> QueryHandle;

    /// Run a handle to completion, returning the row count.
    fn execute(&mut self, query: &QueryHandle) -> BenchResult<usize>;

    /// Release the connection. Safe to call more than once.
    fn close(&mut self) -> BenchResult<()>;
}

/// Close `backend` on an error path where the original error wins; a failed
/// release is logged instead of returned.
pub fn release_backend(backend: &mut dyn PhotocubeBackend) -> bool {
    match backend.close() {
        Ok(()) => true,
        Err(e) => {
            warn!(backend = backend.name(), error = %e, "failed to release connection");
            false
        }
    }
}

/// Whether the materialized-view indexes currently exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Not yet touched in this process.
    Unknown,
    Absent,
    Present,
}

impl IndexState {
    /// State after a drop. Dropping is always allowed.
    pub fn dropped(self) -> IndexState {
        IndexState::Absent
    }

    /// State after a create; creating over existing indexes is rejected.
    pub fn created(self) -> BenchResult<IndexState> {
        match self {
            IndexState::Present => Err(BenchError::Protocol(
                "materialized indexes already exist; drop them first".into(),
            )),
            IndexState::Unknown | IndexState::Absent => Ok(IndexState::Present),
        }
    }
}

/// Index lifecycle control for backends that maintain materialized views.
pub trait MaterializedIndexes: PhotocubeBackend {
    fn index_state(&self) -> IndexState;
    fn drop_materialized_indexes(&mut self) -> BenchResult<()>;
    fn create_materialized_indexes(&mut self) -> BenchResult<()>;
}

// ────────────────────────────────────────────────────────────────────────────────
// Query synthesizer (deterministic via ChaCha8Rng)
// ────────────────────────────────────────────────────────────────────────────────

/// Anything that can hand out browsing states for state trials.
pub trait StateSource {
    fn next_state(&mut self, numdims: usize, numtots: usize) -> StateQuery;
}

pub struct QueryGen {
    rng: ChaCha8Rng,
    bounds: Cardinalities,
}

impl QueryGen {
    pub fn new(seed: u64, bounds: Cardinalities) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            bounds,
        }
    }

    pub fn from_entropy(bounds: Cardinalities) -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            bounds,
        }
    }

    pub fn bounds(&self) -> &Cardinalities {
        &self.bounds
    }

    /// Uniform id in `[1, max_id]`.
    pub fn random_id(&mut self, max_id: u32) -> u32 {
        self.rng.gen_range(1..=max_id.max(1))
    }

    /// Random state of `numdims` independent dimensions. Repeated kinds and
    /// overlapping filters are kept as drawn.
    ///
    /// Callers check the shape with [`StateQuery::check_shape`] first.
    pub fn random_state(&mut self, numdims: usize, numtots: usize) -> StateQuery {
        debug_assert!(
            StateQuery::check_shape(numdims, numtots).is_ok(),
            "invalid state shape {}/{}",
            numdims,
            numtots
        );
        let dims = (0..numdims)
            .map(|_| {
                let kind = if self.rng.gen_bool(0.5) {
                    FacetKind::Tagset
                } else {
                    FacetKind::Hierarchy
                };
                let max = self.bounds.max_filter(kind);
                Dimension {
                    kind,
                    filter_id: self.random_id(max),
                }
            })
            .collect();
        StateQuery { dims, numtots }
    }
}

impl StateSource for QueryGen {
    fn next_state(&mut self, numdims: usize, numtots: usize) -> StateQuery {
        self.random_state(numdims, numtots)
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Timing
// ────────────────────────────────────────────────────────────────────────────────

/// Run `op` once and return its value together with the wall-clock time it
/// took in milliseconds. Errors from `op` are returned as-is.
pub fn time_execution<T, F>(op: F) -> BenchResult<(T, f64)>
where
    F: FnOnce() -> BenchResult<T>,
{
    let start = Instant::now();
    let outcome = op();
    let latency_ms = start.elapsed().as_secs_f64() * 1e3;
    outcome.map(|value| (value, latency_ms))
}

// ────────────────────────────────────────────────────────────────────────────────
// Latency recorder (HDR histogram)
// ────────────────────────────────────────────────────────────────────────────────

pub struct LatencyRecorder {
    hist: Histogram<u64>,
    samples: u64,
}

impl LatencyRecorder {
    pub fn new() -> BenchResult<Self> {
        let hist = Histogram::<u64>::new_with_bounds(1, 3_600_000_000_000, 3)
            .map_err(|e| BenchError::Config(format!("histogram: {}", e)))?;
        Ok(Self { hist, samples: 0 })
    }

    /// Record one latency given in milliseconds.
    pub fn record_ms(&mut self, latency_ms: f64) {
        let nanos = (latency_ms * 1e6).round() as u64;
        let _ = self.hist.record(nanos.clamp(1, self.hist.high()));
        self.samples += 1;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Percentile in milliseconds.
    pub fn percentile_ms(&self, p: f64) -> f64 {
        self.hist.value_at_percentile(p) as f64 / 1e6
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Observations
// ────────────────────────────────────────────────────────────────────────────────

/// One timed trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub query: String,
    pub latency_ms: f64,
    pub category: String,
}

/// Column-oriented view of a dataset, the shape plotting tools expect.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Columns {
    pub query: Vec<String>,
    pub latency: Vec<f64>,
    pub category: Vec<String>,
}

/// Append-only collection of observations for one benchmark run.
#[derive(Debug, Clone, Default)]
pub struct LatencyDataset {
    observations: Vec<Observation>,
}

impl LatencyDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, query: &str, latency_ms: f64, category: &str) {
        self.observations.push(Observation {
            query: query.to_string(),
            latency_ms,
            category: category.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn export(&self) -> Columns {
        let mut cols = Columns::default();
        for o in &self.observations {
            cols.query.push(o.query.clone());
            cols.latency.push(o.latency_ms);
            cols.category.push(o.category.clone());
        }
        cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_random_state_respects_bounds() {
        let bounds = Cardinalities::default();
        let mut gen = QueryGen::new(7, bounds);
        for numdims in 1..=MAX_DIMS {
            for _ in 0..200 {
                let state = gen.random_state(numdims, numdims);
                assert_eq!(state.numdims(), numdims);
                assert_eq!(state.types().len(), numdims);
                assert_eq!(state.filters().len(), numdims);
                assert_eq!(state.numtots(), numdims);
                for d in state.dimensions() {
                    assert!(d.filter_id >= 1);
                    assert!(d.filter_id <= bounds.max_filter(d.kind));
                }
            }
        }
    }

    #[test]
    fn test_random_state_uses_both_kinds() {
        let mut gen = QueryGen::new(1, Cardinalities::default());
        let kinds: Vec<FacetKind> = (0..100)
            .flat_map(|_| gen.random_state(3, 3).types())
            .collect();
        assert!(kinds.contains(&FacetKind::Tagset));
        assert!(kinds.contains(&FacetKind::Hierarchy));
    }

    #[test]
    fn test_random_id_small_range() {
        let mut gen = QueryGen::new(3, Cardinalities::default());
        for _ in 0..500 {
            let id = gen.random_id(2);
            assert!(id == 1 || id == 2);
        }
        assert_eq!(gen.random_id(1), 1);
    }

    #[test]
    fn test_same_seed_same_states() {
        let mut a = QueryGen::new(42, Cardinalities::default());
        let mut b = QueryGen::new(42, Cardinalities::default());
        for _ in 0..20 {
            assert_eq!(a.random_state(3, 3), b.random_state(3, 3));
        }
    }

    #[test]
    fn test_from_codes() {
        let state = StateQuery::from_codes(&["H", "S"], &[40, 15], 2).unwrap();
        assert_eq!(
            state.dimensions(),
            &[Dimension::hierarchy(40), Dimension::tagset(15)]
        );
        assert_eq!(state.to_string(), "types=[H, S] filters=[40, 15]");
    }

    #[test]
    fn test_check_shape_bounds() {
        assert!(StateQuery::check_shape(1, 0).is_ok());
        assert!(StateQuery::check_shape(MAX_DIMS, MAX_DIMS).is_ok());
        assert!(matches!(
            StateQuery::check_shape(0, 0),
            Err(BenchError::Config(_))
        ));
        assert!(StateQuery::check_shape(MAX_DIMS + 1, 0).is_err());
        assert!(StateQuery::check_shape(2, 5).is_err());
    }

    #[test]
    fn test_from_codes_rejects_bad_shapes() {
        assert!(StateQuery::from_codes(&["H", "S"], &[40], 2).is_err());
        assert!(StateQuery::from_codes(&["X"], &[1], 1).is_err());
        assert!(StateQuery::from_codes(&["S"], &[0], 1).is_err());
        assert!(StateQuery::from_codes(&[], &[], 0).is_err());
        assert!(StateQuery::from_codes(&["S"], &[1], 2).is_err());
    }

    #[test]
    fn test_time_execution_measures_delay() {
        let (value, ms) = time_execution(|| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(5usize)
        })
        .unwrap();
        assert_eq!(value, 5);
        assert!(ms >= 20.0, "measured {} ms", ms);
        assert!(ms < 2_000.0);
    }

    #[test]
    fn test_time_execution_propagates_error() {
        let mut calls = 0;
        let result: BenchResult<((), f64)> = time_execution(|| {
            calls += 1;
            Err(BenchError::Database("connection reset".into()))
        });
        assert!(matches!(result, Err(BenchError::Database(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_dataset_columns_stay_aligned() {
        let mut data = LatencyDataset::new();
        for i in 0..10 {
            data.append("Tag by id", i as f64, if i % 2 == 0 { "Neo4j" } else { "PostgreSQL" });
            let cols = data.export();
            assert_eq!(cols.query.len(), i + 1);
            assert_eq!(cols.latency.len(), cols.query.len());
            assert_eq!(cols.category.len(), cols.query.len());
        }
        assert_eq!(data.export().category[3], "PostgreSQL");
    }

    #[test]
    fn test_index_state_transitions() {
        assert_eq!(IndexState::Unknown.dropped(), IndexState::Absent);
        assert_eq!(IndexState::Absent.dropped().dropped(), IndexState::Absent);
        assert_eq!(IndexState::Absent.created().unwrap(), IndexState::Present);
        assert_eq!(IndexState::Unknown.created().unwrap(), IndexState::Present);
        assert!(matches!(
            IndexState::Present.created(),
            Err(BenchError::Protocol(_))
        ));
    }

    #[test]
    fn test_recorder_percentiles() {
        let mut rec = LatencyRecorder::new().unwrap();
        for ms in 1..=100 {
            rec.record_ms(ms as f64);
        }
        assert_eq!(rec.samples(), 100);
        let p50 = rec.percentile_ms(50.0);
        assert!((49.0..=51.0).contains(&p50), "p50 = {}", p50);
    }

    #[test]
    fn test_cardinalities_validate() {
        assert!(Cardinalities::default().validate().is_ok());
        let bad = Cardinalities {
            max_node_id: 0,
            ..Cardinalities::default()
        };
        assert!(bad.validate().is_err());
        let wide = Cardinalities {
            max_tag_id: i32::MAX as u32 + 1,
            ..Cardinalities::default()
        };
        assert!(matches!(wide.validate(), Err(BenchError::Config(_))));
    }
}
