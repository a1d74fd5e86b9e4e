//! Benchmark workload definitions.
//!
//! Every workload times backend calls with [`time_execution`] and appends one
//! [`Observation`](crate::Observation) per trial to a [`LatencyDataset`]. Runs
//! are strictly sequential; an error from any backend aborts the workload.

use crate::{
    time_execution, BenchError, BenchResult, Cardinalities, IndexState, LatencyDataset, Lookup,
    MaterializedIndexes, PhotocubeBackend, QueryForm, QueryGen, QueryHandle, StateQuery,
    StateSource,
};
use tracing::{debug, info, warn};

/// Trials slower than this are reported at warn level.
pub const SLOW_QUERY_MS: f64 = 2000.0;

/// Dimensions of the random states in the standard comparison.
pub const STANDARD_DIMS: usize = 3;

pub const RANDOM_STATE_LABEL: &str = "Random state";

// ────────────────────────────────────────────────────────────────────────────────
// Point lookups
// ────────────────────────────────────────────────────────────────────────────────

/// Time `reps` calls of `query_fn`, each with a fresh id from `[1, max_id]`.
pub fn run_random_id_trials<F>(
    name: &str,
    category: &str,
    mut query_fn: F,
    reps: usize,
    max_id: u32,
    gen: &mut QueryGen,
    results: &mut LatencyDataset,
) -> BenchResult<()>
where
    F: FnMut(u32) -> BenchResult<usize>,
{
    info!("Running {} benchmark in {} with {} reps", name, category, reps);
    for _ in 0..reps {
        let id = gen.random_id(max_id);
        let (rows, latency_ms) = time_execution(|| query_fn(id))?;
        debug!(query = name, category, id, rows, latency_ms, "trial");
        results.append(name, latency_ms, category);
    }
    Ok(())
}

/// Random-id trials of one lookup family on one backend.
pub fn run_lookup_trials(
    lookup: Lookup,
    backend: &mut dyn PhotocubeBackend,
    reps: usize,
    gen: &mut QueryGen,
    bounds: &Cardinalities,
    results: &mut LatencyDataset,
) -> BenchResult<()> {
    let category = backend.name().to_string();
    run_random_id_trials(
        lookup.label(),
        &category,
        |id| backend.lookup(lookup, id),
        reps,
        lookup.max_id(bounds),
        gen,
        results,
    )
}

// ────────────────────────────────────────────────────────────────────────────────
// State queries
// ────────────────────────────────────────────────────────────────────────────────

/// Execute one prepared state query, record it, and flag it when slow.
fn timed_state_trial<B>(
    backend: &mut B,
    handle: &QueryHandle,
    label: &str,
    category: &str,
    results: &mut LatencyDataset,
) -> BenchResult<f64>
where
    B: PhotocubeBackend + ?Sized,
{
    timed_state_trial_with_threshold(backend, handle, label, category, SLOW_QUERY_MS, results)
}

/// Slow trials are logged, then recorded like any other.
pub(crate) fn timed_state_trial_with_threshold<B>(
    backend: &mut B,
    handle: &QueryHandle,
    label: &str,
    category: &str,
    slow_ms: f64,
    results: &mut LatencyDataset,
) -> BenchResult<f64>
where
    B: PhotocubeBackend + ?Sized,
{
    let (rows, latency_ms) = time_execution(|| backend.execute(handle))?;
    if latency_ms > slow_ms {
        warn!(
            backend = backend.name(),
            latency_ms = format!("{:.2}", latency_ms),
            query = %handle.state,
            "slow state query"
        );
    }
    debug!(query = label, category, rows, latency_ms, "trial");
    results.append(label, latency_ms, category);
    Ok(latency_ms)
}

/// Time `reps` random states on every backend in `backends`.
///
/// Each iteration draws one state and runs it on all backends in order, so
/// the backends always see identical query shapes.
pub fn run_random_state_trials(
    reps: usize,
    numdims: usize,
    numtots: usize,
    source: &mut dyn StateSource,
    backends: &mut [&mut dyn PhotocubeBackend],
    results: &mut LatencyDataset,
) -> BenchResult<()> {
    StateQuery::check_shape(numdims, numtots)?;
    let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    info!(
        "Running random state benchmark on {} with {} reps",
        names.join(" & "),
        reps
    );
    for _ in 0..reps {
        let state = source.next_state(numdims, numtots);
        for backend in backends.iter_mut() {
            let handle = backend.build_state_query(&state, QueryForm::Materialized);
            let category = backend.name().to_string();
            timed_state_trial(&mut **backend, &handle, RANDOM_STATE_LABEL, &category, results)?;
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────────
// Tiered optimization
// ────────────────────────────────────────────────────────────────────────────────

/// Measurement phases of a tier run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPhase {
    Baseline,
    MaterializedViews,
    IndexedViews,
}

impl TierPhase {
    pub const ORDER: [TierPhase; 3] = [
        TierPhase::Baseline,
        TierPhase::MaterializedViews,
        TierPhase::IndexedViews,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TierPhase::Baseline => "Baseline",
            TierPhase::MaterializedViews => "Materialized Views",
            TierPhase::IndexedViews => "Indexed Views",
        }
    }

    pub fn form(&self) -> QueryForm {
        match self {
            TierPhase::Baseline => QueryForm::Baseline,
            TierPhase::MaterializedViews | TierPhase::IndexedViews => QueryForm::Materialized,
        }
    }

    pub fn required_index(&self) -> IndexState {
        match self {
            TierPhase::Baseline | TierPhase::MaterializedViews => IndexState::Absent,
            TierPhase::IndexedViews => IndexState::Present,
        }
    }
}

/// Fixed browsing states used to compare optimizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTier {
    /// 2D: top of the entity hierarchy against location.
    Simple,
    /// 3D: entity hierarchy, children of the Dog node, timezone.
    Medium,
    /// 3D: entity hierarchy, children of the Dog node, location.
    Complex,
}

impl StateTier {
    pub const ALL: [StateTier; 3] = [StateTier::Simple, StateTier::Medium, StateTier::Complex];

    pub fn category(&self) -> &'static str {
        match self {
            StateTier::Simple => "Simple",
            StateTier::Medium => "Medium",
            StateTier::Complex => "Complex",
        }
    }

    pub fn state(&self) -> BenchResult<StateQuery> {
        match self {
            StateTier::Simple => StateQuery::from_codes(&["H", "S"], &[40, 15], 2),
            StateTier::Medium => StateQuery::from_codes(&["H", "H", "S"], &[40, 5, 14], 3),
            StateTier::Complex => StateQuery::from_codes(&["H", "H", "S"], &[40, 5, 15], 3),
        }
    }
}

fn run_phase<B>(
    backend: &mut B,
    phase: TierPhase,
    handle: &QueryHandle,
    category: &str,
    reps: usize,
    results: &mut LatencyDataset,
) -> BenchResult<()>
where
    B: MaterializedIndexes + ?Sized,
{
    let current = backend.index_state();
    if current != phase.required_index() {
        return Err(BenchError::Protocol(format!(
            "{} phase needs indexes {:?}, backend reports {:?}",
            phase.label(),
            phase.required_index(),
            current
        )));
    }
    info!("Running {} / {} with {} reps", category, phase.label(), reps);
    for _ in 0..reps {
        timed_state_trial(backend, handle, phase.label(), category, results)?;
    }
    Ok(())
}

/// Compare baseline, materialized and indexed-materialized execution of one
/// state on a relational backend.
///
/// Drops the materialized indexes first and leaves them created on return.
/// Mutates backend-global index state: never run two of these at once
/// against the same database.
pub fn run_tier<B>(
    backend: &mut B,
    category: &str,
    state: &StateQuery,
    reps: usize,
    results: &mut LatencyDataset,
) -> BenchResult<()>
where
    B: MaterializedIndexes + ?Sized,
{
    let baseline = backend.build_state_query(state, TierPhase::Baseline.form());
    let materialized = backend.build_state_query(state, TierPhase::MaterializedViews.form());

    backend.drop_materialized_indexes()?;
    run_phase(backend, TierPhase::Baseline, &baseline, category, reps, results)?;
    run_phase(backend, TierPhase::MaterializedViews, &materialized, category, reps, results)?;

    backend.create_materialized_indexes()?;
    run_phase(backend, TierPhase::IndexedViews, &materialized, category, reps, results)
}

// ────────────────────────────────────────────────────────────────────────────────
// Scenarios
// ────────────────────────────────────────────────────────────────────────────────

/// Point lookups on both backends followed by the random-state comparison.
pub fn complete_scenario(
    graph: &mut dyn PhotocubeBackend,
    relational: &mut dyn PhotocubeBackend,
    reps: usize,
    gen: &mut QueryGen,
) -> BenchResult<LatencyDataset> {
    info!("Running standard latency benchmark with {} repetitions", reps);
    let bounds = *gen.bounds();
    let mut results = LatencyDataset::new();

    for lookup in [Lookup::TagById, Lookup::TagsInTagset] {
        run_lookup_trials(lookup, relational, reps, gen, &bounds, &mut results)?;
        run_lookup_trials(lookup, graph, reps, gen, &bounds, &mut results)?;
    }
    run_lookup_trials(Lookup::NodeTagSubtree, graph, reps, gen, &bounds, &mut results)?;

    run_random_state_trials(
        reps,
        STANDARD_DIMS,
        STANDARD_DIMS,
        gen,
        &mut [graph, relational],
        &mut results,
    )?;
    Ok(results)
}

/// All three tiers in order on the relational backend.
pub fn state_scenario<B>(relational: &mut B, reps: usize) -> BenchResult<LatencyDataset>
where
    B: MaterializedIndexes + ?Sized,
{
    info!(
        "Running state scenarios and progression benchmark with {} repetitions",
        reps
    );
    let mut results = LatencyDataset::new();
    for tier in StateTier::ALL {
        run_tier(relational, tier.category(), &tier.state()?, reps, &mut results)?;
    }
    Ok(results)
}
