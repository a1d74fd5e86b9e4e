//! PostgreSQL adapter (via the synchronous `postgres` client).
//!
//! Schema: `tags(id, tagtype_id, tagset_id)`, `objecttagrelations(object_id,
//! tag_id)` and `nodes(id, tag_id, hierarchy_id, parentnode_id)`. The
//! materialized form of a state query reads two views derived from them:
//!
//! - `tagset_object_mv(tagset_id, tag_id, object_id)`
//! - `node_object_mv(parentnode_id, node_id, object_id)`: every object tagged
//!   anywhere below `node_id`, keyed by the node's parent.
//!
//! Indexes on those views are created and dropped between tier phases.

use crate::config::PostgresConfig;
use crate::{
    BenchError, BenchResult, Dimension, FacetKind, IndexState, Lookup, MaterializedIndexes,
    PhotocubeBackend, QueryForm, QueryHandle, StateQuery,
};
use postgres::{Client, NoTls};
use tracing::{debug, info};

const NAME: &str = "PostgreSQL";

pub const CREATE_VIEWS_SQL: &str = "
CREATE MATERIALIZED VIEW IF NOT EXISTS tagset_object_mv AS
    SELECT t.tagset_id, t.id AS tag_id, r.object_id
    FROM tags t
    JOIN objecttagrelations r ON r.tag_id = t.id;

CREATE MATERIALIZED VIEW IF NOT EXISTS node_object_mv AS
    WITH RECURSIVE subtree(parentnode_id, node_id, descendant_id) AS (
        SELECT n.parentnode_id, n.id, n.id FROM nodes n WHERE n.parentnode_id IS NOT NULL
        UNION ALL
        SELECT s.parentnode_id, s.node_id, c.id
        FROM subtree s
        JOIN nodes c ON c.parentnode_id = s.descendant_id
    )
    SELECT DISTINCT s.parentnode_id, s.node_id, r.object_id
    FROM subtree s
    JOIN nodes d ON d.id = s.descendant_id
    JOIN objecttagrelations r ON r.tag_id = d.tag_id;";

pub const CREATE_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS tagset_object_mv_idx ON tagset_object_mv (tagset_id, tag_id, object_id);
CREATE INDEX IF NOT EXISTS node_object_mv_idx ON node_object_mv (parentnode_id, node_id, object_id);";

pub const DROP_INDEXES_SQL: &str = "
DROP INDEX IF EXISTS tagset_object_mv_idx;
DROP INDEX IF EXISTS node_object_mv_idx;";

const TAG_BY_ID_SQL: &str = "SELECT id, tagtype_id, tagset_id FROM tags WHERE id = $1";

const TAGS_IN_TAGSET_SQL: &str = "SELECT id, tagtype_id, tagset_id FROM tags WHERE tagset_id = $1";

const NODE_TAG_SUBTREE_SQL: &str = "
WITH RECURSIVE subtree(id, tag_id) AS (
    SELECT id, tag_id FROM nodes WHERE id = $1
    UNION ALL
    SELECT n.id, n.tag_id FROM nodes n JOIN subtree s ON n.parentnode_id = s.id
)
SELECT t.id, t.tagset_id FROM subtree s JOIN tags t ON t.id = s.tag_id";

// ────────────────────────────────────────────────────────────────────────────────
// State query translation
// ────────────────────────────────────────────────────────────────────────────────

/// Subquery yielding `(cell, object_id)` pairs for one dimension.
fn dimension_sql(dim: &Dimension, form: QueryForm) -> String {
    let f = dim.filter_id;
    match (dim.kind, form) {
        (FacetKind::Tagset, QueryForm::Baseline) => format!(
            "SELECT t.id AS cell, r.object_id FROM tags t \
             JOIN objecttagrelations r ON r.tag_id = t.id WHERE t.tagset_id = {f}"
        ),
        (FacetKind::Tagset, QueryForm::Materialized) => format!(
            "SELECT tag_id AS cell, object_id FROM tagset_object_mv WHERE tagset_id = {f}"
        ),
        (FacetKind::Hierarchy, QueryForm::Baseline) => format!(
            "WITH RECURSIVE subtree(cell, node_id) AS (\
             SELECT id, id FROM nodes WHERE parentnode_id = {f} \
             UNION ALL \
             SELECT s.cell, n.id FROM subtree s JOIN nodes n ON n.parentnode_id = s.node_id) \
             SELECT DISTINCT s.cell, r.object_id FROM subtree s \
             JOIN nodes n ON n.id = s.node_id \
             JOIN objecttagrelations r ON r.tag_id = n.tag_id"
        ),
        (FacetKind::Hierarchy, QueryForm::Materialized) => format!(
            "SELECT node_id AS cell, object_id FROM node_object_mv WHERE parentnode_id = {f}"
        ),
    }
}

/// Translate a state into one SQL statement counting objects per cell.
///
/// The leading `numtots` dimensions are rolled up so the result also carries
/// their subtotal rows; the remaining dimensions are plain group keys.
pub fn state_sql(state: &StateQuery, form: QueryForm) -> String {
    let n = state.numdims();
    let cells: Vec<String> = (1..=n).map(|i| format!("d{i}.cell AS c{i}")).collect();

    let mut sql = format!(
        "SELECT {}, COUNT(DISTINCT d1.object_id) AS objects\n",
        cells.join(", ")
    );
    for (i, dim) in state.dimensions().iter().enumerate() {
        let alias = i + 1;
        if alias == 1 {
            sql.push_str(&format!("FROM ({}) AS d1\n", dimension_sql(dim, form)));
        } else {
            sql.push_str(&format!(
                "JOIN ({}) AS d{alias} ON d{alias}.object_id = d1.object_id\n",
                dimension_sql(dim, form)
            ));
        }
    }

    let totals = state.numtots().min(n);
    let rolled: Vec<String> = (1..=totals).map(|i| format!("d{i}.cell")).collect();
    let plain: Vec<String> = (totals + 1..=n).map(|i| format!("d{i}.cell")).collect();
    let group_by = match (plain.is_empty(), rolled.is_empty()) {
        (_, true) => plain.join(", "),
        (true, false) => format!("ROLLUP ({})", rolled.join(", ")),
        (false, false) => format!("{}, ROLLUP ({})", plain.join(", "), rolled.join(", ")),
    };
    sql.push_str(&format!("GROUP BY {}", group_by));
    sql
}

// ────────────────────────────────────────────────────────────────────────────────
// Adapter
// ────────────────────────────────────────────────────────────────────────────────

/// Ids are `INTEGER` columns; refuse anything that would wrap.
fn pg_id(id: u32) -> BenchResult<i32> {
    i32::try_from(id).map_err(|_| BenchError::Config(format!("id {} exceeds INTEGER range", id)))
}

pub struct PostgresAdapter {
    client: Option<Client>,
    index_state: IndexState,
}

impl PostgresAdapter {
    pub fn connect(cfg: &PostgresConfig) -> BenchResult<Self> {
        let client = postgres::Config::new()
            .host(&cfg.host)
            .port(cfg.port)
            .user(&cfg.user)
            .password(&cfg.password)
            .dbname(&cfg.dbname)
            .connect(NoTls)
            .map_err(|e| BenchError::Database(format!("PostgreSQL connect: {}", e)))?;
        info!(host = %cfg.host, port = cfg.port, dbname = %cfg.dbname, "connected to PostgreSQL");
        Ok(Self {
            client: Some(client),
            index_state: IndexState::Unknown,
        })
    }

    fn client(&mut self) -> BenchResult<&mut Client> {
        self.client
            .as_mut()
            .ok_or_else(|| BenchError::Closed(NAME.into()))
    }

    /// Create the views read by [`QueryForm::Materialized`] if they are missing.
    pub fn create_materialized_views(&mut self) -> BenchResult<()> {
        self.client()?
            .batch_execute(CREATE_VIEWS_SQL)
            .map_err(|e| BenchError::Database(format!("create views: {}", e)))?;
        info!("materialized views ready");
        Ok(())
    }
}

impl PhotocubeBackend for PostgresAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn lookup(&mut self, kind: Lookup, id: u32) -> BenchResult<usize> {
        let sql = match kind {
            Lookup::TagById => TAG_BY_ID_SQL,
            Lookup::TagsInTagset => TAGS_IN_TAGSET_SQL,
            Lookup::NodeTagSubtree => NODE_TAG_SUBTREE_SQL,
        };
        let id = pg_id(id)?;
        let rows = self
            .client()?
            .query(sql, &[&id])
            .map_err(|e| BenchError::Database(format!("{}: {}", kind.label(), e)))?;
        Ok(rows.len())
    }

    fn build_state_query(&self, state: &StateQuery, form: QueryForm) -> QueryHandle {
        QueryHandle {
            statement: state_sql(state, form),
            form,
            state: state.clone(),
        }
    }

    fn execute(&mut self, query: &QueryHandle) -> BenchResult<usize> {
        let rows = self
            .client()?
            .query(query.statement.as_str(), &[])
            .map_err(|e| BenchError::Query {
                backend: NAME.into(),
                state: query.state.to_string(),
                message: e.to_string(),
            })?;
        Ok(rows.len())
    }

    fn close(&mut self) -> BenchResult<()> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .map_err(|e| BenchError::Database(format!("PostgreSQL close: {}", e)))?;
            debug!("PostgreSQL connection closed");
        }
        Ok(())
    }
}

impl MaterializedIndexes for PostgresAdapter {
    fn index_state(&self) -> IndexState {
        self.index_state
    }

    fn drop_materialized_indexes(&mut self) -> BenchResult<()> {
        self.client()?
            .batch_execute(DROP_INDEXES_SQL)
            .map_err(|e| BenchError::Database(format!("drop indexes: {}", e)))?;
        self.index_state = self.index_state.dropped();
        debug!("materialized indexes dropped");
        Ok(())
    }

    fn create_materialized_indexes(&mut self) -> BenchResult<()> {
        let next = self.index_state.created()?;
        self.client()?
            .batch_execute(CREATE_INDEXES_SQL)
            .map_err(|e| BenchError::Database(format!("create indexes: {}", e)))?;
        self.index_state = next;
        debug!("materialized indexes created");
        Ok(())
    }
}

impl Drop for PostgresAdapter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple() -> StateQuery {
        StateQuery::from_codes(&["H", "S"], &[40, 15], 2).unwrap()
    }

    #[test]
    fn test_baseline_reads_base_tables() {
        let sql = state_sql(&simple(), QueryForm::Baseline);
        assert!(sql.contains("WITH RECURSIVE subtree"));
        assert!(sql.contains("WHERE parentnode_id = 40"));
        assert!(sql.contains("WHERE t.tagset_id = 15"));
        assert!(!sql.contains("_mv"));
    }

    #[test]
    fn test_materialized_reads_views() {
        let sql = state_sql(&simple(), QueryForm::Materialized);
        assert!(sql.contains("FROM node_object_mv WHERE parentnode_id = 40"));
        assert!(sql.contains("FROM tagset_object_mv WHERE tagset_id = 15"));
        assert!(!sql.contains("RECURSIVE"));
    }

    #[test]
    fn test_dimensions_join_on_object() {
        let state = StateQuery::from_codes(&["H", "H", "S"], &[40, 5, 14], 3).unwrap();
        let sql = state_sql(&state, QueryForm::Materialized);
        assert!(sql.starts_with("SELECT d1.cell AS c1, d2.cell AS c2, d3.cell AS c3"));
        assert!(sql.contains(") AS d1\n"));
        assert!(sql.contains("AS d2 ON d2.object_id = d1.object_id"));
        assert!(sql.contains("AS d3 ON d3.object_id = d1.object_id"));
        assert!(sql.ends_with("GROUP BY ROLLUP (d1.cell, d2.cell, d3.cell)"));
    }

    #[test]
    fn test_numtots_limits_rollup() {
        let state = StateQuery::from_codes(&["S", "H", "S"], &[2, 5, 9], 1).unwrap();
        let sql = state_sql(&state, QueryForm::Baseline);
        assert!(sql.ends_with("GROUP BY d2.cell, d3.cell, ROLLUP (d1.cell)"));

        let none = StateQuery::from_codes(&["S", "H"], &[2, 5], 0).unwrap();
        let sql = state_sql(&none, QueryForm::Baseline);
        assert!(sql.ends_with("GROUP BY d1.cell, d2.cell"));
    }

    #[test]
    fn test_lifecycle_sql_is_idempotent() {
        assert_eq!(DROP_INDEXES_SQL.matches("IF EXISTS").count(), 2);
        assert_eq!(CREATE_INDEXES_SQL.matches("IF NOT EXISTS").count(), 2);
        assert_eq!(CREATE_VIEWS_SQL.matches("IF NOT EXISTS").count(), 2);
    }

    #[test]
    fn test_pg_id_rejects_wrapping_ids() {
        assert_eq!(pg_id(193_189).unwrap(), 193_189);
        assert_eq!(pg_id(i32::MAX as u32).unwrap(), i32::MAX);
        assert!(matches!(pg_id(i32::MAX as u32 + 1), Err(BenchError::Config(_))));
    }
}
