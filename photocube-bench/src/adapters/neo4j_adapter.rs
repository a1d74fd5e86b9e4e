//! Neo4j adapter (via `neo4rs` on a private current-thread tokio runtime).
//!
//! Graph model: `(:Object)-[:TAGGED]->(:Tag)-[:IN_TAGSET]->(:Tagset)` and
//! `(:Node)-[:HAS_CHILD]->(:Node)`, `(:Node)-[:REPRESENTS]->(:Tag)`.
//!
//! There are no materialized views on this side, so both query forms produce
//! the same Cypher.

use crate::config::Neo4jConfig;
use crate::{
    BenchError, BenchResult, FacetKind, Lookup, PhotocubeBackend, QueryForm, QueryHandle,
    StateQuery,
};
use neo4rs::{query, Graph, Query};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

const NAME: &str = "Neo4j";

const TAG_BY_ID_CYPHER: &str = "MATCH (t:Tag {id: $id}) RETURN t";

const TAGS_IN_TAGSET_CYPHER: &str = "MATCH (t:Tag)-[:IN_TAGSET]->(:Tagset {id: $id}) RETURN t";

const NODE_TAG_SUBTREE_CYPHER: &str =
    "MATCH (:Node {id: $id})-[:HAS_CHILD*0..]->(:Node)-[:REPRESENTS]->(t:Tag) RETURN t";

/// Translate a state into one Cypher statement counting objects per cell.
pub fn state_cypher(state: &StateQuery) -> String {
    let mut lines = vec!["MATCH (o:Object)".to_string()];
    let mut cells = Vec::with_capacity(state.numdims());
    for (i, dim) in state.dimensions().iter().enumerate() {
        let n = i + 1;
        let f = dim.filter_id;
        match dim.kind {
            FacetKind::Tagset => {
                lines.push(format!(
                    "MATCH (o)-[:TAGGED]->(t{n}:Tag)-[:IN_TAGSET]->(:Tagset {{id: {f}}})"
                ));
                cells.push(format!("t{n}.id AS c{n}"));
            }
            FacetKind::Hierarchy => {
                lines.push(format!(
                    "MATCH (:Node {{id: {f}}})-[:HAS_CHILD]->(n{n}:Node)-[:HAS_CHILD*0..]->(:Node)\
                     -[:REPRESENTS]->(:Tag)<-[:TAGGED]-(o)"
                ));
                cells.push(format!("n{n}.id AS c{n}"));
            }
        }
    }
    lines.push(format!(
        "RETURN {}, count(DISTINCT o) AS objects",
        cells.join(", ")
    ));
    lines.join("\n")
}

pub struct Neo4jAdapter {
    // Declared before the runtime so it is dropped while the runtime still exists.
    graph: Option<Graph>,
    runtime: Runtime,
}

impl Neo4jAdapter {
    pub fn connect(cfg: &Neo4jConfig) -> BenchResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let graph = runtime
            .block_on(Graph::new(
                cfg.uri.as_str(),
                cfg.user.as_str(),
                cfg.password.as_str(),
            ))
            .map_err(|e| BenchError::Database(format!("Neo4j connect: {}", e)))?;
        let adapter = Self {
            graph: Some(graph),
            runtime,
        };
        adapter.drain(query("RETURN 1"), |e| {
            BenchError::Database(format!("Neo4j ping: {}", e))
        })?;
        info!(uri = %cfg.uri, "connected to Neo4j");
        Ok(adapter)
    }

    /// Run `q` and consume every row, returning how many there were.
    fn drain<E>(&self, q: Query, on_error: E) -> BenchResult<usize>
    where
        E: FnOnce(neo4rs::Error) -> BenchError,
    {
        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| BenchError::Closed(NAME.into()))?;
        self.runtime
            .block_on(async {
                let mut stream = graph.execute(q).await?;
                let mut rows = 0usize;
                while stream.next().await?.is_some() {
                    rows += 1;
                }
                Ok::<usize, neo4rs::Error>(rows)
            })
            .map_err(on_error)
    }
}

impl PhotocubeBackend for Neo4jAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn lookup(&mut self, kind: Lookup, id: u32) -> BenchResult<usize> {
        let cypher = match kind {
            Lookup::TagById => TAG_BY_ID_CYPHER,
            Lookup::TagsInTagset => TAGS_IN_TAGSET_CYPHER,
            Lookup::NodeTagSubtree => NODE_TAG_SUBTREE_CYPHER,
        };
        self.drain(query(cypher).param("id", id as i64), |e| {
            BenchError::Database(format!("{}: {}", kind.label(), e))
        })
    }

    fn build_state_query(&self, state: &StateQuery, form: QueryForm) -> QueryHandle {
        QueryHandle {
            statement: state_cypher(state),
            form,
            state: state.clone(),
        }
    }

    fn execute(&mut self, handle: &QueryHandle) -> BenchResult<usize> {
        self.drain(query(&handle.statement), |e| BenchError::Query {
            backend: NAME.into(),
            state: handle.state.to_string(),
            message: e.to_string(),
        })
    }

    fn close(&mut self) -> BenchResult<()> {
        if let Some(graph) = self.graph.take() {
            let _guard = self.runtime.enter();
            drop(graph);
            debug!("Neo4j connection pool released");
        }
        Ok(())
    }
}

impl Drop for Neo4jAdapter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cypher_matches_each_dimension() {
        let state = StateQuery::from_codes(&["S", "H", "S"], &[2, 5, 9], 3).unwrap();
        let cypher = state_cypher(&state);
        let lines: Vec<&str> = cypher.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "MATCH (o:Object)");
        assert!(lines[1].contains("(t1:Tag)-[:IN_TAGSET]->(:Tagset {id: 2})"));
        assert!(lines[2].starts_with("MATCH (:Node {id: 5})-[:HAS_CHILD]->(n2:Node)"));
        assert!(lines[3].contains("(:Tagset {id: 9})"));
        assert_eq!(
            lines[4],
            "RETURN t1.id AS c1, n2.id AS c2, t3.id AS c3, count(DISTINCT o) AS objects"
        );
    }

    #[test]
    fn test_form_does_not_change_cypher() {
        let state = StateQuery::from_codes(&["H", "S"], &[40, 15], 2).unwrap();
        let cypher = state_cypher(&state);
        assert!(cypher.contains("{id: 40}"));
        assert!(cypher.contains("{id: 15}"));
        assert!(!cypher.contains("mv"));
    }
}
