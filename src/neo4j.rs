//! Bolt sink for Neo4j and Memgraph.

use crate::config;
use crate::error::SinkError;
use crate::models::{Edge, PageRecord};
use crate::sink::GraphSink;
use anyhow::{bail, Context, Result};
use neo4rs::{query, Graph, Query};
use tracing::info;

const CYPHER_MERGE_PAGES: &str = "UNWIND range(0, size($ids) - 1) AS i \
     MERGE (p:Page {id: $ids[i]}) \
     SET p.title = $titles[i], p.is_redirect = $redirects[i]";

const CYPHER_MERGE_REDIRECTS: &str = "UNWIND range(0, size($from) - 1) AS i \
     MATCH (a:Page {id: $from[i]}), (b:Page {id: $to[i]}) \
     MERGE (a)-[:REDIRECTS_TO]->(b)";

const CYPHER_MERGE_LINKS: &str = "UNWIND range(0, size($from) - 1) AS i \
     MATCH (a:Page {id: $from[i]}), (b:Page {id: $to[i]}) \
     MERGE (a)-[:LINKS_TO]->(b)";

/// Server dialect; only index DDL differs between the two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoltFlavor {
    #[default]
    Neo4j,
    Memgraph,
}

impl BoltFlavor {
    pub fn page_indexes(self) -> &'static [&'static str] {
        match self {
            BoltFlavor::Neo4j => &[
                "CREATE INDEX page_id IF NOT EXISTS FOR (p:Page) ON (p.id);",
                "CREATE INDEX page_title IF NOT EXISTS FOR (p:Page) ON (p.title);",
            ],
            // Re-creating an existing index is a notice, not an error, on Memgraph
            BoltFlavor::Memgraph => &["CREATE INDEX ON :Page(id);", "CREATE INDEX ON :Page(title);"],
        }
    }
}

pub struct Neo4jConfig {
    pub bolt_uri: String,
    pub user: String,
    pub password: String,
    pub flavor: BoltFlavor,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            bolt_uri: config::DEFAULT_BOLT_URI.to_string(),
            user: String::new(),
            password: String::new(),
            flavor: BoltFlavor::default(),
        }
    }
}

/// Writes pages and edges over Bolt with `MERGE`, so replayed batches are harmless.
pub struct Neo4jSink {
    graph: Graph,
}

impl Neo4jSink {
    pub async fn connect(config: &Neo4jConfig) -> Result<Self> {
        info!(uri = %config.bolt_uri, flavor = ?config.flavor, "Connecting to graph database");
        let graph = connect_with_retry(config).await?;
        for cypher in config.flavor.page_indexes() {
            run_cypher(&graph, cypher).await?;
        }
        info!("Page indexes ready");
        Ok(Self { graph })
    }

    async fn run(&self, q: Query) -> Result<(), SinkError> {
        self.graph.run(q).await?;
        Ok(())
    }
}

fn edge_query(cypher: &str, batch: &[Edge]) -> Query {
    let from: Vec<i64> = batch.iter().map(|e| i64::from(e.from)).collect();
    let to: Vec<i64> = batch.iter().map(|e| i64::from(e.to)).collect();
    query(cypher).param("from", from).param("to", to)
}

impl GraphSink for Neo4jSink {
    async fn insert_pages(&self, batch: &[PageRecord]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = batch.iter().map(|p| i64::from(p.id)).collect();
        let titles: Vec<String> = batch.iter().map(|p| p.title.clone()).collect();
        let redirects: Vec<bool> = batch.iter().map(|p| p.is_redirect).collect();
        let q = query(CYPHER_MERGE_PAGES)
            .param("ids", ids)
            .param("titles", titles)
            .param("redirects", redirects);
        self.run(q).await
    }

    async fn insert_redirects(&self, batch: &[Edge]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.run(edge_query(CYPHER_MERGE_REDIRECTS, batch)).await
    }

    async fn insert_links(&self, batch: &[Edge]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.run(edge_query(CYPHER_MERGE_LINKS, batch)).await
    }
}

async fn connect_with_retry(config: &Neo4jConfig) -> Result<Graph> {
    let max_retries = config::SINK_CONNECT_RETRIES;
    let delay = tokio::time::Duration::from_secs(config::SINK_CONNECT_DELAY_SECS);

    for attempt in 1..=max_retries {
        match Graph::new(&config.bolt_uri, &config.user, &config.password) {
            Ok(graph) => match graph.run(query("RETURN 1;")).await {
                Ok(_) => return Ok(graph),
                Err(e) if attempt < max_retries => {
                    info!(attempt, "Connection test failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e).context(format!(
                        "Cannot connect to {} after {max_retries} attempts",
                        config.bolt_uri
                    ));
                }
            },
            Err(e) if attempt < max_retries => {
                info!(attempt, "Cannot connect to {}, retrying: {e}", config.bolt_uri);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(e).context(format!(
                    "Cannot connect to {} after {max_retries} attempts",
                    config.bolt_uri
                ));
            }
        }
    }

    bail!(
        "Cannot connect to {} after {max_retries} attempts",
        config.bolt_uri
    );
}

async fn run_cypher(graph: &Graph, cypher: &str) -> Result<()> {
    graph
        .run(query(cypher))
        .await
        .with_context(|| format!("Failed to execute: {cypher}"))?;
    Ok(())
}
