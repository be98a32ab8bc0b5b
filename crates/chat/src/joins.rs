//! Join planner
//!
//! Detects when a question names several entities that resolve to tables
//! connected by foreign keys, and plans a LEFT JOIN chain through the first
//! path found (breadth-first over the FK graph; no cost model).

use atabot_common::db::{quote_ident, quote_qualified, row_to_json, DbPool, ForeignKey};
use atabot_common::errors::Result;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

/// One JOIN edge in a planned chain
#[derive(Debug, Clone)]
pub struct JoinEdge {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

/// A planned multi-table query
#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub schema: String,
    pub base_table: String,
    pub joins: Vec<JoinEdge>,
}

/// FK-graph join planner
pub struct JoinPlanner {
    pool: DbPool,
}

impl JoinPlanner {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Detect a join opportunity: at least two query tokens resolving to
    /// distinct tables with an FK path between them
    pub async fn detect(&self, query: &str, schema: &str) -> Result<Option<JoinPlan>> {
        let tables: Vec<String> = self
            .pool
            .get_tables(schema)
            .await?
            .into_iter()
            .map(|t| t.table_name)
            .collect();

        let mentioned = match_entities_to_tables(query, &tables);
        if mentioned.len() < 2 {
            return Ok(None);
        }

        let fks = self.pool.get_foreign_keys(schema).await?;
        let plan = plan_join_chain(schema, &mentioned, &fks);
        if let Some(plan) = &plan {
            info!(
                base = %plan.base_table,
                joins = plan.joins.len(),
                "Join opportunity detected"
            );
        } else {
            debug!(?mentioned, "Entities resolve to tables but no FK path connects them");
        }
        Ok(plan)
    }

    /// Execute a planned LEFT JOIN chain
    pub async fn execute(&self, plan: &JoinPlan, limit: usize) -> Result<Vec<Map<String, Value>>> {
        let mut sql = format!(
            "SELECT * FROM {}",
            quote_qualified(&plan.schema, &plan.base_table)?
        );
        for edge in &plan.joins {
            sql.push_str(&format!(
                " LEFT JOIN {} ON {}.{} = {}.{}",
                quote_qualified(&plan.schema, &edge.right_table)?,
                quote_ident(&edge.left_table)?,
                quote_ident(&edge.left_column)?,
                quote_ident(&edge.right_table)?,
                quote_ident(&edge.right_column)?,
            ));
        }
        sql.push_str(&format!(" LIMIT {}", limit));

        let rows = sqlx::query(&sql).fetch_all(self.pool.inner()).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

/// Resolve query tokens to table names: exact match, or singular/plural
/// variants of a token
pub fn match_entities_to_tables(query: &str, tables: &[String]) -> Vec<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect();

    let mut matched = Vec::new();
    for table in tables {
        let name = table.to_lowercase();
        let hit = tokens.iter().any(|t| {
            *t == name || format!("{}s", t) == name || t.strip_suffix('s') == Some(name.as_str())
        });
        if hit && !matched.contains(table) {
            matched.push(table.clone());
        }
    }
    matched
}

/// Breadth-first walk of the FK graph from the first mentioned table; emits
/// the LEFT JOIN chain through the first path reaching another mentioned
/// table
pub fn plan_join_chain(
    schema: &str,
    mentioned: &[String],
    fks: &[ForeignKey],
) -> Option<JoinPlan> {
    let base = mentioned.first()?;
    let targets: HashSet<&String> = mentioned.iter().skip(1).collect();

    // Undirected adjacency: an FK can be walked either way
    let mut adjacency: HashMap<&str, Vec<JoinEdge>> = HashMap::new();
    for fk in fks {
        adjacency.entry(&fk.table_name).or_default().push(JoinEdge {
            left_table: fk.table_name.clone(),
            left_column: fk.column_name.clone(),
            right_table: fk.foreign_table_name.clone(),
            right_column: fk.foreign_column_name.clone(),
        });
        adjacency
            .entry(&fk.foreign_table_name)
            .or_default()
            .push(JoinEdge {
                left_table: fk.foreign_table_name.clone(),
                left_column: fk.foreign_column_name.clone(),
                right_table: fk.table_name.clone(),
                right_column: fk.column_name.clone(),
            });
    }

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(base.clone());
    let mut queue: VecDeque<(String, Vec<JoinEdge>)> = VecDeque::new();
    queue.push_back((base.clone(), Vec::new()));

    while let Some((current, path)) = queue.pop_front() {
        if targets.contains(&current) && !path.is_empty() {
            return Some(JoinPlan {
                schema: schema.to_string(),
                base_table: base.clone(),
                joins: path,
            });
        }

        if let Some(edges) = adjacency.get(current.as_str()) {
            for edge in edges {
                if visited.insert(edge.right_table.clone()) {
                    let mut next_path = path.clone();
                    next_path.push(edge.clone());
                    queue.push_back((edge.right_table.clone(), next_path));
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk(table: &str, column: &str, ftable: &str, fcolumn: &str) -> ForeignKey {
        ForeignKey {
            table_name: table.into(),
            column_name: column.into(),
            foreign_table_name: ftable.into(),
            foreign_column_name: fcolumn.into(),
        }
    }

    fn tables() -> Vec<String> {
        vec!["orders".into(), "customers".into(), "products".into()]
    }

    #[test]
    fn test_entity_matching_handles_plurals() {
        let matched = match_entities_to_tables("orders for each customer", &tables());
        assert_eq!(matched, vec!["orders".to_string(), "customers".to_string()]);
    }

    #[test]
    fn test_entity_matching_single_table_is_no_join() {
        let matched = match_entities_to_tables("list all products", &tables());
        assert_eq!(matched, vec!["products".to_string()]);
    }

    #[test]
    fn test_plan_direct_fk_path() {
        let fks = vec![fk("orders", "customer_id", "customers", "id")];
        let plan = plan_join_chain(
            "shop",
            &["orders".to_string(), "customers".to_string()],
            &fks,
        )
        .unwrap();

        assert_eq!(plan.base_table, "orders");
        assert_eq!(plan.joins.len(), 1);
        assert_eq!(plan.joins[0].right_table, "customers");
        assert_eq!(plan.joins[0].left_column, "customer_id");
    }

    #[test]
    fn test_plan_multi_hop_path() {
        // orders -> order_items -> products
        let fks = vec![
            fk("order_items", "order_id", "orders", "id"),
            fk("order_items", "product_id", "products", "id"),
        ];
        let plan = plan_join_chain(
            "shop",
            &["orders".to_string(), "products".to_string()],
            &fks,
        )
        .unwrap();

        assert_eq!(plan.base_table, "orders");
        assert_eq!(plan.joins.len(), 2);
        assert_eq!(plan.joins[0].right_table, "order_items");
        assert_eq!(plan.joins[1].right_table, "products");
    }

    #[test]
    fn test_no_path_yields_none() {
        let fks = vec![fk("orders", "customer_id", "customers", "id")];
        let plan = plan_join_chain(
            "shop",
            &["orders".to_string(), "products".to_string()],
            &fks,
        );
        assert!(plan.is_none());
    }
}
