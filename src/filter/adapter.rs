//! Data adapters: running query plans against a store.
//!
//! An adapter turns a [`QueryPlan`] into its own query type (SQL text, an ORM
//! query, an in-memory scan) and executes it. Rows come back as column maps
//! and are folded into host instances through the session registry.

use std::collections::{BTreeMap, HashSet};

use tracing::trace;

use super::plan::QueryPlan;
use crate::error::{AdapterError, Result};
use crate::host::{Instance, NativeValue, Registry};

/// A fetched record: column name → value
pub type Row = BTreeMap<String, NativeValue>;

pub trait DataAdapter {
    /// The adapter's executable query
    type Query;

    fn build_query(&self, plan: &QueryPlan) -> Result<Self::Query, AdapterError>;

    fn execute_query(&self, query: Self::Query) -> Result<Vec<Row>, AdapterError>;
}

/// Builds and runs `plan`, keeping the first row of each primary key
pub fn execute<A: DataAdapter + ?Sized>(adapter: &A, plan: &QueryPlan) -> Result<Vec<Row>> {
    let query = adapter.build_query(plan)?;
    let rows = adapter.execute_query(query)?;
    let fetched = rows.len();
    let mut seen = HashSet::new();
    let mut distinct = Vec::with_capacity(rows.len());
    for row in rows {
        let key = row.get(&plan.primary_key).ok_or_else(|| AdapterError::UnknownColumn {
            table: plan.model.clone(),
            column: plan.primary_key.clone(),
        })?;
        if seen.insert(key.to_string()) {
            distinct.push(row);
        }
    }
    trace!(target: "policy_bridge::filter::execute", model = %plan.model, fetched, distinct = distinct.len());
    Ok(distinct)
}

/// Turns rows of `plan.model` into instances, one per primary key
pub fn materialize(plan: &QueryPlan, rows: &[Row], registry: &mut Registry) -> Result<Vec<Instance>> {
    let mut instances = Vec::with_capacity(rows.len());
    for row in rows {
        let key = row.get(&plan.primary_key).ok_or_else(|| AdapterError::UnknownColumn {
            table: plan.model.clone(),
            column: plan.primary_key.clone(),
        })?;
        instances.push(registry.realize_record(&plan.model, key, row)?);
    }
    Ok(instances)
}
