//! In-memory data adapter.
//!
//! Tables are vectors of rows keyed by type name. Plans run as nested-loop
//! joins in plan order; a model row is returned once if any combination of
//! joined rows satisfies the predicate. Results keep table order.

use std::collections::HashMap;

use super::adapter::{DataAdapter, Row};
use super::model::Comparison;
use super::plan::{Operand, Predicate, QueryPlan};
use crate::error::AdapterError;
use crate::host::NativeValue;

#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    tables: HashMap<String, Vec<Row>>,
}

/// A validated plan, ready to scan
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    plan: QueryPlan,
}

impl MemoryQuery {
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }
}

type Scope<'a> = Vec<(&'a str, &'a Row)>;

fn column<'a>(table: &str, row: &'a Row, name: &str) -> Result<&'a NativeValue, AdapterError> {
    row.get(name).ok_or_else(|| AdapterError::UnknownColumn {
        table: table.to_string(),
        column: name.to_string(),
    })
}

fn bound<'a>(scope: &Scope<'a>, table: &str) -> Option<&'a Row> {
    scope.iter().find(|(name, _)| *name == table).map(|(_, row)| *row)
}

fn contains(haystack: &NativeValue, needle: &NativeValue) -> Result<bool, AdapterError> {
    match haystack {
        NativeValue::List(items) => Ok(items.iter().any(|item| item.loose_eq(needle))),
        other => Err(AdapterError::Execution(format!(
            "IN expects a list on the right, got {}",
            other.type_name()
        ))),
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row, creating the table if needed
    pub fn insert(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    pub fn with_table(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.tables.entry(table.to_string()).or_default().extend(rows);
        self
    }

    pub fn table(&self, name: &str) -> &[Row] {
        self.tables.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn rows(&self, name: &str) -> Result<&[Row], AdapterError> {
        self.tables
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| AdapterError::UnknownTable {
                name: name.to_string(),
            })
    }

    fn matches<'a>(
        &'a self,
        plan: &'a QueryPlan,
        index: usize,
        scope: &mut Scope<'a>,
    ) -> Result<bool, AdapterError> {
        let Some(join) = plan.joins.get(index) else {
            return evaluate(&plan.predicate, scope);
        };
        match (bound(scope, &join.left), bound(scope, &join.right)) {
            (Some(left), Some(right)) => {
                let l = column(&join.left, left, &join.left_field)?;
                let r = column(&join.right, right, &join.right_field)?;
                if l.loose_eq(r) {
                    self.matches(plan, index + 1, scope)
                } else {
                    Ok(false)
                }
            }
            (Some(left), None) => {
                let key = column(&join.left, left, &join.left_field)?;
                self.extend(plan, index, scope, &join.right, &join.right_field, key)
            }
            (None, Some(right)) => {
                let key = column(&join.right, right, &join.right_field)?;
                self.extend(plan, index, scope, &join.left, &join.left_field, key)
            }
            (None, None) => Err(AdapterError::Execution(format!(
                "join {}.{} is not connected to {}",
                join.left, join.relation, plan.model
            ))),
        }
    }

    fn extend<'a>(
        &'a self,
        plan: &'a QueryPlan,
        index: usize,
        scope: &mut Scope<'a>,
        table: &'a str,
        field: &str,
        key: &NativeValue,
    ) -> Result<bool, AdapterError> {
        for candidate in self.rows(table)? {
            if !column(table, candidate, field)?.loose_eq(key) {
                continue;
            }
            scope.push((table, candidate));
            let found = self.matches(plan, index + 1, scope);
            scope.pop();
            if found? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn operand<'a>(operand: &'a Operand, scope: &Scope<'a>) -> Result<&'a NativeValue, AdapterError> {
    match operand {
        Operand::Literal(value) => Ok(value),
        Operand::Column { table, column: name } => {
            let row = bound(scope, table).ok_or_else(|| AdapterError::UnknownTable {
                name: table.clone(),
            })?;
            column(table, row, name)
        }
    }
}

fn evaluate(predicate: &Predicate, scope: &Scope<'_>) -> Result<bool, AdapterError> {
    match predicate {
        Predicate::True => Ok(true),
        Predicate::Compare { left, op, right } => {
            let l = operand(left, scope)?;
            let r = operand(right, scope)?;
            match op {
                Comparison::Eq => Ok(l.loose_eq(r)),
                Comparison::Neq => Ok(!l.loose_eq(r)),
                Comparison::In => contains(r, l),
                Comparison::Nin => Ok(!contains(r, l)?),
                Comparison::Unsupported(kind) => Err(AdapterError::Execution(format!(
                    "unsupported comparison {}",
                    kind
                ))),
            }
        }
        Predicate::And(parts) => {
            for part in parts {
                if !evaluate(part, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Or(parts) => {
            for part in parts {
                if evaluate(part, scope)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

impl DataAdapter for MemoryAdapter {
    type Query = MemoryQuery;

    fn build_query(&self, plan: &QueryPlan) -> Result<MemoryQuery, AdapterError> {
        for table in plan.tables() {
            self.rows(table)?;
        }
        Ok(MemoryQuery { plan: plan.clone() })
    }

    fn execute_query(&self, query: MemoryQuery) -> Result<Vec<Row>, AdapterError> {
        let plan = &query.plan;
        let mut out = Vec::new();
        for row in self.rows(&plan.model)? {
            let mut scope: Scope<'_> = vec![(plan.model.as_str(), row)];
            if self.matches(plan, 0, &mut scope)? {
                out.push(row.clone());
            }
        }
        Ok(out)
    }
}
