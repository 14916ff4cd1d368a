//! Compiled query plans.
//!
//! A [`QueryPlan`] is a filter resolved against the registered classes: table
//! names, join columns and primary keys are explicit and literals are host
//! values. Data adapters translate plans into their own query language.

use std::fmt;

use itertools::Itertools;

use super::model::Comparison;
use crate::host::{NativeValue, RelationKind};

/// `left.left_field = right.right_field`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    /// Relation field the join came from
    pub relation: String,
    pub kind: RelationKind,
    pub left: String,
    pub left_field: String,
    pub right: String,
    pub right_field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column { table: String, column: String },
    Literal(NativeValue),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row
    True,
    Compare {
        left: Operand,
        op: Comparison,
        right: Operand,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

/// A resolved filter.
///
/// Joins are ordered so that each one touches a table already in scope,
/// starting from `model`. Result rows are distinct on `primary_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub model: String,
    pub primary_key: String,
    pub joins: Vec<Join>,
    pub predicate: Predicate,
}

impl QueryPlan {
    /// Tables the plan reads, model first
    pub fn tables(&self) -> Vec<&str> {
        let mut tables = vec![self.model.as_str()];
        for join in &self.joins {
            for table in [join.left.as_str(), join.right.as_str()] {
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
        }
        tables
    }
}

fn sql_literal(value: &NativeValue) -> String {
    match value {
        NativeValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        NativeValue::List(items) => format!("({})", items.iter().map(sql_literal).join(", ")),
        NativeValue::Boolean(b) => b.to_string().to_uppercase(),
        other => other.to_string(),
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column { table, column } => write!(f, "{}.{}", table, column),
            Operand::Literal(value) => f.write_str(&sql_literal(value)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("TRUE"),
            Predicate::Compare { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Predicate::And(parts) if parts.is_empty() => f.write_str("TRUE"),
            Predicate::Or(parts) if parts.is_empty() => f.write_str("FALSE"),
            Predicate::And(parts) => write!(f, "{}", parts.iter().map(|p| format!("({})", p)).join(" AND ")),
            Predicate::Or(parts) => write!(f, "{}", parts.iter().map(|p| format!("({})", p)).join(" OR ")),
        }
    }
}

/// SQL-flavoured rendering, for explain logs
impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT DISTINCT {}.* FROM {}", self.model, self.model)?;
        let mut in_scope = vec![self.model.as_str()];
        for join in &self.joins {
            let table = if in_scope.contains(&join.left.as_str()) {
                join.right.as_str()
            } else {
                join.left.as_str()
            };
            in_scope.push(table);
            write!(
                f,
                " INNER JOIN {} ON {}.{} = {}.{}",
                table, join.left, join.left_field, join.right, join.right_field
            )?;
        }
        if self.predicate != Predicate::True {
            write!(f, " WHERE {}", self.predicate)?;
        }
        Ok(())
    }
}
