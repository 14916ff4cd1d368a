//! Filter compiler: [`Filter`] → [`QueryPlan`].
//!
//! # Resolution rules
//!
//! - Each relation must name a `FieldType::Relation` declared on its source
//!   type (or an ancestor) pointing at its target type. Relations describing
//!   the same pair of columns are joined once, whichever side declared them.
//! - Joins are ordered outward from the root type; a relation that never
//!   connects to it is an error.
//! - A projection without a field stands for the type's primary key.
//! - Every projected type must be the root or joined in.
//! - An instance literal compared against a column becomes the instance's
//!   primary key value.
//! - Empty conditions compile to [`Predicate::True`].

use std::collections::HashSet;

use itertools::Itertools;
use tracing::debug;

use super::model::{Comparison, Condition, Datum, Filter, Relation};
use super::plan::{Join, Operand, Predicate, QueryPlan};
use crate::error::{CompilerError, Result};
use crate::host::{ClassDescriptor, FieldType, Instance, NativeValue, Registry};
use crate::terms::{to_native, Term};

/// Compiles filters against the classes and instances of a registry
pub struct FilterCompiler<'a> {
    registry: &'a Registry,
    default_primary_key: &'a str,
}

/// Compiles `filter` with a one-off [`FilterCompiler`]
pub fn compile(filter: &Filter, registry: &Registry, default_primary_key: &str) -> Result<QueryPlan> {
    FilterCompiler::new(registry, default_primary_key).compile(filter)
}

impl<'a> FilterCompiler<'a> {
    pub fn new(registry: &'a Registry, default_primary_key: &'a str) -> Self {
        Self {
            registry,
            default_primary_key,
        }
    }

    fn primary_key(&self, class: &ClassDescriptor) -> String {
        class
            .primary_key()
            .unwrap_or(self.default_primary_key)
            .to_string()
    }

    pub fn compile(&self, filter: &Filter) -> Result<QueryPlan> {
        let classes = self.registry.classes();
        let model = classes.require(&filter.root)?;
        let joins = self.joins(filter)?;

        let mut in_scope: HashSet<&str> = HashSet::new();
        in_scope.insert(filter.root.as_str());
        for join in &joins {
            in_scope.insert(join.left.as_str());
            in_scope.insert(join.right.as_str());
        }

        let mut disjuncts = Vec::with_capacity(filter.conditions.len());
        for conjunction in &filter.conditions {
            let mut parts = conjunction
                .iter()
                .map(|condition| self.condition(condition, &in_scope))
                .collect::<Result<Vec<_>>>()?;
            disjuncts.push(match parts.len() {
                0 => Predicate::True,
                1 => parts.remove(0),
                _ => Predicate::And(parts),
            });
        }
        let predicate = match disjuncts.len() {
            0 => Predicate::True,
            1 => disjuncts.remove(0),
            _ => Predicate::Or(disjuncts),
        };

        let plan = QueryPlan {
            model: filter.root.clone(),
            primary_key: self.primary_key(&model),
            joins,
            predicate,
        };
        debug!(
            target: "policy_bridge::filter::compile",
            model = %plan.model,
            joins = plan.joins.len(),
            disjuncts = filter.conditions.len(),
            "compiled filter"
        );
        Ok(plan)
    }

    fn resolve_relation(&self, relation: &Relation) -> Result<Join> {
        let classes = self.registry.classes();
        classes.require(relation.from_type())?;
        classes.require(relation.to_type())?;
        let field = classes
            .mro(relation.from_type())
            .iter()
            .filter_map(|name| classes.get(name))
            .find_map(|class| class.field(relation.field()).cloned());
        match field {
            Some(FieldType::Relation {
                kind,
                other_class_tag,
                my_field,
                other_field,
            }) if other_class_tag == relation.to_type() => Ok(Join {
                relation: relation.field().to_string(),
                kind,
                left: relation.from_type().to_string(),
                left_field: my_field,
                right: other_class_tag,
                right_field: other_field,
            }),
            _ => Err(CompilerError::UnknownRelation {
                type_name: relation.from_type().to_string(),
                field: relation.field().to_string(),
            }
            .into()),
        }
    }

    fn joins(&self, filter: &Filter) -> Result<Vec<Join>> {
        let mut resolved = Vec::with_capacity(filter.relations.len());
        for relation in &filter.relations {
            resolved.push((self.resolve_relation(relation)?, relation));
        }
        let mut pending: Vec<(Join, &Relation)> = resolved
            .into_iter()
            .unique_by(|(join, _)| {
                let mut ends = [
                    (join.left.clone(), join.left_field.clone()),
                    (join.right.clone(), join.right_field.clone()),
                ];
                ends.sort();
                ends
            })
            .collect();

        let mut in_scope = vec![filter.root.clone()];
        let mut ordered = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let next = pending
                .iter()
                .position(|(join, _)| in_scope.contains(&join.left) || in_scope.contains(&join.right));
            let Some(index) = next else {
                let (_, relation) = &pending[0];
                return Err(CompilerError::UnreachableJoin {
                    relation: relation.to_string(),
                }
                .into());
            };
            let (join, _) = pending.remove(index);
            for table in [&join.left, &join.right] {
                if !in_scope.contains(table) {
                    in_scope.push(table.clone());
                }
            }
            ordered.push(join);
        }
        Ok(ordered)
    }

    fn condition(&self, condition: &Condition, in_scope: &HashSet<&str>) -> Result<Predicate> {
        let Condition(left, op, right) = condition;
        if let Comparison::Unsupported(kind) = op {
            return Err(CompilerError::UnsupportedCondition { kind: kind.clone() }.into());
        }
        Ok(Predicate::Compare {
            left: self.operand(left, right, in_scope)?,
            op: op.clone(),
            right: self.operand(right, left, in_scope)?,
        })
    }

    fn operand(&self, datum: &Datum, other: &Datum, in_scope: &HashSet<&str>) -> Result<Operand> {
        match datum {
            Datum::Field(projection) => {
                if !in_scope.contains(projection.type_name()) {
                    return Err(CompilerError::UnjoinedType {
                        type_name: projection.type_name().to_string(),
                    }
                    .into());
                }
                let column = match projection.field() {
                    Some(field) => field.to_string(),
                    None => {
                        let class = self.registry.classes().require(projection.type_name())?;
                        self.primary_key(&class)
                    }
                };
                Ok(Operand::Column {
                    table: projection.type_name().to_string(),
                    column,
                })
            }
            Datum::Imm(value) => {
                let native = to_native(&Term::new(value.clone()), self.registry)?;
                let native = match other {
                    Datum::Field(_) => self.key_literal(native)?,
                    Datum::Imm(_) => native,
                };
                Ok(Operand::Literal(native))
            }
        }
    }

    fn key_literal(&self, value: NativeValue) -> Result<NativeValue, CompilerError> {
        match value {
            NativeValue::Instance(instance) => self.instance_key(&instance),
            NativeValue::List(items) => Ok(NativeValue::List(
                items
                    .into_iter()
                    .map(|item| self.key_literal(item))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            NativeValue::Variable(_)
            | NativeValue::Expression { .. }
            | NativeValue::Pattern { .. }
            | NativeValue::Predicate { .. } => Err(CompilerError::InvalidLiteral {
                message: format!("cannot compare a column with {}", value),
            }),
            other => Ok(other),
        }
    }

    fn instance_key(&self, instance: &Instance) -> Result<NativeValue, CompilerError> {
        let classes = self.registry.classes();
        let class_name = instance.class_name();
        let primary_key = classes
            .get(class_name)
            .map(|class| self.primary_key(&class))
            .unwrap_or_else(|| self.default_primary_key.to_string());
        let getter = classes
            .mro(class_name)
            .iter()
            .filter_map(|name| classes.get(name))
            .find_map(|class| class.attribute(&primary_key).cloned())
            .ok_or_else(|| CompilerError::InvalidLiteral {
                message: format!("{} instance has no attribute '{}'", class_name, primary_key),
            })?;
        getter(instance).map_err(|err| CompilerError::InvalidLiteral {
            message: format!("reading {}.{}: {}", class_name, primary_key, err),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::{BridgeError, RegistryError};
    use crate::host::{ClassBuilder, ClassTable, RelationKind};

    struct Org {
        id: String,
    }

    struct Repo;

    struct Issue;

    fn registry() -> Registry {
        let classes = ClassTable::new();
        classes.register(
            ClassBuilder::<Org>::new("Org")
                .add_attribute("id", |o: &Org| o.id.clone())
                .add_relation("repos", RelationKind::Many, "Repo", "id", "org_id")
                .build(),
        );
        classes.register(
            ClassBuilder::<Repo>::new("Repo")
                .add_relation("organization", RelationKind::One, "Org", "org_id", "id")
                .build(),
        );
        classes.register(
            ClassBuilder::<Issue>::new("Issue")
                .with_primary_key("number")
                .add_relation("repo", RelationKind::One, "Repo", "repo_id", "id")
                .build(),
        );
        let counter = Arc::new(AtomicU64::new(1));
        Registry::new(classes, Arc::new(move || counter.fetch_add(1, Ordering::SeqCst)))
    }

    fn filter(wire: serde_json::Value) -> Filter {
        Filter::decode(&wire).unwrap()
    }

    #[test]
    fn test_compile_join_and_eq() {
        let reg = registry();
        let plan = compile(
            &filter(json!({
                "root": "Repo",
                "relations": [["Repo", "organization", "Org"]],
                "conditions": [[[{"Field": ["Org", "id"]}, "Eq", {"Imm": {"String": "osohq"}}]]]
            })),
            &reg,
            "id",
        )
        .unwrap();
        assert_eq!(plan.model, "Repo");
        assert_eq!(plan.primary_key, "id");
        assert_eq!(plan.joins.len(), 1);
        assert_eq!(plan.joins[0].left_field, "org_id");
        assert_eq!(
            plan.predicate,
            Predicate::Compare {
                left: Operand::Column {
                    table: "Org".into(),
                    column: "id".into()
                },
                op: Comparison::Eq,
                right: Operand::Literal(NativeValue::String("osohq".into())),
            }
        );
        assert_eq!(
            plan.to_string(),
            "SELECT DISTINCT Repo.* FROM Repo INNER JOIN Org ON Repo.org_id = Org.id WHERE Org.id = 'osohq'"
        );
    }

    #[test]
    fn test_empty_conditions_match_everything() {
        let reg = registry();
        let plan = compile(&Filter::all("Issue"), &reg, "id").unwrap();
        assert_eq!(plan.predicate, Predicate::True);
        assert_eq!(plan.primary_key, "number");
    }

    #[test]
    fn test_mirrored_relations_join_once() {
        let reg = registry();
        let plan = compile(
            &filter(json!({
                "root": "Repo",
                "relations": [["Org", "repos", "Repo"], ["Repo", "organization", "Org"]],
                "conditions": []
            })),
            &reg,
            "id",
        )
        .unwrap();
        assert_eq!(plan.joins.len(), 1);
    }

    #[test]
    fn test_join_order_is_independent_of_input_order() {
        let reg = registry();
        let plan = compile(
            &filter(json!({
                "root": "Issue",
                "relations": [["Repo", "organization", "Org"], ["Issue", "repo", "Repo"]],
                "conditions": [[[{"Field": ["Org", "id"]}, "Eq", {"Imm": {"String": "osohq"}}]]]
            })),
            &reg,
            "id",
        )
        .unwrap();
        let order: Vec<_> = plan.joins.iter().map(|j| j.relation.as_str()).collect();
        assert_eq!(order, vec!["repo", "organization"]);
        assert_eq!(plan.tables(), vec!["Issue", "Repo", "Org"]);
    }

    #[test]
    fn test_unsupported_condition() {
        let reg = registry();
        let err = compile(
            &filter(json!({
                "root": "Repo",
                "conditions": [[[{"Field": ["Repo", "stars"]}, "Lt", {"Imm": {"Number": {"Integer": 3}}}]]]
            })),
            &reg,
            "id",
        )
        .unwrap_err();
        assert_eq!(
            err,
            BridgeError::Compiler(CompilerError::UnsupportedCondition { kind: "Lt".into() })
        );
    }

    #[test]
    fn test_unjoined_type() {
        let reg = registry();
        let err = compile(
            &filter(json!({
                "root": "Repo",
                "conditions": [[[{"Field": ["Org", "id"]}, "Eq", {"Imm": {"String": "osohq"}}]]]
            })),
            &reg,
            "id",
        )
        .unwrap_err();
        assert_eq!(
            err,
            BridgeError::Compiler(CompilerError::UnjoinedType {
                type_name: "Org".into()
            })
        );
    }

    #[test]
    fn test_unknown_relation_and_class() {
        let reg = registry();
        let err = compile(
            &filter(json!({"root": "Repo", "relations": [["Repo", "owner", "Org"]]})),
            &reg,
            "id",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Compiler(CompilerError::UnknownRelation { .. })
        ));

        let err = compile(&Filter::all("Team"), &reg, "id").unwrap_err();
        assert_eq!(
            err,
            BridgeError::Registry(RegistryError::UnknownClass {
                name: "Team".into()
            })
        );
    }

    #[test]
    fn test_unreachable_join() {
        let reg = registry();
        let err = compile(
            &filter(json!({"root": "Issue", "relations": [["Repo", "organization", "Org"]]})),
            &reg,
            "id",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Compiler(CompilerError::UnreachableJoin { .. })
        ));
    }

    #[test]
    fn test_instance_literal_becomes_primary_key() {
        let mut reg = registry();
        let org = Instance::new(
            "Org",
            Org {
                id: "osohq".into(),
            },
        );
        let id = reg.cache(&org);
        let plan = compile(
            &filter(json!({
                "root": "Org",
                "conditions": [[[{"Field": ["Org", null]}, "Eq",
                    {"Imm": {"ExternalInstance": {"instance_id": id}}}]]]
            })),
            &reg,
            "id",
        )
        .unwrap();
        assert_eq!(
            plan.predicate,
            Predicate::Compare {
                left: Operand::Column {
                    table: "Org".into(),
                    column: "id".into()
                },
                op: Comparison::Eq,
                right: Operand::Literal(NativeValue::String("osohq".into())),
            }
        );
    }
}
