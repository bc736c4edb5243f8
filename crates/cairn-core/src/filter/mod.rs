//! Structural document predicates.
//!
//! A predicate is a query document such as `{a: 1, "b.c": {$gt: 2}}`.
//! Top-level fields are ANDed together; `$and`, `$or` and `$nor` combine
//! sub-predicates. The same engine evaluates `--filter` during restore and
//! oplog preconditions during replay.

pub mod relaxed;

use crate::error::{CairnError, Result};
use crate::types::document::{type_name, Document};
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Nor(Vec<Predicate>),
    Field { path: String, condition: Condition },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    All(Vec<Condition>),
}

impl Predicate {
    /// Parse a predicate from relaxed JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let strict = relaxed::normalize(text)?;
        let value: Value = serde_json::from_str(&strict)
            .map_err(|e| CairnError::InvalidFilter(format!("{}: {}", text, e)))?;
        Self::from_value(&value)
    }

    /// Build a predicate from a query document.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            CairnError::InvalidFilter(format!("expected an object, found {}", type_name(value)))
        })?;

        let mut clauses = Vec::with_capacity(map.len());
        for (key, v) in map {
            match key.as_str() {
                "$and" => clauses.push(Predicate::And(sub_predicates(key, v)?)),
                "$or" => clauses.push(Predicate::Or(sub_predicates(key, v)?)),
                "$nor" => clauses.push(Predicate::Nor(sub_predicates(key, v)?)),
                k if k.starts_with('$') => {
                    return Err(CairnError::InvalidFilter(format!(
                        "unknown top-level operator {}",
                        k
                    )))
                }
                path => clauses.push(Predicate::Field {
                    path: path.to_string(),
                    condition: parse_condition(v)?,
                }),
            }
        }

        if clauses.len() == 1 {
            Ok(clauses.remove(0))
        } else {
            Ok(Predicate::And(clauses))
        }
    }

    /// Predicate that matches every document.
    pub fn match_all() -> Self {
        Predicate::And(Vec::new())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.matches_map(doc.as_map())
    }

    pub fn matches_map(&self, map: &Map<String, Value>) -> bool {
        match self {
            Predicate::And(all) => all.iter().all(|p| p.matches_map(map)),
            Predicate::Or(any) => any.iter().any(|p| p.matches_map(map)),
            Predicate::Nor(none) => !none.iter().any(|p| p.matches_map(map)),
            Predicate::Field { path, condition } => {
                let segments: Vec<&str> = path.split('.').collect();
                let mut found = Vec::new();
                resolve_in_map(map, &segments, &mut found);
                condition.evaluate(&found)
            }
        }
    }
}

fn sub_predicates(op: &str, value: &Value) -> Result<Vec<Predicate>> {
    let items = value
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| CairnError::InvalidFilter(format!("{} expects a non-empty array", op)))?;
    items.iter().map(Predicate::from_value).collect()
}

fn parse_condition(value: &Value) -> Result<Condition> {
    let ops = match value.as_object() {
        Some(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        Some(map) if map.keys().any(|k| k.starts_with('$')) => {
            return Err(CairnError::InvalidFilter(
                "operators cannot be mixed with plain fields".into(),
            ))
        }
        _ => return Ok(Condition::Eq(value.clone())),
    };

    let mut conditions = Vec::with_capacity(ops.len());
    for (op, arg) in ops {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(arg.clone()),
            "$ne" => Condition::Ne(arg.clone()),
            "$gt" => Condition::Gt(arg.clone()),
            "$gte" => Condition::Gte(arg.clone()),
            "$lt" => Condition::Lt(arg.clone()),
            "$lte" => Condition::Lte(arg.clone()),
            "$in" => Condition::In(array_arg(op, arg)?),
            "$nin" => Condition::Nin(array_arg(op, arg)?),
            "$exists" => Condition::Exists(truthy(arg)),
            other => {
                return Err(CairnError::InvalidFilter(format!(
                    "unknown operator {}",
                    other
                )))
            }
        };
        conditions.push(condition);
    }

    if conditions.len() == 1 {
        Ok(conditions.remove(0))
    } else {
        Ok(Condition::All(conditions))
    }
}

fn array_arg(op: &str, arg: &Value) -> Result<Vec<Value>> {
    arg.as_array()
        .cloned()
        .ok_or_else(|| CairnError::InvalidFilter(format!("{} expects an array", op)))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::Null => false,
        _ => true,
    }
}

impl Condition {
    fn evaluate(&self, found: &[&Value]) -> bool {
        match self {
            Condition::Eq(target) => eq_matches(found, target),
            Condition::Ne(target) => !eq_matches(found, target),
            Condition::In(targets) => targets.iter().any(|t| eq_matches(found, t)),
            Condition::Nin(targets) => !targets.iter().any(|t| eq_matches(found, t)),
            Condition::Exists(want) => !found.is_empty() == *want,
            Condition::Gt(t) => cmp_matches(found, t, |o| o == Ordering::Greater),
            Condition::Gte(t) => cmp_matches(found, t, |o| o != Ordering::Less),
            Condition::Lt(t) => cmp_matches(found, t, |o| o == Ordering::Less),
            Condition::Lte(t) => cmp_matches(found, t, |o| o != Ordering::Greater),
            Condition::All(all) => all.iter().all(|c| c.evaluate(found)),
        }
    }
}

/// Equality with array-membership semantics; `null` also matches a
/// missing field.
fn eq_matches(found: &[&Value], target: &Value) -> bool {
    if found.is_empty() {
        return target.is_null();
    }
    found.iter().any(|v| {
        values_equal(v, target)
            || matches!(v, Value::Array(items) if items.iter().any(|i| values_equal(i, target)))
    })
}

fn cmp_matches(found: &[&Value], target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    found.iter().any(|v| {
        let direct = compare(v, target).is_some_and(&accept);
        direct
            || matches!(v, Value::Array(items)
                if items.iter().any(|i| compare(i, target).is_some_and(&accept)))
    })
}

/// Ordering between values of the same comparable class.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Structural equality where numbers compare by value (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

fn resolve_in_map<'a>(map: &'a Map<String, Value>, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if let Some(child) = map.get(*first) {
        resolve(child, rest, out);
    }
}

fn resolve<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    if segments.is_empty() {
        out.push(value);
        return;
    }
    match value {
        Value::Object(map) => resolve_in_map(map, segments, out),
        Value::Array(items) => {
            if let Ok(index) = segments[0].parse::<usize>() {
                if let Some(item) = items.get(index) {
                    resolve(item, &segments[1..], out);
                }
            }
            for item in items {
                if let Value::Object(map) = item {
                    resolve_in_map(map, segments, out);
                }
            }
        }
        _ => {}
    }
}
