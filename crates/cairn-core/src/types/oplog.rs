use crate::error::{CairnError, Result};
use crate::filter::Predicate;
use crate::types::document::{type_name, Document};
use crate::types::namespace::Namespace;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Logical timestamp of an operation log record.
///
/// Strictly increasing within a segment as written by the dump writer.
pub type LogicalTs = u64;

/// Kind of mutation carried by an [`OplogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    #[serde(rename = "i")]
    Insert,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    #[serde(rename = "n")]
    Noop,
}

/// One timestamped mutation captured from the source's operation log.
///
/// - insert: `o` is the full document
/// - update: `o2` selects the target (`_id` plus optional precondition
///   fields), `o` is either a replacement document or an operator document
///   (`$set`, `$unset`, `$inc`)
/// - delete: `o` selects the target (`_id` plus optional precondition fields)
/// - noop: ignored on replay
///
/// Replay must be safe to repeat, because a write racing a dump can land in
/// both the copied data and the captured log. A server therefore logs
/// updates in resolved form (see [`OplogRecord::resolved`]). An `$inc` is
/// only replayed when the selector pins the field it increments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OplogRecord {
    pub ts: LogicalTs,
    pub op: OpKind,
    pub ns: String,
    #[serde(default)]
    pub o: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o2: Option<Value>,
}

/// Result of applying one record to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Precondition did not hold; the record was not applied.
    Skipped(String),
}

impl OplogRecord {
    pub fn insert(ts: LogicalTs, ns: &Namespace, doc: Value) -> Self {
        Self {
            ts,
            op: OpKind::Insert,
            ns: ns.to_string(),
            o: doc,
            o2: None,
        }
    }

    pub fn update(ts: LogicalTs, ns: &Namespace, selector: Value, update: Value) -> Self {
        Self {
            ts,
            op: OpKind::Update,
            ns: ns.to_string(),
            o: update,
            o2: Some(selector),
        }
    }

    pub fn delete(ts: LogicalTs, ns: &Namespace, selector: Value) -> Self {
        Self {
            ts,
            op: OpKind::Delete,
            ns: ns.to_string(),
            o: selector,
            o2: None,
        }
    }

    pub fn namespace(&self) -> Result<Namespace> {
        Namespace::parse(&self.ns)
    }

    /// Selector document identifying (and constraining) the target.
    pub fn selector(&self) -> Option<&Value> {
        match self.op {
            OpKind::Insert | OpKind::Noop => None,
            OpKind::Update => self.o2.as_ref(),
            OpKind::Delete => Some(&self.o),
        }
    }

    /// `_id` of the document this record touches.
    pub fn target_id(&self) -> Option<&Value> {
        match self.op {
            OpKind::Insert => self.o.get("_id"),
            OpKind::Update | OpKind::Delete => self.selector().and_then(|s| s.get("_id")),
            OpKind::Noop => None,
        }
    }

    /// Structural validation of the record itself.
    pub fn validate(&self) -> Result<()> {
        self.namespace()
            .map_err(|e| CairnError::ValidationFailed(format!("oplog ts {}: {}", self.ts, e)))?;
        match self.op {
            OpKind::Noop => Ok(()),
            OpKind::Insert => Document::from_value(self.o.clone()).map(|_| ()),
            OpKind::Update | OpKind::Delete => {
                let selector = self.selector().ok_or_else(|| {
                    CairnError::ValidationFailed(format!("oplog ts {}: missing selector", self.ts))
                })?;
                if selector.get("_id").is_none() {
                    return Err(CairnError::ValidationFailed(format!(
                        "oplog ts {}: selector has no _id",
                        self.ts
                    )));
                }
                if self.op == OpKind::Update && !self.o.is_object() {
                    return Err(CairnError::ValidationFailed(format!(
                        "oplog ts {}: update is a {}",
                        self.ts,
                        type_name(&self.o)
                    )));
                }
                Ok(())
            }
        }
    }

    /// Paths incremented by an `$inc` that the selector does not pin.
    ///
    /// Such a record adds again every time it is replayed.
    pub fn unpinned_increments(&self) -> Vec<String> {
        if self.op != OpKind::Update {
            return Vec::new();
        }
        let Some(Value::Object(inc)) = self.o.get("$inc") else {
            return Vec::new();
        };
        inc.keys()
            .filter(|path| self.selector().and_then(|s| s.get(path.as_str())).is_none())
            .cloned()
            .collect()
    }

    /// Whether applying this record twice leaves the same document as once.
    pub fn is_idempotent(&self) -> bool {
        self.unpinned_increments().is_empty()
    }

    /// Rewrite an update into a form that is safe to replay, given the
    /// document it was applied to.
    ///
    /// Each `$inc` becomes a `$set` of the value it produced. Other records
    /// are returned unchanged.
    pub fn resolved(&self, pre_image: &Document) -> Result<Self> {
        let inc = match (self.op, self.o.get("$inc")) {
            (OpKind::Update, Some(Value::Object(inc))) => inc,
            _ => return Ok(self.clone()),
        };
        let post_image = apply_update(pre_image, &self.o)?;

        let mut update = self.o.as_object().cloned().unwrap_or_default();
        update.remove("$inc");
        let mut set = match update.remove("$set") {
            Some(Value::Object(set)) => set,
            _ => Map::new(),
        };
        for path in inc.keys() {
            let value = lookup_path(post_image.as_map(), path)
                .cloned()
                .unwrap_or(Value::Null);
            set.insert(path.clone(), value);
        }
        update.insert("$set".into(), Value::Object(set));

        Ok(Self {
            o: Value::Object(update),
            ..self.clone()
        })
    }

    /// Whether `current` still satisfies this record's selector.
    pub fn precondition_holds(&self, current: &Document) -> Result<bool> {
        match self.selector() {
            Some(selector) => Ok(Predicate::from_value(selector)?.matches(current)),
            None => Ok(true),
        }
    }
}

/// Apply an update record's `o` to `doc`, returning the new document.
///
/// Operator documents support `$set`, `$unset` and `$inc` with dotted paths.
/// Anything else is treated as a full replacement that keeps `_id`.
pub fn apply_update(doc: &Document, update: &Value) -> Result<Document> {
    let update = update
        .as_object()
        .ok_or_else(|| CairnError::ValidationFailed("update must be an object".into()))?;

    let operators = update.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        let mut replacement = update.clone();
        if replacement.get("_id").is_some_and(|id| id != doc.id()) {
            return Err(CairnError::ValidationFailed(
                "replacement document changes _id".into(),
            ));
        }
        replacement.insert("_id".into(), doc.id().clone());
        return Document::from_value(Value::Object(replacement));
    }
    if operators != update.len() {
        return Err(CairnError::ValidationFailed(
            "update mixes operators and plain fields".into(),
        ));
    }

    let mut out = doc.as_map().clone();
    for (op, args) in update {
        let args = args.as_object().ok_or_else(|| {
            CairnError::ValidationFailed(format!("{} expects an object", op))
        })?;
        for (path, value) in args {
            if path == "_id" {
                return Err(CairnError::ValidationFailed(format!(
                    "{} cannot modify _id",
                    op
                )));
            }
            match op.as_str() {
                "$set" => set_path(&mut out, path, value.clone())?,
                "$unset" => unset_path(&mut out, path),
                "$inc" => inc_path(&mut out, path, value)?,
                other => {
                    return Err(CairnError::ValidationFailed(format!(
                        "unsupported update operator {}",
                        other
                    )))
                }
            }
        }
    }
    Document::from_value(Value::Object(out))
}

fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) -> Result<()> {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match child {
                Value::Object(inner) => set_path(inner, rest, value),
                other => Err(CairnError::ValidationFailed(format!(
                    "cannot set '{}' inside a {}",
                    rest,
                    type_name(other)
                ))),
            }
        }
    }
}

fn unset_path(map: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            map.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = map.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn inc_path(map: &mut Map<String, Value>, path: &str, by: &Value) -> Result<()> {
    if !by.is_number() {
        return Err(CairnError::ValidationFailed(format!(
            "$inc on '{}' needs a number",
            path
        )));
    }
    let current = lookup_path(map, path);
    let next = match current {
        None | Some(Value::Null) => by.clone(),
        Some(Value::Number(n)) => add_numbers(path, n, by)?,
        Some(other) => {
            return Err(CairnError::ValidationFailed(format!(
                "$inc on '{}' found a {}",
                path,
                type_name(other)
            )))
        }
    };
    set_path(map, path, next)
}

fn lookup_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => map.get(path),
        Some((head, rest)) => match map.get(head) {
            Some(Value::Object(inner)) => lookup_path(inner, rest),
            _ => None,
        },
    }
}

fn add_numbers(path: &str, a: &serde_json::Number, b: &Value) -> Result<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Value::from(sum));
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    serde_json::Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| CairnError::ValidationFailed(format!("$inc on '{}' overflows", path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        Document::from_value(v).unwrap()
    }

    #[test]
    fn test_record_wire_form() {
        let ns = Namespace::new("shop", "orders").unwrap();
        let rec = OplogRecord::update(7, &ns, json!({"_id": 1}), json!({"$set": {"a": 2}}));
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["op"], "u");
        assert_eq!(json["ns"], "shop.orders");
        assert_eq!(json["o2"]["_id"], 1);
        assert_eq!(rec.target_id(), Some(&json!(1)));
    }

    #[test]
    fn test_validate_record() {
        let ns = Namespace::new("shop", "orders").unwrap();
        assert!(OplogRecord::insert(1, &ns, json!({"_id": 1})).validate().is_ok());
        assert!(OplogRecord::insert(1, &ns, json!({"a": 1})).validate().is_err());
        assert!(OplogRecord::delete(1, &ns, json!({"a": 1})).validate().is_err());
        let mut bad_ns = OplogRecord::delete(1, &ns, json!({"_id": 1}));
        bad_ns.ns = "nodot".into();
        assert!(bad_ns.validate().is_err());
    }

    #[test]
    fn test_apply_operator_update() {
        let d = doc(json!({"_id": 1, "n": 1, "a": {"b": 1}, "gone": true}));
        let out = apply_update(
            &d,
            &json!({"$set": {"a.c": 2}, "$unset": {"gone": ""}, "$inc": {"n": 2, "m": 1}}),
        )
        .unwrap();
        assert_eq!(
            out.into_value(),
            json!({"_id": 1, "n": 3, "m": 1, "a": {"b": 1, "c": 2}})
        );
    }

    #[test]
    fn test_apply_replacement_keeps_id() {
        let d = doc(json!({"_id": 1, "old": true}));
        let out = apply_update(&d, &json!({"new": true})).unwrap();
        assert_eq!(out.into_value(), json!({"_id": 1, "new": true}));
        assert!(apply_update(&d, &json!({"_id": 2})).is_err());
    }

    #[test]
    fn test_rejects_mixed_update() {
        let d = doc(json!({"_id": 1}));
        assert!(apply_update(&d, &json!({"$set": {"a": 1}, "b": 2})).is_err());
        assert!(apply_update(&d, &json!({"$rename": {"a": "b"}})).is_err());
        assert!(apply_update(&d, &json!({"$set": {"_id": 5}})).is_err());
    }

    #[test]
    fn test_precondition() {
        let ns = Namespace::new("shop", "orders").unwrap();
        let rec = OplogRecord::update(1, &ns, json!({"_id": 1, "v": 1}), json!({"$set": {"v": 2}}));
        assert!(rec.precondition_holds(&doc(json!({"_id": 1, "v": 1}))).unwrap());
        assert!(!rec.precondition_holds(&doc(json!({"_id": 1, "v": 2}))).unwrap());
    }

    #[test]
    fn test_unpinned_increment_is_not_idempotent() {
        let ns = Namespace::new("shop", "orders").unwrap();
        let loose = OplogRecord::update(1, &ns, json!({"_id": 1}), json!({"$inc": {"n": 1}}));
        assert!(!loose.is_idempotent());
        assert_eq!(loose.unpinned_increments(), vec!["n".to_string()]);

        let pinned =
            OplogRecord::update(1, &ns, json!({"_id": 1, "n": 1}), json!({"$inc": {"n": 1}}));
        assert!(pinned.is_idempotent());
        let set = OplogRecord::update(1, &ns, json!({"_id": 1}), json!({"$set": {"n": 2}}));
        assert!(set.is_idempotent());
    }

    #[test]
    fn test_resolved_turns_increment_into_set() {
        let ns = Namespace::new("shop", "orders").unwrap();
        let rec = OplogRecord::update(
            4,
            &ns,
            json!({"_id": 1}),
            json!({"$inc": {"n": 2, "a.b": 1}, "$set": {"s": "x"}, "$unset": {"gone": ""}}),
        );
        let pre = doc(json!({"_id": 1, "n": 5, "a": {"b": 1}, "gone": true}));
        let resolved = rec.resolved(&pre).unwrap();
        assert!(resolved.is_idempotent());
        assert_eq!(resolved.ts, 4);
        assert_eq!(
            resolved.o,
            json!({"$set": {"s": "x", "n": 7, "a.b": 2}, "$unset": {"gone": ""}})
        );

        // Replaying the resolved form twice lands on the same document
        let once = apply_update(&pre, &resolved.o).unwrap();
        let twice = apply_update(&once, &resolved.o).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, apply_update(&pre, &rec.o).unwrap());
    }

    #[test]
    fn test_increment_overflow_is_rejected() {
        let d = doc(json!({"_id": 1, "f": f64::MAX}));
        let err = apply_update(&d, &json!({"$inc": {"f": f64::MAX}})).unwrap_err();
        assert!(matches!(err, CairnError::ValidationFailed(_)));

        // Integer overflow falls back to floating point
        let d = doc(json!({"_id": 1, "i": i64::MAX}));
        let out = apply_update(&d, &json!({"$inc": {"i": 1}})).unwrap();
        assert!(out.as_map()["i"].is_f64());
    }
}
