//! Cycle-safe serialization of value graphs and error chains.
//!
//! [`serialize`] turns any [`Field`] into a `serde_json::Value` that holds no
//! references back into the input. Error-like objects become plain objects
//! with `name`, `message`, `stack` (`null` when there is none) and `cause`,
//! plus their extra fields, all serialized by the same walk.
//!
//! A node that is already on the current path is replaced by the
//! [`CIRCULAR`] sentinel. The path set lives for one top-level call only, so
//! serializing the same graph twice yields two full outputs, and a node
//! reachable along two different acyclic paths is written out both times.
//!
//! The walk keeps its own stack of open nodes instead of recursing, so nesting
//! depth is bounded by memory, not by the thread's stack.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::field::{CIRCULAR, ErrorObject, Field};

/// Serialize a value graph into JSON.
#[must_use]
pub fn serialize(field: &Field) -> Value {
    Walker::default().run(field)
}

/// Serialize every entry of a metadata map, each as its own top-level call.
#[must_use]
pub fn serialize_map(fields: &BTreeMap<String, Field>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), serialize(value)))
        .collect()
}

/// Capture and serialize an error together with its `source()` chain.
#[must_use]
pub fn serialize_error(err: &(dyn std::error::Error + 'static)) -> Value {
    serialize(&Field::error(err))
}

/// Output being assembled for one open node.
enum Out {
    Array(Vec<Value>),
    Object(Map<String, Value>),
    Error {
        err: Arc<ErrorObject>,
        has_cause: bool,
        fields: Map<String, Value>,
    },
}

/// A shared node whose children are still being walked.
struct Frame {
    id: usize,
    /// Key of this node in its parent object; `None` in arrays and at the root.
    key: Option<String>,
    pending: std::vec::IntoIter<(Option<String>, Field)>,
    out: Out,
}

impl Frame {
    /// Snapshot the children of `field` so no lock is held during the walk.
    fn open(id: usize, field: &Field) -> Self {
        let (children, out) = match field {
            Field::Error(err) => {
                let mut children: Vec<_> = err
                    .fields()
                    .into_iter()
                    .map(|(key, value)| (Some(key), value))
                    .collect();
                // Walked after the extra fields, so a real cause wins over an
                // extra field named `cause`.
                let cause = err.cause();
                let has_cause = cause.is_some();
                children.extend(cause.map(|cause| (Some("cause".to_string()), cause)));
                let out = Out::Error {
                    err: Arc::clone(err),
                    has_cause,
                    fields: Map::new(),
                };
                (children, out)
            },
            Field::Map(_) => {
                let children = field
                    .entries()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, value)| (Some(key), value))
                    .collect();
                (children, Out::Object(Map::new()))
            },
            _ => {
                let items = field.items().unwrap_or_default();
                let out = Out::Array(Vec::with_capacity(items.len()));
                (items.into_iter().map(|item| (None, item)).collect(), out)
            },
        };
        Self {
            id,
            key: None,
            pending: children.into_iter(),
            out,
        }
    }

    fn push(&mut self, key: Option<String>, value: Value) {
        match &mut self.out {
            Out::Array(items) => items.push(value),
            Out::Object(fields) | Out::Error { fields, .. } => {
                fields.insert(key.unwrap_or_default(), value);
            },
        }
    }

    fn finish(self) -> (Option<String>, Value) {
        let value = match self.out {
            Out::Array(items) => Value::Array(items),
            Out::Object(fields) => Value::Object(fields),
            Out::Error {
                err,
                has_cause,
                mut fields,
            } => {
                fields.insert("name".into(), Value::String(err.name().to_string()));
                fields.insert("message".into(), Value::String(err.message().to_string()));
                fields.insert(
                    "stack".into(),
                    err.stack()
                        .map_or(Value::Null, |stack| Value::String(stack.to_string())),
                );
                if !has_cause {
                    fields.remove("cause");
                }
                Value::Object(fields)
            },
        };
        (self.key, value)
    }
}

enum Step {
    Leaf(Value),
    Node(Frame),
}

#[derive(Default)]
struct Walker {
    path: HashSet<usize>,
}

impl Walker {
    fn step(&mut self, field: &Field) -> Step {
        match field {
            Field::Null => Step::Leaf(Value::Null),
            Field::Bool(b) => Step::Leaf(Value::Bool(*b)),
            Field::Number(n) => Step::Leaf(Value::Number(n.clone())),
            Field::String(s) => Step::Leaf(Value::String(s.clone())),
            Field::Json(value) => Step::Leaf(value.clone()),
            Field::List(_) | Field::Map(_) | Field::Error(_) => {
                let Some(id) = field.identity() else {
                    return Step::Leaf(Value::Null);
                };
                if !self.path.insert(id) {
                    return Step::Leaf(Value::String(CIRCULAR.to_string()));
                }
                Step::Node(Frame::open(id, field))
            },
        }
    }

    fn run(&mut self, root: &Field) -> Value {
        let mut stack = match self.step(root) {
            Step::Leaf(value) => return value,
            Step::Node(frame) => vec![frame],
        };

        while let Some(top) = stack.last_mut() {
            if let Some((key, child)) = top.pending.next() {
                match self.step(&child) {
                    Step::Leaf(value) => top.push(key, value),
                    Step::Node(mut frame) => {
                        frame.key = key;
                        stack.push(frame);
                    },
                }
                continue;
            }

            let Some(done) = stack.pop() else {
                break;
            };
            self.path.remove(&done.id);
            let (key, value) = done.finish();
            match stack.last_mut() {
                Some(parent) => parent.push(key, value),
                None => return value,
            }
        }
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn chain(depth: usize) -> ErrorObject {
        let mut err = ErrorObject::new("LevelError", format!("level {depth}"))
            .with_stack(format!("at level {depth}"));
        for level in (0..depth).rev() {
            err = ErrorObject::new("LevelError", format!("level {level}"))
                .with_stack(format!("at level {level}"))
                .with_cause(err);
        }
        err
    }

    fn cause_depth(value: &Value) -> usize {
        let mut depth = 0usize;
        let mut node = value;
        while let Some(cause) = node.get("cause") {
            depth = depth.saturating_add(1);
            node = cause;
        }
        depth
    }

    #[test]
    fn primitives_pass_through() {
        assert_eq!(serialize(&Field::Null), Value::Null);
        assert_eq!(serialize(&Field::from(true)), json!(true));
        assert_eq!(serialize(&Field::from(42)), json!(42));
        assert_eq!(serialize(&Field::from("hi")), json!("hi"));
        assert_eq!(serialize(&Field::from(json!({"a": [1]}))), json!({"a": [1]}));
    }

    #[test]
    fn cause_chain_depth_preserved() {
        for depth in [0usize, 1, 2, 5, 25] {
            let value = serialize(&Field::from(chain(depth)));
            assert_eq!(cause_depth(&value), depth);

            let mut node = &value;
            for level in 0..=depth {
                assert_eq!(node["name"], "LevelError");
                assert_eq!(node["message"], format!("level {level}"));
                assert_eq!(node["stack"], format!("at level {level}"));
                if let Some(cause) = node.get("cause") {
                    node = cause;
                }
            }
        }
    }

    #[test]
    fn non_error_cause_passes_through() {
        let err = ErrorObject::new("Error", "wrapped").with_cause(json!({"status": 503}));
        let value = serialize(&Field::from(err));
        assert_eq!(value["cause"], json!({"status": 503}));
    }

    #[test]
    fn extra_fields_are_serialized_and_core_keys_win() {
        let nested = Field::map([("retry", Field::from(true))]);
        let err = ErrorObject::new("HttpError", "bad gateway")
            .with_field("code", 502)
            .with_field("details", nested)
            .with_field("message", "spoofed");
        let value = serialize(&Field::from(err));
        assert_eq!(value["code"], 502);
        assert_eq!(value["details"], json!({"retry": true}));
        assert_eq!(value["message"], "bad gateway");
        assert_eq!(value.get("stack"), Some(&Value::Null));
        assert!(value.get("cause").is_none());
    }

    #[test]
    fn self_referential_map_terminates() {
        let map = Field::map([("name", Field::from("root"))]);
        map.insert("me", map.clone());
        let value = serialize(&map);
        assert_eq!(value, json!({"name": "root", "me": CIRCULAR}));
    }

    #[test]
    fn deeply_nested_list_does_not_exhaust_stack() {
        const DEPTH: usize = 10_000;
        let mut root = Field::list([Field::from("bottom")]);
        for _ in 0..DEPTH {
            root = Field::list([root]);
        }

        let value = serialize(&root);
        let mut node = &value;
        let mut depth = 0usize;
        while let Some(inner) = node.as_array().and_then(|items| items.first()) {
            node = inner;
            depth = depth.saturating_add(1);
        }
        assert_eq!(depth, DEPTH.saturating_add(1));
        assert_eq!(node.as_str(), Some("bottom"));

        // Dropping nested `Arc`s recurses; tear down on a roomy stack.
        std::thread::Builder::new()
            .stack_size(256 << 20)
            .spawn(move || drop((root, value)))
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn deep_cause_chain_keeps_every_level() {
        const DEPTH: usize = 10_000;
        let field = Field::from(chain(DEPTH));
        let value = serialize(&field);
        assert_eq!(cause_depth(&value), DEPTH);

        let mut node = &value;
        while let Some(cause) = node.get("cause") {
            node = cause;
        }
        assert_eq!(node["message"], format!("level {DEPTH}"));

        std::thread::Builder::new()
            .stack_size(256 << 20)
            .spawn(move || drop((field, value)))
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn cycle_of_length_three_terminates() {
        let a = Field::map::<String>([]);
        let b = Field::map::<String>([]);
        let c = Field::list([]);
        a.insert("next", b.clone());
        b.insert("next", c.clone());
        c.push(a.clone());

        let value = serialize(&a);
        assert_eq!(value, json!({"next": {"next": [CIRCULAR]}}));
    }

    #[test]
    fn cyclic_cause_chain_is_truncated() {
        let first = ErrorObject::new("Error", "first").into_shared();
        let second = ErrorObject::new("Error", "second")
            .with_cause(Arc::clone(&first))
            .into_shared();
        first.set_cause(Arc::clone(&second));

        let value = serialize(&Field::from(Arc::clone(&first)));
        assert_eq!(value["message"], "first");
        assert_eq!(value["cause"]["message"], "second");
        assert_eq!(value["cause"]["cause"], CIRCULAR);
    }

    #[test]
    fn error_pointing_at_itself_through_extra_field() {
        let err = ErrorObject::new("Error", "loop").into_shared();
        err.insert_field("self", Arc::clone(&err));
        let value = serialize(&Field::from(err));
        assert_eq!(value["self"], CIRCULAR);
    }

    #[test]
    fn shared_acyclic_node_is_not_a_cycle() {
        let shared = Field::map([("v", Field::from(1))]);
        let root = Field::list([shared.clone(), shared.clone()]);
        let value = serialize(&root);
        assert_eq!(value, json!([{"v": 1}, {"v": 1}]));
    }

    #[test]
    fn separate_calls_do_not_share_visited_state() {
        let map = Field::map([("k", Field::from("v"))]);
        let first = serialize(&map);
        let second = serialize(&map);
        assert_eq!(first, json!({"k": "v"}));
        assert_eq!(first, second);
    }

    #[test]
    fn std_error_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("request failed")]
        struct RequestFailed(#[source] std::io::Error);

        let err = RequestFailed(std::io::Error::other("connection reset"));
        let value = serialize_error(&err);
        assert_eq!(value["message"], "request failed");
        assert_eq!(value["cause"]["message"], "connection reset");
        assert_eq!(cause_depth(&value), 1);
    }

    #[test]
    fn std_error_whose_source_is_itself() {
        #[derive(Debug)]
        struct Ouroboros;

        impl std::fmt::Display for Ouroboros {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("eats its tail")
            }
        }

        impl std::error::Error for Ouroboros {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(self)
            }
        }

        let value = serialize_error(&Ouroboros);
        assert_eq!(value["message"], "eats its tail");
        assert_eq!(value["cause"], CIRCULAR);
    }

    #[test]
    fn serialize_map_handles_each_entry() {
        let mut fields = BTreeMap::new();
        fields.insert("count".to_string(), Field::from(3));
        fields.insert("err".to_string(), Field::from(ErrorObject::new("E", "m")));
        let out = serialize_map(&fields);
        assert_eq!(out["count"], 3);
        assert_eq!(out["err"]["name"], "E");
    }
}
