use crate::record::LogRecord;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::Level;

/// Local structured-log handler that the fan-out layer decorates.
///
/// `with_fields` and `with_group` never mutate the handler they are called
/// on; they return a derived handler and leave the original untouched.
pub trait Handler: Send + Sync {
    /// Whether records at `level` would be written at all.
    fn enabled(&self, level: Level) -> bool;

    /// Format and write one record.
    fn handle(&self, record: &LogRecord) -> Result<(), HandleError>;

    /// Derived handler that adds `fields` to every record it writes.
    fn with_fields(&self, fields: Vec<(String, Value)>) -> Arc<dyn Handler>;

    /// Derived handler that nests all later fields under `name`.
    fn with_group(&self, name: &str) -> Arc<dyn Handler>;
}

/// Failure of the local write. Propagated to whoever emitted the record.
#[derive(thiserror::Error, Debug)]
pub enum HandleError {
    #[error("failed to write log record: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("log writer lock poisoned")]
    Poisoned,
}

/// Persistent fields and open groups accumulated by `with_fields` /
/// `with_group` calls.
///
/// Fields added after a group was opened land inside that group, and so do
/// the fields of every record resolved against the scope. Groups that end
/// up without any field are left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    fields: Map<String, Value>,
    groups: Vec<String>,
}

impl Scope {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.groups.is_empty()
    }

    pub fn with_fields<I>(&self, fields: I) -> Scope
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut next = self.clone();
        let mut fields = fields.into_iter().peekable();
        if fields.peek().is_none() {
            return next;
        }
        insert_grouped(&mut next.fields, &self.groups, fields);
        next
    }

    /// An empty name opens no group.
    pub fn with_group(&self, name: &str) -> Scope {
        let mut next = self.clone();
        if !name.is_empty() {
            next.groups.push(name.to_string());
        }
        next
    }

    /// Persistent fields with `record_fields` placed in the innermost
    /// open group.
    pub fn resolve(&self, record_fields: &BTreeMap<String, Value>) -> Map<String, Value> {
        let mut out = self.fields.clone();
        if !record_fields.is_empty() {
            let fields = record_fields.iter().map(|(k, v)| (k.clone(), v.clone()));
            insert_grouped(&mut out, &self.groups, fields);
        }
        out
    }
}

// Extends the map nested under `groups` with `fields`. A non-object value
// already stored under a group name is replaced.
fn insert_grouped<I>(map: &mut Map<String, Value>, groups: &[String], fields: I)
where
    I: IntoIterator<Item = (String, Value)>,
{
    let Some((group, rest)) = groups.split_first() else {
        map.extend(fields);
        return;
    };
    let slot = map
        .entry(group.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(inner) = slot {
        insert_grouped(inner, rest, fields);
    } else {
        let mut inner = Map::new();
        insert_grouped(&mut inner, rest, fields);
        *slot = Value::Object(inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kv(key: &str, value: Value) -> (String, Value) {
        (key.to_string(), value)
    }

    #[test]
    fn fields_after_group_nest_inside_it() {
        let scope = Scope::default()
            .with_fields([kv("service", json!("auth"))])
            .with_group("request")
            .with_fields([kv("id", json!(7))]);

        let mut record_fields = BTreeMap::new();
        record_fields.insert("status".to_string(), json!(500));

        let resolved = Value::Object(scope.resolve(&record_fields));
        assert_eq!(
            resolved,
            json!({"service": "auth", "request": {"id": 7, "status": 500}})
        );
    }

    #[test]
    fn derived_scope_leaves_original_untouched() {
        let base = Scope::default().with_fields([kv("a", json!(1))]);
        let derived = base.with_group("g").with_fields([kv("b", json!(2))]);

        assert_eq!(Value::Object(base.resolve(&BTreeMap::new())), json!({"a": 1}));
        assert_eq!(
            Value::Object(derived.resolve(&BTreeMap::new())),
            json!({"a": 1, "g": {"b": 2}})
        );
    }

    #[test]
    fn group_replaces_scalar_field_of_the_same_name() {
        let scope = Scope::default()
            .with_fields([kv("req", json!(1))])
            .with_group("req")
            .with_fields([kv("id", json!(2))]);

        assert_eq!(Value::Object(scope.resolve(&BTreeMap::new())), json!({"req": {"id": 2}}));

        let mut record_fields = BTreeMap::new();
        record_fields.insert("status".to_string(), json!(200));
        let grouped_only = Scope::default()
            .with_fields([kv("req", json!("scalar"))])
            .with_group("req");
        assert_eq!(
            Value::Object(grouped_only.resolve(&record_fields)),
            json!({"req": {"status": 200}})
        );
    }

    #[test]
    fn empty_groups_are_omitted() {
        let scope = Scope::default().with_group("outer").with_group("");
        assert!(scope.resolve(&BTreeMap::new()).is_empty());
        assert_eq!(scope.groups, vec!["outer".to_string()]);
    }
}
