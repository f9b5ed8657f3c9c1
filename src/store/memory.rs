//! In-memory document store.
//!
//! Keeps every collection as an id-keyed map of JSON documents behind
//! one std mutex; operations never hold the guard across an await.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{QueueError, Result};
use crate::store::{compare, lookup, Direction, DocStore, Query, Sort};

#[derive(Default)]
struct Collections {
    docs: HashMap<String, BTreeMap<String, Value>>,
    indexes: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Collections>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Collections) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

/// Set a dotted path inside a document, creating intermediate
/// objects as needed.
fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().unwrap();
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

fn array_element_mut<'a>(
    doc: &'a mut Value,
    array: &str,
    id_field: &str,
    elem_id: &str,
) -> Option<&'a mut Value> {
    doc.get_mut(array)?
        .as_array_mut()?
        .iter_mut()
        .find(|elem| elem.get(id_field).and_then(Value::as_str) == Some(elem_id))
}

#[async_trait]
impl DocStore for MemStore {
    async fn upsert(&self, coll: &str, id: &str, doc: Value) -> Result<()> {
        self.with(|c| {
            c.docs
                .entry(coll.to_string())
                .or_default()
                .insert(id.to_string(), doc);
        });
        Ok(())
    }

    async fn find_one(&self, coll: &str, query: &Query) -> Result<Option<Value>> {
        Ok(self.with(|c| {
            c.docs
                .get(coll)
                .and_then(|docs| docs.values().find(|d| query.matches(d)).cloned())
        }))
    }

    async fn find(
        &self,
        coll: &str,
        query: &Query,
        sort: Option<&Sort>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(Vec<Value>, usize)> {
        Ok(self.with(|c| {
            let mut matched: Vec<Value> = c
                .docs
                .get(coll)
                .map(|docs| docs.values().filter(|d| query.matches(d)).cloned().collect())
                .unwrap_or_default();
            if let Some(sort) = sort {
                matched.sort_by(|a, b| {
                    let ord = match (lookup(a, &sort.field), lookup(b, &sort.field)) {
                        (Some(x), Some(y)) => compare(x, y),
                        (Some(_), None) => std::cmp::Ordering::Greater,
                        (None, Some(_)) => std::cmp::Ordering::Less,
                        (None, None) => std::cmp::Ordering::Equal,
                    };
                    match sort.direction {
                        Direction::Asc => ord,
                        Direction::Desc => ord.reverse(),
                    }
                });
            }
            let total = matched.len();
            let page: Vec<Value> = match limit {
                Some(limit) => matched.into_iter().skip(offset).take(limit).collect(),
                None => matched.into_iter().skip(offset).collect(),
            };
            (page, total)
        }))
    }

    async fn update_fields(
        &self,
        coll: &str,
        query: &Query,
        set: Vec<(String, Value)>,
    ) -> Result<u64> {
        Ok(self.with(|c| {
            let mut updated = 0;
            if let Some(docs) = c.docs.get_mut(coll) {
                for doc in docs.values_mut() {
                    if query.matches(doc) {
                        for (path, value) in &set {
                            set_path(doc, path, value.clone());
                        }
                        updated += 1;
                    }
                }
            }
            updated
        }))
    }

    async fn update_array_element(
        &self,
        coll: &str,
        id: &str,
        array: &str,
        id_field: &str,
        elem_id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        self.with(|c| {
            let doc = c
                .docs
                .get_mut(coll)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| QueueError::not_found(format!("{}/{}", coll, id)))?;
            let elem = array_element_mut(doc, array, id_field, elem_id).ok_or_else(|| {
                QueueError::not_found(format!("{}/{}: {}={}", coll, id, id_field, elem_id))
            })?;
            set_path(elem, field, value);
            Ok(())
        })
    }

    async fn increment_array_element(
        &self,
        coll: &str,
        id: &str,
        array: &str,
        id_field: &str,
        elem_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<()> {
        self.with(|c| {
            let doc = c
                .docs
                .get_mut(coll)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| QueueError::not_found(format!("{}/{}", coll, id)))?;
            let elem = array_element_mut(doc, array, id_field, elem_id).ok_or_else(|| {
                QueueError::not_found(format!("{}/{}: {}={}", coll, id, id_field, elem_id))
            })?;
            let current = lookup(elem, field).and_then(Value::as_i64).unwrap_or(0);
            set_path(elem, field, Value::from(current + delta));
            Ok(())
        })
    }

    async fn get_array_element_field(
        &self,
        coll: &str,
        id: &str,
        array: &str,
        id_field: &str,
        elem_id: &str,
        field: &str,
    ) -> Result<Value> {
        self.with(|c| {
            let doc = c
                .docs
                .get(coll)
                .and_then(|docs| docs.get(id))
                .ok_or_else(|| QueueError::not_found(format!("{}/{}", coll, id)))?;
            let elem = doc
                .get(array)
                .and_then(Value::as_array)
                .and_then(|arr| {
                    arr.iter()
                        .find(|e| e.get(id_field).and_then(Value::as_str) == Some(elem_id))
                })
                .ok_or_else(|| {
                    QueueError::not_found(format!("{}/{}: {}={}", coll, id, id_field, elem_id))
                })?;
            lookup(elem, field)
                .cloned()
                .ok_or_else(|| QueueError::not_found(format!("field {}", field)))
        })
    }

    async fn push(&self, coll: &str, id: &str, array: &str, value: Value) -> Result<()> {
        self.with(|c| {
            let doc = c
                .docs
                .get_mut(coll)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| QueueError::not_found(format!("{}/{}", coll, id)))?;
            match doc.get_mut(array) {
                Some(Value::Array(arr)) => arr.push(value),
                _ => set_path(doc, array, Value::Array(vec![value])),
            }
            Ok(())
        })
    }

    async fn delete_many(&self, coll: &str, query: &Query) -> Result<u64> {
        Ok(self.with(|c| {
            let Some(docs) = c.docs.get_mut(coll) else {
                return 0;
            };
            let before = docs.len();
            docs.retain(|_, d| !query.matches(d));
            (before - docs.len()) as u64
        }))
    }

    async fn ensure_index(&self, coll: &str, field: &str, _unique: bool) -> Result<()> {
        self.with(|c| {
            c.indexes
                .entry(coll.to_string())
                .or_default()
                .insert(field.to_string());
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Cond;
    use serde_json::json;

    #[tokio::test]
    async fn positional_array_update() {
        let store = MemStore::new();
        store
            .upsert(
                "jobs",
                "j1",
                json!({"id": "j1", "tasks": [{"taskid": "j1_a", "state": "init"}]}),
            )
            .await
            .unwrap();

        store
            .update_array_element("jobs", "j1", "tasks", "taskid", "j1_a", "state", json!("ready"))
            .await
            .unwrap();

        let got = store
            .get_array_element_field("jobs", "j1", "tasks", "taskid", "j1_a", "state")
            .await
            .unwrap();
        assert_eq!(got, json!("ready"));
    }

    #[tokio::test]
    async fn find_sorts_and_pages() {
        let store = MemStore::new();
        for (id, n) in [("a", 3), ("b", 1), ("c", 2)] {
            store
                .upsert("jobs", id, json!({"id": id, "jid": n}))
                .await
                .unwrap();
        }
        let (page, total) = store
            .find("jobs", &Query::new(), Some(&Sort::asc("jid")), Some(2), 1)
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page[0]["jid"], 2);
        assert_eq!(page[1]["jid"], 3);
    }

    #[tokio::test]
    async fn not_in_matches_missing_field() {
        let store = MemStore::new();
        store.upsert("jobs", "x", json!({"id": "x"})).await.unwrap();
        let q = Query::new().with("state", Cond::NotIn(vec![json!("deleted")]));
        let (page, _) = store.find("jobs", &q, None, None, 0).await.unwrap();
        assert_eq!(page.len(), 1);
    }
}
