use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User attributes consulted by conditions and hashing.
///
/// Paths are dot-separated, like `"company.plan"`. A numeric segment indexes
/// into an array: `"tags.0"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes {
    data: Map<String, Value>,
}

impl Attributes {
    /// Create an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value at a dot-separated path. Creates intermediate objects as needed.
    #[must_use]
    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.insert(path, value.into());
        self
    }

    /// Insert a value at a dot-separated path (mutable reference version).
    pub fn insert(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        insert_recursive(&mut self.data, &segments, value);
    }

    /// Look up a value by dot-separated path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.data, path)
    }

    /// Overlay `other` on top of this set, replacing top-level keys.
    pub fn merge(&mut self, other: Attributes) {
        self.data.extend(other.data);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

impl TryFrom<Value> for Attributes {
    type Error = Value;

    /// Only JSON objects convert; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(data) => Ok(Self { data }),
            other => Err(other),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            data: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn insert_recursive(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            map.insert((*last).to_owned(), value);
        }
        [first, rest @ ..] => {
            let entry = map
                .entry((*first).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(nested) = entry {
                insert_recursive(nested, rest, value);
            }
        }
    }
}

/// Resolve a dot-separated path against an attribute map.
pub(crate) fn lookup<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    segments.try_fold(root.get(first)?, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
