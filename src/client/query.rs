// ABOUTME: Query-string encoding for engine requests.
// ABOUTME: Drops keys an endpoint does not accept and JSON-encodes composite filters.

use std::collections::BTreeMap;

/// A single filter value supplied by a caller, before normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::One(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::One(value)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(values: Vec<String>) -> Self {
        FilterValue::Many(values)
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(values: Vec<&str>) -> Self {
        FilterValue::Many(values.into_iter().map(str::to_string).collect())
    }
}

/// Caller-facing filter mapping, e.g. `label => "app=web"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(BTreeMap<String, FilterValue>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add a filter. Repeated names accumulate values.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FilterValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.remove(&name) {
            None => {
                self.0.insert(name, value);
            }
            Some(existing) => {
                let mut merged = into_list(existing);
                merged.extend(into_list(value));
                self.0.insert(name, FilterValue::Many(merged));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Normalise every value to a list of strings.
    pub fn to_spec(&self) -> FilterSpec {
        self.0
            .iter()
            .map(|(name, value)| (name.clone(), into_list(value.clone())))
            .collect()
    }
}

fn into_list(value: FilterValue) -> Vec<String> {
    match value {
        FilterValue::One(v) => vec![v],
        FilterValue::Many(vs) => vs,
    }
}

/// Filter name to its list of values, as the engine expects them.
pub type FilterSpec = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Flag(bool),
    Int(i64),
    Text(String),
    Filters(Filters),
}

/// Request options for one command, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pairs: Vec<(String, Value)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(self, key: &str, value: bool) -> Self {
        self.set(key, Value::Flag(value))
    }

    pub fn int(self, key: &str, value: i64) -> Self {
        self.set(key, Value::Int(value))
    }

    pub fn text(self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, Value::Text(value.into()))
    }

    /// Set `key` only when a value is present.
    pub fn text_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.text(key, v),
            None => self,
        }
    }

    /// Set the composite `filters` option. Empty filters are omitted.
    pub fn filters(self, filters: &Filters) -> Self {
        if filters.is_empty() {
            return self;
        }
        self.set("filters", Value::Filters(filters.clone()))
    }

    fn set(mut self, key: &str, value: Value) -> Self {
        self.pairs.retain(|(k, _)| k != key);
        self.pairs.push((key.to_string(), value));
        self
    }

    /// True when the response body is unbounded (`follow` or `stream` set),
    /// which forces asynchronous handling.
    pub fn is_unbounded(&self) -> bool {
        self.pairs.iter().any(|(k, v)| {
            (k == "follow" || k == "stream") && matches!(v, Value::Flag(true) | Value::Int(1))
        })
    }

    /// Encode the accepted keys as `k=v&...`, without a leading `?`.
    pub fn encode(&self, allowed: &[&str]) -> String {
        self.pairs
            .iter()
            .filter(|(k, _)| allowed.contains(&k.as_str()))
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), encode_value(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn encode_value(value: &Value) -> String {
    match value {
        Value::Flag(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Text(s) => urlencoding::encode(s).into_owned(),
        Value::Filters(filters) => {
            let json = serde_json::Value::from_iter(
                filters
                    .to_spec()
                    .into_iter()
                    .map(|(name, values)| (name, serde_json::Value::from(values))),
            );
            urlencoding::encode(&json.to_string()).into_owned()
        }
    }
}

/// Join a base path with the accepted query options.
pub fn build_path(base: &str, query: &Query, allowed: &[&str]) -> String {
    let encoded = query.encode(allowed);
    if encoded.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{encoded}")
    }
}
