//! Minimal filter/update vocabulary understood by every `DocumentStore`.
//!
//! Filters are a conjunction of field conditions. A condition on a missing
//! field never matches. Ordering comparisons are defined for numbers and for
//! strings; comparing anything else never matches.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::document::{fields, Document};

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Lt(String, Value),
    Lte(String, Value),
}

impl Condition {
    fn matches(&self, document: &Document) -> bool {
        match self {
            Condition::Eq(field, expected) => document.get(field) == Some(expected),
            Condition::Lt(field, bound) => document
                .get(field)
                .and_then(|actual| compare(actual, bound))
                .is_some_and(Ordering::is_lt),
            Condition::Lte(field, bound) => document
                .get(field)
                .and_then(|actual| compare(actual, bound))
                .is_some_and(Ordering::is_le),
        }
    }
}

fn compare(actual: &Value, bound: &Value) -> Option<Ordering> {
    match (actual, bound) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point lookup on the document id.
    pub fn by_id(id: &str) -> Self {
        Self::new().eq(fields::ID, id)
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn lt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Lt(field.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Lte(field.to_string(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// The id this filter pins, if it has an equality condition on it.
    /// Stores use it to turn a scan into a point read.
    pub fn id_hint(&self) -> Option<&str> {
        self.conditions.iter().find_map(|c| match c {
            Condition::Eq(field, Value::String(id)) if field == fields::ID => Some(id.as_str()),
            _ => None,
        })
    }

    /// The queue this filter is scoped to, if it has an equality condition
    /// on the destination queue name. Stores use it to scan one queue only.
    pub fn queue_hint(&self) -> Option<&str> {
        self.conditions.iter().find_map(|c| match c {
            Condition::Eq(field, Value::String(queue)) if field == fields::DESTINATION_QUEUE_NAME => {
                Some(queue.as_str())
            }
            _ => None,
        })
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(document))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Vec<(String, Value)>,
    inc: Vec<(String, i64)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.push((field.to_string(), value.into()));
        self
    }

    /// Add `delta` to a numeric field. A missing field starts from 0.
    pub fn inc(mut self, field: &str, delta: i64) -> Self {
        self.inc.push((field.to_string(), delta));
        self
    }

    /// Apply in place. Fails without touching the document if an `inc`
    /// target holds a non-integer value.
    pub fn apply(&self, document: &mut Document) -> Result<(), String> {
        let mut incremented = Vec::with_capacity(self.inc.len());
        for (field, delta) in &self.inc {
            let current = match document.get(field) {
                None => 0,
                Some(value) => value
                    .as_i64()
                    .ok_or_else(|| format!("cannot increment non-integer field `{field}`"))?,
            };
            let next = current
                .checked_add(*delta)
                .ok_or_else(|| format!("increment overflows field `{field}`"))?;
            incremented.push((field.clone(), Value::from(next)));
        }
        for (field, value) in &self.set {
            document.insert(field.clone(), value.clone());
        }
        for (field, value) in incremented {
            document.insert(field, value);
        }
        Ok(())
    }
}
