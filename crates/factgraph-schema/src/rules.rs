//! Rule-driven schemas.
//!
//! `RuleSchema` is the concrete [`Schema`] implementation used by fact
//! declarations: one top-level key, validated by a [`Rule`]. Rules nest:
//! an `Array` rule validates each element record against its member rules,
//! and a `Hash` rule validates a nested record. The accepted [`KeyMap`] is
//! derived from the rule shape, so key-path queries and input projection
//! stay aligned with validation for free.
//!
//! Message contract (these exact strings surface in `bad_inputs` maps):
//! - a top-level value that is absent or of the wrong type reports the
//!   rule's type message (`"must be Numeric"`, `"must be an array"`, ...),
//! - an absent member inside an element or hash reports `"is missing"`,
//! - a value below a declared minimum reports
//!   `"must be greater than or equal to <min>"`.

use serde::Serialize;

use crate::{Key, KeyMap, KeyPath, Name, Schema, SchemaError, SchemaResult};

/// A validation rule for one value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    Integer { min: Option<f64> },
    Numeric { min: Option<f64> },
    Text,
    Boolean,
    Array { members: Vec<Member> },
    Hash { members: Vec<Member> },
}

impl Rule {
    fn type_text(&self) -> &'static str {
        match self {
            Rule::Integer { .. } => "must be an integer",
            Rule::Numeric { .. } => "must be Numeric",
            Rule::Text => "must be a String",
            Rule::Boolean => "must be a Boolean",
            Rule::Array { .. } => "must be an array",
            Rule::Hash { .. } => "must be a hash",
        }
    }
}

/// A named rule for a field inside an array element or hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    name: Name,
    rule: Rule,
}

impl Member {
    pub fn integer(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            rule: Rule::Integer { min: None },
        }
    }

    pub fn numeric(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            rule: Rule::Numeric { min: None },
        }
    }

    pub fn text(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            rule: Rule::Text,
        }
    }

    pub fn boolean(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            rule: Rule::Boolean,
        }
    }

    pub fn array_of(name: impl Into<Name>, members: Vec<Member>) -> Self {
        Self {
            name: name.into(),
            rule: Rule::Array { members },
        }
    }

    pub fn hash(name: impl Into<Name>, members: Vec<Member>) -> Self {
        Self {
            name: name.into(),
            rule: Rule::Hash { members },
        }
    }

    /// Attach a minimum to an `Integer` or `Numeric` rule. No-op for other
    /// rule kinds.
    pub fn min(mut self, min: impl Into<f64>) -> Self {
        match &mut self.rule {
            Rule::Integer { min: slot } | Rule::Numeric { min: slot } => *slot = Some(min.into()),
            _ => {}
        }
        self
    }
}

/// A [`Schema`] validating one top-level key against a [`Rule`].
#[derive(Debug, Clone)]
pub struct RuleSchema {
    name: Name,
    rule: Rule,
    key_map: KeyMap,
}

impl RuleSchema {
    fn new(name: Name, rule: Rule) -> Self {
        let key_map = KeyMap::new(vec![key_for(&name, &rule)]);
        Self {
            name,
            rule,
            key_map,
        }
    }

    pub fn integer(name: impl Into<Name>) -> Self {
        Self::new(name.into(), Rule::Integer { min: None })
    }

    pub fn numeric(name: impl Into<Name>) -> Self {
        Self::new(name.into(), Rule::Numeric { min: None })
    }

    pub fn text(name: impl Into<Name>) -> Self {
        Self::new(name.into(), Rule::Text)
    }

    pub fn boolean(name: impl Into<Name>) -> Self {
        Self::new(name.into(), Rule::Boolean)
    }

    /// An array of element records, each validated against `members`.
    pub fn array_of(name: impl Into<Name>, members: Vec<Member>) -> Self {
        Self::new(name.into(), Rule::Array { members })
    }

    /// A nested record validated against `members`.
    pub fn hash(name: impl Into<Name>, members: Vec<Member>) -> Self {
        Self::new(name.into(), Rule::Hash { members })
    }

    /// Attach a minimum to an `Integer` or `Numeric` rule.
    pub fn min(self, min: impl Into<f64>) -> Self {
        let Self { name, rule, .. } = self;
        let rule = match rule {
            Rule::Integer { .. } => Rule::Integer {
                min: Some(min.into()),
            },
            Rule::Numeric { .. } => Rule::Numeric {
                min: Some(min.into()),
            },
            other => other,
        };
        Self::new(name, rule)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Schema for RuleSchema {
    fn call(&self, record: &serde_json::Value) -> SchemaResult {
        let mut errors = Vec::new();
        let value = record.as_object().and_then(|fields| fields.get(&self.name));
        check_type(&self.rule, value, &KeyPath::root(self.name.as_str()), &mut errors);
        SchemaResult { errors }
    }

    fn key_map(&self) -> &KeyMap {
        &self.key_map
    }
}

fn key_for(name: &str, rule: &Rule) -> Key {
    match rule {
        Rule::Integer { .. } | Rule::Numeric { .. } | Rule::Text | Rule::Boolean => Key::Scalar {
            name: name.to_string(),
        },
        Rule::Array { members } => Key::Array {
            name: name.to_string(),
            element: KeyMap::new(members.iter().map(|m| key_for(&m.name, &m.rule)).collect()),
        },
        Rule::Hash { members } => Key::Hash {
            name: name.to_string(),
            members: KeyMap::new(members.iter().map(|m| key_for(&m.name, &m.rule)).collect()),
        },
    }
}

/// Type-check a fetched value. An absent value fails the type check with the
/// rule's type message; member requiredness (`"is missing"`) is handled by
/// [`check_members`].
fn check_type(
    rule: &Rule,
    value: Option<&serde_json::Value>,
    path: &KeyPath,
    errors: &mut Vec<SchemaError>,
) {
    match rule {
        Rule::Integer { min } => {
            let Some(n) = value.and_then(|v| v.as_i64()) else {
                push(errors, path, rule.type_text());
                return;
            };
            check_min(*min, n as f64, path, errors);
        }
        Rule::Numeric { min } => {
            let Some(n) = value.and_then(|v| v.as_f64()) else {
                push(errors, path, rule.type_text());
                return;
            };
            check_min(*min, n, path, errors);
        }
        Rule::Text => {
            if value.and_then(|v| v.as_str()).is_none() {
                push(errors, path, rule.type_text());
            }
        }
        Rule::Boolean => {
            if value.and_then(|v| v.as_bool()).is_none() {
                push(errors, path, rule.type_text());
            }
        }
        Rule::Array { members } => {
            let Some(items) = value.and_then(|v| v.as_array()) else {
                push(errors, path, rule.type_text());
                return;
            };
            for (index, item) in items.iter().enumerate() {
                let item_path = path.child(index);
                let Some(fields) = item.as_object() else {
                    push(errors, &item_path, "must be a hash");
                    continue;
                };
                check_members(members, fields, &item_path, errors);
            }
        }
        Rule::Hash { members } => {
            let Some(fields) = value.and_then(|v| v.as_object()) else {
                push(errors, path, rule.type_text());
                return;
            };
            check_members(members, fields, path, errors);
        }
    }
}

fn check_members(
    members: &[Member],
    fields: &serde_json::Map<String, serde_json::Value>,
    path: &KeyPath,
    errors: &mut Vec<SchemaError>,
) {
    for member in members {
        let member_path = path.child(member.name.as_str());
        let Some(value) = fields.get(&member.name) else {
            push(errors, &member_path, "is missing");
            continue;
        };
        check_type(&member.rule, Some(value), &member_path, errors);
    }
}

fn check_min(min: Option<f64>, n: f64, path: &KeyPath, errors: &mut Vec<SchemaError>) {
    let Some(min) = min else {
        return;
    };
    if n < min {
        push(errors, path, &format!("must be greater than or equal to {min}"));
    }
}

fn push(errors: &mut Vec<SchemaError>, path: &KeyPath, text: &str) {
    errors.push(SchemaError {
        path: path.clone(),
        text: text.to_string(),
    });
}
