//! Stage evaluation over JSON documents.
//!
//! Follows document-store semantics where they matter for the reports:
//! unwinding drops documents without the array, grouping keeps first-seen
//! order, and sorting orders null before numbers before strings.

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

use dh_core::stage::{
    Accumulator, Condition, Expr, FieldPath, Filter, Group, GroupId, Literal, Projection,
    SortOrder, SortSpec, Stage,
};

use super::memory::Document;

/// Errors raised while evaluating a stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("$month expects a date at '{path}', found {found}")]
    NotADate { path: String, found: String },

    #[error("{op} expects an array, found {found}")]
    NotAnArray { op: &'static str, found: String },
}

/// Run `stages` over `docs` in order.
pub fn run_pipeline(stages: &[Stage], docs: Vec<Document>) -> Result<Vec<Document>, EvalError> {
    stages.iter().try_fold(docs, |docs, stage| apply(stage, docs))
}

fn apply(stage: &Stage, docs: Vec<Document>) -> Result<Vec<Document>, EvalError> {
    match stage {
        Stage::Match(filter) => Ok(docs.into_iter().filter(|d| matches(filter, d)).collect()),
        Stage::Unwind(path) => Ok(unwind(path, docs)),
        Stage::Group(group) => group_docs(group, &docs),
        Stage::Project(projection) => docs.iter().map(|d| project(projection, d)).collect(),
        Stage::Sort(spec) => {
            let mut docs = docs;
            docs.sort_by(|a, b| compare_docs(spec, a, b));
            Ok(docs)
        }
    }
}

/// Value at a dotted path.
fn lookup<'a>(doc: &'a Document, path: &FieldPath) -> Option<&'a Value> {
    let mut segments = path.segments();
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &FieldPath, value: Value) {
    let segments: Vec<&str> = path.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = doc;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if !entry.is_object() {
            *entry = Value::Object(Document::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn matches(filter: &Filter, doc: &Document) -> bool {
    filter.conditions().iter().all(|(path, condition)| {
        let value = lookup(doc, path);
        match condition {
            // A missing field equals null.
            Condition::Eq(lit) => value.unwrap_or(&Value::Null) == &lit.to_json(),
            Condition::Gte(lit) => value
                .and_then(|v| compare_to_literal(v, lit))
                .is_some_and(|ord| ord != Ordering::Less),
        }
    })
}

fn compare_to_literal(value: &Value, lit: &Literal) -> Option<Ordering> {
    match (value, lit) {
        (Value::String(s), Literal::Timestamp(t)) => parse_timestamp(s).map(|v| v.cmp(t)),
        (Value::String(s), Literal::String(l)) => Some(s.as_str().cmp(l.as_str())),
        (Value::Number(n), Literal::Int(i)) => n.as_f64()?.partial_cmp(&(*i as f64)),
        (Value::Bool(b), Literal::Bool(l)) => Some(b.cmp(l)),
        _ => None,
    }
}

fn unwind(path: &FieldPath, docs: Vec<Document>) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let items = match lookup(&doc, path) {
            Some(Value::Array(items)) => items.clone(),
            None | Some(Value::Null) => continue,
            // Scalars unwind to themselves.
            Some(_) => {
                out.push(doc);
                continue;
            }
        };
        for item in items {
            let mut unwound = doc.clone();
            set_path(&mut unwound, path, item);
            out.push(unwound);
        }
    }
    out
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "missing".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(_)) => "bool".to_string(),
        Some(Value::Number(_)) => "number".to_string(),
        Some(Value::String(s)) => format!("string '{}'", s),
        Some(Value::Array(_)) => "array".to_string(),
        Some(Value::Object(_)) => "object".to_string(),
    }
}

/// Evaluate `expr`; `None` means the result is missing.
fn eval_expr(expr: &Expr, doc: &Document) -> Result<Option<Value>, EvalError> {
    match expr {
        Expr::Field(path) => Ok(lookup(doc, path).cloned()),
        Expr::Literal(lit) => Ok(Some(lit.to_json())),
        Expr::Month(path) => match lookup(doc, path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => match parse_timestamp(s) {
                Some(t) => Ok(Some(Value::from(t.month()))),
                None => Err(EvalError::NotADate {
                    path: path.as_str().to_string(),
                    found: describe(Some(&Value::String(s.clone()))),
                }),
            },
            other => Err(EvalError::NotADate {
                path: path.as_str().to_string(),
                found: describe(other),
            }),
        },
        Expr::Size(inner) => match eval_expr(inner, doc)? {
            Some(Value::Array(items)) => Ok(Some(Value::from(items.len()))),
            other => Err(EvalError::NotAnArray {
                op: "$size",
                found: describe(other.as_ref()),
            }),
        },
        Expr::ArrayElemAt(path, idx) => match lookup(doc, path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => Ok(items.get(*idx).cloned()),
            other => Err(EvalError::NotAnArray {
                op: "$arrayElemAt",
                found: describe(other),
            }),
        },
    }
}

fn group_docs(group: &Group, docs: &[Document]) -> Result<Vec<Document>, EvalError> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Document> = Vec::new();

    for doc in docs {
        let id = match &group.id {
            GroupId::Expr(expr) => eval_expr(expr, doc)?.unwrap_or(Value::Null),
            GroupId::Fields(fields) => {
                let mut key = Document::new();
                for (name, expr) in fields {
                    key.insert(name.clone(), eval_expr(expr, doc)?.unwrap_or(Value::Null));
                }
                Value::Object(key)
            }
        };

        let id_key = id.to_string();
        let slot = match index.get(&id_key) {
            Some(&slot) => slot,
            None => {
                let mut out = Document::new();
                out.insert("_id".to_string(), id);
                for (name, acc) in &group.accumulators {
                    let initial = match acc {
                        Accumulator::Push(_) => Value::Array(Vec::new()),
                        Accumulator::Sum(_) => Value::from(0i64),
                    };
                    out.insert(name.clone(), initial);
                }
                groups.push(out);
                index.insert(id_key, groups.len() - 1);
                groups.len() - 1
            }
        };

        let out = &mut groups[slot];
        for (name, acc) in &group.accumulators {
            match acc {
                Accumulator::Push(expr) => {
                    if let Some(value) = eval_expr(expr, doc)? {
                        if let Some(Value::Array(items)) = out.get_mut(name) {
                            items.push(value);
                        }
                    }
                }
                Accumulator::Sum(n) => {
                    let current = out.get(name).and_then(Value::as_i64).unwrap_or(0);
                    out.insert(name.clone(), Value::from(current + n));
                }
            }
        }
    }

    Ok(groups)
}

fn project(projection: &Projection, doc: &Document) -> Result<Document, EvalError> {
    let mut out = Document::new();
    for (name, expr) in &projection.fields {
        if let Some(value) = eval_expr(expr, doc)? {
            out.insert(name.clone(), value);
        }
    }
    Ok(out)
}

fn compare_docs(spec: &SortSpec, a: &Document, b: &Document) -> Ordering {
    for (path, order) in &spec.0 {
        let ord = compare_values(lookup(a, path), lookup(b, path));
        let ord = match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) if type_rank(a) == type_rank(b) => x.to_string().cmp(&y.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
