//! Per-document reshaping stages: `$project`, `$addFields`/`$set`,
//! `$unset` and `$unwind`

use super::context::eval;
use super::errors::ExecutorResult;
use crate::expr::{Expression, Variables};
use crate::planner::{ProjectField, ProjectMode, ProjectSpec, UnwindSpec};
use crate::value::{Document, Value};

/// Evaluates a computed field. `None` means the field should not be written:
/// a bare field reference to a missing path produces no field at all.
fn computed(
    stage: &str,
    expr: &Expression,
    doc: &Document,
    vars: &Variables<'_>,
) -> ExecutorResult<Option<Value>> {
    if let Some(path) = expr.as_field() {
        return Ok(doc.get_path(path));
    }
    eval(stage, expr, doc, vars).map(Some)
}

// ==================
// $project
// ==================

pub fn project(spec: &ProjectSpec, doc: &Document, vars: &Variables<'_>) -> ExecutorResult<Document> {
    match spec.mode {
        ProjectMode::Inclusion => {
            let mut out = Document::with_capacity(spec.fields.len() + 1);
            if !spec.exclude_id {
                if let Some(id) = doc.get("_id") {
                    out.insert("_id", id.clone());
                }
            }
            include_fields(&spec.fields, Some(doc), doc, vars, &mut out)?;
            Ok(out)
        }
        ProjectMode::Exclusion => {
            let mut out = doc.clone();
            if spec.exclude_id {
                out.remove("_id");
            }
            exclude_fields(&spec.fields, &mut out);
            Ok(out)
        }
    }
}

/// Copies listed fields of `source` into `out`. Computed fields always
/// evaluate against `root`, whatever their nesting.
fn include_fields(
    fields: &[(String, ProjectField)],
    source: Option<&Document>,
    root: &Document,
    vars: &Variables<'_>,
    out: &mut Document,
) -> ExecutorResult<()> {
    for (name, field) in fields {
        match field {
            ProjectField::Include => {
                if let Some(value) = source.and_then(|s| s.get_path(name)) {
                    out.set_path(name, value);
                }
            }
            ProjectField::Computed(expr) => {
                if let Some(value) = computed("$project", expr, root, vars)? {
                    out.set_path(name, value);
                }
            }
            ProjectField::Nested(children) => {
                let child_source = source.and_then(|s| match s.get(name) {
                    Some(Value::Object(child)) => Some(child),
                    _ => None,
                });
                let mut child = Document::new();
                include_fields(children, child_source, root, vars, &mut child)?;
                if child_source.is_some() || !child.is_empty() {
                    out.insert(name.clone(), Value::Object(child));
                }
            }
            ProjectField::Exclude => {}
        }
    }
    Ok(())
}

fn exclude_fields(fields: &[(String, ProjectField)], out: &mut Document) {
    for (name, field) in fields {
        match field {
            ProjectField::Exclude => {
                out.remove_path(name);
            }
            ProjectField::Nested(children) => {
                if let Some(Value::Object(child)) = out.get_mut(name) {
                    exclude_fields(children, child);
                }
            }
            ProjectField::Include | ProjectField::Computed(_) => {}
        }
    }
}

// ==================
// $addFields / $unset
// ==================

/// Adds or overwrites fields. Every expression sees the input document,
/// not the fields added before it in the same stage.
pub fn add_fields(
    stage: &str,
    fields: &[(String, Expression)],
    doc: Document,
    vars: &Variables<'_>,
) -> ExecutorResult<Document> {
    let mut out = doc.clone();
    for (name, expr) in fields {
        if let Some(value) = computed(stage, expr, &doc, vars)? {
            out.set_path(name, value);
        }
    }
    Ok(out)
}

pub fn unset(fields: &[String], mut doc: Document) -> Document {
    for name in fields {
        doc.remove_path(name);
    }
    doc
}

// ==================
// $unwind
// ==================

/// Emits one document per array element
pub fn unwind(spec: &UnwindSpec, doc: Document, out: &mut Vec<Document>) {
    let index_field = spec.include_array_index.as_deref();
    match doc.get_path(&spec.path) {
        Some(Value::Array(items)) if !items.is_empty() => {
            for (i, item) in items.into_iter().enumerate() {
                let mut copy = doc.clone();
                copy.set_path(&spec.path, item);
                if let Some(field) = index_field {
                    copy.set_path(field, Value::Number(i as f64));
                }
                out.push(copy);
            }
        }
        Some(Value::Array(_)) => {
            if spec.preserve_null_and_empty {
                let mut copy = doc;
                copy.remove_path(&spec.path);
                if let Some(field) = index_field {
                    copy.set_path(field, Value::Null);
                }
                out.push(copy);
            }
        }
        None | Some(Value::Null) => {
            if spec.preserve_null_and_empty {
                let mut copy = doc;
                if let Some(field) = index_field {
                    copy.set_path(field, Value::Null);
                }
                out.push(copy);
            }
        }
        // A scalar unwinds to itself
        Some(_) => {
            let mut copy = doc;
            if let Some(field) = index_field {
                copy.set_path(field, Value::Null);
            }
            out.push(copy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{QueryPlanner, Stage};
    use serde_json::json;

    fn stage(json: serde_json::Value) -> Stage {
        QueryPlanner::new().plan(&json!([json])).unwrap().stages.remove(0)
    }

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    fn run_project(spec: serde_json::Value, input: serde_json::Value) -> serde_json::Value {
        match stage(json!({"$project": spec})) {
            Stage::Project(spec) => project(&spec, &doc(input), &Variables::new()).unwrap().to_json(),
            other => panic!("expected project, got {:?}", other),
        }
    }

    #[test]
    fn test_inclusion_keeps_id() {
        let out = run_project(
            json!({"location": 1, "temp_f": {"$add": [{"$multiply": ["$temperature_c", 2]}, 32]}}),
            json!({"_id": "a", "location": "Prague", "temperature_c": 10, "humidity": 80}),
        );
        assert_eq!(out, json!({"_id": "a", "location": "Prague", "temp_f": 52}));
    }

    #[test]
    fn test_inclusion_without_id() {
        let out = run_project(
            json!({"_id": 0, "location": 1, "missing": 1}),
            json!({"_id": "a", "location": "Prague"}),
        );
        assert_eq!(out, json!({"location": "Prague"}));
    }

    #[test]
    fn test_exclusion() {
        let out = run_project(
            json!({"humidity": 0, "station.internal": 0}),
            json!({"_id": "a", "humidity": 80, "station": {"name": "P1", "internal": 7}}),
        );
        assert_eq!(out, json!({"_id": "a", "station": {"name": "P1"}}));
    }

    #[test]
    fn test_nested_projection_reads_root() {
        let out = run_project(
            json!({"summary": {"where": "$location", "temp": "$stats.t"}, "stats": {"t": 1}}),
            json!({"_id": 1, "location": "Brno", "stats": {"t": 4, "u": 9}}),
        );
        assert_eq!(out, json!({"_id": 1, "summary": {"where": "Brno", "temp": 4}, "stats": {"t": 4}}));
    }

    #[test]
    fn test_missing_field_reference_is_omitted() {
        let out = run_project(json!({"_id": 0, "x": "$nope", "y": {"$ifNull": ["$nope", "d"]}}), json!({"a": 1}));
        assert_eq!(out, json!({"y": "d"}));
    }

    #[test]
    fn test_add_fields_sees_input_document() {
        let fields = match stage(json!({"$addFields": {"a": 10, "b": "$a", "s.total": {"$add": ["$a", 1]}}})) {
            Stage::AddFields(fields) => fields,
            other => panic!("expected addFields, got {:?}", other),
        };
        let out = add_fields("$addFields", &fields, doc(json!({"a": 1})), &Variables::new()).unwrap();
        assert_eq!(out.to_json(), json!({"a": 10, "b": 1, "s": {"total": 2}}));
    }

    #[test]
    fn test_unset() {
        let out = unset(&["a".to_string(), "b.c".to_string()], doc(json!({"a": 1, "b": {"c": 2, "d": 3}})));
        assert_eq!(out.to_json(), json!({"b": {"d": 3}}));
    }

    fn run_unwind(spec: serde_json::Value, input: serde_json::Value) -> Vec<serde_json::Value> {
        let spec = match stage(json!({"$unwind": spec})) {
            Stage::Unwind(spec) => spec,
            other => panic!("expected unwind, got {:?}", other),
        };
        let mut out = Vec::new();
        unwind(&spec, doc(input), &mut out);
        out.iter().map(Document::to_json).collect()
    }

    #[test]
    fn test_unwind_with_index() {
        let out = run_unwind(
            json!({"path": "$events", "includeArrayIndex": "i"}),
            json!({"d": 1, "events": ["rain", "wind"]}),
        );
        assert_eq!(
            out,
            vec![json!({"d": 1, "events": "rain", "i": 0}), json!({"d": 1, "events": "wind", "i": 1})]
        );
    }

    #[test]
    fn test_unwind_drops_empty_unless_preserved() {
        assert!(run_unwind(json!("$events"), json!({"events": []})).is_empty());
        assert!(run_unwind(json!("$events"), json!({"d": 1})).is_empty());

        let out = run_unwind(
            json!({"path": "$events", "preserveNullAndEmptyArrays": true}),
            json!({"d": 1, "events": []}),
        );
        assert_eq!(out, vec![json!({"d": 1})]);
        let out = run_unwind(
            json!({"path": "$events", "preserveNullAndEmptyArrays": true}),
            json!({"d": 1, "events": null}),
        );
        assert_eq!(out, vec![json!({"d": 1, "events": null})]);
    }

    #[test]
    fn test_unwind_scalar() {
        let out = run_unwind(json!("$events"), json!({"events": "rain"}));
        assert_eq!(out, vec![json!({"events": "rain"})]);
    }
}
