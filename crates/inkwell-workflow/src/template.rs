//! `{{...}}` parameter templates.
//!
//! Task parameters can refer to the workflow input and to the results of
//! earlier tasks:
//!
//! - `{{input.premise}}`: a key of the workflow input
//! - `{{outline.output}}`: the text produced by task `outline`
//! - `{{outline.data.steps[0]}}`: a structured field of that task's output
//!
//! A string that is exactly one template keeps the referenced JSON value,
//! so a list stays a list. Templates mixed with other text are rendered to
//! strings.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Result, WorkflowError};

/// Root key under which the workflow input is exposed.
pub const INPUT_KEY: &str = "input";

/// Resolves templates against the values produced so far in a run.
pub struct TemplateResolver<'a> {
    scope: &'a HashMap<String, Value>,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(scope: &'a HashMap<String, Value>) -> Self {
        Self { scope }
    }

    /// Resolve every template inside `value`, recursing into arrays and
    /// objects. Non-string scalars pass through unchanged.
    pub fn resolve_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_value(item)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    pub fn resolve_string(&self, text: &str) -> Result<Value> {
        let spans = find_templates(text)?;
        if spans.is_empty() {
            return Ok(Value::String(text.to_string()));
        }

        if let [span] = spans.as_slice()
            && span.start == 0
            && span.end == text.len()
        {
            return self.resolve_expression(&span.expr);
        }

        let mut rendered = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in &spans {
            rendered.push_str(&text[cursor..span.start]);
            rendered.push_str(&render(&self.resolve_expression(&span.expr)?));
            cursor = span.end;
        }
        rendered.push_str(&text[cursor..]);
        Ok(Value::String(rendered))
    }

    /// Look up a dotted path such as `draft.data.scenes[2]`.
    pub fn resolve_expression(&self, expr: &str) -> Result<Value> {
        let segments = parse_path(expr)?;
        let (root, rest) = segments
            .split_first()
            .ok_or_else(|| WorkflowError::template("empty template expression"))?;

        let mut current = self.scope.get(&root.key).ok_or_else(|| {
            WorkflowError::template(format!("unknown reference '{}' in '{{{{{expr}}}}}'", root.key))
        })?;
        current = index_into(current, root, expr)?;

        for segment in rest {
            current = current
                .get(segment.key.as_str())
                .ok_or_else(|| {
                    WorkflowError::template(format!(
                        "no field '{}' in '{{{{{expr}}}}}'",
                        segment.key
                    ))
                })?;
            current = index_into(current, segment, expr)?;
        }
        Ok(current.clone())
    }
}

/// Resolve a whole parameter table.
pub fn resolve_params(
    params: &HashMap<String, Value>,
    scope: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    let resolver = TemplateResolver::new(scope);
    params
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolver.resolve_value(value)?)))
        .collect()
}

/// Root keys referenced by the templates anywhere inside `value`.
pub fn references(value: &Value) -> Result<Vec<String>> {
    let mut roots = Vec::new();
    collect_references(value, &mut roots)?;
    Ok(roots)
}

fn collect_references(value: &Value, roots: &mut Vec<String>) -> Result<()> {
    match value {
        Value::String(s) => {
            for span in find_templates(s)? {
                if let Some(root) = parse_path(&span.expr)?.into_iter().next()
                    && !roots.contains(&root.key)
                {
                    roots.push(root.key);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, roots)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_references(item, roots)?;
            }
        }
        _ => {}
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
struct Span {
    start: usize,
    end: usize,
    expr: String,
}

fn find_templates(text: &str) -> Result<Vec<Span>> {
    let mut spans = Vec::new();
    let mut offset = 0;
    while let Some(open) = text[offset..].find("{{") {
        let start = offset + open;
        let close = text[start + 2..]
            .find("}}")
            .ok_or_else(|| WorkflowError::template(format!("unclosed '{{{{' in '{text}'")))?;
        let end = start + 2 + close + 2;
        let expr = text[start + 2..end - 2].trim();
        if expr.is_empty() {
            return Err(WorkflowError::template(format!("empty '{{{{}}}}' in '{text}'")));
        }
        spans.push(Span {
            start,
            end,
            expr: expr.to_string(),
        });
        offset = end;
    }
    Ok(spans)
}

#[derive(Debug, PartialEq)]
struct Segment {
    key: String,
    indexes: Vec<usize>,
}

fn parse_path(expr: &str) -> Result<Vec<Segment>> {
    expr.split('.')
        .map(|part| {
            let part = part.trim();
            let (key, mut tail) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if key.is_empty() {
                return Err(WorkflowError::template(format!("bad path '{expr}'")));
            }
            let mut indexes = Vec::new();
            while let Some(inner) = tail.strip_prefix('[') {
                let (number, after) = inner
                    .split_once(']')
                    .ok_or_else(|| WorkflowError::template(format!("unclosed '[' in '{expr}'")))?;
                let index = number.trim().parse().map_err(|_| {
                    WorkflowError::template(format!("bad index '{number}' in '{expr}'"))
                })?;
                indexes.push(index);
                tail = after;
            }
            if !tail.is_empty() {
                return Err(WorkflowError::template(format!("bad path '{expr}'")));
            }
            Ok(Segment {
                key: key.to_string(),
                indexes,
            })
        })
        .collect()
}

fn index_into<'v>(mut value: &'v Value, segment: &Segment, expr: &str) -> Result<&'v Value> {
    for &index in &segment.indexes {
        value = value.get(index).ok_or_else(|| {
            WorkflowError::template(format!(
                "index {index} out of range for '{}' in '{{{{{expr}}}}}'",
                segment.key
            ))
        })?;
    }
    Ok(value)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> HashMap<String, Value> {
        HashMap::from([
            (
                INPUT_KEY.to_string(),
                json!({ "premise": "A lighthouse keeper finds a letter", "chapters": 3 }),
            ),
            (
                "plan".to_string(),
                json!({
                    "output": "1. Storm\n2. Letter",
                    "data": { "title": "The Letter", "steps": ["Storm", "Letter"] }
                }),
            ),
        ])
    }

    #[test]
    fn test_whole_string_keeps_json_type() {
        let scope = scope();
        let resolver = TemplateResolver::new(&scope);
        assert_eq!(
            resolver.resolve_string("{{plan.data.steps}}").unwrap(),
            json!(["Storm", "Letter"])
        );
        assert_eq!(resolver.resolve_string("{{ input.chapters }}").unwrap(), json!(3));
    }

    #[test]
    fn test_mixed_text_is_rendered() {
        let scope = scope();
        let resolver = TemplateResolver::new(&scope);
        let value = resolver
            .resolve_string("{{plan.data.title}}: {{input.chapters}} chapters")
            .unwrap();
        assert_eq!(value, json!("The Letter: 3 chapters"));

        let value = resolver.resolve_string("Beats:\n{{plan.data.steps}}").unwrap();
        assert_eq!(value, json!("Beats:\nStorm\nLetter"));
    }

    #[test]
    fn test_array_index() {
        let scope = scope();
        let resolver = TemplateResolver::new(&scope);
        assert_eq!(
            resolver.resolve_expression("plan.data.steps[1]").unwrap(),
            json!("Letter")
        );
        let err = resolver.resolve_expression("plan.data.steps[5]").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_unknown_references() {
        let scope = scope();
        let resolver = TemplateResolver::new(&scope);
        let err = resolver.resolve_string("{{draft.output}}").unwrap_err();
        assert!(err.to_string().contains("unknown reference 'draft'"));
        let err = resolver.resolve_string("{{plan.data.mood}}").unwrap_err();
        assert!(err.to_string().contains("no field 'mood'"));
    }

    #[test]
    fn test_malformed_templates() {
        let scope = scope();
        let resolver = TemplateResolver::new(&scope);
        assert!(resolver.resolve_string("{{plan.output").is_err());
        assert!(resolver.resolve_string("{{ }}").is_err());
        assert!(resolver.resolve_string("{{plan.data.steps[x]}}").is_err());
        assert_eq!(
            resolver.resolve_string("no templates").unwrap(),
            json!("no templates")
        );
    }

    #[test]
    fn test_resolve_nested_params() {
        let params = HashMap::from([
            ("outline".to_string(), json!("{{plan.output}}")),
            ("notes".to_string(), json!(["{{input.premise}}", 7])),
        ]);
        let resolved = resolve_params(&params, &scope()).unwrap();
        assert_eq!(resolved["outline"], json!("1. Storm\n2. Letter"));
        assert_eq!(
            resolved["notes"],
            json!(["A lighthouse keeper finds a letter", 7])
        );
    }

    #[test]
    fn test_references_lists_roots_once() {
        let value = json!({
            "a": "{{plan.output}} and {{input.premise}}",
            "b": ["{{plan.data.title}}"],
        });
        let mut roots = references(&value).unwrap();
        roots.sort();
        assert_eq!(roots, vec!["input", "plan"]);
    }
}
