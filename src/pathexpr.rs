// Path-Expression Engine: a JSONPath subset compiled once per distinct
// expression string and evaluated against serde_json::Value documents.
//
// Grammar supported: `$` (root, implicit), `.name` child access, `[n]` array
// index, `[*]` wildcard, and `..name` recursive descent. Evaluation never
// raises: a bad expression is logged once and treated as "no match".

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Child(String),
    Index(usize),
    Wildcard,
    Descend(String),
}

#[derive(Debug, Clone)]
pub struct CompiledPath {
    steps: Vec<Step>,
}

#[derive(Debug, thiserror::Error)]
pub enum PathExprError {
    #[error("empty path expression")]
    Empty,
    #[error("malformed path expression: {0}")]
    Malformed(String),
}

fn compile(expr: &str) -> Result<CompiledPath, PathExprError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(PathExprError::Empty);
    }
    let body = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let mut steps = Vec::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                if chars.get(i + 1) == Some(&'.') {
                    i += 2;
                    let start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        i += 1;
                    }
                    let name: String = chars[start..i].iter().collect();
                    if name.is_empty() {
                        return Err(PathExprError::Malformed(expr.to_string()));
                    }
                    steps.push(Step::Descend(name));
                } else {
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        i += 1;
                    }
                    let name: String = chars[start..i].iter().collect();
                    if name.is_empty() {
                        return Err(PathExprError::Malformed(expr.to_string()));
                    }
                    steps.push(Step::Child(name));
                }
            }
            '[' => {
                let start = i + 1;
                let end = body[start..]
                    .find(']')
                    .map(|p| start + p)
                    .ok_or_else(|| PathExprError::Malformed(expr.to_string()))?;
                let inner: String = chars[start..end].iter().collect();
                if inner == "*" {
                    steps.push(Step::Wildcard);
                } else {
                    let n: usize = inner
                        .parse()
                        .map_err(|_| PathExprError::Malformed(expr.to_string()))?;
                    steps.push(Step::Index(n));
                }
                i = end + 1;
            }
            _ => {
                // Bare identifier with no leading '.', e.g. "$name" alone.
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if !name.is_empty() {
                    steps.push(Step::Child(name));
                }
            }
        }
    }
    Ok(CompiledPath { steps })
}

fn descend_collect<'a>(value: &'a Value, name: &str, out: &mut Vec<&'a Value>) {
    if let Some(obj) = value.as_object() {
        if let Some(v) = obj.get(name) {
            out.push(v);
        }
        for v in obj.values() {
            descend_collect(v, name, out);
        }
    } else if let Some(arr) = value.as_array() {
        for v in arr {
            descend_collect(v, name, out);
        }
    }
}

fn eval<'a>(steps: &[Step], value: &'a Value) -> Option<&'a Value> {
    let mut current = vec![value];
    for step in steps {
        let mut next = Vec::new();
        match step {
            Step::Child(name) => {
                for v in &current {
                    if let Some(found) = v.get(name) {
                        next.push(found);
                    }
                }
            }
            Step::Index(n) => {
                for v in &current {
                    if let Some(found) = v.get(*n) {
                        next.push(found);
                    }
                }
            }
            Step::Wildcard => {
                for v in &current {
                    if let Some(arr) = v.as_array() {
                        next.extend(arr.iter());
                    } else if let Some(obj) = v.as_object() {
                        next.extend(obj.values());
                    }
                }
            }
            Step::Descend(name) => {
                for v in &current {
                    descend_collect(v, name, &mut next);
                }
            }
        }
        current = next;
        if current.is_empty() {
            return None;
        }
    }
    current.into_iter().next()
}

/// Returns the matched slice when the final step was a wildcard over an
/// array, so callers asking for "all matches" get a list rather than the
/// first element.
fn eval_all<'a>(steps: &[Step], value: &'a Value) -> Vec<&'a Value> {
    let mut current = vec![value];
    for step in steps {
        let mut next = Vec::new();
        match step {
            Step::Child(name) => {
                for v in &current {
                    if let Some(found) = v.get(name) {
                        next.push(found);
                    }
                }
            }
            Step::Index(n) => {
                for v in &current {
                    if let Some(found) = v.get(*n) {
                        next.push(found);
                    }
                }
            }
            Step::Wildcard => {
                for v in &current {
                    if let Some(arr) = v.as_array() {
                        next.extend(arr.iter());
                    } else if let Some(obj) = v.as_object() {
                        next.extend(obj.values());
                    }
                }
            }
            Step::Descend(name) => {
                for v in &current {
                    descend_collect(v, name, &mut next);
                }
            }
        }
        current = next;
    }
    current
}

/// Memoizing compiler + evaluator shared by every provider descriptor lookup.
pub struct PathEngine {
    cache: RwLock<HashMap<String, Option<CompiledPath>>>,
}

impl Default for PathEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PathEngine {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    fn compiled(&self, expr: &str) -> Option<CompiledPath> {
        if let Some(hit) = self.cache.read().unwrap().get(expr) {
            return hit.clone();
        }
        let compiled = match compile(expr) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!("invalid path expression {:?}: {}", expr, e);
                None
            }
        };
        self.cache
            .write()
            .unwrap()
            .insert(expr.to_string(), compiled.clone());
        compiled
    }

    /// Returns the value matched by `expr` in `doc`, or `default` if the
    /// expression fails to compile, matches nothing, or matches `null`/`""`.
    pub fn extract(&self, doc: &Value, expr: Option<&str>, default: Option<Value>) -> Option<Value> {
        let expr = expr?;
        let compiled = self.compiled(expr)?;
        let found = eval(&compiled.steps, doc)?;
        match found {
            Value::Null => default,
            Value::String(s) if s.is_empty() => default,
            other => Some(other.clone()),
        }
    }

    /// Same as `extract` but returns every wildcard-expanded match rather
    /// than just the first, used for `messages_path`/`text_fields`.
    pub fn extract_all(&self, doc: &Value, expr: Option<&str>) -> Vec<Value> {
        let Some(expr) = expr else { return Vec::new() };
        let Some(compiled) = self.compiled(expr) else {
            return Vec::new();
        };
        eval_all(&compiled.steps, doc)
            .into_iter()
            .filter(|v| !matches!(v, Value::Null))
            .cloned()
            .collect()
    }

    /// Tries `primary` then each of `fallbacks` in order, returning the
    /// first non-null extraction.
    pub fn extract_with_fallbacks(
        &self,
        doc: &Value,
        primary: Option<&str>,
        fallbacks: &[String],
    ) -> Option<Value> {
        if let Some(v) = self.extract(doc, primary, None) {
            return Some(v);
        }
        for alt in fallbacks {
            if let Some(v) = self.extract(doc, Some(alt), None) {
                return Some(v);
            }
        }
        None
    }

    pub fn extract_u64(&self, doc: &Value, primary: Option<&str>, fallbacks: &[String]) -> u64 {
        self.extract_with_fallbacks(doc, primary, fallbacks)
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .unwrap_or(0)
    }

    pub fn extract_string(
        &self,
        doc: &Value,
        primary: Option<&str>,
        fallbacks: &[String],
    ) -> Option<String> {
        self.extract_with_fallbacks(doc, primary, fallbacks)
            .and_then(|v| v.as_str().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn child_access() {
        let engine = PathEngine::new();
        let doc = json!({"usage": {"input_tokens": 10}});
        assert_eq!(
            engine.extract(&doc, Some("usage.input_tokens"), None),
            Some(json!(10))
        );
    }

    #[test]
    fn index_and_wildcard() {
        let engine = PathEngine::new();
        let doc = json!({"items": [{"v": 1}, {"v": 2}]});
        assert_eq!(engine.extract(&doc, Some("items[1].v"), None), Some(json!(2)));
        assert_eq!(engine.extract_all(&doc, Some("items[*].v")), vec![json!(1), json!(2)]);
    }

    #[test]
    fn recursive_descent() {
        let engine = PathEngine::new();
        let doc = json!({"a": {"b": {"model": "x"}}});
        assert_eq!(engine.extract(&doc, Some("..model"), None), Some(json!("x")));
    }

    #[test]
    fn empty_string_and_null_are_no_match() {
        let engine = PathEngine::new();
        let doc = json!({"a": "", "b": null});
        assert_eq!(engine.extract(&doc, Some("a"), Some(json!("default"))), Some(json!("default")));
        assert_eq!(engine.extract(&doc, Some("b"), Some(json!("default"))), Some(json!("default")));
    }

    #[test]
    fn invalid_expression_returns_default_not_panic() {
        let engine = PathEngine::new();
        let doc = json!({});
        assert_eq!(engine.extract(&doc, Some("[abc]"), Some(json!(0))), Some(json!(0)));
    }

    #[test]
    fn fallbacks_tried_in_order() {
        let engine = PathEngine::new();
        let doc = json!({"alt_field": 5});
        let fallbacks = vec!["alt_field".to_string()];
        assert_eq!(
            engine.extract_with_fallbacks(&doc, Some("missing"), &fallbacks),
            Some(json!(5))
        );
    }

    #[test]
    fn memoization_reuses_compiled_expression() {
        let engine = PathEngine::new();
        let doc = json!({"x": 1});
        engine.extract(&doc, Some("x"), None);
        assert_eq!(engine.cache.read().unwrap().len(), 1);
        engine.extract(&doc, Some("x"), None);
        assert_eq!(engine.cache.read().unwrap().len(), 1);
    }
}
