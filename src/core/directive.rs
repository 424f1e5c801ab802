//! Detection of function-call directives embedded in model output.
//!
//! Two forms are recognized, in this order:
//! - `<function=NAME>{"arg": value}</function>`, first occurrence only
//! - a bare JSON object `{"name": NAME, "parameters": {...}}`, the first
//!   balanced-brace object in the text (one level of nesting)

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

static FUNCTION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<function=(\w+)>(.*?)</function>").expect("function tag pattern is valid")
});

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?:[^{}]|\{[^{}]*\})*\}").expect("json object pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallDirective {
    pub name: String,
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Error, PartialEq)]
pub enum DirectiveError {
    #[error("malformed arguments for function '{name}': {reason}")]
    Malformed { name: String, reason: String },
}

#[derive(Deserialize)]
struct BareCall {
    name: String,
    parameters: Map<String, Value>,
}

/// Find the first directive in `text`.
///
/// `Ok(None)` means nothing directive-shaped was found. An error is only
/// returned when a matched span holds JSON that does not parse.
pub fn parse(text: &str) -> Result<Option<FunctionCallDirective>, DirectiveError> {
    if let Some(captures) = FUNCTION_TAG.captures(text) {
        let name = captures[1].to_string();
        let arguments = parse_tag_arguments(&name, &captures[2])?;
        return Ok(Some(FunctionCallDirective { name, arguments }));
    }

    let Some(span) = JSON_OBJECT.find(text) else {
        return Ok(None);
    };
    let value: Value =
        serde_json::from_str(span.as_str()).map_err(|err| DirectiveError::Malformed {
            name: "<json>".to_string(),
            reason: err.to_string(),
        })?;

    Ok(serde_json::from_value::<BareCall>(value)
        .ok()
        .map(|call| FunctionCallDirective {
            name: call.name,
            arguments: call.parameters,
        }))
}

fn parse_tag_arguments(name: &str, raw: &str) -> Result<Map<String, Value>, DirectiveError> {
    let malformed = |reason: String| DirectiveError::Malformed {
        name: name.to_string(),
        reason,
    };
    match serde_json::from_str::<Value>(raw).map_err(|err| malformed(err.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(malformed(format!("expected a JSON object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_tag_form_with_trailing_text() {
        let directive = parse(r#"<function=add>{"a":119,"b":991}</function> trailing text"#)
            .unwrap()
            .unwrap();
        assert_eq!(directive.name, "add");
        assert_eq!(directive.arguments, args(json!({"a": 119, "b": 991})));
    }

    #[test]
    fn parses_tag_form_alone() {
        let directive = parse(r#"<function=multiply>{"x":5,"y":7}</function>"#)
            .unwrap()
            .unwrap();
        assert_eq!(directive.name, "multiply");
        assert_eq!(directive.arguments, args(json!({"x": 5, "y": 7})));
    }

    #[test]
    fn plain_text_has_no_directive() {
        assert_eq!(parse("no directive here"), Ok(None));
        assert_eq!(parse(""), Ok(None));
    }

    #[test]
    fn only_the_first_tag_is_used() {
        let text = r#"<function=add>{"a":1,"b":2}</function><function=multiply>{"a":3,"b":4}</function>"#;
        let directive = parse(text).unwrap().unwrap();
        assert_eq!(directive.name, "add");
    }

    #[test]
    fn parses_bare_json_form_with_nested_parameters() {
        let text = r#"Sure. {"name": "add", "parameters": {"a": "191", "b": "102"}} done"#;
        let directive = parse(text).unwrap().unwrap();
        assert_eq!(directive.name, "add");
        assert_eq!(directive.arguments, args(json!({"a": "191", "b": "102"})));
    }

    #[test]
    fn bare_json_without_call_shape_is_not_a_directive() {
        let text = r#"This is some text { "name": "John", "age": 30 } and more text"#;
        assert_eq!(parse(text), Ok(None));
    }

    // Malformed spans are reported separately so callers can log them; the
    // orchestrator still treats them as a plain answer.
    #[test]
    fn malformed_tag_arguments_are_distinguishable() {
        let err = parse("<function=add>{a:1}</function>").unwrap_err();
        assert!(matches!(err, DirectiveError::Malformed { ref name, .. } if name == "add"));

        let err = parse("<function=add>[1, 2]</function>").unwrap_err();
        assert!(matches!(err, DirectiveError::Malformed { .. }));
    }

    #[test]
    fn malformed_bare_json_is_distinguishable() {
        assert!(parse("set {x} to three").is_err());
    }

    #[test]
    fn tag_form_does_not_span_lines() {
        assert_eq!(parse("<function=add>{\"a\":1,\n\"b\":2}</function>"), Ok(None));
    }
}
