//! Alert rule match DSL.
//!
//! A rule's `match` block maps field paths to expectations. An
//! expectation is a scalar (equality, case-insensitive for strings), a
//! list (membership), or an operator object `{"op": …, "value": …}`.
//! Nested paths use `.` separators and are looked up dot-by-dot.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Alert severities, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Extract a (possibly nested) field from an event payload.
pub fn extract_value<'a>(event: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if !key.contains('.') {
        return event.get(key);
    }
    let mut current: &Value = event.get(key.split('.').next()?)?;
    for part in key.split('.').skip(1) {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Evaluate a whole match block against an event payload. An empty
/// block matches everything.
pub fn match_rule(rule_match: &Map<String, Value>, event: &Map<String, Value>) -> bool {
    rule_match
        .iter()
        .all(|(key, expected)| match_value(extract_value(event, key), expected))
}

/// Evaluate a single expectation against an extracted value.
pub fn match_value(actual: Option<&Value>, expected: &Value) -> bool {
    if let Some(obj) = expected.as_object() {
        if let Some(op) = obj.get("op").and_then(Value::as_str) {
            return apply_op(op, actual, obj.get("value"));
        }
    }

    if let Some(list) = expected.as_array() {
        return actual.is_some_and(|a| list.contains(a));
    }

    if let Some(expected_str) = expected.as_str() {
        return match actual {
            Some(Value::String(s)) => s.eq_ignore_ascii_case(expected_str),
            Some(other) => value_to_string(other).eq_ignore_ascii_case(expected_str),
            None => false,
        };
    }

    actual == Some(expected)
}

fn apply_op(op: &str, actual: Option<&Value>, value: Option<&Value>) -> bool {
    match op {
        "exists" => actual.is_some_and(|a| !a.is_null()),
        "eq" => actual == value,
        "neq" => actual != value,
        "gt" => compare_numbers(actual, value, |a, b| a > b),
        "gte" => compare_numbers(actual, value, |a, b| a >= b),
        "lt" => compare_numbers(actual, value, |a, b| a < b),
        "lte" => compare_numbers(actual, value, |a, b| a <= b),
        "in" => match (actual, value.and_then(Value::as_array)) {
            (Some(a), Some(list)) => list.contains(a),
            _ => false,
        },
        "contains" => match (actual, value) {
            (Some(Value::Array(items)), Some(v)) => {
                let needle = value_to_string(v).to_lowercase();
                items
                    .iter()
                    .any(|item| value_to_string(item).to_lowercase().contains(&needle))
            }
            (Some(a), Some(v)) => value_to_string(a)
                .to_lowercase()
                .contains(&value_to_string(v).to_lowercase()),
            _ => false,
        },
        "regex" => match (actual, value) {
            (Some(a), Some(v)) => {
                let Some(pattern) = v.as_str() else {
                    return false;
                };
                match regex::Regex::new(pattern) {
                    Ok(re) => re.is_match(&value_to_string(a)),
                    Err(_) => false,
                }
            }
            _ => false,
        },
        _ => false,
    }
}

fn compare_numbers(actual: Option<&Value>, value: Option<&Value>, cmp: fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(safe_number), value.and_then(safe_number)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn safe_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn scalar_string_match_is_case_insensitive() {
        let event = obj(json!({"protocol": "POCSAG1200"}));
        assert!(match_rule(&obj(json!({"protocol": "pocsag1200"})), &event));
        assert!(!match_rule(&obj(json!({"protocol": "flex"})), &event));
    }

    #[test]
    fn missing_field_does_not_match() {
        let event = obj(json!({"a": 1}));
        assert!(!match_rule(&obj(json!({"b": 1})), &event));
    }

    #[test]
    fn list_expectation_is_membership() {
        let event = obj(json!({"function": 2}));
        assert!(match_rule(&obj(json!({"function": [1, 2, 3]})), &event));
        assert!(!match_rule(&obj(json!({"function": [4]})), &event));
    }

    #[test]
    fn nested_paths_look_up_dot_by_dot() {
        let event = obj(json!({"target": {"icao": "A1B2C3"}}));
        assert!(match_rule(&obj(json!({"target.icao": "a1b2c3"})), &event));
        assert!(!match_rule(&obj(json!({"target.missing": "x"})), &event));
        assert!(!match_rule(&obj(json!({"target.icao.deeper": "x"})), &event));
    }

    #[test]
    fn regex_op_searches_the_value() {
        let event = obj(json!({"target": {"icao": "A1B2C3"}}));
        let rule = obj(json!({"target.icao": {"op": "regex", "value": "^A[0-9A-F]"}}));
        assert!(match_rule(&rule, &event));

        let miss = obj(json!({"target.icao": {"op": "regex", "value": "^B"}}));
        assert!(!match_rule(&miss, &event));
    }

    #[test]
    fn invalid_regex_never_matches() {
        let event = obj(json!({"x": "abc"}));
        assert!(!match_rule(&obj(json!({"x": {"op": "regex", "value": "("}})), &event));
    }

    #[test]
    fn numeric_operators_coerce_strings() {
        let event = obj(json!({"rssi": "-42.5"}));
        assert!(match_rule(&obj(json!({"rssi": {"op": "gt", "value": -50}})), &event));
        assert!(match_rule(&obj(json!({"rssi": {"op": "lte", "value": -42.5}})), &event));
        assert!(!match_rule(&obj(json!({"rssi": {"op": "lt", "value": -50}})), &event));
    }

    #[test]
    fn exists_and_in_and_contains_ops() {
        let event = obj(json!({"ssid": "FreeWifi", "channels": [1, 6, 11]}));
        assert!(match_rule(&obj(json!({"ssid": {"op": "exists"}})), &event));
        assert!(!match_rule(&obj(json!({"bssid": {"op": "exists"}})), &event));
        assert!(match_rule(&obj(json!({"channels": {"op": "in", "value": [[1, 6, 11], [2]]}})), &event));
        assert!(match_rule(&obj(json!({"ssid": {"op": "contains", "value": "wifi"}})), &event));
        assert!(match_rule(&obj(json!({"channels": {"op": "contains", "value": 6}})), &event));
    }

    #[test]
    fn empty_match_block_matches_everything() {
        assert!(match_rule(&Map::new(), &obj(json!({"anything": 1}))));
    }

    #[test]
    fn severity_orders() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            serde_json::from_str::<Severity>("\"high\"").unwrap(),
            Severity::High
        );
    }
}
