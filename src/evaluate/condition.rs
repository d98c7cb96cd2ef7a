use serde_json::{Map, Value};

use crate::parse::padded_version;
use crate::types::lookup;
use crate::types::value::{compare, is_truthy, json_eq, to_js_number, to_js_string, type_name};
use crate::{Attributes, CompareOp, Condition, ElemMatch, Operator, ValueTest};

/// Evaluate a condition against user attributes.
///
/// Total: never panics and never errors. Anything the engine cannot make
/// sense of evaluates to `false`.
#[must_use]
pub fn eval_condition(condition: &Condition, attributes: &Attributes) -> bool {
    eval(condition, attributes.as_map())
}

fn eval(condition: &Condition, root: &Map<String, Value>) -> bool {
    match condition {
        Condition::And(all) => all.iter().all(|c| eval(c, root)),
        Condition::Or(any) => eval_or(any, root),
        Condition::Nor(none) => !eval_or(none, root),
        Condition::Not(inner) => !eval(inner, root),
        Condition::Field { path, test } => eval_test(test, lookup(root, path)),
        Condition::Invalid(_) => false,
    }
}

// An empty $or holds.
fn eval_or(any: &[Condition], root: &Map<String, Value>) -> bool {
    any.is_empty() || any.iter().any(|c| eval(c, root))
}

fn eval_test(test: &ValueTest, actual: Option<&Value>) -> bool {
    match test {
        ValueTest::Literal(expected) => literal_matches(actual, expected),
        ValueTest::Operators(ops) => ops.iter().all(|op| eval_operator(op, actual)),
    }
}

/// The attribute is coerced toward the literal's type before comparing.
fn literal_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match expected {
        Value::String(s) => actual.is_some_and(|a| to_js_string(a) == *s),
        Value::Number(n) => actual.is_some_and(|a| Some(to_js_number(a)) == n.as_f64()),
        Value::Bool(b) => is_truthy(actual) == *b,
        Value::Null => actual.is_some_and(Value::is_null),
        Value::Array(_) | Value::Object(_) => actual.is_some_and(|a| json_eq(a, expected)),
    }
}

fn eval_operator(op: &Operator, actual: Option<&Value>) -> bool {
    match op {
        Operator::Compare(CompareOp::Neq, expected) => {
            actual.map_or(true, |a| compare(a, CompareOp::Neq, expected))
        }
        Operator::Compare(op, expected) => actual.is_some_and(|a| compare(a, *op, expected)),
        Operator::Version(op, expected) => match actual {
            None | Some(Value::Null) => *op == CompareOp::Neq,
            Some(a) => compare_versions(&padded_version(&to_js_string(a)), *op, expected),
        },
        Operator::In(items) => actual.is_some_and(|a| in_list(a, items)),
        Operator::NotIn(items) => !actual.is_some_and(|a| in_list(a, items)),
        Operator::All(tests) => match actual {
            Some(Value::Array(items)) => tests
                .iter()
                .all(|t| items.iter().any(|item| eval_test(t, Some(item)))),
            _ => false,
        },
        Operator::ElemMatch(matcher) => match actual {
            Some(Value::Array(items)) => items.iter().any(|item| elem_matches(matcher, item)),
            _ => false,
        },
        Operator::Size(test) => match actual {
            Some(Value::Array(items)) => eval_test(test, Some(&Value::from(items.len()))),
            _ => false,
        },
        Operator::Exists(expected) => actual.is_some_and(|a| !a.is_null()) == *expected,
        Operator::Type(name) => type_name(actual) == name,
        Operator::Regex(pattern) => actual.is_some_and(|a| pattern.is_match(&to_js_string(a))),
        Operator::Not(test) => !eval_test(test, actual),
        Operator::Unknown(_) | Operator::Malformed(_) => false,
    }
}

fn compare_versions(actual: &str, op: CompareOp, expected: &str) -> bool {
    match op {
        CompareOp::Eq => actual == expected,
        CompareOp::Neq => actual != expected,
        CompareOp::Gt => actual > expected,
        CompareOp::Gte => actual >= expected,
        CompareOp::Lt => actual < expected,
        CompareOp::Lte => actual <= expected,
    }
}

/// Membership; an array attribute matches when any element is listed.
fn in_list(actual: &Value, items: &[Value]) -> bool {
    match actual {
        Value::Array(elements) => elements
            .iter()
            .any(|e| items.iter().any(|item| json_eq(e, item))),
        single => items.iter().any(|item| json_eq(single, item)),
    }
}

fn elem_matches(matcher: &ElemMatch, item: &Value) -> bool {
    match matcher {
        ElemMatch::Value(test) => eval_test(test, Some(item)),
        ElemMatch::Condition(condition) => match item {
            Value::Object(map) => eval(condition, map),
            _ => eval(condition, &Map::new()),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::field;

    fn check(condition: Value, attributes: Value) -> bool {
        let attrs = Attributes::try_from(attributes).expect("attributes object");
        eval_condition(&Condition::from_json(&condition), &attrs)
    }

    #[test]
    fn literal_string_coerces() {
        assert!(check(json!({"age": "18"}), json!({"age": 18})));
        assert!(check(json!({"country": "US"}), json!({"country": "US"})));
        assert!(!check(json!({"country": "US"}), json!({"country": "CA"})));
        assert!(!check(json!({"country": "US"}), json!({})));
    }

    #[test]
    fn literal_number_coerces() {
        assert!(check(json!({"age": 18}), json!({"age": "18"})));
        assert!(!check(json!({"age": 18}), json!({})));
    }

    #[test]
    fn literal_bool_is_truthiness() {
        assert!(check(json!({"beta": true}), json!({"beta": 1})));
        assert!(check(json!({"beta": false}), json!({})));
        assert!(!check(json!({"beta": true}), json!({"beta": ""})));
    }

    #[test]
    fn literal_null_needs_explicit_null() {
        assert!(check(json!({"x": null}), json!({"x": null})));
        assert!(!check(json!({"x": null}), json!({})));
    }

    #[test]
    fn literal_structures() {
        assert!(check(json!({"tags": ["a", "b"]}), json!({"tags": ["a", "b"]})));
        assert!(!check(json!({"tags": ["a", "b"]}), json!({"tags": ["b", "a"]})));
        assert!(check(json!({"o": {"k": 1}}), json!({"o": {"k": 1}})));
    }

    #[test]
    fn empty_condition_holds() {
        assert!(check(json!({}), json!({})));
    }

    #[test]
    fn logical_operators() {
        let attrs = json!({"a": 1, "b": 2});
        assert!(check(json!({"$and": [{"a": 1}, {"b": 2}]}), attrs.clone()));
        assert!(!check(json!({"$and": [{"a": 1}, {"b": 3}]}), attrs.clone()));
        assert!(check(json!({"$or": [{"a": 5}, {"b": 2}]}), attrs.clone()));
        assert!(!check(json!({"$or": [{"a": 5}, {"b": 5}]}), attrs.clone()));
        assert!(check(json!({"$nor": [{"a": 5}, {"b": 5}]}), attrs.clone()));
        assert!(!check(json!({"$nor": [{"a": 1}]}), attrs.clone()));
        assert!(check(json!({"$not": {"a": 5}}), attrs.clone()));
        assert!(check(json!({"$or": []}), attrs.clone()));
        assert!(!check(json!({"$nor": []}), attrs.clone()));
        assert!(check(json!({"$and": []}), attrs));
    }

    #[test]
    fn comparison_operators() {
        let attrs = json!({"age": 30, "name": "mike"});
        assert!(check(json!({"age": {"$gt": 18, "$lt": 65}}), attrs.clone()));
        assert!(check(json!({"age": {"$gte": 30, "$lte": 30}}), attrs.clone()));
        assert!(!check(json!({"age": {"$gt": 30}}), attrs.clone()));
        assert!(check(json!({"age": {"$eq": 30}}), attrs.clone()));
        assert!(check(json!({"age": {"$ne": 31}}), attrs.clone()));
        assert!(check(json!({"name": {"$gt": "alice"}}), attrs.clone()));
        assert!(!check(json!({"name": {"$lt": "alice"}}), attrs));
    }

    #[test]
    fn absent_attribute_semantics() {
        let empty = json!({});
        assert!(!check(json!({"x": {"$gt": 1}}), empty.clone()));
        assert!(!check(json!({"x": {"$lte": 1}}), empty.clone()));
        assert!(!check(json!({"x": {"$eq": 1}}), empty.clone()));
        assert!(check(json!({"x": {"$ne": 1}}), empty.clone()));
        assert!(!check(json!({"x": {"$in": [1]}}), empty.clone()));
        assert!(check(json!({"x": {"$nin": [1]}}), empty.clone()));
        assert!(check(json!({"x": {"$not": {"$eq": 1}}}), empty.clone()));
        assert!(!check(json!({"x": {"$regex": "."}}), empty.clone()));
        assert!(!check(json!({"x": {"$vgt": "1.0.0"}}), empty.clone()));
        assert!(check(json!({"x": {"$vne": "1.0.0"}}), empty));
    }

    #[test]
    fn in_and_nin() {
        assert!(check(json!({"c": {"$in": ["US", "CA"]}}), json!({"c": "CA"})));
        assert!(!check(json!({"c": {"$in": ["US", "CA"]}}), json!({"c": "MX"})));
        assert!(check(json!({"c": {"$nin": ["US", "CA"]}}), json!({"c": "MX"})));
        // array attribute intersects
        assert!(check(json!({"t": {"$in": ["x", "y"]}}), json!({"t": ["a", "y"]})));
        assert!(!check(json!({"t": {"$nin": ["x", "y"]}}), json!({"t": ["a", "y"]})));
        // no coercion in membership
        assert!(!check(json!({"n": {"$in": ["1"]}}), json!({"n": 1})));
    }

    #[test]
    fn exists() {
        assert!(check(json!({"x": {"$exists": true}}), json!({"x": 0})));
        assert!(!check(json!({"x": {"$exists": true}}), json!({"x": null})));
        assert!(check(json!({"x": {"$exists": false}}), json!({})));
        assert!(!check(json!({"x": {"$exists": false}}), json!({"x": "v"})));
    }

    #[test]
    fn type_operator() {
        assert!(check(json!({"x": {"$type": "string"}}), json!({"x": "s"})));
        assert!(check(json!({"x": {"$type": "number"}}), json!({"x": 1.5})));
        assert!(check(json!({"x": {"$type": "undefined"}}), json!({})));
        assert!(check(json!({"x": {"$type": "null"}}), json!({"x": null})));
        assert!(!check(json!({"x": {"$type": "array"}}), json!({"x": {}})));
    }

    #[test]
    fn regex_operator() {
        assert!(check(json!({"email": {"$regex": "@example\\.com$"}}), json!({"email": "a@example.com"})));
        assert!(!check(json!({"email": {"$regex": "@example\\.com$"}}), json!({"email": "a@example.org"})));
        assert!(check(json!({"n": {"$regex": "^4"}}), json!({"n": 42})));
        assert!(!check(json!({"n": {"$regex": "(bad"}}), json!({"n": "(bad"})));
    }

    #[test]
    fn array_operators() {
        let attrs = json!({"tags": ["a", "b", "c"], "scores": [3, 9], "items": [{"sku": "x", "qty": 2}]});
        assert!(check(json!({"tags": {"$all": ["a", "c"]}}), attrs.clone()));
        assert!(!check(json!({"tags": {"$all": ["a", "z"]}}), attrs.clone()));
        assert!(check(json!({"tags": {"$size": 3}}), attrs.clone()));
        assert!(check(json!({"tags": {"$size": {"$gt": 2}}}), attrs.clone()));
        assert!(!check(json!({"tags": {"$size": 0}}), attrs.clone()));
        assert!(check(json!({"scores": {"$elemMatch": {"$gt": 5}}}), attrs.clone()));
        assert!(!check(json!({"scores": {"$elemMatch": {"$gt": 10}}}), attrs.clone()));
        assert!(check(json!({"items": {"$elemMatch": {"sku": "x", "qty": {"$gte": 2}}}}), attrs.clone()));
        assert!(!check(json!({"items": {"$elemMatch": {"sku": "y"}}}), attrs.clone()));
        // non-arrays never match array operators
        assert!(!check(json!({"x": {"$size": 0}}), json!({"x": "str"})));
        assert!(!check(json!({"x": {"$all": []}}), json!({"x": 1})));
    }

    #[test]
    fn version_operators() {
        let attrs = json!({"app": "v1.2.10"});
        assert!(check(json!({"app": {"$vgt": "1.2.9"}}), attrs.clone()));
        assert!(check(json!({"app": {"$vgte": "1.2.10"}}), attrs.clone()));
        assert!(check(json!({"app": {"$vlt": "1.10.0"}}), attrs.clone()));
        assert!(check(json!({"app": {"$veq": "1.2.10+build5"}}), attrs.clone()));
        assert!(check(json!({"app": {"$vne": "1.2.11"}}), attrs.clone()));
        assert!(!check(json!({"app": {"$vlte": "1.2.10-beta"}}), attrs));
    }

    #[test]
    fn nested_paths() {
        let attrs = json!({"company": {"plan": "pro", "seats": [10, 20]}});
        assert!(check(json!({"company.plan": "pro"}), attrs.clone()));
        assert!(check(json!({"company.seats.1": 20}), attrs.clone()));
        assert!(!check(json!({"company.plan.tier": "x"}), attrs));
    }

    #[test]
    fn unknown_and_malformed_are_false() {
        assert!(!check(json!({"x": {"$near": 1}}), json!({"x": 1})));
        assert!(!check(json!({"x": {"$in": 1}}), json!({"x": 1})));
        assert!(!check(json!({"$where": "true"}), json!({})));
        assert!(!check(json!("not-an-object"), json!({})));
    }

    #[test]
    fn builder_conditions_evaluate() {
        let attrs = Attributes::new().set("plan", "pro").set("seats", 12);
        let cond = field("plan").is_in(["pro", "team"]).and(field("seats").gte(10));
        assert!(eval_condition(&cond, &attrs));
        assert!(!eval_condition(&!cond, &attrs));
    }
}
