use serde_json::Value;

use crate::types::value::{is_truthy, to_js_string, type_name};
use crate::types::{CompareOp, Condition, ElemMatch, Operator, Pattern, ValueTest};

use super::version::padded_version;

/// Parse a JSON condition document into a [`Condition`].
///
/// Unknown operators and malformed operands are kept as variants that
/// evaluate to `false`, so one bad clause cannot widen targeting.
#[must_use]
pub fn parse_condition(value: &Value) -> Condition {
    let Value::Object(map) = value else {
        return Condition::Invalid(format!(
            "condition must be an object, got {}",
            type_name(Some(value))
        ));
    };

    let mut clauses: Vec<Condition> = map.iter().map(|(key, v)| clause(key, v)).collect();
    if clauses.len() == 1 {
        clauses.swap_remove(0)
    } else {
        Condition::And(clauses)
    }
}

fn clause(key: &str, value: &Value) -> Condition {
    match key {
        "$and" => list(key, value).map_or_else(Condition::Invalid, Condition::And),
        "$or" => list(key, value).map_or_else(Condition::Invalid, Condition::Or),
        "$nor" => list(key, value).map_or_else(Condition::Invalid, Condition::Nor),
        "$not" => Condition::Not(Box::new(parse_condition(value))),
        tag if tag.starts_with('$') => {
            tracing::warn!(operator = tag, "unrecognized condition operator never matches");
            Condition::Invalid(format!("unknown operator {tag}"))
        }
        path => Condition::Field {
            path: path.to_owned(),
            test: parse_value_test(value),
        },
    }
}

fn list(key: &str, value: &Value) -> Result<Vec<Condition>, String> {
    match value {
        Value::Array(items) => Ok(items.iter().map(parse_condition).collect()),
        other => Err(format!(
            "{key} expects an array, got {}",
            type_name(Some(other))
        )),
    }
}

/// True when `value` is a non-empty object whose keys all start with `$`.
pub(crate) fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

pub(crate) fn parse_value_test(value: &Value) -> ValueTest {
    match value {
        Value::Object(map) if is_operator_object(value) => ValueTest::Operators(
            map.iter()
                .map(|(tag, operand)| parse_operator(tag, operand))
                .collect(),
        ),
        literal => ValueTest::Literal(literal.clone()),
    }
}

fn parse_operator(tag: &str, operand: &Value) -> Operator {
    match tag {
        "$eq" => Operator::Compare(CompareOp::Eq, operand.clone()),
        "$ne" => Operator::Compare(CompareOp::Neq, operand.clone()),
        "$lt" => Operator::Compare(CompareOp::Lt, operand.clone()),
        "$lte" => Operator::Compare(CompareOp::Lte, operand.clone()),
        "$gt" => Operator::Compare(CompareOp::Gt, operand.clone()),
        "$gte" => Operator::Compare(CompareOp::Gte, operand.clone()),
        "$veq" => version(tag, CompareOp::Eq, operand),
        "$vne" => version(tag, CompareOp::Neq, operand),
        "$vlt" => version(tag, CompareOp::Lt, operand),
        "$vlte" => version(tag, CompareOp::Lte, operand),
        "$vgt" => version(tag, CompareOp::Gt, operand),
        "$vgte" => version(tag, CompareOp::Gte, operand),
        "$in" => array(tag, operand).map_or_else(Operator::Malformed, |items| {
            Operator::In(items.clone())
        }),
        "$nin" => array(tag, operand).map_or_else(Operator::Malformed, |items| {
            Operator::NotIn(items.clone())
        }),
        "$all" => array(tag, operand).map_or_else(Operator::Malformed, |items| {
            Operator::All(items.iter().map(parse_value_test).collect())
        }),
        "$elemMatch" => {
            let inner = if is_operator_object(operand) {
                ElemMatch::Value(parse_value_test(operand))
            } else {
                ElemMatch::Condition(parse_condition(operand))
            };
            Operator::ElemMatch(Box::new(inner))
        }
        "$size" => Operator::Size(Box::new(parse_value_test(operand))),
        "$exists" => Operator::Exists(is_truthy(Some(operand))),
        "$type" => match operand {
            Value::String(name) => Operator::Type(name.clone()),
            _ => malformed(tag, "a type name string"),
        },
        "$regex" => match operand {
            Value::String(source) => Operator::Regex(Pattern::new(source)),
            _ => malformed(tag, "a pattern string"),
        },
        "$not" => Operator::Not(Box::new(parse_value_test(operand))),
        unknown => {
            tracing::warn!(operator = unknown, "unrecognized condition operator never matches");
            Operator::Unknown(unknown.to_owned())
        }
    }
}

fn version(tag: &str, op: CompareOp, operand: &Value) -> Operator {
    match operand {
        Value::String(_) | Value::Number(_) => {
            Operator::Version(op, padded_version(&to_js_string(operand)))
        }
        _ => malformed(tag, "a version string"),
    }
}

fn array<'a>(tag: &str, operand: &'a Value) -> Result<&'a Vec<Value>, String> {
    match operand {
        Value::Array(items) => Ok(items),
        other => {
            tracing::warn!(
                operator = tag,
                got = type_name(Some(other)),
                "operator expects an array operand and never matches"
            );
            Err(tag.to_owned())
        }
    }
}

fn malformed(tag: &str, expected: &str) -> Operator {
    tracing::warn!(
        operator = tag,
        expected,
        "malformed operator operand never matches"
    );
    Operator::Malformed(tag.to_owned())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::field;

    #[test]
    fn single_key_is_a_field() {
        let cond = parse_condition(&json!({"country": "US"}));
        assert_eq!(cond, field("country").equals("US"));
    }

    #[test]
    fn several_keys_are_anded() {
        let cond = parse_condition(&json!({"a": 1, "b": 2}));
        match cond {
            Condition::And(all) => assert_eq!(all.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn empty_object_is_empty_and() {
        assert_eq!(parse_condition(&json!({})), Condition::And(vec![]));
    }

    #[test]
    fn logical_combinators() {
        let cond = parse_condition(&json!({"$or": [{"a": 1}, {"b": 2}]}));
        assert!(matches!(cond, Condition::Or(ref v) if v.len() == 2));

        let cond = parse_condition(&json!({"$nor": [{"a": 1}]}));
        assert!(matches!(cond, Condition::Nor(ref v) if v.len() == 1));

        let cond = parse_condition(&json!({"$not": {"a": 1}}));
        assert!(matches!(cond, Condition::Not(_)));
    }

    #[test]
    fn non_array_combinator_is_invalid() {
        let cond = parse_condition(&json!({"$or": {"a": 1}}));
        assert!(matches!(cond, Condition::Invalid(_)));
    }

    #[test]
    fn unknown_top_level_operator_is_invalid() {
        let cond = parse_condition(&json!({"$where": "1 == 1"}));
        assert!(matches!(cond, Condition::Invalid(_)));
    }

    #[test]
    fn non_object_is_invalid() {
        assert!(matches!(
            parse_condition(&json!([1, 2])),
            Condition::Invalid(_)
        ));
    }

    #[test]
    fn mixed_keys_are_a_literal() {
        // not every key starts with `$`, so this is an object literal
        let test = parse_value_test(&json!({"$gt": 1, "plain": 2}));
        assert!(matches!(test, ValueTest::Literal(_)));
    }

    #[test]
    fn operators_parse() {
        let test = parse_value_test(&json!({"$gt": 5, "$lt": 10}));
        assert_eq!(
            test,
            ValueTest::Operators(vec![
                Operator::Compare(CompareOp::Gt, json!(5)),
                Operator::Compare(CompareOp::Lt, json!(10)),
            ])
        );
    }

    #[test]
    fn malformed_operands() {
        assert_eq!(
            parse_value_test(&json!({"$in": "US"})),
            ValueTest::Operators(vec![Operator::Malformed("$in".to_owned())])
        );
        assert_eq!(
            parse_value_test(&json!({"$vgt": [1]})),
            ValueTest::Operators(vec![Operator::Malformed("$vgt".to_owned())])
        );
        assert_eq!(
            parse_value_test(&json!({"$regex": 5})),
            ValueTest::Operators(vec![Operator::Malformed("$regex".to_owned())])
        );
    }

    #[test]
    fn unknown_operator_kept() {
        assert_eq!(
            parse_value_test(&json!({"$near": [0, 0]})),
            ValueTest::Operators(vec![Operator::Unknown("$near".to_owned())])
        );
    }

    #[test]
    fn elem_match_shapes() {
        let as_value = parse_value_test(&json!({"$elemMatch": {"$gt": 3}}));
        let as_doc = parse_value_test(&json!({"$elemMatch": {"name": "x"}}));
        match (as_value, as_doc) {
            (ValueTest::Operators(a), ValueTest::Operators(b)) => {
                assert!(matches!(&a[0], Operator::ElemMatch(m) if matches!(**m, ElemMatch::Value(_))));
                assert!(matches!(&b[0], Operator::ElemMatch(m) if matches!(**m, ElemMatch::Condition(_))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
