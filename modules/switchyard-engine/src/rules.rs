//! Built-in validation rules.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde_json::{json, Value};
use switchyard_store::is_truthy;

use crate::validation::{Rule, RuleContext};

/// Evaluator used for rule names nothing else claims.
pub const DEFAULT_RULE: &str = "default";

pub(crate) fn builtin() -> Vec<(&'static str, Arc<dyn Rule>)> {
    vec![
        ("required", rule(required)),
        ("type", rule(type_of)),
        ("minLength", rule(min_length)),
        ("maxLength", rule(max_length)),
        ("min", rule(min)),
        ("max", rule(max)),
        ("pattern", rule(pattern)),
        ("oneOf", rule(one_of)),
        (DEFAULT_RULE, rule(equals)),
    ]
}

fn rule<F>(f: F) -> Arc<dyn Rule>
where
    F: Fn(&RuleContext<'_>) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn outcome(valid: bool, expected: &Value, actual: Value) -> Value {
    json!({"valid": valid, "expected": expected, "actual": actual})
}

fn actual(ctx: &RuleContext<'_>) -> Value {
    ctx.value.cloned().unwrap_or(Value::Null)
}

fn required(ctx: &RuleContext<'_>) -> Result<Value> {
    let present = match ctx.value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    };
    let valid = present || !is_truthy(Some(ctx.param));
    Ok(json!({"valid": valid}))
}

fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

fn type_of(ctx: &RuleContext<'_>) -> Result<Value> {
    let expected = ctx
        .param
        .as_str()
        .ok_or_else(|| anyhow!("`type` expects a type name, got {}", ctx.param))?;
    let actual = type_name(ctx.value);
    let valid = actual == expected
        || (expected == "integer" && ctx.value.is_some_and(|v| v.is_i64() || v.is_u64()));
    Ok(outcome(valid, ctx.param, json!(actual)))
}

fn length(value: Option<&Value>) -> Option<usize> {
    match value? {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn limit(ctx: &RuleContext<'_>, rule: &str) -> Result<u64> {
    ctx.param
        .as_u64()
        .ok_or_else(|| anyhow!("`{rule}` expects a non-negative integer, got {}", ctx.param))
}

fn min_length(ctx: &RuleContext<'_>) -> Result<Value> {
    let limit = limit(ctx, "minLength")?;
    let len = length(ctx.value);
    let valid = len.is_some_and(|n| n as u64 >= limit);
    Ok(outcome(valid, ctx.param, json!(len)))
}

fn max_length(ctx: &RuleContext<'_>) -> Result<Value> {
    let limit = limit(ctx, "maxLength")?;
    let len = length(ctx.value);
    let valid = len.is_some_and(|n| n as u64 <= limit);
    Ok(outcome(valid, ctx.param, json!(len)))
}

fn bound(ctx: &RuleContext<'_>, rule: &str) -> Result<f64> {
    ctx.param
        .as_f64()
        .ok_or_else(|| anyhow!("`{rule}` expects a number, got {}", ctx.param))
}

fn min(ctx: &RuleContext<'_>) -> Result<Value> {
    let bound = bound(ctx, "min")?;
    let valid = ctx.value.and_then(Value::as_f64).is_some_and(|v| v >= bound);
    Ok(outcome(valid, ctx.param, actual(ctx)))
}

fn max(ctx: &RuleContext<'_>) -> Result<Value> {
    let bound = bound(ctx, "max")?;
    let valid = ctx.value.and_then(Value::as_f64).is_some_and(|v| v <= bound);
    Ok(outcome(valid, ctx.param, actual(ctx)))
}

fn pattern(ctx: &RuleContext<'_>) -> Result<Value> {
    let source = ctx
        .param
        .as_str()
        .ok_or_else(|| anyhow!("`pattern` expects a regex string, got {}", ctx.param))?;
    let re = Regex::new(source).with_context(|| format!("invalid pattern: {source}"))?;
    let valid = ctx.value.and_then(Value::as_str).is_some_and(|s| re.is_match(s));
    Ok(outcome(valid, ctx.param, actual(ctx)))
}

fn one_of(ctx: &RuleContext<'_>) -> Result<Value> {
    let options = ctx
        .param
        .as_array()
        .ok_or_else(|| anyhow!("`oneOf` expects an array, got {}", ctx.param))?;
    let valid = ctx.value.is_some_and(|v| options.contains(v));
    Ok(outcome(valid, ctx.param, actual(ctx)))
}

fn equals(ctx: &RuleContext<'_>) -> Result<Value> {
    let valid = ctx.value == Some(ctx.param);
    Ok(outcome(valid, ctx.param, actual(ctx)))
}
