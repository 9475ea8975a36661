//! Declarative per-field validation.
//!
//! A `ValidatorSpec` maps dotted input paths to rule tables (rule name →
//! parameter). `validate` evaluates every rule and returns a JSON tree nested
//! by the same paths, each leaf holding rule name → that rule's outcome.
//! Failing rules are data, not errors; only a rule that cannot evaluate at all
//! returns `Err`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use switchyard_store::{get_path, is_truthy, set_path, split_path, StoreView};

use crate::action::Input;
use crate::error::ActionError;
use crate::rules::{self, DEFAULT_RULE};

/// Rule name → rule parameter for one field.
pub type FieldRules = BTreeMap<String, Value>;

/// Dotted path → rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorSpec {
    fields: BTreeMap<String, FieldRules>,
}

impl ValidatorSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the rules for one dotted path.
    pub fn field<I, K>(mut self, path: impl Into<String>, rules: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let rules = rules.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.fields.insert(path.into(), rules);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldRules)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Everything a rule may consult. `value` is `None` when the field is absent.
pub struct RuleContext<'a> {
    pub param: &'a Value,
    pub value: Option<&'a Value>,
    pub path: &'a [&'a str],
    pub input: &'a Input,
    pub store: &'a dyn StoreView,
}

/// A rule evaluator. Returns its own outcome shape; the built-ins return
/// `{"valid": bool, ...detail}`.
pub trait Rule: Send + Sync {
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<Value>;
}

impl<F> Rule for F
where
    F: Fn(&RuleContext<'_>) -> Result<Value> + Send + Sync,
{
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<Value> {
        self(ctx)
    }
}

/// Rule name → evaluator. Names with no evaluator fall back to `default`.
#[derive(Clone)]
pub struct RuleSet {
    rules: HashMap<String, Arc<dyn Rule>>,
}

impl RuleSet {
    /// The built-in rules: `required`, `type`, `minLength`, `maxLength`,
    /// `min`, `max`, `pattern`, `oneOf`, and `default` (equality).
    pub fn builtin() -> Self {
        Self {
            rules: rules::builtin()
                .into_iter()
                .map(|(name, rule)| (name.to_string(), rule))
                .collect(),
        }
    }

    /// Register a custom rule closure, replacing any rule of the same name.
    pub fn with<F>(self, name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&RuleContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.with_rule(name, Arc::new(rule))
    }

    pub fn with_rule(mut self, name: impl Into<String>, rule: Arc<dyn Rule>) -> Self {
        self.rules.insert(name.into(), rule);
        self
    }

    /// Evaluator for `name`, or the `default` evaluator.
    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn Rule>> {
        self.rules.get(name).or_else(|| self.rules.get(DEFAULT_RULE))
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate `spec` against `input`. Reads the store only through rules that
/// ask for it; never writes `input` or the store.
///
/// Fields absent from `input` are skipped unless their rules include a truthy
/// `required`.
pub fn validate(
    spec: &ValidatorSpec,
    input: &Input,
    rules: &RuleSet,
    store: &dyn StoreView,
) -> Result<Value, ActionError> {
    let mut validation = Value::Object(Map::new());

    for (field, field_rules) in spec.fields() {
        let path = split_path(field);
        let value = lookup(input, &path);
        let required = field_rules.get("required").is_some_and(|p| is_truthy(Some(p)));
        if value.is_none() && !required {
            continue;
        }

        let mut outcomes = Map::new();
        for (rule_name, param) in field_rules {
            let rule = rules.resolve(rule_name).ok_or_else(|| ActionError::Rule {
                rule: rule_name.clone(),
                field: field.to_string(),
                error: anyhow::anyhow!("no evaluator and no `{DEFAULT_RULE}` rule registered"),
            })?;
            let ctx = RuleContext {
                param,
                value,
                path: &path,
                input,
                store,
            };
            let outcome = rule.evaluate(&ctx).map_err(|error| ActionError::Rule {
                rule: rule_name.clone(),
                field: field.to_string(),
                error,
            })?;
            outcomes.insert(rule_name.clone(), outcome);
        }

        set_path(&mut validation, &path, Value::Object(outcomes));
    }

    Ok(validation)
}

/// False if any outcome anywhere in a validation tree reports
/// `"valid": false`.
pub fn all_valid(validation: &Value) -> bool {
    match validation {
        Value::Object(map) => {
            map.get("valid") != Some(&Value::Bool(false)) && map.values().all(all_valid)
        }
        _ => true,
    }
}

fn lookup<'a>(input: &'a Input, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    get_path(input.get(*first)?, rest)
}
