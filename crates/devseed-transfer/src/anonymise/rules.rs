use std::fmt;

use rand::Rng;
use serde_json::Value;

use super::RuleContext;
use super::faker::FakerKind;
use crate::errors::{Result, TransferError};

/// Attempts made to find an unused value before a unique rule gives up.
pub const MAX_UNIQUE_ATTEMPTS: usize = 1000;

/// A per-field transform applied while records are serialized.
pub trait AnonymiserRule: Send + Sync + fmt::Debug {
    fn apply(&self, ctx: &mut RuleContext<'_>, value: &Value) -> Result<Value>;

    /// Whether the rule only makes sense on relation fields.
    fn requires_relation(&self) -> bool {
        false
    }
}

/// Replace every value with a constant.
#[derive(Debug, Clone)]
pub struct Const {
    pub value: Value,
    pub preserve_nulls: bool,
}

impl AnonymiserRule for Const {
    fn apply(&self, _ctx: &mut RuleContext<'_>, value: &Value) -> Result<Value> {
        if self.preserve_nulls && value.is_null() {
            return Ok(Value::Null);
        }
        Ok(self.value.clone())
    }
}

/// Replace values with synthetic ones from a faker generator.
#[derive(Debug, Clone)]
pub struct Faker {
    pub kind: FakerKind,
    pub unique: bool,
    pub preserve_nulls: bool,
}

impl AnonymiserRule for Faker {
    fn apply(&self, ctx: &mut RuleContext<'_>, value: &Value) -> Result<Value> {
        if self.preserve_nulls && value.is_null() {
            return Ok(Value::Null);
        }

        if !self.unique {
            let locale = ctx.pick_locale();
            return Ok(Value::String(self.kind.generate(locale, ctx.rng)));
        }

        for _ in 0..MAX_UNIQUE_ATTEMPTS {
            let locale = ctx.pick_locale();
            let candidate = self.kind.generate(locale, ctx.rng);
            if ctx.unique.entry(self.kind).or_default().insert(candidate.clone()) {
                return Ok(Value::String(candidate));
            }
        }

        Err(TransferError::Anonymise(format!(
            "no unique '{}' value left for {}.{} after {MAX_UNIQUE_ATTEMPTS} attempts",
            self.kind, ctx.entity.name, ctx.field
        )))
    }
}

/// Keep the original value on privileged rows, defer to `fallback` otherwise.
#[derive(Debug)]
pub struct PreserveInternal {
    pub fallback: Box<dyn AnonymiserRule>,
}

impl AnonymiserRule for PreserveInternal {
    fn apply(&self, ctx: &mut RuleContext<'_>, value: &Value) -> Result<Value> {
        if ctx.is_privileged() {
            return Ok(value.clone());
        }
        self.fallback.apply(ctx, value)
    }

    fn requires_relation(&self) -> bool {
        self.fallback.requires_relation()
    }
}

/// Pass nulls through untouched, defer to `rule` otherwise.
#[derive(Debug)]
pub struct PreserveNulls {
    pub rule: Box<dyn AnonymiserRule>,
}

impl AnonymiserRule for PreserveNulls {
    fn apply(&self, ctx: &mut RuleContext<'_>, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.rule.apply(ctx, value)
    }

    fn requires_relation(&self) -> bool {
        self.rule.requires_relation()
    }
}

/// Point the relation at a random key already exported for its target.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomForeignKey;

impl AnonymiserRule for RandomForeignKey {
    fn apply(&self, ctx: &mut RuleContext<'_>, _value: &Value) -> Result<Value> {
        let relation = ctx.entity.relation(ctx.field).ok_or_else(|| {
            TransferError::configuration(format!(
                "random_foreign_key rule on {}.{} which is not a relation",
                ctx.entity.name, ctx.field
            ))
        })?;

        let exported = ctx.index.exported(ctx.destination, &relation.target)?;
        let candidates = exported.values();
        if candidates.is_empty() {
            if relation.nullable {
                return Ok(Value::Null);
            }
            return Err(TransferError::Anonymise(format!(
                "no exported {} rows to assign to {}.{}",
                relation.target, ctx.entity.name, ctx.field
            )));
        }

        let idx = ctx.rng.random_range(0..candidates.len());
        Ok(candidates[idx].clone())
    }

    fn requires_relation(&self) -> bool {
        true
    }
}
