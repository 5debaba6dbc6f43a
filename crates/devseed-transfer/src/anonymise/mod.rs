//! Field-level anonymisation applied while records are serialized.
//!
//! Rules are keyed by field name, globally or per entity; an entity rule
//! takes precedence over a global one and fields without a rule are copied
//! unchanged. Randomness comes from a `ChaCha8Rng` seeded from the run seed,
//! the entity label and the strategy name, so a given source always yields
//! the same snapshot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use devseed_core::{EntityCatalog, EntityName, EntityType, MembershipIndex, Record};

use crate::errors::{Result, TransferError};

mod faker;
mod rules;

pub use faker::{FakerKind, LocaleKey};
pub use rules::{
    AnonymiserRule, Const, Faker, MAX_UNIQUE_ATTEMPTS, PreserveInternal, PreserveNulls,
    RandomForeignKey,
};

pub const DEFAULT_PRIVILEGED_FLAGS: &[&str] = &["is_superuser", "is_staff"];

type UniqueValues = HashMap<FakerKind, HashSet<String>>;

/// Everything a rule may look at while rewriting one field.
pub struct RuleContext<'a> {
    pub entity: &'a EntityType,
    /// Field values of the row before any rule ran.
    pub source: &'a Map<String, Value>,
    pub field: &'a str,
    pub rng: &'a mut ChaCha8Rng,
    pub locales: &'a [LocaleKey],
    pub privileged_flags: &'a [String],
    pub unique: &'a mut UniqueValues,
    pub index: &'a mut MembershipIndex,
    /// Root of the snapshot being written.
    pub destination: &'a Path,
}

impl RuleContext<'_> {
    pub fn pick_locale(&mut self) -> LocaleKey {
        match self.locales {
            [] => LocaleKey::EnUs,
            [only] => *only,
            many => many[self.rng.random_range(0..many.len())],
        }
    }

    /// True when any privileged flag is set on the source row.
    pub fn is_privileged(&self) -> bool {
        self.privileged_flags
            .iter()
            .any(|flag| matches!(self.source.get(flag), Some(Value::Bool(true))))
    }
}

/// Declarative form of a rule, as found in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum RuleConfig {
    Const {
        value: Value,
        #[serde(default)]
        preserve_nulls: bool,
    },
    Faker {
        generator: String,
        #[serde(default)]
        unique: bool,
        #[serde(default)]
        preserve_nulls: bool,
    },
    PreserveInternal {
        fallback: Box<RuleConfig>,
    },
    PreserveNulls {
        rule: Box<RuleConfig>,
    },
    RandomForeignKey,
}

impl RuleConfig {
    pub fn build(&self) -> Result<Box<dyn AnonymiserRule>> {
        Ok(match self {
            RuleConfig::Const {
                value,
                preserve_nulls,
            } => Box::new(Const {
                value: value.clone(),
                preserve_nulls: *preserve_nulls,
            }),
            RuleConfig::Faker {
                generator,
                unique,
                preserve_nulls,
            } => {
                let kind = FakerKind::parse(generator).ok_or_else(|| {
                    TransferError::configuration(format!("unknown faker generator '{generator}'"))
                })?;
                Box::new(Faker {
                    kind,
                    unique: *unique,
                    preserve_nulls: *preserve_nulls,
                })
            }
            RuleConfig::PreserveInternal { fallback } => Box::new(PreserveInternal {
                fallback: fallback.build()?,
            }),
            RuleConfig::PreserveNulls { rule } => Box::new(PreserveNulls {
                rule: rule.build()?,
            }),
            RuleConfig::RandomForeignKey => Box::new(RandomForeignKey),
        })
    }
}

/// Rule tables from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnonymiseConfig {
    /// Rules applied to a field of that name on any entity.
    #[serde(default)]
    pub fields: BTreeMap<String, RuleConfig>,
    /// Rules for one entity, overriding `fields`.
    #[serde(default)]
    pub entities: BTreeMap<EntityName, BTreeMap<String, RuleConfig>>,
}

/// Run-scoped anonymiser: rule tables plus the state unique rules share.
#[derive(Debug)]
pub struct Anonymiser {
    fields: BTreeMap<String, Box<dyn AnonymiserRule>>,
    entities: BTreeMap<EntityName, BTreeMap<String, Box<dyn AnonymiserRule>>>,
    seed: u64,
    locales: Vec<LocaleKey>,
    privileged_flags: Vec<String>,
    unique: UniqueValues,
}

impl Default for Anonymiser {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Anonymiser {
    pub fn new(seed: u64) -> Self {
        Self {
            fields: BTreeMap::new(),
            entities: BTreeMap::new(),
            seed,
            locales: vec![LocaleKey::EnUs],
            privileged_flags: DEFAULT_PRIVILEGED_FLAGS
                .iter()
                .map(|flag| flag.to_string())
                .collect(),
            unique: UniqueValues::new(),
        }
    }

    pub fn with_locales(mut self, locales: Vec<LocaleKey>) -> Self {
        self.locales = locales;
        self
    }

    pub fn with_privileged_flags(mut self, flags: Vec<String>) -> Self {
        self.privileged_flags = flags;
        self
    }

    pub fn with_field_rule(
        mut self,
        field: impl Into<String>,
        rule: impl AnonymiserRule + 'static,
    ) -> Self {
        self.fields.insert(field.into(), Box::new(rule));
        self
    }

    pub fn with_entity_rule(
        mut self,
        entity: EntityName,
        field: impl Into<String>,
        rule: impl AnonymiserRule + 'static,
    ) -> Self {
        self.entities
            .entry(entity)
            .or_default()
            .insert(field.into(), Box::new(rule));
        self
    }

    /// Build the rule tables described by `config`.
    pub fn from_config(
        seed: u64,
        locales: &[String],
        privileged_flags: &[String],
        config: &AnonymiseConfig,
    ) -> Result<Self> {
        let locales = parse_locales(locales)?;

        let mut fields = BTreeMap::new();
        for (field, rule) in &config.fields {
            fields.insert(field.clone(), rule.build()?);
        }

        let mut entities = BTreeMap::new();
        for (entity, rules) in &config.entities {
            let mut built = BTreeMap::new();
            for (field, rule) in rules {
                built.insert(field.clone(), rule.build()?);
            }
            entities.insert(entity.clone(), built);
        }

        Ok(Self {
            fields,
            entities,
            seed,
            locales,
            privileged_flags: privileged_flags.to_vec(),
            unique: UniqueValues::new(),
        })
    }

    /// Check entity rules that need a relation field against the catalog.
    pub fn validate(&self, catalog: &EntityCatalog) -> Result<()> {
        for (entity, rules) in &self.entities {
            let Some(entity_type) = catalog.get(entity) else {
                continue;
            };
            for (field, rule) in rules {
                if rule.requires_relation() && entity_type.relation(field).is_none() {
                    return Err(TransferError::configuration(format!(
                        "random_foreign_key rule on {entity}.{field} which is not a relation"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.entities.is_empty()
    }

    /// Rewrite the field maps of records produced by one strategy.
    pub fn anonymise_records(
        &mut self,
        entity: &EntityType,
        strategy: &str,
        records: &mut [Record],
        index: &mut MembershipIndex,
        destination: &Path,
    ) -> Result<()> {
        let entity_rules = self.entities.get(&entity.name);
        if self.fields.is_empty() && entity_rules.is_none() {
            return Ok(());
        }

        let mut rng = ChaCha8Rng::seed_from_u64(hash_seed(
            self.seed,
            &format!("{}/{strategy}", entity.name),
        ));

        for record in records.iter_mut() {
            let source = record.field_map.clone();
            for (field, value) in &source {
                let rule = entity_rules
                    .and_then(|rules| rules.get(field))
                    .or_else(|| self.fields.get(field));
                let Some(rule) = rule else {
                    continue;
                };

                let mut ctx = RuleContext {
                    entity,
                    source: &source,
                    field,
                    rng: &mut rng,
                    locales: &self.locales,
                    privileged_flags: &self.privileged_flags,
                    unique: &mut self.unique,
                    index: &mut *index,
                    destination,
                };
                let replaced = rule.apply(&mut ctx, value)?;
                record.field_map.insert(field.clone(), replaced);
            }
        }

        Ok(())
    }
}

pub fn parse_locales(locales: &[String]) -> Result<Vec<LocaleKey>> {
    if locales.is_empty() {
        return Err(TransferError::configuration("at least one faker locale is required"));
    }
    locales
        .iter()
        .map(|locale| {
            LocaleKey::parse(locale).ok_or_else(|| {
                TransferError::configuration(format!("unsupported faker locale '{locale}'"))
            })
        })
        .collect()
}

fn hash_seed(seed: u64, key: &str) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
