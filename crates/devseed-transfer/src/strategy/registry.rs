use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use devseed_core::EntityName;

use super::{All, DeleteFirst, Exact, Failing, Latest, Random, Reverse, Strategy, StrategyBase};
use crate::errors::{Result, TransferError};

fn default_true() -> bool {
    true
}

/// One configured strategy of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: StrategyKind,
    #[serde(default = "default_true")]
    pub anonymise: bool,
    /// Empty the target table before importing.
    #[serde(default)]
    pub delete_first: bool,
    #[serde(default)]
    pub depends_on: Vec<EntityName>,
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>, kind: StrategyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            anonymise: true,
            delete_first: false,
            depends_on: Vec::new(),
        }
    }

    /// The name becomes a file name inside the entity directory.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(TransferError::configuration(format!(
                "invalid strategy name '{name}'"
            )));
        }
        Ok(())
    }

    fn base(&self) -> StrategyBase {
        StrategyBase {
            name: self.name.clone(),
            anonymise: self.anonymise,
            depends_on: self.depends_on.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    All,
    Exact {
        primary_keys: Vec<Value>,
    },
    Random {
        count: usize,
    },
    Latest {
        count: usize,
        #[serde(default)]
        order_by: Option<String>,
    },
    Reverse {
        parent: EntityName,
        #[serde(default)]
        parent_field: Option<String>,
        field: String,
    },
    Failing,
    /// A strategy registered by the embedding program under `id`.
    Custom {
        id: String,
        #[serde(default)]
        params: Value,
    },
}

/// Builds a custom strategy from its configuration and `params`.
pub type StrategyFactory =
    Box<dyn Fn(&StrategyConfig, &Value) -> Result<Box<dyn Strategy>> + Send + Sync>;

/// Turns strategy configuration into strategies.
#[derive(Default)]
pub struct StrategyRegistry {
    custom: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, factory: StrategyFactory) {
        self.custom.insert(id.into(), factory);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.custom.contains_key(id)
    }

    pub fn build(&self, config: &StrategyConfig) -> Result<Box<dyn Strategy>> {
        config.validate()?;
        let base = config.base();
        let strategy: Box<dyn Strategy> = match &config.kind {
            StrategyKind::All => Box::new(All { base }),
            StrategyKind::Exact { primary_keys } => {
                Box::new(Exact::new(base, primary_keys.iter().cloned()))
            }
            StrategyKind::Random { count } => Box::new(Random {
                base,
                count: *count,
            }),
            StrategyKind::Latest { count, order_by } => Box::new(Latest {
                base,
                count: *count,
                order_by: order_by.clone(),
            }),
            StrategyKind::Reverse {
                parent,
                parent_field,
                field,
            } => Box::new(Reverse {
                base,
                parent: parent.clone(),
                parent_field: parent_field.clone(),
                field: field.clone(),
            }),
            StrategyKind::Failing => Box::new(Failing {
                name: config.name.clone(),
            }),
            StrategyKind::Custom { id, params } => {
                let factory = self.custom.get(id).ok_or_else(|| {
                    TransferError::configuration(format!("unknown custom strategy '{id}'"))
                })?;
                factory(config, params)?
            }
        };

        if config.delete_first {
            Ok(Box::new(DeleteFirst::new(strategy)))
        } else {
            Ok(strategy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Entities {
        strategies: Vec<StrategyConfig>,
    }

    #[test]
    fn parses_tagged_strategy_tables() {
        let parsed: Entities = toml::from_str(
            r#"
            [[strategies]]
            name = "internal"
            kind = "exact"
            primary_keys = [1, 2]
            anonymise = false

            [[strategies]]
            name = "latest"
            kind = "latest"
            count = 10
            delete_first = true
            depends_on = ["auth.groups"]
            "#,
        )
        .expect("parse");

        assert_eq!(
            parsed.strategies[0].kind,
            StrategyKind::Exact {
                primary_keys: vec![Value::from(1), Value::from(2)]
            }
        );
        assert!(!parsed.strategies[0].anonymise);
        assert_eq!(
            parsed.strategies[1].kind,
            StrategyKind::Latest {
                count: 10,
                order_by: None
            }
        );
        assert!(parsed.strategies[1].delete_first);
        assert_eq!(
            parsed.strategies[1].depends_on,
            vec![EntityName::new("auth", "groups")]
        );
    }

    #[test]
    fn builds_delete_first_and_custom_strategies() {
        let mut registry = StrategyRegistry::new();
        registry.register(
            "everything",
            Box::new(|config: &StrategyConfig, _params: &Value| {
                Ok(Box::new(All {
                    base: StrategyBase::named(config.name.clone()),
                }) as Box<dyn Strategy>)
            }),
        );

        let mut config = StrategyConfig::new(
            "custom",
            StrategyKind::Custom {
                id: "everything".to_string(),
                params: Value::Null,
            },
        );
        config.delete_first = true;
        let built = registry.build(&config).expect("custom builds");
        assert_eq!(built.name(), "custom");
        assert!(built.replaces_existing());

        let unknown = StrategyConfig::new(
            "x",
            StrategyKind::Custom {
                id: "missing".to_string(),
                params: Value::Null,
            },
        );
        assert!(registry.build(&unknown).is_err());
    }

    #[test]
    fn rejects_names_that_escape_the_entity_directory() {
        for name in ["", ".hidden", "../users", "a/b"] {
            let config = StrategyConfig::new(name, StrategyKind::All);
            assert!(config.validate().is_err(), "{name:?} should be rejected");
        }
    }
}
