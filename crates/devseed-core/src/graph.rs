use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{EntityCatalog, EntityName, EntityType};
use crate::error::{Error, Result};

/// Dependencies implied by the schema: non-self relation targets plus the
/// targets of auto-created many-to-many joins.
pub fn entity_dependencies(entity: &EntityType) -> BTreeSet<EntityName> {
    let mut deps: BTreeSet<EntityName> = entity
        .parent_relations()
        .map(|relation| relation.target.clone())
        .collect();

    for join in &entity.many_to_many {
        if join.auto_created && join.target != entity.name {
            deps.insert(join.target.clone());
        }
    }

    deps
}

/// Order `(entity, strategy)` pairs so every entity follows its dependencies.
///
/// Entities missing from the catalog are dropped. A dependency on an entity
/// that is not part of `plan` is treated as satisfied. Strategies of one
/// entity keep their declared order.
pub fn resolve_order<S, F>(
    catalog: &EntityCatalog,
    plan: Vec<(EntityName, Vec<S>)>,
    extra_dependencies: F,
) -> Result<Vec<(EntityName, S)>>
where
    F: Fn(&S) -> Vec<EntityName>,
{
    let mut pending: Vec<(EntityName, BTreeSet<EntityName>)> = Vec::new();
    let mut strategies: BTreeMap<EntityName, Vec<S>> = BTreeMap::new();

    for (name, entity_strategies) in plan {
        let Some(entity) = catalog.get(&name) else {
            continue;
        };

        let mut deps = entity_dependencies(entity);
        for strategy in &entity_strategies {
            deps.extend(extra_dependencies(strategy));
        }
        deps.remove(&name);

        pending.push((name.clone(), deps));
        strategies.insert(name, entity_strategies);
    }

    let tracked: BTreeSet<EntityName> = strategies.keys().cloned().collect();
    let mut resolved: BTreeSet<EntityName> = BTreeSet::new();
    let mut order: Vec<EntityName> = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let mut skipped = Vec::new();
        let mut progressed = false;

        for (name, deps) in pending {
            if deps
                .iter()
                .all(|dep| !tracked.contains(dep) || resolved.contains(dep))
            {
                resolved.insert(name.clone());
                order.push(name);
                progressed = true;
            } else {
                skipped.push((name, deps));
            }
        }

        if !progressed {
            return Err(Error::DependencyCycle(cycle_members(&skipped)));
        }

        pending = skipped;
    }

    let mut steps = Vec::new();
    for name in order {
        if let Some(entity_strategies) = strategies.remove(&name) {
            for strategy in entity_strategies {
                steps.push((name.clone(), strategy));
            }
        }
    }

    Ok(steps)
}

/// Narrow an unresolvable set down to the entities that sit on a cycle.
///
/// Entities that nothing else in the set depends on are only downstream of a
/// cycle, so they are peeled off until the set is stable.
fn cycle_members(unresolved: &[(EntityName, BTreeSet<EntityName>)]) -> Vec<String> {
    let mut remaining: BTreeMap<&EntityName, &BTreeSet<EntityName>> = unresolved
        .iter()
        .map(|(name, deps)| (name, deps))
        .collect();

    loop {
        let leaves: Vec<&EntityName> = remaining
            .keys()
            .filter(|name| !remaining.values().any(|deps| deps.contains(**name)))
            .copied()
            .collect();

        if leaves.is_empty() || leaves.len() == remaining.len() {
            break;
        }

        for leaf in leaves {
            remaining.remove(leaf);
        }
    }

    let mut labels: Vec<String> = remaining.keys().map(|name| name.label()).collect();
    labels.sort();
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(label: &str) -> EntityName {
        label.parse().expect("valid label")
    }

    fn plan(labels: &[&str]) -> Vec<(EntityName, Vec<&'static str>)> {
        labels
            .iter()
            .map(|label| (name(label), vec!["default"]))
            .collect()
    }

    fn position(order: &[(EntityName, &str)], label: &str) -> usize {
        order
            .iter()
            .position(|(entity, _)| entity.label() == label)
            .unwrap_or_else(|| panic!("{label} missing from order"))
    }

    #[test]
    fn orders_parents_before_children() {
        let catalog = EntityCatalog::new([
            EntityType::new(name("shop.orders"), "id")
                .with_relation("user_id", name("auth.users"), false)
                .with_relation("charge_id", name("shop.charges"), true),
            EntityType::new(name("shop.charges"), "id"),
            EntityType::new(name("auth.users"), "id"),
        ]);

        let order = resolve_order(
            &catalog,
            plan(&["shop.orders", "shop.charges", "auth.users"]),
            |_| Vec::new(),
        )
        .expect("acyclic graph resolves");

        assert!(position(&order, "auth.users") < position(&order, "shop.orders"));
        assert!(position(&order, "shop.charges") < position(&order, "shop.orders"));
    }

    #[test]
    fn self_references_do_not_block_resolution() {
        let catalog = EntityCatalog::new([EntityType::new(name("turtles.turtle"), "id")
            .with_relation("standing_on_id", name("turtles.turtle"), true)]);

        let order = resolve_order(&catalog, plan(&["turtles.turtle"]), |_| Vec::new())
            .expect("self reference tolerated");
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn untracked_dependencies_count_as_satisfied() {
        let catalog = EntityCatalog::new([
            EntityType::new(name("photos.photo"), "id")
                .with_relation("user_id", name("auth.users"), false),
            EntityType::new(name("auth.users"), "id"),
        ]);

        let order = resolve_order(&catalog, plan(&["photos.photo"]), |_| Vec::new())
            .expect("untracked parent is external");
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn strategy_and_join_dependencies_are_honoured() {
        let catalog = EntityCatalog::new([
            EntityType::new(name("shop.charges"), "id"),
            EntityType::new(name("auth.users"), "id")
                .with_many_to_many("groups", name("auth.groups"), true),
            EntityType::new(name("auth.groups"), "id"),
        ]);

        let entity_plan = vec![
            (name("shop.charges"), vec!["by_user"]),
            (name("auth.users"), vec!["default"]),
            (name("auth.groups"), vec!["default"]),
        ];
        let order = resolve_order(&catalog, entity_plan, |strategy| {
            if *strategy == "by_user" {
                vec![name("auth.users")]
            } else {
                Vec::new()
            }
        })
        .expect("resolves");

        assert!(position(&order, "auth.groups") < position(&order, "auth.users"));
        assert!(position(&order, "auth.users") < position(&order, "shop.charges"));
    }

    #[test]
    fn keeps_strategy_declaration_order() {
        let catalog = EntityCatalog::new([EntityType::new(name("auth.users"), "id")]);
        let entity_plan = vec![(name("auth.users"), vec!["internal", "sample", "latest"])];

        let order = resolve_order(&catalog, entity_plan, |_| Vec::new()).expect("resolves");
        let names: Vec<&str> = order.iter().map(|(_, strategy)| *strategy).collect();
        assert_eq!(names, vec!["internal", "sample", "latest"]);
    }

    #[test]
    fn reports_only_cycle_members() {
        let catalog = EntityCatalog::new([
            EntityType::new(name("app.a"), "id").with_relation("b_id", name("app.b"), true),
            EntityType::new(name("app.b"), "id").with_relation("a_id", name("app.a"), true),
            EntityType::new(name("app.c"), "id").with_relation("a_id", name("app.a"), true),
            EntityType::new(name("app.d"), "id"),
        ]);

        let err = resolve_order(
            &catalog,
            plan(&["app.c", "app.b", "app.a", "app.d"]),
            |_| Vec::new(),
        )
        .expect_err("cycle must fail");

        match err {
            Error::DependencyCycle(members) => {
                assert_eq!(members, vec!["app.a".to_string(), "app.b".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
