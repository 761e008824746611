//! Dependency ordering of interfaces.
//!
//! Parents must be reconciled before their children, and deleted after
//! them. The order is also the order in which records are written, so it
//! has to be deterministic for concurrent callers to acquire them in the
//! same sequence.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use thiserror::Error;

/// The graph contains a cycle; `members` are the keys that could not be
/// ordered, sorted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle among {}", join(.members))]
pub struct CycleError<K: Display> {
    pub members: Vec<K>,
}

fn join<K: Display>(members: &[K]) -> String {
    members
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Orders keys into layers: every key's parents are in earlier layers.
///
/// `dependencies` maps each key to its parents. Parents that are not keys
/// of the map are ignored. Each layer holds every key whose remaining
/// parents are all placed, sorted ascending.
pub fn resolve_layers<K>(dependencies: &BTreeMap<K, Vec<K>>) -> Result<Vec<Vec<K>>, CycleError<K>>
where
    K: Ord + Clone + Display,
{
    let mut pending: BTreeMap<&K, BTreeSet<&K>> = dependencies
        .iter()
        .map(|(key, parents)| {
            let parents = parents
                .iter()
                .filter(|p| dependencies.contains_key(*p))
                .collect();
            (key, parents)
        })
        .collect();

    let mut layers = Vec::new();
    while !pending.is_empty() {
        let ready: Vec<&K> = pending
            .iter()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(key, _)| *key)
            .collect();
        if ready.is_empty() {
            return Err(CycleError {
                members: pending.keys().map(|k| (*k).clone()).collect(),
            });
        }
        for key in &ready {
            pending.remove(*key);
        }
        for parents in pending.values_mut() {
            for key in &ready {
                parents.remove(*key);
            }
        }
        layers.push(ready.into_iter().cloned().collect());
    }
    Ok(layers)
}

/// Flattened [`resolve_layers`].
pub fn resolve_order<K>(dependencies: &BTreeMap<K, Vec<K>>) -> Result<Vec<K>, CycleError<K>>
where
    K: Ord + Clone + Display,
{
    Ok(resolve_layers(dependencies)?.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(name, parents)| {
                (
                    name.to_string(),
                    parents.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_layers_are_sorted() {
        let deps = graph(&[
            ("eth1", &[]),
            ("eth0", &[]),
            ("bond0", &["eth0", "eth1"]),
            ("bond0.10", &["bond0"]),
            ("br0", &["bond0.10"]),
        ]);
        let layers = resolve_layers(&deps).unwrap();
        assert_eq!(
            layers,
            vec![
                vec!["eth0".to_string(), "eth1".to_string()],
                vec!["bond0".to_string()],
                vec!["bond0.10".to_string()],
                vec!["br0".to_string()],
            ]
        );
    }

    #[test]
    fn test_layer_order_beats_name_order() {
        let deps = graph(&[("a.10", &["z"]), ("z", &[]), ("b", &[])]);
        assert_eq!(resolve_order(&deps).unwrap(), vec!["b", "z", "a.10"]);
    }

    #[test]
    fn test_unknown_parents_are_ignored() {
        let deps = graph(&[("br0", &["tap0", "eth0"]), ("eth0", &[])]);
        assert_eq!(resolve_order(&deps).unwrap(), vec!["eth0", "br0"]);
    }

    #[test]
    fn test_cycle_names_unresolved_members() {
        let deps = graph(&[("eth0", &[]), ("br0", &["br1"]), ("br1", &["br0"]), ("br2", &["br1"])]);
        let err = resolve_order(&deps).unwrap_err();
        assert_eq!(err.members, vec!["br0", "br1", "br2"]);
        assert_eq!(err.to_string(), "dependency cycle among br0, br1, br2");
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let deps = graph(&[("br0", &["br0"])]);
        assert!(resolve_order(&deps).is_err());
    }

    #[test]
    fn test_generic_over_numeric_keys() {
        let mut deps: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        deps.insert(7, vec![3]);
        deps.insert(3, vec![]);
        deps.insert(5, vec![3, 42]);
        assert_eq!(resolve_order(&deps).unwrap(), vec![3, 5, 7]);
    }
}
