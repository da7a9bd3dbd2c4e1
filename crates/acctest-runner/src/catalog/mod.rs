//! Every lifecycle scenario the harness knows, by resource type.

pub mod key_vault_secret;
pub mod storage_share;

use crate::scenario::Scenario;

pub fn catalog() -> Vec<Scenario> {
    key_vault_secret::scenarios()
        .into_iter()
        .chain(storage_share::scenarios())
        .collect()
}

/// Look a scenario up by `family/name` or bare name.
///
/// A bare name matches every family that declares it.
pub fn find(name: &str) -> Vec<Scenario> {
    catalog()
        .into_iter()
        .filter(|s| s.name == name || qualified(s) == name)
        .collect()
}

pub fn qualified(scenario: &Scenario) -> String {
    let family = scenario
        .resource_type
        .strip_prefix("azurerm_")
        .unwrap_or(scenario.resource_type);
    format!("{}/{}", family, scenario.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn qualified_names_are_unique() {
        let all = catalog();
        let names: HashSet<String> = all.iter().map(qualified).collect();
        assert_eq!(names.len(), all.len());
        assert!(names.contains("key_vault_secret/disappears_when_parent_deleted"));
        assert!(names.contains("storage_share/update_quota"));
    }

    #[test]
    fn bare_names_match_both_families() {
        assert_eq!(find("basic").len(), 2);
        assert_eq!(find("storage_share/basic").len(), 1);
        assert!(find("nope").is_empty());
    }

    #[test]
    fn only_requires_import_scenarios_are_flagged() {
        for s in catalog() {
            assert_eq!(s.requires_import_feature, s.name == "requires_import", "{}", qualified(&s));
        }
    }
}
