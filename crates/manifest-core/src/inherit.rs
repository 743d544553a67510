//! Entity inheritance (`$prototype`) expansion
//!
//! Entities in a section may name a sibling in the same section as their
//! prototype. Expansion fills every top-level field the entity does not
//! define itself from the (recursively expanded) prototype. Own fields keep
//! their position and come first.
//!
//! Sections are the `entities` mapping itself plus every root key that
//! shares a name with an entity, e.g. `entities.components` makes the root
//! `components` mapping a section.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

/// Outcome of one expansion run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// Entities that received inherited fields
    pub expanded: usize,
    /// `(section, entity, prototype)` triples whose prototype does not exist
    pub missing: Vec<(String, String, String)>,
    /// `(section, entity)` pairs that sit on a prototype cycle
    pub cycles: Vec<(String, String)>,
    /// Fields copied from a prototype, with the entity that defines them
    pub inherited: Vec<InheritedField>,
}

/// One field an entity received through its prototype chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedField {
    pub section: String,
    pub entity: String,
    pub field: String,
    /// Entity in the same section that defines the field itself
    pub origin: String,
}

/// Expanded fields of one entity plus the owner of each inherited field
#[derive(Debug, Clone, Default)]
struct Resolved {
    fields: Map<String, Value>,
    origins: HashMap<String, String>,
}

/// Expands `$prototype` links in a materialized document
#[derive(Debug, Clone)]
pub struct InheritanceExpander {
    entities_key: String,
    prototype_key: String,
}

impl InheritanceExpander {
    pub fn new(entities_key: impl Into<String>, prototype_key: impl Into<String>) -> Self {
        Self {
            entities_key: entities_key.into(),
            prototype_key: prototype_key.into(),
        }
    }

    /// Expand every section of `document` in place
    pub fn expand(&self, document: &mut Value) -> Expansion {
        let mut report = Expansion::default();
        let mut sections: Vec<String> = document
            .get(&self.entities_key)
            .and_then(Value::as_object)
            .map(|entities| entities.keys().cloned().collect())
            .unwrap_or_default();
        if !sections.contains(&self.entities_key) {
            sections.push(self.entities_key.clone());
        }

        for name in sections {
            if let Some(Value::Object(section)) = document.get_mut(&name) {
                self.expand_section(&name, section, &mut report);
            }
        }
        if !report.missing.is_empty() || !report.cycles.is_empty() {
            tracing::debug!(
                missing = report.missing.len(),
                cycles = report.cycles.len(),
                "Some prototypes could not be resolved"
            );
        }
        report
    }

    fn expand_section(&self, name: &str, section: &mut Map<String, Value>, report: &mut Expansion) {
        let mut resolved: HashMap<String, Resolved> = HashMap::new();
        let inheriting: Vec<String> = section
            .iter()
            .filter(|(_, entity)| self.prototype_of(entity).is_some())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &inheriting {
            let mut visiting = HashSet::new();
            self.resolve(name, key, section, &mut resolved, &mut visiting, report);
        }

        for key in inheriting {
            let Some(expanded) = resolved.remove(&key) else {
                continue;
            };
            let Some(entity) = section.get_mut(&key) else {
                continue;
            };
            if !expanded.origins.is_empty() {
                report.expanded += 1;
            }
            for field in expanded.fields.keys() {
                if let Some(origin) = expanded.origins.get(field) {
                    report.inherited.push(InheritedField {
                        section: name.to_string(),
                        entity: key.clone(),
                        field: field.clone(),
                        origin: origin.clone(),
                    });
                }
            }
            *entity = Value::Object(expanded.fields);
        }
    }

    fn prototype_of<'v>(&self, entity: &'v Value) -> Option<&'v str> {
        entity.get(&self.prototype_key).and_then(Value::as_str)
    }

    /// Expanded fields of `key`, memoized in `resolved`
    fn resolve(
        &self,
        section_name: &str,
        key: &str,
        section: &Map<String, Value>,
        resolved: &mut HashMap<String, Resolved>,
        visiting: &mut HashSet<String>,
        report: &mut Expansion,
    ) -> Option<Resolved> {
        if let Some(done) = resolved.get(key) {
            return Some(done.clone());
        }
        let entity = section.get(key)?.as_object()?;
        let own = Resolved {
            fields: entity.clone(),
            origins: HashMap::new(),
        };
        let Some(prototype) = entity
            .get(&self.prototype_key)
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Some(own);
        };

        if !visiting.insert(key.to_string()) {
            report.cycles.push((section_name.to_string(), key.to_string()));
            return Some(own);
        }

        let mut expanded = own;
        if section.contains_key(&prototype) {
            let inherited = self.resolve(section_name, &prototype, section, resolved, visiting, report);
            if let Some(inherited) = inherited {
                for (field, value) in inherited.fields {
                    if expanded.fields.contains_key(&field) {
                        continue;
                    }
                    let origin = inherited
                        .origins
                        .get(&field)
                        .cloned()
                        .unwrap_or_else(|| prototype.clone());
                    expanded.origins.insert(field.clone(), origin);
                    expanded.fields.insert(field, value);
                }
            }
        } else {
            report
                .missing
                .push((section_name.to_string(), key.to_string(), prototype));
        }

        visiting.remove(key);
        resolved.insert(key.to_string(), expanded.clone());
        Some(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn expander() -> InheritanceExpander {
        InheritanceExpander::new("entities", "$prototype")
    }

    #[test]
    fn fills_missing_fields_from_prototype() {
        let mut doc = json!({
            "entities": {"components": {"schema": {}}},
            "components": {
                "base": {"title": "Base", "kind": "service"},
                "web": {"$prototype": "base", "title": "Web"}
            }
        });
        let report = expander().expand(&mut doc);

        assert_eq!(report.expanded, 1);
        assert_eq!(
            doc["components"]["web"],
            json!({"$prototype": "base", "title": "Web", "kind": "service"})
        );
        let keys: Vec<&String> = doc["components"]["web"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["$prototype", "title", "kind"]);
    }

    #[test]
    fn chains_resolve_recursively() {
        let mut doc = json!({
            "entities": {
                "a": {"x": 1, "y": 1, "z": 1},
                "b": {"$prototype": "a", "y": 2},
                "c": {"$prototype": "b", "z": 3}
            }
        });
        let report = expander().expand(&mut doc);
        assert_eq!(doc["entities"]["c"], json!({"$prototype": "b", "z": 3, "y": 2, "x": 1}));

        let origins: Vec<(&str, &str, &str)> = report
            .inherited
            .iter()
            .filter(|field| field.entity == "c")
            .map(|field| (field.entity.as_str(), field.field.as_str(), field.origin.as_str()))
            .collect();
        assert_eq!(origins, vec![("c", "y", "b"), ("c", "x", "a")]);
    }

    #[test]
    fn missing_prototype_leaves_entity_alone() {
        let mut doc = json!({"entities": {"a": {"$prototype": "ghost", "x": 1}}});
        let report = expander().expand(&mut doc);
        assert_eq!(doc["entities"]["a"], json!({"$prototype": "ghost", "x": 1}));
        assert_eq!(
            report.missing,
            vec![("entities".to_string(), "a".to_string(), "ghost".to_string())]
        );
    }

    #[test]
    fn cycles_terminate() {
        let mut doc = json!({
            "entities": {
                "a": {"$prototype": "b", "x": 1},
                "b": {"$prototype": "a", "y": 2}
            }
        });
        let report = expander().expand(&mut doc);
        assert!(!report.cycles.is_empty());
        assert_eq!(doc["entities"]["a"]["y"], json!(2));
        assert_eq!(doc["entities"]["b"]["x"], json!(1));
    }

    #[test]
    fn prototypes_do_not_cross_sections() {
        let mut doc = json!({
            "entities": {"components": {}, "base": {"x": 1}},
            "components": {"web": {"$prototype": "base"}}
        });
        let report = expander().expand(&mut doc);
        assert_eq!(doc["components"]["web"], json!({"$prototype": "base"}));
        assert_eq!(report.missing.len(), 1);
    }
}
