//! Declarative registry manifests
//!
//! A manifest is a YAML document listing state machines, concepts,
//! modifiers and groups:
//!
//! ```yaml
//! state_machines:
//!   - name: OrderFlow
//!     states: [Created, Paid, Shipped, Delivered, Canceled]
//!     transitions:
//!       Created: [Paid, Canceled]
//!       Paid: [Shipped, Canceled]
//!       Shipped: [Delivered]
//!     state_key: status
//! concepts:
//!   - name: Order
//!     expects: { id: int }
//!     state_machine: OrderFlow
//! modifiers:
//!   - name: Premium
//!     declares:
//!       premium_until: { shape: str, default: "2099-12-31" }
//!       features: { shape: list, default: [export] }
//! groups:
//!   - name: Pro
//!     members: [Premium]
//! ```
//!
//! Modifier defaults become the `on_add` transform and `on_remove` deletes
//! the declared keys. Method bodies can only be attached in code.

use super::definition::{ConceptDef, ModifierDef};
use super::registry::{GroupDef, Registry, RegistryBuilder};
use crate::config::ConfigError;
use crate::error::{Result, RuntimeError};
use crate::machine::StateMachineTemplate;
use modus_types::{Value, ValueShape};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub state_machines: Vec<MachineEntry>,

    #[serde(default)]
    pub concepts: Vec<ConceptEntry>,

    #[serde(default)]
    pub modifiers: Vec<ModifierEntry>,

    #[serde(default)]
    pub groups: Vec<GroupEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineEntry {
    pub name: String,
    pub states: Vec<String>,

    #[serde(default)]
    pub transitions: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub state_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptEntry {
    pub name: String,

    #[serde(default)]
    pub expects: BTreeMap<String, ValueShape>,

    #[serde(default)]
    pub state_machine: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierEntry {
    pub name: String,

    #[serde(default)]
    pub declares: BTreeMap<String, FieldEntry>,

    #[serde(default)]
    pub state_machine: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldEntry {
    pub shape: ValueShape,

    /// Written by `on_add`; null when omitted
    #[serde(default)]
    pub default: serde_yaml::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    pub members: Vec<String>,
}

impl Manifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(source: &str) -> std::result::Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Turn every entry into a definition, leaving the builder open for
    /// definitions registered in code
    pub fn into_builder(self) -> Result<RegistryBuilder> {
        let mut builder = Registry::builder();

        for entry in self.state_machines {
            let mut template =
                StateMachineTemplate::new(entry.name, entry.states, entry.transitions)?;
            if let Some(key) = entry.state_key {
                template = template.with_state_key(key);
            }
            builder.state_machine(template);
        }

        for entry in self.concepts {
            let mut concept = ConceptDef::new(entry.name);
            for (key, shape) in entry.expects {
                concept = concept.expect(key, shape);
            }
            if let Some(machine) = entry.state_machine {
                concept = concept.state_machine(machine);
            }
            builder.concept(concept);
        }

        for entry in self.modifiers {
            let mut fields = Vec::with_capacity(entry.declares.len());
            for (key, field) in entry.declares {
                let default = yaml_to_value(&field.default).map_err(|reason| {
                    RuntimeError::InvalidDefinition(format!(
                        "{}.{} default: {}",
                        entry.name, key, reason
                    ))
                })?;
                if !field.shape.admits(&default) {
                    return Err(RuntimeError::InvalidDefinition(format!(
                        "{}.{} default {} is not {}",
                        entry.name, key, default, field.shape
                    )));
                }
                fields.push((key, field.shape, default));
            }
            let mut modifier = ModifierDef::declarative(entry.name, fields);
            if let Some(machine) = entry.state_machine {
                modifier = modifier.state_machine(machine);
            }
            builder.modifier(modifier);
        }

        for entry in self.groups {
            builder.group(GroupDef::new(entry.name, entry.members));
        }

        Ok(builder)
    }

    pub fn build(self) -> Result<Registry> {
        self.into_builder()?.build()
    }
}

/// Convert a plain YAML value into a runtime value
pub fn yaml_to_value(yaml: &serde_yaml::Value) -> std::result::Result<Value, String> {
    use serde_yaml::Value as Yaml;
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(*b),
        Yaml::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("number {} out of range", n))?,
        },
        Yaml::String(s) => Value::Str(s.clone()),
        Yaml::Sequence(items) => Value::List(
            items
                .iter()
                .map(yaml_to_value)
                .collect::<std::result::Result<_, _>>()?,
        ),
        Yaml::Mapping(map) => {
            let mut out = BTreeMap::new();
            for (key, value) in map {
                let key = key
                    .as_str()
                    .ok_or_else(|| "map keys must be strings".to_string())?;
                out.insert(key.to_string(), yaml_to_value(value)?);
            }
            Value::Map(out)
        }
        Yaml::Tagged(tagged) => return Err(format!("unsupported tag {}", tagged.tag)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modus_types::StateMap;

    const ORDERS: &str = r#"
state_machines:
  - name: OrderFlow
    states: [Created, Paid, Shipped, Delivered, Canceled]
    transitions:
      Created: [Paid, Canceled]
      Paid: [Shipped, Canceled]
      Shipped: [Delivered]
    state_key: status
concepts:
  - name: Order
    expects: { id: int }
    state_machine: OrderFlow
modifiers:
  - name: Premium
    declares:
      premium_until: { shape: str, default: "2099-12-31" }
      features: { shape: list, default: [export, themes] }
groups:
  - name: Pro
    members: [Premium]
"#;

    #[test]
    fn test_manifest_builds_registry() {
        let registry = Manifest::from_yaml(ORDERS).unwrap().build().unwrap();

        let machine = registry.state_machine("OrderFlow").unwrap();
        assert_eq!(machine.initial(), "Created");
        assert_eq!(machine.state_key(), Some("status"));
        assert_eq!(registry.concept("Order").unwrap().machine(), Some("OrderFlow"));
        assert_eq!(registry.group("Pro").unwrap().members(), ["Premium".to_string()]);
    }

    #[test]
    fn test_declarative_modifier_defaults() {
        let registry = Manifest::from_yaml(ORDERS).unwrap().build().unwrap();
        let premium = registry.modifier("Premium").unwrap();
        let mut state = StateMap::new();

        (premium.add_hook().unwrap())(&mut state).unwrap();
        assert_eq!(state.get("premium_until"), Some(&Value::str("2099-12-31")));
        assert_eq!(
            state.get("features"),
            Some(&Value::list(vec![Value::str("export"), Value::str("themes")]))
        );

        (premium.remove_hook().unwrap())(&mut state).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_default_must_match_shape() {
        let yaml = "modifiers:\n  - name: Bad\n    declares:\n      n: { shape: int, default: nope }\n";
        let err = Manifest::from_yaml(yaml).unwrap().build().unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidDefinition(msg) if msg.contains("Bad.n")));
    }

    #[test]
    fn test_unknown_shape_is_a_parse_error() {
        let yaml = "concepts:\n  - name: C\n    expects: { x: tensor }\n";
        assert!(matches!(
            Manifest::from_yaml(yaml),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_yaml_conversion() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("{a: 1, b: [true, 2.5, ~]}").unwrap();
        let value = yaml_to_value(&yaml).unwrap();
        let Value::Map(map) = value else {
            panic!("expected a map");
        };
        assert_eq!(map.get("a"), Some(&Value::Int(1)));
        assert_eq!(
            map.get("b"),
            Some(&Value::list(vec![Value::Bool(true), Value::Float(2.5), Value::Null]))
        );
    }
}
