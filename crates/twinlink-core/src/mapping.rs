//! Mapping resolution.
//!
//! The mapping content document lists the model's configuration properties.
//! Each property may carry stereotypes; the attributes of the first one say
//! where and how often to read it:
//!
//! ```json
//! {
//!   "models": {
//!     "org.apache.plc4x.examples:VirtualMachine:1.0.0": {
//!       "configurationProperties": [
//!         {
//!           "name": "temp",
//!           "type": "DOUBLE",
//!           "stereotypes": [
//!             { "name": "source",
//!               "attributes": { "address": "%DB1:0:REAL", "rate": "1000", "url": "s7://192.168.0.1/0/1" } }
//!           ]
//!         }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Properties without attributes are skipped. Anything else that cannot be
//! scheduled is a [`MappingError`].

use serde_json::Value;
use tracing::info;

use crate::error::MappingError;
use crate::model::{PropertySpec, ValueType};

/// Coordinates of a model in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCoordinates {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl ModelCoordinates {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Catalog model id, `namespace.name:version`.
    pub fn model_id(&self) -> String {
        format!("{}.{}:{}", self.namespace, self.name, self.version)
    }

    /// Keys under which the model may appear in a `models` object.
    fn document_keys(&self) -> [String; 2] {
        [
            self.model_id(),
            format!("{}:{}:{}", self.namespace, self.name, self.version),
        ]
    }
}

/// A declared configuration property and its optional attribute block.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationProperty {
    pub name: String,
    pub type_tag: String,
    pub attributes: Option<Value>,
}

/// Read the `(name, type)` pairs and attribute blocks declared for a model.
pub fn configuration_properties(
    document: &Value,
    model: &ModelCoordinates,
) -> Result<Vec<ConfigurationProperty>, MappingError> {
    let models = document.get("models");
    let model_doc = model
        .document_keys()
        .iter()
        .find_map(|key| models.and_then(|m| m.get(key)))
        .ok_or_else(|| MappingError::MissingModel(model.model_id()))?;

    let entries = model_doc
        .get("configurationProperties")
        .and_then(Value::as_array)
        .ok_or_else(|| MappingError::MissingConfigurationProperties(model.model_id()))?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let name = text_field(entry, "name").ok_or_else(|| MappingError::MalformedProperty {
                index,
                reason: "missing name".to_string(),
            })?;
            let type_tag =
                text_field(entry, "type").ok_or_else(|| MappingError::MalformedProperty {
                    index,
                    reason: format!("property '{name}' has no type"),
                })?;
            Ok(ConfigurationProperty {
                name,
                type_tag,
                attributes: stereotype_attributes(entry).cloned(),
            })
        })
        .collect()
}

/// Resolve the schedulable properties of a model.
///
/// Unmapped properties are logged and left out.
pub fn resolve_properties(
    document: &Value,
    model: &ModelCoordinates,
) -> Result<Vec<PropertySpec>, MappingError> {
    let mut specs = Vec::new();
    for property in configuration_properties(document, model)? {
        info!("Property {} - {}", property.name, property.type_tag);
        match property.attributes.as_ref().filter(|a| has_mapping(a)) {
            Some(attributes) => {
                let spec = to_spec(&property, attributes)?;
                info!(
                    "Mapping {} - {} - {}",
                    spec.source_url, spec.source_address, spec.poll_interval_ms
                );
                specs.push(spec);
            }
            None => info!(property = %property.name, "No mapping given, will be ignored"),
        }
    }
    Ok(specs)
}

const MAPPING_ATTRIBUTES: [&str; 3] = ["address", "rate", "url"];

/// First stereotype's attribute block.
fn stereotype_attributes(entry: &Value) -> Option<&Value> {
    entry
        .get("stereotypes")
        .and_then(|s| s.get(0))
        .and_then(|s| s.get("attributes"))
        .filter(|a| a.is_object())
}

fn has_mapping(attributes: &Value) -> bool {
    MAPPING_ATTRIBUTES
        .iter()
        .any(|key| attributes.get(key).is_some_and(|v| !v.is_null()))
}

fn to_spec(property: &ConfigurationProperty, attributes: &Value) -> Result<PropertySpec, MappingError> {
    let required = |attribute: &str| {
        text_field(attributes, attribute).ok_or_else(|| MappingError::MissingAttribute {
            property: property.name.clone(),
            attribute: attribute.to_string(),
        })
    };

    let address = required("address")?;
    let rate = required("rate")?;
    let url = required("url")?;
    let value_type = ValueType::parse(&property.name, &property.type_tag)?;

    let poll_interval_ms = rate
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or_else(|| MappingError::InvalidRate {
            property: property.name.clone(),
            rate: rate.clone(),
        })?;

    Ok(PropertySpec {
        name: property.name.clone(),
        value_type,
        source_address: address,
        source_url: url,
        poll_interval_ms,
    })
}

/// A string field; numbers and booleans are rendered as text.
fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model() -> ModelCoordinates {
        ModelCoordinates::new("org.apache.plc4x.examples", "VirtualMachine", "1.0.0")
    }

    fn document(properties: Value) -> Value {
        json!({
            "models": {
                "org.apache.plc4x.examples:VirtualMachine:1.0.0": {
                    "configurationProperties": properties
                }
            }
        })
    }

    #[test]
    fn test_model_id() {
        assert_eq!(model().model_id(), "org.apache.plc4x.examples.VirtualMachine:1.0.0");
    }

    #[test]
    fn test_resolves_single_property() {
        let doc = document(json!([{
            "name": "temp",
            "type": "DOUBLE",
            "stereotypes": [{
                "name": "source",
                "attributes": { "address": "%DB1:0:REAL", "rate": "1000", "url": "s7://192.168.0.1/0/1" }
            }]
        }]));

        let specs = resolve_properties(&doc, &model()).unwrap();
        assert_eq!(
            specs,
            vec![PropertySpec {
                name: "temp".to_string(),
                value_type: ValueType::Double,
                source_address: "%DB1:0:REAL".to_string(),
                source_url: "s7://192.168.0.1/0/1".to_string(),
                poll_interval_ms: 1000,
            }]
        );
    }

    #[test]
    fn test_dotted_model_key_is_accepted() {
        let doc = json!({
            "models": {
                "org.apache.plc4x.examples.VirtualMachine:1.0.0": {
                    "configurationProperties": [{ "name": "on", "type": "BOOLEAN" }]
                }
            }
        });
        let properties = configuration_properties(&doc, &model()).unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].type_tag, "BOOLEAN");
        assert!(properties[0].attributes.is_none());
    }

    #[test]
    fn test_unmapped_property_is_skipped() {
        let doc = document(json!([
            { "name": "label", "type": "STRING" },
            { "name": "speed", "type": "INT", "stereotypes": [] },
            { "name": "fan", "type": "BOOLEAN", "stereotypes": [{ "name": "source", "attributes": {} }] },
            {
                "name": "count",
                "type": "INT",
                "stereotypes": [{ "attributes": { "address": "holding-register:1", "rate": 500, "url": "modbus://10.0.0.2" } }]
            }
        ]));

        let specs = resolve_properties(&doc, &model()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "count");
        assert_eq!(specs[0].poll_interval_ms, 500);
    }

    #[test]
    fn test_only_first_stereotype_is_consulted() {
        let doc = document(json!([{
            "name": "temp",
            "type": "DOUBLE",
            "stereotypes": [
                { "name": "docs", "attributes": { "description": "ambient" } },
                { "name": "source", "attributes": { "address": "%DB1:0:REAL", "rate": "1000", "url": "s7://h/0/1" } }
            ]
        }]));
        assert!(resolve_properties(&doc, &model()).unwrap().is_empty());
    }

    #[test]
    fn test_non_numeric_rate_is_fatal() {
        let doc = document(json!([{
            "name": "temp",
            "type": "DOUBLE",
            "stereotypes": [{ "attributes": { "address": "%DB1:0:REAL", "rate": "fast", "url": "s7://h/0/1" } }]
        }]));
        let err = resolve_properties(&doc, &model()).unwrap_err();
        assert!(matches!(err, MappingError::InvalidRate { ref rate, .. } if rate == "fast"));
    }

    #[test]
    fn test_zero_and_negative_rates_are_fatal() {
        for rate in ["0", "-5"] {
            let doc = document(json!([{
                "name": "temp",
                "type": "DOUBLE",
                "stereotypes": [{ "attributes": { "address": "%DB1:0:REAL", "rate": rate, "url": "s7://h/0/1" } }]
            }]));
            assert!(matches!(
                resolve_properties(&doc, &model()),
                Err(MappingError::InvalidRate { .. })
            ));
        }
    }

    #[test]
    fn test_missing_attribute_is_fatal() {
        let doc = document(json!([{
            "name": "temp",
            "type": "DOUBLE",
            "stereotypes": [{ "attributes": { "address": "%DB1:0:REAL", "rate": "1000" } }]
        }]));
        let err = resolve_properties(&doc, &model()).unwrap_err();
        assert!(matches!(err, MappingError::MissingAttribute { ref attribute, .. } if attribute == "url"));
    }

    #[test]
    fn test_unsupported_type_of_mapped_property_is_fatal() {
        let doc = document(json!([{
            "name": "label",
            "type": "STRING",
            "stereotypes": [{ "attributes": { "address": "%DB1:0:REAL", "rate": "1000", "url": "s7://h/0/1" } }]
        }]));
        assert!(matches!(
            resolve_properties(&doc, &model()),
            Err(MappingError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let doc = json!({ "models": {} });
        assert!(matches!(
            resolve_properties(&doc, &model()),
            Err(MappingError::MissingModel(_))
        ));
    }

    #[test]
    fn test_property_without_name_is_malformed() {
        let doc = document(json!([{ "type": "DOUBLE" }]));
        assert!(matches!(
            configuration_properties(&doc, &model()),
            Err(MappingError::MalformedProperty { index: 0, .. })
        ));
    }
}
