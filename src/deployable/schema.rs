//! Attribute schemas.
//!
//! A schema is a runtime table of [`AttributeSpec`]s. Each deployable variant
//! contributes base attributes and the capability tables add per-kind ones;
//! [`SchemaBuilder`] merges them, later entries overriding earlier ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::DeployableError;
use crate::params::{Params, is_blank};

/// Type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// A string.
    String,
    /// A whole number.
    Integer,
    /// Any number.
    Float,
    /// A boolean.
    Boolean,
    /// A list.
    List,
    /// A map.
    Map,
    /// Any value.
    #[default]
    Any,
}

impl DataType {
    /// Returns whether the value has this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
            Self::Any => true,
        }
    }

    /// Coerces loosely typed input, e.g. `version: 5.7` read as a number.
    fn coerce(self, value: Value) -> Value {
        match (self, value) {
            (Self::String, Value::Number(n)) => Value::String(n.to_string()),
            (Self::String, Value::Bool(b)) => Value::String(b.to_string()),
            (Self::Integer, Value::String(s)) => s
                .parse::<i64>()
                .map_or(Value::String(s), |n| Value::Number(n.into())),
            (_, value) => value,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        };
        write!(f, "{name}")
    }
}

/// Declaration of one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// Whether the attribute must be set.
    #[serde(default)]
    pub required: bool,

    /// Expected type.
    #[serde(rename = "type", default)]
    pub datatype: DataType,

    /// Value used when the attribute is not given.
    #[serde(default)]
    pub default: Option<Value>,

    /// Accepted values.
    #[serde(default)]
    pub choices: Option<Vec<Value>>,

    /// Whether the attribute is passed on in provision parameters.
    #[serde(default = "serializable_default")]
    pub serializable: bool,
}

const fn serializable_default() -> bool {
    true
}

impl AttributeSpec {
    /// Creates an optional attribute of the given type.
    #[must_use]
    pub const fn optional(datatype: DataType) -> Self {
        Self {
            required: false,
            datatype,
            default: None,
            choices: None,
            serializable: true,
        }
    }

    /// Creates a required attribute of the given type.
    #[must_use]
    pub const fn required(datatype: DataType) -> Self {
        Self {
            required: true,
            datatype,
            default: None,
            choices: None,
            serializable: true,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Restricts the accepted values.
    #[must_use]
    pub fn with_choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    /// Excludes the attribute from provision parameters.
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.serializable = false;
        self
    }

    fn check(&self, value: &Value) -> Option<String> {
        if is_blank(value) {
            return self.required.then(|| "is required".to_string());
        }

        if !self.datatype.accepts(value) {
            return Some(format!("must be of type {}", self.datatype));
        }

        if let Some(choices) = &self.choices
            && !choices.contains(value)
        {
            let accepted: Vec<String> = choices.iter().map(Value::to_string).collect();
            return Some(format!("must be one of [{}]", accepted.join(", ")));
        }

        None
    }
}

/// A merged attribute schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    attributes: BTreeMap<String, AttributeSpec>,
}

impl Schema {
    /// Returns whether the schema declares an attribute.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Returns the declaration of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.get(name)
    }

    /// Iterates over declared attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Builds an attribute bag from raw input.
    ///
    /// Undeclared attributes are dropped; missing ones take their default or
    /// `null`.
    #[must_use]
    pub fn apply(&self, input: &Params) -> Params {
        self.attributes
            .iter()
            .map(|(name, spec)| {
                let value = input
                    .get(name)
                    .filter(|value| !value.is_null())
                    .cloned()
                    .or_else(|| spec.default.clone())
                    .map_or(Value::Null, |value| spec.datatype.coerce(value));
                (name.clone(), value)
            })
            .collect()
    }

    /// Coerces a single value according to its declaration.
    #[must_use]
    pub fn coerce(&self, name: &str, value: Value) -> Value {
        match self.attributes.get(name) {
            Some(spec) => spec.datatype.coerce(value),
            None => value,
        }
    }

    /// Validates an attribute bag, reporting every violation at once.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing each failing attribute.
    pub fn validate(&self, kind: &str, attributes: &Params) -> Result<(), DeployableError> {
        let violations: BTreeMap<String, String> = self
            .attributes
            .iter()
            .filter_map(|(name, spec)| {
                let value = attributes.get(name).unwrap_or(&Value::Null);
                spec.check(value).map(|message| (name.clone(), message))
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(DeployableError::Validation {
                kind: kind.to_string(),
                violations,
            })
        }
    }

    /// Returns the serializable subset of an attribute bag.
    #[must_use]
    pub fn serialize(&self, attributes: &Params) -> Params {
        attributes
            .iter()
            .filter(|(name, _)| self.attributes.get(*name).is_some_and(|spec| spec.serializable))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Merges attribute declarations into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    attributes: BTreeMap<String, AttributeSpec>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares one attribute, replacing any earlier declaration.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, spec: AttributeSpec) -> Self {
        self.attributes.insert(name.into(), spec);
        self
    }

    /// Declares several attributes.
    #[must_use]
    pub fn extend<'a, I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a AttributeSpec)>,
    {
        for (name, spec) in attributes {
            self.attributes.insert(name.clone(), spec.clone());
        }
        self
    }

    /// Finishes the schema.
    #[must_use]
    pub fn build(self) -> Schema {
        Schema {
            attributes: self.attributes,
        }
    }
}
