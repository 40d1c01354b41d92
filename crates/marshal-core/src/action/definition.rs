//! Declarative action schema.
//!
//! An [`ActionDefinition`] describes one action: its title, aliases and two
//! ordered parameter lists. Arguments are positional and bound by
//! declaration order; options are named. Each [`Parameter`] carries a type,
//! an optional default, a required flag and optional value-processing
//! directives.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

use crate::error::ActionError;

/// Type of a parameter value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// UTF-8 text.
    #[default]
    String,
    /// Signed 64-bit integer.
    Integer,
    /// Floating-point number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// List of primitive values.
    Array,
    /// One level of named primitive properties.
    Object,
}

impl ParamType {
    /// JSON-Schema name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Returns `true` for scalar types.
    #[must_use]
    pub const fn is_primitive(self) -> bool {
        !matches!(self, Self::Array | Self::Object)
    }
}

/// A named value-processing directive applied during input validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ValueProcessing {
    /// Registered processor name, such as `string.trim`.
    pub processor: String,
    /// Processor-specific options.
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// One argument or option of an action.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Parameter {
    /// Name used for the flag and the input key.
    pub name: String,
    /// Short human title.
    #[serde(default)]
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Value type.
    #[serde(rename = "type", default)]
    pub kind: ParamType,
    /// Element type for arrays; defaults to string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ParamType>,
    /// Declared properties for objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Parameter>,
    /// Declared default, coerced to `kind` before use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Whether a value must be present after defaults and processors ran.
    #[serde(default)]
    pub required: bool,
    /// Allowed values, when restricted.
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<Value>,
    /// Processing directives, applied in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process: Vec<ValueProcessing>,
}

impl Parameter {
    /// Creates a parameter of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the declared default.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Marks the parameter as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the array element type.
    #[must_use]
    pub const fn with_items(mut self, items: ParamType) -> Self {
        self.items = Some(items);
        self
    }

    /// Adds an object property.
    #[must_use]
    pub fn with_property(mut self, property: Self) -> Self {
        self.properties.push(property);
        self
    }

    /// Restricts the allowed values.
    #[must_use]
    pub fn with_allowed(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = allowed;
        self
    }

    /// Appends a processing directive.
    #[must_use]
    pub fn with_processor(
        mut self,
        processor: impl Into<String>,
        options: Map<String, Value>,
    ) -> Self {
        self.process.push(ValueProcessing {
            processor: processor.into(),
            options,
        });
        self
    }

    /// Element type of an array parameter.
    #[must_use]
    pub fn element_type(&self) -> ParamType {
        self.items.unwrap_or_default()
    }

    /// Help text composed from title and description.
    #[must_use]
    pub fn help_text(&self) -> String {
        match (self.title.trim(), self.description.trim()) {
            ("", "") => String::new(),
            (title, "") => title.to_owned(),
            ("", description) => description.to_owned(),
            (title, description) => format!("{title}: {description}"),
        }
    }

    /// Looks up a declared object property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Self> {
        self.properties.iter().find(|property| property.name == name)
    }

    /// Coerces `value` to this parameter's type.
    ///
    /// Strings holding a number or boolean are parsed, integral floats become
    /// integers, scalars become strings for string parameters, and array
    /// elements and declared object properties are coerced recursively.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::InvalidDefault`] when the value cannot
    /// represent the declared type.
    pub fn coerce(&self, value: &Value) -> Result<Value, ActionError> {
        match self.kind {
            ParamType::Array => self.coerce_array(value),
            ParamType::Object => self.coerce_object(value),
            scalar => coerce_scalar(scalar, value).ok_or_else(|| self.mismatch(value)),
        }
    }

    /// Declared default coerced to the parameter type. A JSON `null`
    /// default counts as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::InvalidDefault`] on a type mismatch.
    pub fn resolved_default(&self) -> Result<Option<Value>, ActionError> {
        match &self.default {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.coerce(value).map(Some),
        }
    }

    fn coerce_array(&self, value: &Value) -> Result<Value, ActionError> {
        let Value::Array(items) = value else {
            return Err(self.mismatch(value));
        };
        let element = self.element_type();
        items
            .iter()
            .map(|item| coerce_scalar(element, item).ok_or_else(|| self.mismatch(value)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn coerce_object(&self, value: &Value) -> Result<Value, ActionError> {
        let Value::Object(fields) = value else {
            return Err(self.mismatch(value));
        };
        let mut coerced = Map::new();
        for (key, field) in fields {
            let converted = match self.property(key) {
                Some(property) if !field.is_null() => property.coerce(field)?,
                _ => field.clone(),
            };
            coerced.insert(key.clone(), converted);
        }
        Ok(Value::Object(coerced))
    }

    fn mismatch(&self, value: &Value) -> ActionError {
        ActionError::InvalidDefault {
            parameter: self.name.clone(),
            expected: self.kind.as_str(),
            value: value.to_string(),
        }
    }

    fn schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert(String::from("type"), Value::from(self.kind.as_str()));
        if !self.title.is_empty() {
            schema.insert(String::from("title"), Value::from(self.title.clone()));
        }
        if !self.description.is_empty() {
            schema.insert(
                String::from("description"),
                Value::from(self.description.clone()),
            );
        }
        if !self.allowed.is_empty() {
            schema.insert(String::from("enum"), Value::Array(self.allowed.clone()));
        }
        match self.kind {
            ParamType::Array => {
                schema.insert(
                    String::from("items"),
                    json!({ "type": self.element_type().as_str() }),
                );
            }
            ParamType::Object => {
                schema.insert(
                    String::from("properties"),
                    properties_schema(&self.properties),
                );
                schema.insert(
                    String::from("required"),
                    required_names(&self.properties),
                );
            }
            _ => {}
        }
        Value::Object(schema)
    }
}

fn coerce_scalar(kind: ParamType, value: &Value) -> Option<Value> {
    match (kind, value) {
        (ParamType::String, Value::String(_)) => Some(value.clone()),
        (ParamType::String, Value::Number(number)) => Some(Value::String(number.to_string())),
        (ParamType::String, Value::Bool(flag)) => Some(Value::String(flag.to_string())),
        (ParamType::Integer, Value::Number(number)) => integer_from(number).map(Value::from),
        (ParamType::Integer, Value::String(text)) => {
            text.trim().parse::<i64>().ok().map(Value::from)
        }
        (ParamType::Number, Value::Number(_)) => Some(value.clone()),
        (ParamType::Number, Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ParamType::Boolean, Value::String(text)) => match text.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn integer_from(number: &Number) -> Option<i64> {
    if let Some(integer) = number.as_i64() {
        return Some(integer);
    }
    let float = number.as_f64()?;
    if float.fract() != 0.0 || !float.is_finite() {
        return None;
    }
    format!("{float:.0}").parse::<i64>().ok()
}

fn properties_schema(parameters: &[Parameter]) -> Value {
    Value::Object(
        parameters
            .iter()
            .map(|parameter| (parameter.name.clone(), parameter.schema()))
            .collect(),
    )
}

fn required_names(parameters: &[Parameter]) -> Value {
    Value::Array(
        parameters
            .iter()
            .filter(|parameter| parameter.required)
            .map(|parameter| Value::from(parameter.name.clone()))
            .collect(),
    )
}

/// Declarative description of one action.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ActionDefinition {
    /// Short title shown in listings.
    #[serde(default)]
    pub title: String,
    /// Longer description shown in help.
    #[serde(default)]
    pub description: String,
    /// Alternative command names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Positional parameters, in command-line order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Parameter>,
    /// Named parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Parameter>,
}

impl ActionDefinition {
    /// Creates a definition with a title and nothing else.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds an alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn with_argument(mut self, argument: Parameter) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Appends an option.
    #[must_use]
    pub fn with_option(mut self, option: Parameter) -> Self {
        self.options.push(option);
        self
    }

    /// Looks up an argument by name.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Parameter> {
        self.arguments.iter().find(|parameter| parameter.name == name)
    }

    /// Looks up an option by name.
    #[must_use]
    pub fn option(&self, name: &str) -> Option<&Parameter> {
        self.options.iter().find(|parameter| parameter.name == name)
    }

    /// Checks the definition's shape for the action `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Definition`] for structural defects and
    /// [`ActionError::InvalidDefault`] when a default does not match its
    /// declared type.
    pub fn validate(&self, id: &str) -> Result<(), ActionError> {
        let defect = |message: String| ActionError::Definition {
            id: id.to_owned(),
            message,
        };

        let mut seen = HashSet::new();
        for parameter in self.arguments.iter().chain(&self.options) {
            check_name(&parameter.name).map_err(&defect)?;
            if !seen.insert(parameter.name.as_str()) {
                return Err(defect(format!(
                    "parameter '{}' is declared more than once",
                    parameter.name
                )));
            }
            check_shape(parameter).map_err(&defect)?;
            parameter.resolved_default()?;
        }

        let mut optional_seen = false;
        let last = self.arguments.len().saturating_sub(1);
        for (position, argument) in self.arguments.iter().enumerate() {
            if argument.kind == ParamType::Object {
                return Err(defect(format!(
                    "argument '{}' cannot be an object",
                    argument.name
                )));
            }
            if argument.kind == ParamType::Array && position != last {
                return Err(defect(format!(
                    "array argument '{}' must be the last argument",
                    argument.name
                )));
            }
            if argument.required && optional_seen {
                return Err(defect(format!(
                    "required argument '{}' follows an optional one",
                    argument.name
                )));
            }
            optional_seen |= !argument.required;
        }
        Ok(())
    }

    /// JSON Schema for `{"arguments": {...}, "options": {...}}`.
    #[must_use]
    pub fn json_schema(&self) -> Value {
        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "properties": {
                "arguments": {
                    "type": "object",
                    "properties": properties_schema(&self.arguments),
                    "required": required_names(&self.arguments),
                },
                "options": {
                    "type": "object",
                    "properties": properties_schema(&self.options),
                    "required": required_names(&self.options),
                },
            },
        })
    }
}

fn check_name(name: &str) -> Result<(), String> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(format!("invalid parameter name '{name}'"))
    }
}

fn check_shape(parameter: &Parameter) -> Result<(), String> {
    match parameter.kind {
        ParamType::Array if !parameter.element_type().is_primitive() => Err(format!(
            "array parameter '{}' must hold primitive items",
            parameter.name
        )),
        ParamType::Object => {
            let mut seen = HashSet::new();
            for property in &parameter.properties {
                check_name(&property.name)?;
                if !property.kind.is_primitive() {
                    return Err(format!(
                        "property '{}.{}' must be primitive",
                        parameter.name, property.name
                    ));
                }
                if !seen.insert(property.name.as_str()) {
                    return Err(format!(
                        "property '{}.{}' is declared more than once",
                        parameter.name, property.name
                    ));
                }
            }
            Ok(())
        }
        _ if !parameter.properties.is_empty() => Err(format!(
            "only object parameters may declare properties ('{}')",
            parameter.name
        )),
        _ => Ok(()),
    }
}
