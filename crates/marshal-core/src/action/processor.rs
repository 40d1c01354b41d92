//! Named value processors applied during input validation.
//!
//! A parameter lists processors by name; the action manager runs them in
//! order on the user-supplied value (or its absence) before declared
//! defaults fill any remaining gap.

use std::sync::Arc;

use marshal_config::{EnvSource, SystemEnv};
use serde_json::{Map, Value};

use crate::action::definition::Parameter;
use crate::error::{HookError, ServiceError};
use crate::mask::SensitiveMask;
use crate::plugin::{AppInit, OnAppInit, Plugin, PluginInfo};
use crate::service::{DefaultService, ServiceRegistry};

/// Environment shared with processors that read variables.
pub type SharedEnv = dyn EnvSource + Send + Sync;

impl DefaultService for SharedEnv {
    fn create_default(_registry: &mut ServiceRegistry) -> Result<Arc<Self>, ServiceError> {
        Ok(Arc::new(SystemEnv))
    }
}

impl DefaultService for SensitiveMask {
    fn create_default(_registry: &mut ServiceRegistry) -> Result<Arc<Self>, ServiceError> {
        Ok(Arc::new(Self::new()))
    }
}

/// What a processor knows about the value it handles.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorContext<'a> {
    /// Action being validated.
    pub action_id: &'a str,
    /// Parameter owning the value.
    pub parameter: &'a Parameter,
    /// Options from the directive.
    pub options: &'a Map<String, Value>,
}

/// Transforms one parameter value.
pub trait ValueProcessor: Send + Sync {
    /// Returns the processed value; `None` means the value stays unset.
    ///
    /// # Errors
    ///
    /// Returns an error when the value or the directive options are invalid.
    fn process(
        &self,
        value: Option<Value>,
        context: &ProcessorContext<'_>,
    ) -> Result<Option<Value>, HookError>;
}

/// `string.trim`: strips surrounding whitespace from string values.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrimProcessor;

impl ValueProcessor for TrimProcessor {
    fn process(
        &self,
        value: Option<Value>,
        _context: &ProcessorContext<'_>,
    ) -> Result<Option<Value>, HookError> {
        Ok(value.map(|current| match current {
            Value::String(text) => Value::String(text.trim().to_owned()),
            other => other,
        }))
    }
}

/// `env.default`: fills an unset value from the variable named by the
/// `name` option.
#[derive(Clone)]
pub struct EnvDefaultProcessor {
    env: Arc<SharedEnv>,
}

impl EnvDefaultProcessor {
    /// Reads variables from `env`.
    #[must_use]
    pub fn new(env: Arc<SharedEnv>) -> Self {
        Self { env }
    }
}

impl ValueProcessor for EnvDefaultProcessor {
    fn process(
        &self,
        value: Option<Value>,
        context: &ProcessorContext<'_>,
    ) -> Result<Option<Value>, HookError> {
        if value.as_ref().is_some_and(|current| !current.is_null()) {
            return Ok(value);
        }
        let name = context
            .options
            .get("name")
            .and_then(Value::as_str)
            .ok_or("option 'name' must name an environment variable")?;
        match self.env.var(name) {
            Some(raw) => Ok(Some(context.parameter.coerce(&Value::String(raw))?)),
            None => Ok(None),
        }
    }
}

/// `mask.sensitive`: registers the value as a secret.
#[derive(Debug, Clone)]
pub struct MaskSensitiveProcessor {
    mask: Arc<SensitiveMask>,
}

impl MaskSensitiveProcessor {
    /// Adds secrets to `mask`.
    #[must_use]
    pub fn new(mask: Arc<SensitiveMask>) -> Self {
        Self { mask }
    }
}

impl ValueProcessor for MaskSensitiveProcessor {
    fn process(
        &self,
        value: Option<Value>,
        _context: &ProcessorContext<'_>,
    ) -> Result<Option<Value>, HookError> {
        match &value {
            Some(Value::String(text)) => self.mask.add_secret(text),
            Some(Value::Null) | None => {}
            Some(other) => self.mask.add_secret(other.to_string()),
        }
        Ok(value)
    }
}

/// Plugin registering the built-in processors.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessorPlugin;

impl Plugin for ProcessorPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::of::<Self>()
    }

    fn as_app_init(&self) -> Option<&dyn OnAppInit> {
        Some(self)
    }
}

impl OnAppInit for ProcessorPlugin {
    fn on_app_init(&self, app: &mut AppInit<'_>) -> Result<(), HookError> {
        let env = app.services.get_or_create::<SharedEnv>()?;
        let mask = app.services.get_or_create::<SensitiveMask>()?;
        app.actions
            .add_processor("string.trim", Arc::new(TrimProcessor));
        app.actions
            .add_processor("env.default", Arc::new(EnvDefaultProcessor::new(env)));
        app.actions
            .add_processor("mask.sensitive", Arc::new(MaskSensitiveProcessor::new(mask)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::action::definition::ParamType;

    fn context<'a>(parameter: &'a Parameter, options: &'a Map<String, Value>) -> ProcessorContext<'a> {
        ProcessorContext {
            action_id: "test",
            parameter,
            options,
        }
    }

    #[test]
    fn trim_only_touches_strings() {
        let parameter = Parameter::new("name", ParamType::String);
        let options = Map::new();
        let ctx = context(&parameter, &options);
        assert_eq!(
            TrimProcessor.process(Some(json!("  padded ")), &ctx).expect("trim"),
            Some(json!("padded"))
        );
        assert_eq!(
            TrimProcessor.process(Some(json!(3)), &ctx).expect("trim"),
            Some(json!(3))
        );
        assert_eq!(TrimProcessor.process(None, &ctx).expect("trim"), None);
    }

    #[test]
    fn env_default_fills_unset_values_with_coercion() {
        let env: HashMap<String, String> =
            HashMap::from([(String::from("DEPLOY_REPLICAS"), String::from("4"))]);
        let processor = EnvDefaultProcessor::new(Arc::new(env));
        let parameter = Parameter::new("replicas", ParamType::Integer);
        let mut options = Map::new();
        options.insert(String::from("name"), json!("DEPLOY_REPLICAS"));
        let ctx = context(&parameter, &options);

        assert_eq!(processor.process(None, &ctx).expect("fill"), Some(json!(4)));
        assert_eq!(
            processor.process(Some(json!(9)), &ctx).expect("keep"),
            Some(json!(9))
        );
    }

    #[test]
    fn env_default_requires_a_variable_name() {
        let processor = EnvDefaultProcessor::new(Arc::new(HashMap::<String, String>::new()));
        let parameter = Parameter::new("replicas", ParamType::Integer);
        let options = Map::new();
        assert!(processor.process(None, &context(&parameter, &options)).is_err());
    }

    #[test]
    fn mask_sensitive_records_the_value() {
        let mask = Arc::new(SensitiveMask::new());
        let processor = MaskSensitiveProcessor::new(Arc::clone(&mask));
        let parameter = Parameter::new("token", ParamType::String);
        let options = Map::new();
        let value = processor
            .process(Some(json!("abc123")), &context(&parameter, &options))
            .expect("process");
        assert_eq!(value, Some(json!("abc123")));
        assert_eq!(mask.mask_str("token=abc123"), "token=****");
    }
}
