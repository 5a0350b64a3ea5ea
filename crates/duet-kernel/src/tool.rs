//! Callable tool descriptors
//!
//! Tools are described in the OpenAI function-calling shape and passed to the
//! model as JSON. Filtering works on borrowed lists and returns clones; a
//! candidate list is never mutated.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

impl ToolParameter {
    pub fn new(param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            description: description.into(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// JSON-schema object describing the parameters of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParametersSchema {
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, ToolParameter>,
    #[serde(default)]
    pub required: Vec<String>,
}

fn object_type() -> String {
    "object".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: ToolParametersSchema,
}

/// A callable tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: ToolFunction,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolDescriptor {
    /// Build a function tool. `required` is derived from the parameter flags.
    ///
    /// # Example
    ///
    /// ```rust
    /// use duet_kernel::tool::{ToolDescriptor, ToolParameter};
    ///
    /// let tool = ToolDescriptor::function(
    ///     "set_light",
    ///     "turn lights on/off",
    ///     [("room", ToolParameter::new("string", "Room name").required())],
    /// );
    /// assert_eq!(tool.function.parameters.required, vec!["room".to_string()]);
    /// ```
    pub fn function<I, K>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, ToolParameter)>,
        K: Into<String>,
    {
        let properties: BTreeMap<String, ToolParameter> = parameters
            .into_iter()
            .map(|(key, param)| (key.into(), param))
            .collect();
        let required = properties
            .iter()
            .filter(|(_, param)| param.required)
            .map(|(key, _)| key.clone())
            .collect();

        Self {
            kind: function_type(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters: ToolParametersSchema {
                    schema_type: object_type(),
                    properties,
                    required,
                },
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn description(&self) -> &str {
        &self.function.description
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.function.parameters.properties.keys().map(String::as_str)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_builder_serializes_openai_shape() {
        let tool = ToolDescriptor::function(
            "get_weather",
            "Fetch a forecast for a city",
            [
                ("city", ToolParameter::new("string", "City name").required()),
                ("unit", ToolParameter::new("string", "celsius or fahrenheit")),
            ],
        );

        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "get_weather");
        assert_eq!(json["function"]["parameters"]["type"], "object");
        assert_eq!(json["function"]["parameters"]["required"][0], "city");
        assert_eq!(
            json["function"]["parameters"]["properties"]["city"]["required"],
            true
        );
        assert!(
            json["function"]["parameters"]["properties"]["unit"]
                .get("required")
                .is_none()
        );
        assert_eq!(tool.parameter_names().collect::<Vec<_>>(), vec!["city", "unit"]);
    }

    #[test]
    fn test_tool_call_accepts_mixed_argument_types() {
        let call: ToolCall =
            serde_json::from_str(r#"{"name":"set_light","arguments":{"room":"kitchen","on":true}}"#)
                .unwrap();
        assert_eq!(call.name, "set_light");
        assert_eq!(call.arguments["room"], "kitchen");
        assert_eq!(call.arguments["on"], true);
    }
}
