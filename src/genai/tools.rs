use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageOutputFormat;
use serde_json::{Map, Value, json};

use crate::genai::error::GenAiError;
use crate::genai::types::FunctionCall;

/// Schema primitive types understood by function declarations and response schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Integer,
    Number,
    String,
    Boolean,
    Object,
    Array,
}

impl SchemaType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SchemaType::Integer => "INTEGER",
            SchemaType::Number => "NUMBER",
            SchemaType::String => "STRING",
            SchemaType::Boolean => "BOOLEAN",
            SchemaType::Object => "OBJECT",
            SchemaType::Array => "ARRAY",
        }
    }
}

/// One function parameter definition.
#[derive(Debug, Clone)]
pub struct ToolParam {
    /// Parameter name.
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Schema type.
    pub kind: SchemaType,
    /// Whether the parameter is required.
    pub required: bool,
}

impl ToolParam {
    /// Builds a parameter definition.
    pub fn new(
        name: impl Into<String>,
        kind: SchemaType,
        required: bool,
        description: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            kind,
            required,
        }
    }
}

/// Declaration of a callable local function.
#[derive(Debug, Clone)]
pub struct ToolFunction {
    /// Function name.
    pub name: String,
    /// Function description shown to the model.
    pub description: String,
    /// Parameter definitions.
    pub params: Vec<ToolParam>,
}

impl ToolFunction {
    /// Creates a function definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Appends one parameter definition.
    pub fn with_param(mut self, param: ToolParam) -> Self {
        self.params.push(param);
        self
    }

    fn to_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let mut param_def = Map::new();
            param_def.insert(
                "type".to_string(),
                Value::String(param.kind.as_str().to_string()),
            );
            if let Some(description) = &param.description {
                param_def.insert(
                    "description".to_string(),
                    Value::String(description.clone()),
                );
            }
            properties.insert(param.name.clone(), Value::Object(param_def));
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".to_string(), Value::String("OBJECT".to_string()));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), Value::Array(required));
        }
        Value::Object(schema)
    }

    /// Serializes the function as one entry of `functionDeclarations`.
    pub fn to_declaration(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.to_schema(),
        })
    }
}

/// Handler for a local tool: JSON arguments in, JSON string out.
pub type ToolHandler = Arc<dyn Fn(&Value) -> String + Send + Sync>;

struct RegisteredTool {
    function: ToolFunction,
    handler: ToolHandler,
}

/// Local functions the model may call, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<RegisteredTool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` with its handler, replacing any tool of the same name.
    pub fn register(
        mut self,
        function: ToolFunction,
        handler: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.tools.insert(
            function.name.clone(),
            Arc::new(RegisteredTool {
                function,
                handler: Arc::new(handler),
            }),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn functions(&self) -> Vec<ToolFunction> {
        self.tools
            .values()
            .map(|tool| tool.function.clone())
            .collect()
    }

    /// Runs the handler for `call` and returns its raw JSON string.
    pub fn invoke(&self, call: &FunctionCall) -> String {
        match self.tools.get(&call.name) {
            Some(tool) => (tool.handler)(&call.args),
            None => json!({"error": "Unknown function", "code": 404}).to_string(),
        }
    }

    /// Runs the handler for `call` and shapes the output as a function response payload.
    pub fn invoke_to_response(&self, call: &FunctionCall) -> Value {
        let raw = self.invoke(call);
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(other) => json!({ "result": other }),
            Err(_) => json!({ "result": raw }),
        }
    }
}

/// Normalizes arbitrary image bytes to PNG and returns Base64 payload.
pub fn encode_image_base64_from_bytes(bytes: &[u8]) -> Result<String, GenAiError> {
    let image =
        image::load_from_memory(bytes).map_err(|err| GenAiError::Image(err.to_string()))?;
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)
        .map_err(|err| GenAiError::Image(err.to_string()))?;
    Ok(STANDARD.encode(&buffer))
}
