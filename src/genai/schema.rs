//! Response schemas for structured JSON output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::genai::tools::SchemaType;

/// Subset of the OpenAPI schema accepted by `responseSchema`.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    kind: SchemaType,
    description: Option<String>,
    minimum: Option<i64>,
    maximum: Option<i64>,
    items: Option<Box<ResponseSchema>>,
    properties: Vec<(String, ResponseSchema, bool)>,
}

impl ResponseSchema {
    fn of(kind: SchemaType) -> Self {
        Self {
            kind,
            description: None,
            minimum: None,
            maximum: None,
            items: None,
            properties: Vec::new(),
        }
    }

    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn integer() -> Self {
        Self::of(SchemaType::Integer)
    }

    pub fn array(items: ResponseSchema) -> Self {
        let mut schema = Self::of(SchemaType::Array);
        schema.items = Some(Box::new(items));
        schema
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn range(mut self, minimum: i64, maximum: i64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    /// Adds a required property; declaration order becomes `propertyOrdering`.
    pub fn property(mut self, name: impl Into<String>, schema: ResponseSchema) -> Self {
        self.properties.push((name.into(), schema, true));
        self
    }

    pub fn optional_property(mut self, name: impl Into<String>, schema: ResponseSchema) -> Self {
        self.properties.push((name.into(), schema, false));
        self
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::from(self.kind.as_str()));
        if let Some(description) = &self.description {
            map.insert("description".to_string(), Value::from(description.as_str()));
        }
        if let Some(minimum) = self.minimum {
            map.insert("minimum".to_string(), Value::from(minimum));
        }
        if let Some(maximum) = self.maximum {
            map.insert("maximum".to_string(), Value::from(maximum));
        }
        if let Some(items) = &self.items {
            map.insert("items".to_string(), items.to_json());
        }
        if !self.properties.is_empty() {
            let mut properties = Map::new();
            let mut ordering = Vec::new();
            let mut required = Vec::new();
            for (name, schema, is_required) in &self.properties {
                properties.insert(name.clone(), schema.to_json());
                ordering.push(Value::from(name.as_str()));
                if *is_required {
                    required.push(Value::from(name.as_str()));
                }
            }
            map.insert("properties".to_string(), Value::Object(properties));
            map.insert("propertyOrdering".to_string(), Value::Array(ordering));
            if !required.is_empty() {
                map.insert("required".to_string(), Value::Array(required));
            }
        }
        Value::Object(map)
    }
}

/// Structured summary of a product review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductReview {
    pub product_name: String,
    pub sentiment_score: i64,
    pub key_pros: Vec<String>,
    pub key_cons: Vec<String>,
}

impl ProductReview {
    pub fn schema() -> ResponseSchema {
        ResponseSchema::object()
            .describe("Structured data model for a product review summary")
            .property(
                "product_name",
                ResponseSchema::string().describe("The formal, full name of the product."),
            )
            .property(
                "sentiment_score",
                ResponseSchema::integer()
                    .describe("The sentiment rating from 1 (bad) to 10 (excellent).")
                    .range(1, 10),
            )
            .property(
                "key_pros",
                ResponseSchema::array(ResponseSchema::string())
                    .describe("A list of 2-3 main positive points about the product."),
            )
            .property(
                "key_cons",
                ResponseSchema::array(ResponseSchema::string())
                    .describe("A list of 2-3 main negative points about the product."),
            )
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=10).contains(&self.sentiment_score) {
            return Err(format!(
                "sentiment_score {} is outside the 1-10 range",
                self.sentiment_score
            ));
        }
        if self.product_name.trim().is_empty() {
            return Err("product_name is empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn review_schema_lists_properties_in_order() {
        let schema = ProductReview::schema().to_json();
        assert_eq!(schema["type"], json!("OBJECT"));
        assert_eq!(
            schema["propertyOrdering"],
            json!(["product_name", "sentiment_score", "key_pros", "key_cons"])
        );
        assert_eq!(schema["properties"]["sentiment_score"]["minimum"], json!(1));
        assert_eq!(schema["properties"]["sentiment_score"]["maximum"], json!(10));
        assert_eq!(schema["properties"]["key_pros"]["items"]["type"], json!("STRING"));
    }

    #[test]
    fn validate_rejects_out_of_range_score() {
        let mut review = ProductReview {
            product_name: "Laptop".to_string(),
            sentiment_score: 8,
            key_pros: vec!["battery".to_string()],
            key_cons: vec!["heat".to_string()],
        };
        assert!(review.validate().is_ok());
        review.sentiment_score = 11;
        assert!(review.validate().unwrap_err().contains("outside the 1-10 range"));
    }
}
