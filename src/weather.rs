//! Local weather lookup exposed to the model as a callable tool.

use serde::Serialize;
use serde_json::Value;

use crate::genai::tools::{SchemaType, ToolFunction, ToolParam, ToolRegistry};

pub const WEATHER_TOOL_NAME: &str = "get_current_weather";

#[derive(Debug, Serialize)]
struct WeatherReport {
    temperature: &'static str,
    conditions: &'static str,
}

#[derive(Debug, Serialize)]
struct LookupError {
    error: &'static str,
    code: u16,
}

/// Returns the current weather for a city as a JSON string.
///
/// Matching is case-insensitive on a substring, so "Boston, MA" resolves too.
pub fn get_current_weather(city: &str) -> String {
    let city = city.to_lowercase();
    let report = if city.contains("boston") {
        Some(WeatherReport {
            temperature: "12°C",
            conditions: "Cloudy",
        })
    } else if city.contains("tokyo") {
        Some(WeatherReport {
            temperature: "25°C",
            conditions: "Sunny",
        })
    } else {
        None
    };

    let encoded = match report {
        Some(report) => serde_json::to_string(&report),
        None => serde_json::to_string(&LookupError {
            error: "City Not Found",
            code: 404,
        }),
    };
    encoded.unwrap_or_default()
}

pub fn weather_function() -> ToolFunction {
    ToolFunction::new(
        WEATHER_TOOL_NAME,
        "Returns the current weather for a specific city.",
    )
    .with_param(ToolParam::new(
        "city",
        SchemaType::String,
        true,
        Some("The city name, e.g., 'San Francisco' or 'Tokyo'.".to_string()),
    ))
}

/// Registry holding the weather tool.
pub fn weather_tools() -> ToolRegistry {
    ToolRegistry::new().register(weather_function(), |args: &Value| {
        let city = args["city"].as_str().unwrap_or_default();
        get_current_weather(city)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genai::types::FunctionCall;
    use serde_json::json;

    #[test]
    fn boston_returns_fixed_payload() {
        assert_eq!(
            get_current_weather("Boston"),
            r#"{"temperature":"12°C","conditions":"Cloudy"}"#
        );
        assert_eq!(get_current_weather("downtown BOSTON, MA"), get_current_weather("boston"));
    }

    #[test]
    fn unknown_city_returns_not_found() {
        assert_eq!(
            get_current_weather("Paris"),
            r#"{"error":"City Not Found","code":404}"#
        );
    }

    #[test]
    fn registry_dispatches_city_argument() {
        let call = FunctionCall {
            name: WEATHER_TOOL_NAME.to_string(),
            args: json!({"city": "Tokyo"}),
        };
        assert_eq!(
            weather_tools().invoke_to_response(&call),
            json!({"temperature": "25°C", "conditions": "Sunny"})
        );
    }

    #[test]
    fn missing_city_argument_is_not_found() {
        let call = FunctionCall {
            name: WEATHER_TOOL_NAME.to_string(),
            args: json!({}),
        };
        assert_eq!(
            weather_tools().invoke_to_response(&call),
            json!({"error": "City Not Found", "code": 404})
        );
    }
}
