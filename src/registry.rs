//! The tool registry: one immutable table shared by every transport.
//!
//! Each transport previously needing its own tool list is the classic drift
//! trap; here `tools/list`, the REST surface, the capabilities document, and
//! the OpenAI-compatible listing are all projections of this single table.
//! The registry is built once at startup and only read afterwards, so it is
//! shared across tasks without synchronization.

use serde_json::{Map, Value, json};

/// One argument field of a tool.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Canonical field name (also the upstream field name)
    pub name: &'static str,
    /// Human-readable description, surfaced in the input schema
    pub description: &'static str,
    /// Whether the field must be present in `params.arguments`
    pub required: bool,
    /// Closed value set, if the field is an enumeration
    pub allowed_values: Option<&'static [&'static str]>,
}

/// A deprecated field alias accepted for backward compatibility.
///
/// Aliases are translated to their canonical field and logged as deprecated;
/// nothing outside this table is aliased.
#[derive(Debug, Clone, Copy)]
pub struct FieldAlias {
    /// Legacy field name as sent by old clients
    pub from: &'static str,
    /// Canonical field the value maps to
    pub to: &'static str,
    /// When true, an array value is joined into a comma-separated string
    pub join_array: bool,
}

/// A tool in the catalog: schema, required fields, and upstream endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ToolDescriptor {
    /// Unique tool name
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Upstream endpoint path this tool forwards to
    pub endpoint: &'static str,
    /// Argument fields, in declaration order
    pub fields: &'static [FieldSpec],
    /// Deprecated aliases accepted for this tool
    pub aliases: &'static [FieldAlias],
}

impl ToolDescriptor {
    /// Required field names in declaration order.
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }

    /// JSON-Schema-like input schema for this tool.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields {
            let mut spec = Map::new();
            spec.insert("type".into(), json!("string"));
            spec.insert("description".into(), json!(field.description));
            if let Some(values) = field.allowed_values {
                spec.insert("enum".into(), json!(values));
            }
            properties.insert(field.name.to_string(), Value::Object(spec));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_fields().collect::<Vec<_>>(),
        })
    }

    /// Wire representation for MCP `tools/list`.
    pub fn to_mcp(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }

    /// OpenAI function-calling representation.
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema(),
            },
        })
    }
}

/// The static tool catalog.
const CATALOG: &[ToolDescriptor] = &[
    ToolDescriptor {
        name: "process_chart",
        description: "Analyze a patient chart and suggest medical codes",
        endpoint: "/chart/analyze",
        fields: &[
            FieldSpec {
                name: "text",
                description: "Patient chart text to analyze",
                required: true,
                allowed_values: None,
            },
            FieldSpec {
                name: "specialty",
                description: "Medical specialty context (e.g. Cardiology)",
                required: false,
                allowed_values: None,
            },
            FieldSpec {
                name: "taxonomy_code",
                description: "Provider taxonomy code",
                required: false,
                allowed_values: None,
            },
            FieldSpec {
                name: "insurance",
                description: "Insurance carrier context",
                required: false,
                allowed_values: None,
            },
        ],
        aliases: &[FieldAlias {
            from: "chart",
            to: "text",
            join_array: false,
        }],
    },
    ToolDescriptor {
        name: "validate_codes",
        description: "Validate human-assigned medical codes against a patient chart",
        endpoint: "/codes/validate",
        fields: &[
            FieldSpec {
                name: "patient_chart",
                description: "Patient chart text the codes were assigned from",
                required: true,
                allowed_values: None,
            },
            FieldSpec {
                name: "human_coded_output",
                description: "Comma-separated list of assigned codes",
                required: true,
                allowed_values: None,
            },
            FieldSpec {
                name: "specialty",
                description: "Medical specialty context",
                required: false,
                allowed_values: None,
            },
        ],
        aliases: &[FieldAlias {
            from: "codes",
            to: "human_coded_output",
            join_array: true,
        }],
    },
    ToolDescriptor {
        name: "calculate_raf",
        description: "Calculate a risk-adjustment factor (RAF) score",
        endpoint: "/raf/calculate",
        fields: &[
            FieldSpec {
                name: "demographics",
                description: "Patient demographics summary",
                required: true,
                allowed_values: None,
            },
            FieldSpec {
                name: "illnesses",
                description: "Documented illnesses and conditions",
                required: true,
                allowed_values: None,
            },
            FieldSpec {
                name: "model",
                description: "CMS-HCC model version",
                required: true,
                allowed_values: Some(&["V28", "V24", "V22"]),
            },
        ],
        aliases: &[],
    },
    ToolDescriptor {
        name: "qa_validate_codes",
        description: "QA-validate coded output and estimate denial risk",
        endpoint: "/codes/qa-validate",
        fields: &[FieldSpec {
            name: "coded_input",
            description: "Coded output to QA-validate",
            required: true,
            allowed_values: None,
        }],
        aliases: &[],
    },
    ToolDescriptor {
        name: "parse_eob",
        description: "Parse an explanation-of-benefits (EOB) document",
        endpoint: "/eob/parse",
        fields: &[FieldSpec {
            name: "content",
            description: "EOB document content",
            required: true,
            allowed_values: None,
        }],
        aliases: &[],
    },
];

/// The registry handed to the dispatch core and every transport adapter.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry;

impl ToolRegistry {
    /// Create the registry over the static catalog.
    pub fn new() -> Self {
        Self
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Option<&'static ToolDescriptor> {
        CATALOG.iter().find(|t| t.name == name)
    }

    /// All tools in insertion order.
    pub fn list(&self) -> &'static [ToolDescriptor] {
        CATALOG
    }

    /// MCP `tools/list` result payload.
    pub fn mcp_tool_list(&self) -> Value {
        json!({ "tools": CATALOG.iter().map(|t| t.to_mcp()).collect::<Vec<_>>() })
    }

    /// OpenAI function-calling tool list (`/capabilities/openai-tools`).
    pub fn openai_tool_list(&self) -> Value {
        json!({ "tools": CATALOG.iter().map(|t| t.to_openai()).collect::<Vec<_>>() })
    }

    /// Capabilities discovery document.
    pub fn capabilities_document(&self, service: &str, version: &str) -> Value {
        json!({
            "service": service,
            "version": version,
            "protocol": "Model Context Protocol",
            "transports": ["http", "websocket", "stdio"],
            "tools": CATALOG.iter().map(|t| t.to_mcp()).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_every_catalog_entry() {
        let registry = ToolRegistry::new();
        for tool in registry.list() {
            assert_eq!(registry.lookup(tool.name).unwrap().name, tool.name);
        }
        assert!(registry.lookup("no_such_tool").is_none());
    }

    #[test]
    fn catalog_order_is_stable() {
        let names: Vec<_> = ToolRegistry::new().list().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "process_chart",
                "validate_codes",
                "calculate_raf",
                "qa_validate_codes",
                "parse_eob",
            ]
        );
    }

    #[test]
    fn required_fields_match_catalog() {
        let registry = ToolRegistry::new();
        let raf = registry.lookup("calculate_raf").unwrap();
        assert_eq!(
            raf.required_fields().collect::<Vec<_>>(),
            vec!["demographics", "illnesses", "model"]
        );
        let chart = registry.lookup("process_chart").unwrap();
        assert_eq!(chart.required_fields().collect::<Vec<_>>(), vec!["text"]);
    }

    #[test]
    fn model_field_is_enumerated() {
        let raf = ToolRegistry::new().lookup("calculate_raf").unwrap();
        let schema = raf.input_schema();
        assert_eq!(
            schema["properties"]["model"]["enum"],
            serde_json::json!(["V28", "V24", "V22"])
        );
    }

    #[test]
    fn mcp_projection_has_input_schema() {
        let wire = ToolRegistry::new().mcp_tool_list();
        let tools = wire["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 5);
        for tool in tools {
            assert!(tool["name"].is_string());
            assert!(tool["inputSchema"]["required"].is_array());
        }
    }

    #[test]
    fn openai_projection_wraps_function() {
        let wire = ToolRegistry::new().openai_tool_list();
        let first = &wire["tools"][0];
        assert_eq!(first["type"], "function");
        assert_eq!(first["function"]["name"], "process_chart");
        assert!(first["function"]["parameters"]["properties"]["text"].is_object());
    }
}
