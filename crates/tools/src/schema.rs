//! Argument tables for the base capabilities.
//!
//! Each capability declares the arguments it accepts. The table drives both
//! the JSON schema shown to the model and validation of merged arguments.

use serde_json::{Map, Value, json};

use chatrelay_config::ToolBinding;
use chatrelay_core::{BaseCapability, ToolError};

/// JSON type of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Boolean,
    Integer,
    Object,
    StringArray,
}

impl ArgKind {
    fn schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Object => json!({"type": "object"}),
            Self::StringArray => json!({"type": "array", "items": {"type": "string"}}),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_u64(),
            Self::Object => value.is_object(),
            Self::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Boolean => "a boolean",
            Self::Integer => "a non-negative integer",
            Self::Object => "an object",
            Self::StringArray => "an array of strings",
        }
    }
}

/// One accepted argument.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub description: &'static str,
}

const fn arg(name: &'static str, kind: ArgKind, required: bool, description: &'static str) -> ArgSpec {
    ArgSpec {
        name,
        kind,
        required,
        description,
    }
}

const SOURCE: ArgSpec = arg(
    "source",
    ArgKind::String,
    false,
    "The name of the source configuration to use",
);

const SEARCH: &[ArgSpec] = &[
    arg("query", ArgKind::String, true, "The search criteria"),
    arg(
        "complex_query",
        ArgKind::Boolean,
        false,
        "When true, the criteria may use Lucene query syntax",
    ),
    arg(
        "do_vector_search",
        ArgKind::Boolean,
        false,
        "Whether or not to use vector search when searching",
    ),
    arg(
        "match_all",
        ArgKind::Boolean,
        false,
        "Whether or not to require all terms within the search to be matched",
    ),
    arg(
        "number_of_results",
        ArgKind::Integer,
        false,
        "The number of relevant results to return",
    ),
    arg(
        "facets",
        ArgKind::StringArray,
        false,
        "The list of facets to return with the search results",
    ),
    arg(
        "use_semantic_ranking",
        ArgKind::Boolean,
        false,
        "Whether or not to sort the results using semantic ranking",
    ),
    SOURCE,
];

const LOOKUP_DOCUMENT: &[ArgSpec] = &[
    arg("field_name", ArgKind::String, true, "The name of the field to search by"),
    arg(
        "field_val",
        ArgKind::String,
        true,
        "Only return documents that have exactly this value in the field",
    ),
    SOURCE,
];

const GET_DOCUMENT: &[ArgSpec] = &[
    arg("id", ArgKind::String, true, "The ID of the document to retrieve"),
    SOURCE,
];

const GET_ITEM: &[ArgSpec] = &[
    arg("item_id", ArgKind::String, true, "The ID of the item to retrieve"),
    arg("partition_key", ArgKind::String, true, "The partition the item lives in"),
    SOURCE,
];

const GET_PARTITION_ITEMS: &[ArgSpec] = &[
    arg("partition_key", ArgKind::String, true, "The partition to list"),
    SOURCE,
];

const UPSERT_ITEM: &[ArgSpec] = &[
    arg("item", ArgKind::Object, true, "The item to insert or update"),
    SOURCE,
];

const DELETE_ITEM: &[ArgSpec] = &[
    arg("item_id", ArgKind::String, true, "The ID of the item to delete"),
    arg("partition_key", ArgKind::String, true, "The partition the item lives in"),
    SOURCE,
];

/// The argument table for a capability.
pub fn arguments(capability: BaseCapability) -> &'static [ArgSpec] {
    match capability {
        BaseCapability::Search => SEARCH,
        BaseCapability::LookupDocument => LOOKUP_DOCUMENT,
        BaseCapability::GetDocument => GET_DOCUMENT,
        BaseCapability::GetItem => GET_ITEM,
        BaseCapability::GetPartitionItems => GET_PARTITION_ITEMS,
        BaseCapability::UpsertItem => UPSERT_ITEM,
        BaseCapability::DeleteItem => DELETE_ITEM,
    }
}

/// Description used when a binding gives none.
pub fn default_description(capability: BaseCapability) -> &'static str {
    match capability {
        BaseCapability::Search => {
            "Search across a dataset, optionally with vector search across the vector fields. \
             Set complex_query to true to use Lucene search syntax."
        }
        BaseCapability::LookupDocument => "Find the document whose field exactly matches a value.",
        BaseCapability::GetDocument => "Retrieve a document from the search index by its ID.",
        BaseCapability::GetItem => "Retrieve a specific item from a document container.",
        BaseCapability::GetPartitionItems => "Get all the items within a partition of a document container.",
        BaseCapability::UpsertItem => "Insert or update an item in a document container.",
        BaseCapability::DeleteItem => "Delete an item from a document container.",
    }
}

/// Model-visible parameter schema: every argument the binding does not fix.
pub fn parameters(binding: &ToolBinding) -> Value {
    let hidden = |name: &str| {
        binding.fixed_args.contains_key(name) || (name == "source" && binding.source.is_some())
    };

    let mut properties = Map::new();
    let mut required = Vec::new();
    for spec in arguments(binding.capability) {
        if hidden(spec.name) {
            continue;
        }
        let mut schema = spec.kind.schema();
        schema["description"] = json!(spec.description);
        properties.insert(spec.name.to_string(), schema);
        if spec.required {
            required.push(json!(spec.name));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Check merged arguments against the capability's table.
pub fn validate(tool_name: &str, capability: BaseCapability, args: &Map<String, Value>) -> Result<(), ToolError> {
    let table = arguments(capability);

    if let Some(unknown) = args.keys().find(|k| !table.iter().any(|s| s.name == k.as_str())) {
        return Err(ToolError::invalid(tool_name, format!("unexpected argument '{unknown}'")));
    }

    for spec in table {
        match args.get(spec.name) {
            None | Some(Value::Null) if spec.required => {
                return Err(ToolError::invalid(tool_name, format!("missing required argument '{}'", spec.name)));
            }
            None | Some(Value::Null) => {}
            Some(value) if !spec.kind.accepts(value) => {
                return Err(ToolError::invalid(
                    tool_name,
                    format!("argument '{}' must be {}", spec.name, spec.kind.name()),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
