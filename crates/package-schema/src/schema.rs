//! JSON schema definitions for package validation.

/// JSON Schema for META-INF/vault/manifest.json.
pub const MANIFEST_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "$id": "https://vaultpack.dev/schemas/manifest.json",
  "title": "Vaultpack Package Manifest",
  "type": "object",
  "required": ["schemaVersion", "package", "filters"],
  "properties": {
    "schemaVersion": {
      "type": "string",
      "pattern": "^\\d+\\.\\d+\\.\\d+$"
    },
    "package": {
      "type": "object",
      "required": ["name", "version"],
      "properties": {
        "group": { "type": ["string", "null"] },
        "name": { "type": "string", "minLength": 1 },
        "version": { "type": "string", "minLength": 1 },
        "description": { "type": ["string", "null"] },
        "createdAt": { "type": ["string", "null"], "format": "date-time" },
        "createdBy": { "type": ["string", "null"] },
        "dependencies": {
          "type": "array",
          "items": {
            "type": "object",
            "required": ["name"],
            "properties": {
              "group": { "type": ["string", "null"] },
              "name": { "type": "string" },
              "versionRange": { "type": ["string", "null"] }
            }
          }
        }
      }
    },
    "filters": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["root"],
        "properties": {
          "root": { "type": "string", "pattern": "^/" },
          "mode": { "type": "string", "enum": ["update", "replace", "merge"] },
          "rules": {
            "type": "array",
            "items": {
              "type": "object",
              "minProperties": 1,
              "maxProperties": 1,
              "properties": {
                "include": { "type": "string" },
                "exclude": { "type": "string" }
              },
              "additionalProperties": false
            }
          }
        }
      }
    },
    "properties": {
      "type": "object",
      "additionalProperties": { "type": "string" }
    }
  }
}"#;

/// JSON Schema for a `.content.json` node descriptor.
pub const DESCRIPTOR_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "$id": "https://vaultpack.dev/schemas/descriptor.json",
  "title": "Vaultpack Node Descriptor",
  "type": "object",
  "required": ["primaryType"],
  "properties": {
    "primaryType": { "type": "string", "minLength": 1 },
    "properties": {
      "type": "object",
      "additionalProperties": {
        "type": "object",
        "required": ["type", "value"],
        "properties": {
          "type": {
            "type": "string",
            "enum": ["String", "Strings", "Long", "Double", "Boolean", "Date", "Binary"]
          }
        }
      }
    },
    "childOrder": { "type": "array", "items": { "type": "string" } },
    "acl": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["principal", "privileges"],
        "properties": {
          "principal": { "type": "string", "minLength": 1 },
          "privileges": { "type": "array", "items": { "type": "string" } },
          "allow": { "type": "boolean" }
        }
      }
    }
  }
}"#;

/// Get the manifest schema as a parsed JSON value.
pub fn manifest_schema() -> serde_json::Value {
    serde_json::from_str(MANIFEST_SCHEMA).expect("Invalid manifest schema")
}

/// Get the descriptor schema as a parsed JSON value.
pub fn descriptor_schema() -> serde_json::Value {
    serde_json::from_str(DESCRIPTOR_SCHEMA).expect("Invalid descriptor schema")
}
