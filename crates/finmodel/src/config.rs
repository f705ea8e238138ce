//! Catalog configuration
//!
//! The serde shape of a field catalog document:
//!
//! ```json
//! {
//!   "fields": [ { "id": "live_case", "name": "Live case", "type": "named_cell", ... } ],
//!   "sections": [
//!     {
//!       "id": "project_details",
//!       "name": "Project details",
//!       "headings": [
//!         { "id": "project_information", "name": "Project Information",
//!           "fields": [ { "id": "field_41", ... }, "field_838" ] }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! A heading entry is either a full field definition or the id of a field defined
//! elsewhere in the document.

use finmodel_core::{ConfigError, Error, FieldDefinition, Result};
use serde::{Deserialize, Serialize};

/// A whole catalog document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Canonical definitions that belong to no heading (model constants, selectors)
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

/// One section of the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub headings: Vec<HeadingConfig>,
}

/// One heading of a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadingConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<HeadingEntry>,
}

/// Field listed under a heading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeadingEntry {
    /// Id of a field defined elsewhere
    Ref(String),
    /// Full definition
    Field(FieldDefinition),
}

impl CatalogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON catalog document
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(vec![ConfigError::Parse(e.to_string())]))
    }

    /// Add a field to the flat field table
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_section(mut self, section: SectionConfig) -> Self {
        self.sections.push(section);
        self
    }
}

impl SectionConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
            color: None,
            headings: Vec::new(),
        }
    }

    pub fn with_heading(mut self, heading: HeadingConfig) -> Self {
        self.headings.push(heading);
        self
    }
}

impl HeadingConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// List a full field definition
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(HeadingEntry::Field(field));
        self
    }

    /// List a field defined elsewhere by id
    pub fn with_ref(mut self, id: impl Into<String>) -> Self {
        self.fields.push(HeadingEntry::Ref(id.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finmodel_core::{DataType, FieldType};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_mixed_heading_entries() {
        let json = r#"{
            "sections": [{
                "id": "project_details",
                "name": "Project details",
                "icon": "📋",
                "headings": [{
                    "id": "project_information",
                    "name": "Project Information",
                    "fields": [
                        { "id": "field_32", "name": "Construction start", "row": 32,
                          "type": "input", "dataType": "date", "value": "2025-01-01" },
                        "field_838"
                    ]
                }]
            }]
        }"#;

        let config = CatalogConfig::from_json_str(json).unwrap();
        assert!(config.fields.is_empty());
        let heading = &config.sections[0].headings[0];
        assert_eq!(heading.fields.len(), 2);
        assert_eq!(heading.fields[1], HeadingEntry::Ref("field_838".into()));
        match &heading.fields[0] {
            HeadingEntry::Field(field) => {
                assert_eq!(field.field_type, FieldType::Input);
                assert_eq!(field.data_type, DataType::Date);
            }
            other => panic!("Expected a field definition, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let err = CatalogConfig::from_json_str("{ \"sections\": 3 }").unwrap_err();
        assert!(matches!(err.config_errors(), [ConfigError::Parse(_)]));
    }
}
