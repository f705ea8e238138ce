//! Registry statistics

use crate::registry::Registry;
use finmodel_core::FieldType;
use finmodel_formula::FormulaKindTag;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Lowest and highest source row carried by any field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowRange {
    pub min: u32,
    pub max: u32,
}

/// Aggregate counts over a registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStatistics {
    pub total_sections: usize,
    pub total_headings: usize,
    pub total_fields: usize,
    pub input_fields: usize,
    pub calculated_fields: usize,
    pub formula_fields: usize,
    pub named_cell_fields: usize,
    /// Fields that carry a formula string
    pub with_formulas: usize,
    /// `None` when no field has a row
    pub row_range: Option<RowRange>,
    /// Number of formulas of each kind
    pub formula_kinds: BTreeMap<FormulaKindTag, usize>,
}

impl Registry {
    /// Count fields by type, rows and formula kinds
    pub fn compute_statistics(&self) -> RegistryStatistics {
        let mut stats = RegistryStatistics {
            total_sections: self.sections().len(),
            total_headings: self.sections().iter().map(|s| s.headings().len()).sum(),
            total_fields: self.len(),
            ..Default::default()
        };

        for field in self.fields() {
            match field.field_type {
                FieldType::Input => stats.input_fields += 1,
                FieldType::Calculated => stats.calculated_fields += 1,
                FieldType::Formula => stats.formula_fields += 1,
                FieldType::NamedCell => stats.named_cell_fields += 1,
            }

            if field.formula.is_some() {
                stats.with_formulas += 1;
            }

            if let Some(row) = field.row {
                stats.row_range = Some(match stats.row_range {
                    Some(range) => RowRange {
                        min: range.min.min(row),
                        max: range.max.max(row),
                    },
                    None => RowRange { min: row, max: row },
                });
            }
        }

        for field in self.computed_fields() {
            if let Ok(Some(classification)) = self.classification(&field.id) {
                *stats.formula_kinds.entry(classification.tag()).or_insert(0) += 1;
            }
        }

        stats
    }
}

impl fmt::Display for RegistryStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sections:          {}", self.total_sections)?;
        writeln!(f, "Headings:          {}", self.total_headings)?;
        writeln!(f, "Fields:            {}", self.total_fields)?;
        writeln!(f, "  input:           {}", self.input_fields)?;
        writeln!(f, "  calculated:      {}", self.calculated_fields)?;
        writeln!(f, "  formula:         {}", self.formula_fields)?;
        writeln!(f, "  named cell:      {}", self.named_cell_fields)?;
        writeln!(f, "With formulas:     {}", self.with_formulas)?;
        match self.row_range {
            Some(range) => writeln!(f, "Rows:              {}..{}", range.min, range.max)?,
            None => writeln!(f, "Rows:              -")?,
        }
        write!(f, "Formula kinds:")?;
        if self.formula_kinds.is_empty() {
            write!(f, "     -")?;
        }
        for (kind, count) in &self.formula_kinds {
            write!(f, "\n  {:<17}{}", format!("{}:", kind), count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CatalogConfig, HeadingConfig, SectionConfig};
    use finmodel_core::{DataType, FieldDefinition};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compute_statistics() {
        let config = CatalogConfig::new()
            .with_field(FieldDefinition::named_cell("thousand", "Thousand", DataType::Number, "thousand").with_default(1000))
            .with_section(
                SectionConfig::new("project_details", "Project details")
                    .with_heading(
                        HeadingConfig::new("project_information", "Project Information")
                            .with_field(FieldDefinition::input("field_32", "Start", DataType::Date).with_row(32))
                            .with_field(FieldDefinition::input("field_37", "Months", DataType::Number).with_row(37))
                            .with_field(
                                FieldDefinition::calculated("field_41", "End", DataType::Date, "=EDATE(F32, F37) - 1")
                                    .with_row(41),
                            ),
                    )
                    .with_heading(
                        HeadingConfig::new("summary", "Summary")
                            .with_ref("field_41")
                            .with_field(FieldDefinition::calculated("k", "K", DataType::Number, "=F37 / thousand")),
                    ),
            );

        let stats = Registry::load(config).unwrap().compute_statistics();
        assert_eq!(
            stats,
            RegistryStatistics {
                total_sections: 1,
                total_headings: 2,
                total_fields: 5,
                input_fields: 2,
                calculated_fields: 2,
                formula_fields: 0,
                named_cell_fields: 1,
                with_formulas: 2,
                row_range: Some(RowRange { min: 32, max: 41 }),
                formula_kinds: BTreeMap::from([
                    (FormulaKindTag::DateOffset, 1),
                    (FormulaKindTag::Arithmetic, 1),
                ]),
            }
        );
    }

    #[test]
    fn test_empty_registry() {
        let stats = Registry::load(CatalogConfig::new()).unwrap().compute_statistics();
        assert_eq!(stats.total_fields, 0);
        assert_eq!(stats.row_range, None);
        assert!(stats.to_string().contains("Rows:              -"));
    }

    #[test]
    fn test_kinds_serialize_as_names() {
        let mut stats = RegistryStatistics::default();
        stats.formula_kinds.insert(FormulaKindTag::IndexedLookup, 3);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["formula_kinds"]["indexed_lookup"], 3);
    }
}
