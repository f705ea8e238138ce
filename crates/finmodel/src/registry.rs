//! Field registry
//!
//! The validated, immutable catalog of every field of the model. A [`Registry`] is
//! built once from a [`CatalogConfig`], never mutated afterwards, and can be shared
//! across threads behind an `Arc` or a `&'static` reference.
//!
//! Building a registry checks the whole catalog and reports every problem at once:
//! duplicate ids and aliases, formula presence, default and case-table values,
//! validation patterns, formula references and dependency cycles.
//!
//! # Example
//!
//! ```rust
//! use finmodel::prelude::*;
//!
//! let config = CatalogConfig::new()
//!     .with_field(FieldDefinition::input("field_58", "Total shareholding", DataType::Percentage).with_row(58))
//!     .with_field(FieldDefinition::calculated(
//!         "field_59",
//!         "Shareholding check",
//!         DataType::Number,
//!         "= IF( F58 = 100%, 0, 1 )",
//!     ));
//!
//! let registry = Registry::load(config).unwrap();
//! assert_eq!(registry.len(), 2);
//! assert_eq!(registry.dependencies_of("field_59").unwrap()[0].id, "field_58");
//! ```

use crate::config::{CatalogConfig, HeadingEntry};
use ahash::{AHashMap, AHashSet};
use finmodel_core::{
    ConfigError, Error, FieldDefinition, FieldType, FieldValue, Result, VALUE_COLUMN,
};
use finmodel_formula::{
    classify, Classification, DependencyGraph, FormulaKind, RangeReference, Reference,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// The catalog transcribed from the source financial model
const BUILTIN_CATALOG: &str = include_str!("../catalog/financial_model.json");

static BUILTIN: Lazy<std::result::Result<Registry, Vec<ConfigError>>> = Lazy::new(|| {
    Registry::from_json_str(BUILTIN_CATALOG).map_err(|e| e.config_errors().to_vec())
});

/// A section of the catalog
#[derive(Debug, Clone)]
pub struct Section {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    headings: Vec<Heading>,
}

impl Section {
    /// Headings in catalog order
    pub fn headings(&self) -> &[Heading] {
        &self.headings
    }

    pub fn heading(&self, id: &str) -> Option<&Heading> {
        self.headings.iter().find(|h| h.id == id)
    }
}

/// A heading within a section; lists fields by arena index
#[derive(Debug, Clone)]
pub struct Heading {
    pub id: String,
    pub name: String,
    fields: Vec<usize>,
}

/// Load-time artifacts of one field
#[derive(Debug)]
pub(crate) struct CompiledField {
    pub(crate) pattern: Option<Regex>,
    pub(crate) default: Option<FieldValue>,
    pub(crate) cases: Vec<FieldValue>,
    pub(crate) formula: Option<Classification>,
    /// Read by some `INDEX` formula as its case selector
    pub(crate) case_selector: bool,
}

/// Outcome of resolving one formula reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Field(usize),
    Missing,
    Ambiguous(Vec<usize>),
}

/// Validated field catalog
#[derive(Debug)]
pub struct Registry {
    /// Canonical field table; sections and headings hold indices into it
    fields: Vec<FieldDefinition>,
    compiled: Vec<CompiledField>,
    sections: Vec<Section>,
    /// Uppercase id → index
    by_id: AHashMap<String, usize>,
    /// Uppercase named-cell alias → index
    by_alias: AHashMap<String, usize>,
    by_row: AHashMap<u32, Vec<usize>>,
    /// Row → index of the field owning that row's case table
    case_tables: AHashMap<u32, usize>,
    graph: DependencyGraph,
    /// Computed fields, precedents first
    order: Vec<usize>,
}

impl Registry {
    /// Build and validate a registry
    pub fn load(config: CatalogConfig) -> Result<Self> {
        let mut errors = Vec::new();

        let (fields, section_entries) = collect_fields(config, &mut errors);
        let by_id = fields
            .iter()
            .enumerate()
            .map(|(idx, field)| (field.id.to_uppercase(), idx))
            .collect::<AHashMap<_, _>>();

        let sections = build_sections(section_entries, &by_id, &mut errors);
        let by_alias = index_aliases(&fields, &mut errors);
        let compiled: Vec<CompiledField> = fields
            .iter()
            .map(|field| compile_field(field, &mut errors))
            .collect();

        let mut by_row: AHashMap<u32, Vec<usize>> = AHashMap::new();
        let mut case_tables: AHashMap<u32, usize> = AHashMap::new();
        for (idx, field) in fields.iter().enumerate() {
            let Some(row) = field.row else { continue };
            by_row.entry(row).or_default().push(idx);
            if !compiled[idx].cases.is_empty() {
                if let Some(&owner) = case_tables.get(&row) {
                    errors.push(ConfigError::InvalidCaseTable {
                        field: field.id.clone(),
                        reason: format!(
                            "row {} already has the case table of '{}'",
                            row, fields[owner].id
                        ),
                    });
                } else {
                    case_tables.insert(row, idx);
                }
            }
        }

        let node_count = fields.len();
        let mut registry = Self {
            fields,
            compiled,
            sections,
            by_id,
            by_alias,
            by_row,
            case_tables,
            graph: DependencyGraph::new(node_count),
            order: Vec::new(),
        };

        registry.link(&mut errors);

        match registry.graph.topological_order() {
            Ok(order) => {
                registry.order = order
                    .into_iter()
                    .filter(|&idx| registry.fields[idx].is_computed())
                    .collect();
            }
            Err(cycles) => {
                for cycle in cycles {
                    errors.push(ConfigError::CyclicDependency {
                        path: cycle
                            .into_iter()
                            .map(|idx| registry.fields[idx].id.clone())
                            .collect(),
                    });
                }
            }
        }

        if !errors.is_empty() {
            for error in &errors {
                log::warn!("catalog: {}", error);
            }
            return Err(Error::Config(errors));
        }

        log::debug!(
            "Loaded field registry: {} fields in {} sections, {} computed",
            registry.fields.len(),
            registry.sections.len(),
            registry.order.len()
        );

        Ok(registry)
    }

    /// Build a registry from a JSON catalog document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::load(CatalogConfig::from_json_str(json)?)
    }

    /// Build a registry from a JSON catalog file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// The built-in catalog of the renewable-energy financial model
    ///
    /// Loaded on first use and shared for the rest of the process.
    pub fn builtin() -> Result<&'static Registry> {
        BUILTIN
            .as_ref()
            .map_err(|errors| Error::Config(errors.clone()))
    }

    /// Resolve formula references and build the dependency graph
    fn link(&mut self, errors: &mut Vec<ConfigError>) {
        let mut edges = Vec::new();
        let mut selectors = Vec::new();

        for (idx, field) in self.fields.iter().enumerate() {
            let Some(classification) = &self.compiled[idx].formula else {
                continue;
            };

            for operand in &classification.operands {
                match self.resolve_index(operand) {
                    Resolution::Field(precedent) => edges.push((precedent, idx)),
                    Resolution::Missing => errors.push(ConfigError::DanglingReference {
                        field: field.id.clone(),
                        reference: operand.to_string(),
                    }),
                    Resolution::Ambiguous(candidates) => {
                        errors.push(ConfigError::AmbiguousReference {
                            field: field.id.clone(),
                            reference: operand.to_string(),
                            candidates: candidates
                                .into_iter()
                                .map(|c| self.fields[c].id.clone())
                                .collect(),
                        })
                    }
                }
            }

            if let FormulaKind::IndexedLookup { range, selector } = &classification.kind {
                if let Resolution::Field(selector_idx) = self.resolve_index(selector) {
                    selectors.push(selector_idx);
                }
                match self.case_tables.get(&range.start.row) {
                    Some(&owner) => {
                        let len = self.compiled[owner].cases.len();
                        if len != range.width() {
                            errors.push(ConfigError::InvalidCaseTable {
                                field: self.fields[owner].id.clone(),
                                reason: format!(
                                    "'{}' reads {} cases from {} but the table has {}",
                                    field.id,
                                    range.width(),
                                    range,
                                    len
                                ),
                            });
                        }
                    }
                    None => errors.push(ConfigError::DanglingReference {
                        field: field.id.clone(),
                        reference: range.to_string(),
                    }),
                }
            }

            if classification.is_recognized() {
                log::trace!(
                    "{}: {} formula over {} operand(s)",
                    field.id,
                    classification.tag(),
                    classification.operands.len()
                );
            } else {
                log::warn!(
                    "Field '{}' has an unrecognized formula '{}'",
                    field.id,
                    field.formula.as_deref().unwrap_or_default()
                );
            }
        }

        for (precedent, dependent) in edges {
            self.graph.add_dependency(precedent, dependent);
        }
        for idx in selectors {
            self.compiled[idx].case_selector = true;
        }
    }

    // === Lookup ===

    /// Get a field by id (case-insensitive)
    pub fn get_field(&self, id: &str) -> Result<&FieldDefinition> {
        self.index_of(id)
            .map(|idx| &self.fields[idx])
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Get a field by named-cell alias (case-insensitive)
    pub fn field_by_alias(&self, alias: &str) -> Result<&FieldDefinition> {
        self.by_alias
            .get(&alias.to_uppercase())
            .map(|&idx| &self.fields[idx])
            .ok_or_else(|| Error::NotFound(alias.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_of(id).is_some()
    }

    /// Number of distinct fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in registration order
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    /// Fields of one type, in registration order
    pub fn list_by_type(&self, field_type: FieldType) -> Vec<&FieldDefinition> {
        self.fields
            .iter()
            .filter(|f| f.field_type == field_type)
            .collect()
    }

    /// Fields the user fills in
    pub fn input_fields(&self) -> Vec<&FieldDefinition> {
        self.list_by_type(FieldType::Input)
    }

    /// Calculated and formula fields, in registration order
    pub fn computed_fields(&self) -> Vec<&FieldDefinition> {
        self.fields.iter().filter(|f| f.is_computed()).collect()
    }

    /// Pre-classified formula of a field; `None` for fields without one
    pub fn classification(&self, id: &str) -> Result<Option<&Classification>> {
        let idx = self.index_of(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(self.compiled[idx].formula.as_ref())
    }

    // === Sections ===

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, id: &str) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::SectionNotFound(id.to_string()))
    }

    pub fn headings(&self, section_id: &str) -> Result<&[Heading]> {
        Ok(self.section(section_id)?.headings())
    }

    /// Fields listed under one heading, in listing order
    pub fn heading_fields(&self, section_id: &str, heading_id: &str) -> Result<Vec<&FieldDefinition>> {
        let heading = self
            .section(section_id)?
            .heading(heading_id)
            .ok_or_else(|| Error::SectionNotFound(format!("{}/{}", section_id, heading_id)))?;
        Ok(heading.fields.iter().map(|&idx| &self.fields[idx]).collect())
    }

    // === Dependencies ===

    /// Fields the given field's formula reads directly
    pub fn dependencies_of(&self, id: &str) -> Result<Vec<&FieldDefinition>> {
        let idx = self.index_of(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(self
            .graph
            .get_precedents(idx)
            .map(|p| &self.fields[p])
            .collect())
    }

    /// Fields whose formulas read the given field directly
    pub fn dependents_of(&self, id: &str) -> Result<Vec<&FieldDefinition>> {
        let idx = self.index_of(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(self
            .graph
            .get_dependents(idx)
            .map(|d| &self.fields[d])
            .collect())
    }

    /// Computed fields in the order they are evaluated
    pub fn evaluation_order(&self) -> Vec<&FieldDefinition> {
        self.order.iter().map(|&idx| &self.fields[idx]).collect()
    }

    // === Evaluation support ===

    pub(crate) fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(&id.to_uppercase()).copied()
    }

    pub(crate) fn key_index(&self, key: &str) -> Option<usize> {
        let upper = key.to_uppercase();
        self.by_id
            .get(&upper)
            .or_else(|| self.by_alias.get(&upper))
            .copied()
    }

    pub(crate) fn field_at(&self, idx: usize) -> &FieldDefinition {
        &self.fields[idx]
    }

    pub(crate) fn compiled(&self, idx: usize) -> &CompiledField {
        &self.compiled[idx]
    }

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    pub(crate) fn case_table(&self, range: &RangeReference) -> Option<&[FieldValue]> {
        self.case_tables
            .get(&range.start.row)
            .map(|&owner| self.compiled[owner].cases.as_slice())
    }

    /// Resolve a formula reference: alias first, then id, then value-column row
    pub(crate) fn resolve_index(&self, reference: &Reference) -> Resolution {
        let key = reference.key();
        if let Some(&idx) = self.by_alias.get(&key) {
            return Resolution::Field(idx);
        }

        match reference {
            Reference::Name(_) => match self.by_id.get(&key) {
                Some(&idx) => Resolution::Field(idx),
                None => Resolution::Missing,
            },
            Reference::Cell(cell) if cell.column == VALUE_COLUMN => {
                match self.by_row.get(&cell.row).map(Vec::as_slice) {
                    Some([idx]) => Resolution::Field(*idx),
                    Some(candidates) if candidates.len() > 1 => {
                        Resolution::Ambiguous(candidates.to_vec())
                    }
                    _ => Resolution::Missing,
                }
            }
            Reference::Cell(_) => Resolution::Missing,
        }
    }
}

/// Heading entry after the first pass: an arena index, or an id to resolve later
enum Entry {
    Index(usize),
    Pending(String),
}

type SectionEntries = Vec<(crate::config::SectionConfig, Vec<Vec<Entry>>)>;

/// Register every full definition, merging identical repeats
fn collect_fields(
    config: CatalogConfig,
    errors: &mut Vec<ConfigError>,
) -> (Vec<FieldDefinition>, SectionEntries) {
    let mut fields: Vec<FieldDefinition> = Vec::new();
    let mut by_id: AHashMap<String, usize> = AHashMap::new();

    let mut register = |field: FieldDefinition, errors: &mut Vec<ConfigError>| -> usize {
        let key = field.id.to_uppercase();
        if let Some(&idx) = by_id.get(&key) {
            if fields[idx] != field {
                errors.push(ConfigError::DuplicateId { id: field.id });
            } else {
                log::trace!("merged repeated definition of '{}'", field.id);
            }
            return idx;
        }
        let idx = fields.len();
        by_id.insert(key, idx);
        fields.push(field);
        idx
    };

    for field in config.fields {
        register(field, errors);
    }

    let mut sections = Vec::with_capacity(config.sections.len());
    for mut section in config.sections {
        let headings = std::mem::take(&mut section.headings);
        let mut entries = Vec::with_capacity(headings.len());
        let mut kept = Vec::with_capacity(headings.len());
        for mut heading in headings {
            let listed: Vec<Entry> = std::mem::take(&mut heading.fields)
                .into_iter()
                .map(|entry| match entry {
                    HeadingEntry::Field(field) => Entry::Index(register(field, errors)),
                    HeadingEntry::Ref(id) => Entry::Pending(id),
                })
                .collect();
            entries.push(listed);
            kept.push(heading);
        }
        section.headings = kept;
        sections.push((section, entries));
    }

    (fields, sections)
}

/// Build sections and headings, resolving id-only heading entries
fn build_sections(
    configs: SectionEntries,
    by_id: &AHashMap<String, usize>,
    errors: &mut Vec<ConfigError>,
) -> Vec<Section> {
    let mut sections = Vec::with_capacity(configs.len());
    let mut section_ids = AHashSet::new();

    for (config, entries) in configs {
        if !section_ids.insert(config.id.clone()) {
            errors.push(ConfigError::DuplicateSection { id: config.id });
            continue;
        }

        let mut headings: Vec<Heading> = Vec::with_capacity(config.headings.len());
        for (heading, listed) in config.headings.into_iter().zip(entries) {
            if headings.iter().any(|h| h.id == heading.id) {
                errors.push(ConfigError::DuplicateHeading {
                    section: config.id.clone(),
                    heading: heading.id,
                });
                continue;
            }

            let mut fields = Vec::with_capacity(listed.len());
            for entry in listed {
                match entry {
                    Entry::Index(idx) => fields.push(idx),
                    Entry::Pending(id) => match by_id.get(&id.to_uppercase()) {
                        Some(&idx) => fields.push(idx),
                        None => errors.push(ConfigError::UnknownFieldRef {
                            section: config.id.clone(),
                            heading: heading.id.clone(),
                            id,
                        }),
                    },
                }
            }

            headings.push(Heading {
                id: heading.id,
                name: heading.name,
                fields,
            });
        }

        sections.push(Section {
            id: config.id,
            name: config.name,
            icon: config.icon,
            color: config.color,
            headings,
        });
    }

    sections
}

/// Index named-cell aliases and check alias and formula presence rules
fn index_aliases(fields: &[FieldDefinition], errors: &mut Vec<ConfigError>) -> AHashMap<String, usize> {
    let mut by_alias: AHashMap<String, usize> = AHashMap::new();

    for (idx, field) in fields.iter().enumerate() {
        let has_formula = field
            .formula
            .as_deref()
            .map_or(false, |f| !f.trim().is_empty());
        if field.is_computed() && !has_formula {
            errors.push(ConfigError::MissingFormula {
                field: field.id.clone(),
            });
        } else if !field.is_computed() && field.formula.is_some() {
            errors.push(ConfigError::UnexpectedFormula {
                field: field.id.clone(),
            });
        }

        match field.named_cell.as_deref().map(str::trim) {
            Some(alias) if !alias.is_empty() => {
                let key = alias.to_uppercase();
                if let Some(&first) = by_alias.get(&key) {
                    errors.push(ConfigError::DuplicateAlias {
                        alias: alias.to_string(),
                        first: fields[first].id.clone(),
                        second: field.id.clone(),
                    });
                } else {
                    by_alias.insert(key, idx);
                }
            }
            _ if field.field_type == FieldType::NamedCell => {
                errors.push(ConfigError::MissingAlias {
                    field: field.id.clone(),
                });
            }
            _ => {}
        }
    }

    by_alias
}

/// Compile the pattern, default, case table and formula of one field
fn compile_field(field: &FieldDefinition, errors: &mut Vec<ConfigError>) -> CompiledField {
    let pattern = field
        .validation
        .pattern
        .as_deref()
        .and_then(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                errors.push(ConfigError::InvalidPattern {
                    field: field.id.clone(),
                    reason: e.to_string(),
                });
                None
            }
        });

    let default = match field.default_value.as_ref().map(|raw| raw.coerce(field.data_type)) {
        Some(Ok(FieldValue::Empty)) | None => None,
        Some(Ok(value)) => Some(value),
        Some(Err(e)) => {
            errors.push(ConfigError::InvalidDefault {
                field: field.id.clone(),
                reason: e.to_string(),
            });
            None
        }
    };

    let mut cases = Vec::with_capacity(field.cases.len());
    for (i, raw) in field.cases.iter().enumerate() {
        match raw.coerce(field.data_type) {
            Ok(FieldValue::Empty) => errors.push(ConfigError::InvalidCaseTable {
                field: field.id.clone(),
                reason: format!("case {} is empty", i),
            }),
            Ok(value) => cases.push(value),
            Err(e) => errors.push(ConfigError::InvalidCaseTable {
                field: field.id.clone(),
                reason: format!("case {}: {}", i, e),
            }),
        }
    }
    if !field.cases.is_empty() && field.row.is_none() {
        errors.push(ConfigError::InvalidCaseTable {
            field: field.id.clone(),
            reason: "a case table needs a row".into(),
        });
    }

    let formula = match (&field.formula, field.is_computed()) {
        (Some(text), true) if !text.trim().is_empty() => Some(classify(text)),
        _ => None,
    };

    CompiledField {
        pattern,
        default,
        cases,
        formula,
        case_selector: false,
    }
}
