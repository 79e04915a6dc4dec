use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GenomaError;

static ACCESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z]{3}[0-9]+(_[A-Za-z0-9_]+)?$").expect("accession pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Sequence,
    Annotation,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRole::Sequence => write!(f, "sequence"),
            FileRole::Annotation => write!(f, "annotation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceDatabase {
    Ensembl,
}

impl SourceDatabase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDatabase::Ensembl => "ensembl",
        }
    }
}

impl fmt::Display for SourceDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceDatabase {
    type Err = GenomaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ensembl" => Ok(SourceDatabase::Ensembl),
            _ => Err(GenomaError::UnknownSource(value.to_string())),
        }
    }
}

/// Canonical name of one assembly. Two files that describe the same build
/// must produce equal identities or they will not merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssemblyIdentity {
    pub genus: String,
    pub species: String,
    pub intraspecific_name: Option<String>,
    pub assembly_id: String,
}

impl AssemblyIdentity {
    pub fn new(
        genus: impl Into<String>,
        species: impl Into<String>,
        intraspecific_name: Option<String>,
        assembly_id: impl Into<String>,
    ) -> Self {
        Self {
            genus: genus.into(),
            species: species.into(),
            intraspecific_name: intraspecific_name.filter(|name| !name.is_empty()),
            assembly_id: assembly_id.into(),
        }
    }

    pub fn name_segment(&self) -> String {
        match &self.intraspecific_name {
            Some(name) => format!("{}_{}_{}", self.genus, self.species, name),
            None => format!("{}_{}", self.genus, self.species),
        }
    }

    /// Catalog key and local base filename: `genus_species[_qualifier]-assembly_id`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.name_segment(), self.assembly_id)
    }

    pub fn species_name(&self) -> String {
        format!("{} {}", self.genus, self.species)
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLeaf {
    pub identity: AssemblyIdentity,
    pub role: FileRole,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyRecord {
    pub genus: String,
    pub species: String,
    pub intraspecific_name: Option<String>,
    pub assembly_id: String,
    pub version: Option<String>,
    pub source_database: SourceDatabase,
    pub sequence_remote_path: Option<String>,
    pub sequence_remote_size: Option<u64>,
    pub annotation_remote_path: Option<String>,
    pub annotation_remote_size: Option<u64>,
    pub base_filepath: Option<String>,
    pub taxonomy_id: Option<String>,
}

impl AssemblyRecord {
    pub fn new(identity: AssemblyIdentity, source_database: SourceDatabase) -> Self {
        Self {
            genus: identity.genus,
            species: identity.species,
            intraspecific_name: identity.intraspecific_name,
            assembly_id: identity.assembly_id,
            version: None,
            source_database,
            sequence_remote_path: None,
            sequence_remote_size: None,
            annotation_remote_path: None,
            annotation_remote_size: None,
            base_filepath: None,
            taxonomy_id: None,
        }
    }

    pub fn identity(&self) -> AssemblyIdentity {
        AssemblyIdentity {
            genus: self.genus.clone(),
            species: self.species.clone(),
            intraspecific_name: self.intraspecific_name.clone(),
            assembly_id: self.assembly_id.clone(),
        }
    }

    pub fn key(&self) -> String {
        self.identity().key()
    }

    pub fn is_complete(&self) -> bool {
        self.sequence_remote_path.is_some() && self.annotation_remote_path.is_some()
    }

    pub fn remote_file(&self, role: FileRole) -> Option<(&str, Option<u64>)> {
        match role {
            FileRole::Sequence => self
                .sequence_remote_path
                .as_deref()
                .map(|path| (path, self.sequence_remote_size)),
            FileRole::Annotation => self
                .annotation_remote_path
                .as_deref()
                .map(|path| (path, self.annotation_remote_size)),
        }
    }

    pub fn set_remote_file(&mut self, role: FileRole, path: String, size: u64) {
        match role {
            FileRole::Sequence => {
                self.sequence_remote_path = Some(path);
                self.sequence_remote_size = Some(size);
            }
            FileRole::Annotation => {
                self.annotation_remote_path = Some(path);
                self.annotation_remote_size = Some(size);
            }
        }
    }

    /// Field-level merge: every field set on `other` replaces ours, unset
    /// fields leave ours untouched. Identity fields are never changed.
    pub fn merge(&mut self, other: &AssemblyRecord) {
        if other.version.is_some() {
            self.version = other.version.clone();
        }
        self.source_database = other.source_database;
        if let Some(path) = &other.sequence_remote_path {
            self.sequence_remote_path = Some(path.clone());
            self.sequence_remote_size = other.sequence_remote_size;
        }
        if let Some(path) = &other.annotation_remote_path {
            self.annotation_remote_path = Some(path.clone());
            self.annotation_remote_size = other.annotation_remote_size;
        }
        if other.base_filepath.is_some() {
            self.base_filepath = other.base_filepath.clone();
        }
        if other.taxonomy_id.is_some() {
            self.taxonomy_id = other.taxonomy_id.clone();
        }
    }

    pub fn apply(&mut self, field: RecordField, value: FieldValue) -> Result<(), GenomaError> {
        field.check(&value)?;
        match field {
            RecordField::Genus => self.genus = value.into_text().unwrap_or_default(),
            RecordField::Species => self.species = value.into_text().unwrap_or_default(),
            RecordField::IntraspecificName => {
                self.intraspecific_name = value.into_text().filter(|name| !name.is_empty())
            }
            RecordField::AssemblyId => self.assembly_id = value.into_text().unwrap_or_default(),
            RecordField::Version => self.version = value.into_text(),
            RecordField::SourceDatabase => {
                if let Some(tag) = value.into_text() {
                    self.source_database = tag.parse()?;
                }
            }
            RecordField::SequenceRemotePath => self.sequence_remote_path = value.into_text(),
            RecordField::SequenceRemoteSize => self.sequence_remote_size = value.as_integer(),
            RecordField::AnnotationRemotePath => self.annotation_remote_path = value.into_text(),
            RecordField::AnnotationRemoteSize => self.annotation_remote_size = value.as_integer(),
            RecordField::BaseFilepath => self.base_filepath = value.into_text(),
            RecordField::TaxonomyId => self.taxonomy_id = value.into_text(),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum RecordField {
    Genus,
    Species,
    IntraspecificName,
    AssemblyId,
    Version,
    SourceDatabase,
    SequenceRemotePath,
    SequenceRemoteSize,
    AnnotationRemotePath,
    AnnotationRemoteSize,
    BaseFilepath,
    TaxonomyId,
}

impl RecordField {
    pub const ALL: [RecordField; 12] = [
        RecordField::Genus,
        RecordField::Species,
        RecordField::IntraspecificName,
        RecordField::AssemblyId,
        RecordField::Version,
        RecordField::SourceDatabase,
        RecordField::SequenceRemotePath,
        RecordField::SequenceRemoteSize,
        RecordField::AnnotationRemotePath,
        RecordField::AnnotationRemoteSize,
        RecordField::BaseFilepath,
        RecordField::TaxonomyId,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            RecordField::Genus => "genus",
            RecordField::Species => "species",
            RecordField::IntraspecificName => "intraspecific_name",
            RecordField::AssemblyId => "assembly_id",
            RecordField::Version => "version",
            RecordField::SourceDatabase => "source_database",
            RecordField::SequenceRemotePath => "sequence_remote_path",
            RecordField::SequenceRemoteSize => "sequence_remote_size",
            RecordField::AnnotationRemotePath => "annotation_remote_path",
            RecordField::AnnotationRemoteSize => "annotation_remote_size",
            RecordField::BaseFilepath => "base_filepath",
            RecordField::TaxonomyId => "taxonomy_id",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            RecordField::SequenceRemoteSize | RecordField::AnnotationRemoteSize => {
                FieldKind::Integer
            }
            _ => FieldKind::Text,
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            RecordField::Genus
                | RecordField::Species
                | RecordField::IntraspecificName
                | RecordField::AssemblyId
        )
    }

    pub fn check(&self, value: &FieldValue) -> Result<(), GenomaError> {
        let ok = match (self.kind(), value) {
            (_, FieldValue::Null) => !matches!(
                self,
                RecordField::Genus
                    | RecordField::Species
                    | RecordField::AssemblyId
                    | RecordField::SourceDatabase
            ),
            (FieldKind::Text, FieldValue::Text(_)) => true,
            (FieldKind::Integer, FieldValue::Integer(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(GenomaError::InvalidFieldValue {
                field: self.column().to_string(),
                value: value.to_string(),
            })
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for RecordField {
    type Err = GenomaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let field = match normalized.as_str() {
            "fasta_remote_path" => RecordField::SequenceRemotePath,
            "fasta_remote_size" => RecordField::SequenceRemoteSize,
            "gff3_remote_path" => RecordField::AnnotationRemotePath,
            "gff3_remote_size" => RecordField::AnnotationRemoteSize,
            other => RecordField::ALL
                .into_iter()
                .find(|field| field.column() == other)
                .ok_or_else(|| GenomaError::UnknownField(value.to_string()))?,
        };
        Ok(field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(u64),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            FieldValue::Text(value) => Some(value),
            FieldValue::Integer(value) => Some(value.to_string()),
            FieldValue::Null => None,
        }
    }

    pub fn as_integer(&self) -> Option<u64> {
        match self {
            FieldValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn parse_for(field: RecordField, raw: &str) -> Result<Self, GenomaError> {
        match field.kind() {
            FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
            FieldKind::Integer => raw.trim().parse::<u64>().map(FieldValue::Integer).map_err(
                |_| GenomaError::InvalidFieldValue {
                    field: field.column().to_string(),
                    value: raw.to_string(),
                },
            ),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(value) => write!(f, "{value}"),
            FieldValue::Text(value) => f.write_str(value),
            FieldValue::Null => f.write_str("null"),
        }
    }
}

#[derive(Debug, Default)]
pub struct AssemblyRecordBuilder {
    values: Vec<(RecordField, FieldValue)>,
}

impl AssemblyRecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: RecordField, value: FieldValue) -> Self {
        self.values.push((field, value));
        self
    }

    pub fn set_named(self, name: &str, value: FieldValue) -> Result<Self, GenomaError> {
        let field: RecordField = name.parse()?;
        Ok(self.set(field, value))
    }

    pub fn set_lenient(self, name: &str, value: FieldValue) -> Self {
        match name.parse::<RecordField>() {
            Ok(field) => self.set(field, value),
            Err(_) => {
                warn!(field = name, "ignoring unknown assembly record field");
                self
            }
        }
    }

    pub fn build(self) -> Result<AssemblyRecord, GenomaError> {
        let required = |field: RecordField| -> Result<String, GenomaError> {
            self.values
                .iter()
                .rev()
                .find(|(candidate, _)| *candidate == field)
                .and_then(|(_, value)| value.clone().into_text())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| GenomaError::InvalidFieldValue {
                    field: field.column().to_string(),
                    value: "missing".to_string(),
                })
        };
        let identity = AssemblyIdentity::new(
            required(RecordField::Genus)?,
            required(RecordField::Species)?,
            None,
            required(RecordField::AssemblyId)?,
        );
        let mut record = AssemblyRecord::new(identity, SourceDatabase::Ensembl);
        for (field, value) in self.values {
            record.apply(field, value)?;
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonomyId(String);

impl TaxonomyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaxonomyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonomyId {
    type Err = GenomaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_start_matches("txid").to_string();
        if normalized.is_empty() || !normalized.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(GenomaError::InvalidTaxonomyId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SraAccession(String);

impl SraAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        &self.0[..3]
    }
}

impl fmt::Display for SraAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SraAccession {
    type Err = GenomaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if !ACCESSION_RE.is_match(&normalized) {
            return Err(GenomaError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}
