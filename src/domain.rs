use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// A single parsed cell. `Null` stands for an empty or not-a-number cell and
/// serializes as JSON null; scalar cells keep their parsed type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Parses a raw delimited-text field: empty and NA-ish fields become
    /// null, numerics keep their type, everything else stays text.
    pub fn from_field(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") || trimmed == "NA" {
            return CellValue::Null;
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return CellValue::Int(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_nan() {
                return CellValue::Null;
            }
            return CellValue::Float(value);
        }
        CellValue::Text(trimmed.to_string())
    }
}

/// Canonical dense matrix: ordered unique row/column labels plus one cell per
/// `[row][col]` position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTable {
    pub row_ids: Vec<String>,
    pub col_ids: Vec<String>,
    pub values: Vec<Vec<CellValue>>,
}

impl ProfileTable {
    pub fn new(
        row_ids: Vec<String>,
        col_ids: Vec<String>,
        values: Vec<Vec<CellValue>>,
    ) -> Result<Self, ProfileError> {
        if values.len() != row_ids.len() {
            return Err(ProfileError::MalformedTable(format!(
                "{} rows of values for {} row labels",
                values.len(),
                row_ids.len()
            )));
        }
        for (index, row) in values.iter().enumerate() {
            if row.len() != col_ids.len() {
                return Err(ProfileError::MalformedTable(format!(
                    "row {} has {} cells for {} column labels",
                    index,
                    row.len(),
                    col_ids.len()
                )));
            }
        }
        if let Some(label) = first_duplicate(&row_ids) {
            return Err(ProfileError::MalformedTable(format!(
                "duplicate row label {label}"
            )));
        }
        if let Some(label) = first_duplicate(&col_ids) {
            return Err(ProfileError::MalformedTable(format!(
                "duplicate column label {label}"
            )));
        }
        Ok(Self {
            row_ids,
            col_ids,
            values,
        })
    }

    pub fn row_count(&self) -> usize {
        self.row_ids.len()
    }

    pub fn col_count(&self) -> usize {
        self.col_ids.len()
    }

    /// Swaps the axes, preserving label order.
    pub fn transpose(self) -> Self {
        let mut values = vec![Vec::with_capacity(self.row_ids.len()); self.col_ids.len()];
        for row in &self.values {
            for (col_index, cell) in row.iter().enumerate() {
                values[col_index].push(cell.clone());
            }
        }
        Self {
            row_ids: self.col_ids,
            col_ids: self.row_ids,
            values,
        }
    }
}

fn first_duplicate(labels: &[String]) -> Option<&String> {
    let mut seen = std::collections::HashSet::with_capacity(labels.len());
    labels.iter().find(|label| !seen.insert(label.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataEpistemology {
    Measured,
    Asserted,
    Predicted,
}

impl fmt::Display for DataEpistemology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataEpistemology::Measured => write!(f, "measured"),
            DataEpistemology::Asserted => write!(f, "asserted"),
            DataEpistemology::Predicted => write!(f, "predicted"),
        }
    }
}

impl FromStr for DataEpistemology {
    type Err = ProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "measured" => Ok(DataEpistemology::Measured),
            "asserted" => Ok(DataEpistemology::Asserted),
            "predicted" => Ok(DataEpistemology::Predicted),
            _ => Err(ProfileError::InvalidEpistemology(value.to_string())),
        }
    }
}

/// Which axis the expected identifier set maps onto: samples live on columns
/// for community profiles, organisms/OTUs on rows for organism profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileCategory {
    Community,
    Organism,
}

impl fmt::Display for ProfileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileCategory::Community => write!(f, "community"),
            ProfileCategory::Organism => write!(f, "organism"),
        }
    }
}

impl FromStr for ProfileCategory {
    type Err = ProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "community" => Ok(ProfileCategory::Community),
            "organism" => Ok(ProfileCategory::Organism),
            _ => Err(ProfileError::UnsupportedCategory(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    Amplicon,
    Mg,
    Modelset,
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileType::Amplicon => write!(f, "amplicon"),
            ProfileType::Mg => write!(f, "mg"),
            ProfileType::Modelset => write!(f, "modelset"),
        }
    }
}

impl FromStr for ProfileType {
    type Err = ProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "amplicon" => Ok(ProfileType::Amplicon),
            "mg" => Ok(ProfileType::Mg),
            "modelset" => Ok(ProfileType::Modelset),
            _ => Err(ProfileError::UnsupportedType(value.to_string())),
        }
    }
}

/// The three first-class profile slots of the legacy object shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultProfile {
    Pathway,
    Ec,
    Ko,
}

impl DefaultProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefaultProfile::Pathway => "pathway",
            DefaultProfile::Ec => "EC",
            DefaultProfile::Ko => "KO",
        }
    }
}

/// A profile name is either one of the default slots or a custom name stored
/// under the `custom_profiles` mapping. Matching on the variant replaces
/// runtime name-set membership tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileName {
    Default(DefaultProfile),
    Custom(String),
}

impl ProfileName {
    pub fn parse(name: &str) -> Self {
        match name {
            "pathway" => ProfileName::Default(DefaultProfile::Pathway),
            "EC" => ProfileName::Default(DefaultProfile::Ec),
            "KO" => ProfileName::Default(DefaultProfile::Ko),
            other => ProfileName::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProfileName::Default(default) => default.as_str(),
            ProfileName::Custom(name) => name,
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A versioned object store reference, `"wsid/objid/version"` style.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjRef(String);

impl ObjRef {
    /// Reference to one exact stored version.
    pub fn versioned(workspace_id: i64, object_id: i64, version: i64) -> Self {
        Self(format!("{workspace_id}/{object_id}/{version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjRef {
    type Err = ProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed.contains(char::is_whitespace)
            && trimmed.split('/').all(|segment| !segment.is_empty());
        if !is_valid {
            return Err(ProfileError::InvalidObjRef(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Provenance fields carried by every named profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileMetadata {
    pub data_epistemology: Option<DataEpistemology>,
    pub epistemology_method: Option<String>,
    pub description: Option<String>,
}
