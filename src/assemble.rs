use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    DefaultProfile, ObjRef, ProfileCategory, ProfileMetadata, ProfileName, ProfileTable,
    ProfileType,
};
use crate::error::ProfileError;
use crate::workspace::optional_ref;

/// Persisted type tag of the current single-category object shape.
pub const PROFILE_OBJECT_TYPE: &str = "KBaseProfile.FunctionalProfile";
/// Persisted type tag of the legacy nested object shape.
pub const LEGACY_OBJECT_TYPE: &str = "KBaseFunctionalProfile.FunctionalProfile";

/// Caller-supplied spec for one named profile: where the table lives plus
/// provenance fields, epistemology still unvalidated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileSpec {
    #[serde(default)]
    pub profile_file_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub data_epistemology: Option<String>,
    #[serde(default)]
    pub epistemology_method: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ProfileSpec {
    /// Normalizes and validates the provenance fields. Called before any
    /// file I/O for the entry so a bad epistemology fails the batch early.
    pub fn validate_metadata(&self) -> Result<ProfileMetadata, ProfileError> {
        let data_epistemology = self
            .data_epistemology
            .as_deref()
            .map(str::parse)
            .transpose()?;
        Ok(ProfileMetadata {
            data_epistemology,
            epistemology_method: self.epistemology_method.clone(),
            description: self.description.clone(),
        })
    }

    pub fn file_path(&self) -> Result<&Utf8Path, ProfileError> {
        self.profile_file_path
            .as_deref()
            .ok_or_else(|| ProfileError::MissingReference("profile file path".to_string()))
    }
}

/// One named profile as persisted: provenance plus its matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    #[serde(flatten)]
    pub metadata: ProfileMetadata,
    pub profile_data: ProfileTable,
}

/// The legacy per-category profile storage: three first-class slots plus a
/// mapping for every other name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSlots {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pathway: Option<ProfileEntry>,
    #[serde(rename = "EC", skip_serializing_if = "Option::is_none")]
    pub ec: Option<ProfileEntry>,
    #[serde(rename = "KO", skip_serializing_if = "Option::is_none")]
    pub ko: Option<ProfileEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_profiles: BTreeMap<String, ProfileEntry>,
}

impl ProfileSlots {
    pub fn contains(&self, name: &ProfileName) -> bool {
        match name {
            ProfileName::Default(DefaultProfile::Pathway) => self.pathway.is_some(),
            ProfileName::Default(DefaultProfile::Ec) => self.ec.is_some(),
            ProfileName::Default(DefaultProfile::Ko) => self.ko.is_some(),
            ProfileName::Custom(custom) => self.custom_profiles.contains_key(custom),
        }
    }

    pub fn insert(&mut self, name: &ProfileName, entry: ProfileEntry) {
        match name {
            ProfileName::Default(DefaultProfile::Pathway) => self.pathway = Some(entry),
            ProfileName::Default(DefaultProfile::Ec) => self.ec = Some(entry),
            ProfileName::Default(DefaultProfile::Ko) => self.ko = Some(entry),
            ProfileName::Custom(custom) => {
                self.custom_profiles.insert(custom.clone(), entry);
            }
        }
    }

    /// Names currently occupied, default slots first then customs.
    pub fn existing_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.pathway.is_some() {
            names.push("pathway".to_string());
        }
        if self.ec.is_some() {
            names.push("EC".to_string());
        }
        if self.ko.is_some() {
            names.push("KO".to_string());
        }
        names.extend(self.custom_profiles.keys().cloned());
        names
    }
}

/// Legacy community branch: sample ids live on the column axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityProfile {
    pub sample_set_ref: ObjRef,
    #[serde(flatten)]
    pub slots: ProfileSlots,
}

/// Legacy organism branch: OTU ids live on the row axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganismProfile {
    pub amplicon_set_ref: ObjRef,
    #[serde(flatten)]
    pub slots: ProfileSlots,
}

/// The legacy persisted unit: both categories nested under one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalProfile {
    pub original_matrix_ref: ObjRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_profile: Option<CommunityProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organism_profile: Option<OrganismProfile>,
}

/// The current persisted unit: one category, one table, flattened metadata,
/// carried attribute-mapping references from the base object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileObject {
    pub base_object_ref: ObjRef,
    pub profile_category: ProfileCategory,
    pub profile_type: ProfileType,
    #[serde(flatten)]
    pub metadata: ProfileMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_attributemapping_ref: Option<ObjRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col_attributemapping_ref: Option<ObjRef>,
    pub data: ProfileTable,
}

/// Builds the current object shape. The base object's attribute-mapping
/// references are carried over with the inverse-axis drop rule: community
/// profiles discard `row_attributemapping_ref`, organism profiles discard
/// `col_attributemapping_ref`.
pub fn assemble_profile_object(
    base_object_ref: ObjRef,
    profile_category: ProfileCategory,
    profile_type: ProfileType,
    metadata: ProfileMetadata,
    table: ProfileTable,
    base_data: &Value,
) -> Result<ProfileObject, ProfileError> {
    let mut row_attributemapping_ref = optional_ref(base_data, "row_attributemapping_ref")?;
    let mut col_attributemapping_ref = optional_ref(base_data, "col_attributemapping_ref")?;
    match profile_category {
        ProfileCategory::Community => row_attributemapping_ref = None,
        ProfileCategory::Organism => col_attributemapping_ref = None,
    }

    Ok(ProfileObject {
        base_object_ref,
        profile_category,
        profile_type,
        metadata,
        row_attributemapping_ref,
        col_attributemapping_ref,
        data: table,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::domain::{CellValue, DataEpistemology};

    fn entry() -> ProfileEntry {
        ProfileEntry {
            metadata: ProfileMetadata::default(),
            profile_data: ProfileTable::new(
                vec!["r".to_string()],
                vec!["c".to_string()],
                vec![vec![CellValue::Int(1)]],
            )
            .unwrap(),
        }
    }

    #[test]
    fn metadata_validation_normalizes_epistemology() {
        let spec = ProfileSpec {
            data_epistemology: Some("Predicted".to_string()),
            ..ProfileSpec::default()
        };
        let metadata = spec.validate_metadata().unwrap();
        assert_eq!(metadata.data_epistemology, Some(DataEpistemology::Predicted));
    }

    #[test]
    fn metadata_validation_rejects_unknown_epistemology() {
        let spec = ProfileSpec {
            data_epistemology: Some("guessed".to_string()),
            ..ProfileSpec::default()
        };
        assert_matches!(
            spec.validate_metadata(),
            Err(ProfileError::InvalidEpistemology(_))
        );
    }

    #[test]
    fn slots_route_default_and_custom_names() {
        let mut slots = ProfileSlots::default();
        slots.insert(&ProfileName::parse("pathway"), entry());
        slots.insert(&ProfileName::parse("cog"), entry());

        assert!(slots.pathway.is_some());
        assert!(slots.custom_profiles.contains_key("cog"));
        assert!(slots.contains(&ProfileName::parse("pathway")));
        assert!(slots.contains(&ProfileName::parse("cog")));
        assert!(!slots.contains(&ProfileName::parse("EC")));
        assert_eq!(slots.existing_names(), vec!["pathway", "cog"]);
    }

    #[test]
    fn slots_serialize_with_custom_mapping() {
        let mut slots = ProfileSlots::default();
        slots.insert(&ProfileName::parse("KO"), entry());
        slots.insert(&ProfileName::parse("cazyme"), entry());

        let value = serde_json::to_value(&slots).unwrap();
        assert!(value.get("KO").is_some());
        assert!(value.get("pathway").is_none());
        assert!(value["custom_profiles"].get("cazyme").is_some());
    }

    #[test]
    fn community_drops_row_mapping_ref() {
        let base = json!({
            "row_attributemapping_ref": "1/2/3",
            "col_attributemapping_ref": "4/5/6",
        });
        let object = assemble_profile_object(
            "7/8/9".parse().unwrap(),
            ProfileCategory::Community,
            ProfileType::Amplicon,
            ProfileMetadata::default(),
            entry().profile_data,
            &base,
        )
        .unwrap();
        assert!(object.row_attributemapping_ref.is_none());
        assert_eq!(
            object.col_attributemapping_ref.as_ref().map(ObjRef::as_str),
            Some("4/5/6")
        );
    }

    #[test]
    fn organism_drops_col_mapping_ref() {
        let base = json!({
            "row_attributemapping_ref": "1/2/3",
            "col_attributemapping_ref": "4/5/6",
        });
        let object = assemble_profile_object(
            "7/8/9".parse().unwrap(),
            ProfileCategory::Organism,
            ProfileType::Mg,
            ProfileMetadata::default(),
            entry().profile_data,
            &base,
        )
        .unwrap();
        assert_eq!(
            object.row_attributemapping_ref.as_ref().map(ObjRef::as_str),
            Some("1/2/3")
        );
        assert!(object.col_attributemapping_ref.is_none());
    }

    #[test]
    fn legacy_object_round_trips() {
        let mut slots = ProfileSlots::default();
        slots.insert(&ProfileName::parse("EC"), entry());
        let object = FunctionalProfile {
            original_matrix_ref: "1/1/1".parse().unwrap(),
            community_profile: Some(CommunityProfile {
                sample_set_ref: "2/2/2".parse().unwrap(),
                slots,
            }),
            organism_profile: None,
        };

        let value = serde_json::to_value(&object).unwrap();
        assert!(value.get("organism_profile").is_none());
        let back: FunctionalProfile = serde_json::from_value(value).unwrap();
        assert_eq!(back, object);
    }
}
