use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::assemble::{
    CommunityProfile, FunctionalProfile, LEGACY_OBJECT_TYPE, OrganismProfile, PROFILE_OBJECT_TYPE,
    ProfileEntry, ProfileSlots, ProfileSpec, assemble_profile_object,
};
use crate::domain::{ObjRef, ProfileCategory, ProfileName, ProfileTable, ProfileType};
use crate::error::ProfileError;
use crate::parser::parse_profile_table;
use crate::persist::SizeAwarePersister;
use crate::reconcile::{Reconciliation, reconcile_current, reconcile_legacy};
use crate::workspace::{
    CreatedObject, ReportClient, ReportParams, SampleClient, SavePayload, SaveSpec,
    WorkspaceClient, amplicon_ids, optional_ref,
};

/// Checks a raw params object before typed deserialization: missing required
/// keys fail the call, unexpected keys are only warned about.
pub fn check_params(params: &Value, required: &[&str], optional: &[&str]) -> Result<(), ProfileError> {
    let keys: BTreeSet<&str> = params
        .as_object()
        .map(|map| map.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| !keys.contains(key))
        .collect();
    if !missing.is_empty() {
        return Err(ProfileError::MissingParameter(missing.join(", ")));
    }

    for key in keys {
        if !required.contains(&key) && !optional.contains(&key) {
            warn!("unexpected parameter {key} supplied");
        }
    }
    Ok(())
}

fn default_build_report() -> bool {
    true
}

/// Import call in the current single-category shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportParams {
    pub workspace_id: i64,
    pub func_profile_obj_name: String,
    pub base_object_ref: ObjRef,
    pub profile_file_path: Utf8PathBuf,
    pub profile_category: ProfileCategory,
    pub profile_type: ProfileType,
    #[serde(default)]
    pub data_epistemology: Option<String>,
    #[serde(default)]
    pub epistemology_method: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub staging_file: bool,
    #[serde(default = "default_build_report")]
    pub build_report: bool,
}

impl ImportParams {
    pub const REQUIRED: &'static [&'static str] = &[
        "workspace_id",
        "func_profile_obj_name",
        "base_object_ref",
        "profile_file_path",
        "profile_category",
        "profile_type",
    ];
    pub const OPTIONAL: &'static [&'static str] = &[
        "data_epistemology",
        "epistemology_method",
        "description",
        "staging_file",
        "build_report",
    ];

    pub fn from_value(params: &Value) -> Result<Self, ProfileError> {
        check_params(params, Self::REQUIRED, Self::OPTIONAL)?;
        serde_json::from_value(params.clone())
            .map_err(|err| ProfileError::InvalidParameter(err.to_string()))
    }
}

/// One named profile given in list form, the narrative-style call shape.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedProfileSpec {
    pub profile_name: String,
    #[serde(flatten)]
    pub spec: ProfileSpec,
}

/// A batch of named profiles, accepted either keyed by name or as a list of
/// named entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProfileBatch {
    Named(Vec<NamedProfileSpec>),
    Keyed(BTreeMap<String, ProfileSpec>),
}

impl Default for ProfileBatch {
    fn default() -> Self {
        ProfileBatch::Keyed(BTreeMap::new())
    }
}

impl ProfileBatch {
    pub fn into_map(self) -> BTreeMap<String, ProfileSpec> {
        match self {
            ProfileBatch::Keyed(map) => map,
            ProfileBatch::Named(entries) => entries
                .into_iter()
                .map(|entry| (entry.profile_name, entry.spec))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ProfileBatch::Keyed(map) => map.is_empty(),
            ProfileBatch::Named(entries) => entries.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommunityBranchParams {
    #[serde(default)]
    pub sample_set_ref: Option<ObjRef>,
    #[serde(default)]
    pub profiles: ProfileBatch,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganismBranchParams {
    #[serde(default)]
    pub amplicon_set_ref: Option<ObjRef>,
    #[serde(default)]
    pub profiles: ProfileBatch,
}

/// Import call in the legacy nested shape.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyImportParams {
    pub workspace_id: i64,
    pub func_profile_obj_name: String,
    pub original_matrix_ref: ObjRef,
    #[serde(default)]
    pub community_profile: Option<CommunityBranchParams>,
    #[serde(default)]
    pub organism_profile: Option<OrganismBranchParams>,
    #[serde(default)]
    pub staging_file: bool,
    #[serde(default)]
    pub build_report: bool,
}

impl LegacyImportParams {
    pub const REQUIRED: &'static [&'static str] = &[
        "workspace_id",
        "func_profile_obj_name",
        "original_matrix_ref",
    ];
    pub const OPTIONAL: &'static [&'static str] = &[
        "community_profile",
        "organism_profile",
        "staging_file",
        "build_report",
    ];

    pub fn from_value(params: &Value) -> Result<Self, ProfileError> {
        check_params(params, Self::REQUIRED, Self::OPTIONAL)?;
        serde_json::from_value(params.clone())
            .map_err(|err| ProfileError::InvalidParameter(err.to_string()))
    }
}

/// Update/upsert call against an existing legacy object.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyUpdateParams {
    pub workspace_id: i64,
    pub functional_profile_ref: ObjRef,
    #[serde(default)]
    pub community_profile: ProfileBatch,
    #[serde(default)]
    pub organism_profile: ProfileBatch,
    #[serde(default)]
    pub staging_file: bool,
    #[serde(default)]
    pub upsert: bool,
    #[serde(default)]
    pub build_report: bool,
}

impl LegacyUpdateParams {
    pub const REQUIRED: &'static [&'static str] = &["workspace_id", "functional_profile_ref"];
    pub const OPTIONAL: &'static [&'static str] = &[
        "community_profile",
        "organism_profile",
        "staging_file",
        "upsert",
        "build_report",
    ];

    pub fn from_value(params: &Value) -> Result<Self, ProfileError> {
        check_params(params, Self::REQUIRED, Self::OPTIONAL)?;
        serde_json::from_value(params.clone())
            .map_err(|err| ProfileError::InvalidParameter(err.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutput {
    pub func_profile_ref: ObjRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_ref: Option<ObjRef>,
}

/// Drives the whole pipeline: parameter validation, staging download,
/// parsing, identifier reconciliation, assembly, and persistence. All
/// collaborators sit behind traits so tests can substitute them.
pub struct ProfileImporter<W: WorkspaceClient, S: SampleClient, R: ReportClient> {
    workspace: W,
    samples: S,
    report: R,
    scratch: Utf8PathBuf,
}

impl<W: WorkspaceClient, S: SampleClient, R: ReportClient> ProfileImporter<W, S, R> {
    pub fn new(workspace: W, samples: S, report: R, scratch: Utf8PathBuf) -> Self {
        Self {
            workspace,
            samples,
            report,
            scratch,
        }
    }

    /// Imports one profile in the current single-category shape and saves it
    /// through the size-aware path.
    pub fn import_profile(&self, params: ImportParams) -> Result<ImportOutput, ProfileError> {
        info!(
            "start importing FunctionalProfile {}",
            params.func_profile_obj_name
        );

        let metadata = ProfileSpec {
            profile_file_path: Some(params.profile_file_path.clone()),
            data_epistemology: params.data_epistemology.clone(),
            epistemology_method: params.epistemology_method.clone(),
            description: params.description.clone(),
        }
        .validate_metadata()?;

        let base = self.workspace.get_object(&params.base_object_ref)?;
        let expected = self.expected_ids_for_base(params.profile_category, &base.data)?;

        let table = self.load_table(&params.profile_file_path, params.staging_file)?;
        let (table, outcome) =
            reconcile_current(table, expected.as_ref(), params.profile_category)?;
        if outcome == Reconciliation::Transposed {
            info!("profile table transposed to match the expected identifier axis");
        }

        let object = assemble_profile_object(
            params.base_object_ref.clone(),
            params.profile_category,
            params.profile_type,
            metadata,
            table,
            &base.data,
        )?;
        let value = serde_json::to_value(&object)
            .map_err(|err| ProfileError::Workspace(err.to_string()))?;

        let persister = SizeAwarePersister::new(&self.workspace, &self.scratch);
        let saved = persister.save(
            params.workspace_id,
            PROFILE_OBJECT_TYPE,
            &params.func_profile_obj_name,
            &value,
        )?;

        self.finish(saved.reference(), params.workspace_id, params.build_report)
    }

    /// Imports a nested community/organism batch in the legacy shape.
    pub fn import_legacy(&self, params: LegacyImportParams) -> Result<ImportOutput, ProfileError> {
        info!(
            "start importing legacy FunctionalProfile {}",
            params.func_profile_obj_name
        );

        let mut object = FunctionalProfile {
            original_matrix_ref: params.original_matrix_ref.clone(),
            community_profile: None,
            organism_profile: None,
        };

        if let Some(branch) = params.community_profile {
            info!("start building community profile");
            let sample_set_ref = branch.sample_set_ref.ok_or_else(|| {
                ProfileError::MissingReference("sample_set_ref from community profile".to_string())
            })?;
            let ids = self.samples.get_ids_from_samples(&sample_set_ref)?;
            let slots =
                self.build_slots(branch.profiles.into_map(), &ids, params.staging_file, false)?;
            object.community_profile = Some(CommunityProfile {
                sample_set_ref,
                slots,
            });
        }

        if let Some(branch) = params.organism_profile {
            info!("start building organism profile");
            let amplicon_set_ref = branch.amplicon_set_ref.ok_or_else(|| {
                ProfileError::MissingReference("amplicon_set_ref from organism profile".to_string())
            })?;
            let ids = amplicon_ids(&self.workspace, &amplicon_set_ref)?;
            let slots =
                self.build_slots(branch.profiles.into_map(), &ids, params.staging_file, false)?;
            object.organism_profile = Some(OrganismProfile {
                amplicon_set_ref,
                slots,
            });
        }

        let saved = self.save_legacy(
            params.workspace_id,
            &params.func_profile_obj_name,
            &object,
        )?;
        self.finish(saved, params.workspace_id, params.build_report)
    }

    /// Merges new named profiles into a stored legacy object and re-saves
    /// it, creating a new version. Existing names fail unless `upsert` is
    /// set; an absent category branch is initialized lazily from the
    /// original matrix object's set reference.
    pub fn update_legacy(&self, params: LegacyUpdateParams) -> Result<ImportOutput, ProfileError> {
        info!(
            "start updating FunctionalProfile {}",
            params.functional_profile_ref
        );

        let fetched = self.workspace.get_object(&params.functional_profile_ref)?;
        let object_name = fetched.info.name.clone();
        let mut object: FunctionalProfile = serde_json::from_value(fetched.data)
            .map_err(|err| ProfileError::Workspace(err.to_string()))?;

        if !params.community_profile.is_empty() {
            info!("start updating community profile");
            let branch = match object.community_profile.take() {
                Some(branch) => branch,
                None => CommunityProfile {
                    sample_set_ref: self.matrix_set_ref(
                        &object.original_matrix_ref,
                        "sample_set_ref",
                        "sample set associated with original matrix",
                    )?,
                    slots: ProfileSlots::default(),
                },
            };
            let ids = self.samples.get_ids_from_samples(&branch.sample_set_ref)?;
            let mut slots = branch.slots;
            self.merge_slots(
                &mut slots,
                params.community_profile.clone().into_map(),
                &ids,
                params.staging_file,
                params.upsert,
            )?;
            object.community_profile = Some(CommunityProfile {
                sample_set_ref: branch.sample_set_ref,
                slots,
            });
        }

        if !params.organism_profile.is_empty() {
            info!("start updating organism profile");
            let branch = match object.organism_profile.take() {
                Some(branch) => branch,
                None => OrganismProfile {
                    amplicon_set_ref: self.matrix_set_ref(
                        &object.original_matrix_ref,
                        "amplicon_set_ref",
                        "amplicon set associated with original matrix",
                    )?,
                    slots: ProfileSlots::default(),
                },
            };
            let ids = amplicon_ids(&self.workspace, &branch.amplicon_set_ref)?;
            let mut slots = branch.slots;
            self.merge_slots(
                &mut slots,
                params.organism_profile.clone().into_map(),
                &ids,
                params.staging_file,
                params.upsert,
            )?;
            object.organism_profile = Some(OrganismProfile {
                amplicon_set_ref: branch.amplicon_set_ref,
                slots,
            });
        }

        let saved = self.save_legacy(params.workspace_id, &object_name, &object)?;
        self.finish(saved, params.workspace_id, params.build_report)
    }

    fn expected_ids_for_base(
        &self,
        category: ProfileCategory,
        base_data: &Value,
    ) -> Result<Option<BTreeSet<String>>, ProfileError> {
        match category {
            ProfileCategory::Community => optional_ref(base_data, "sample_set_ref")?
                .map(|reference| self.samples.get_ids_from_samples(&reference))
                .transpose(),
            ProfileCategory::Organism => optional_ref(base_data, "amplicon_set_ref")?
                .map(|reference| amplicon_ids(&self.workspace, &reference))
                .transpose(),
        }
    }

    fn resolve_file(&self, path: &Utf8Path, staging: bool) -> Result<Utf8PathBuf, ProfileError> {
        if staging {
            info!("start downloading staging file {path}");
            return self.workspace.download_staging_file(path.as_str());
        }
        Ok(path.to_owned())
    }

    fn load_table(&self, path: &Utf8Path, staging: bool) -> Result<ProfileTable, ProfileError> {
        let local = self.resolve_file(path, staging)?;
        parse_profile_table(&local)
    }

    fn build_slots(
        &self,
        profiles: BTreeMap<String, ProfileSpec>,
        ids: &BTreeSet<String>,
        staging: bool,
        upsert: bool,
    ) -> Result<ProfileSlots, ProfileError> {
        let mut slots = ProfileSlots::default();
        self.merge_slots(&mut slots, profiles, ids, staging, upsert)?;
        Ok(slots)
    }

    fn merge_slots(
        &self,
        slots: &mut ProfileSlots,
        profiles: BTreeMap<String, ProfileSpec>,
        ids: &BTreeSet<String>,
        staging: bool,
        upsert: bool,
    ) -> Result<(), ProfileError> {
        for (name, spec) in profiles {
            let profile_name = ProfileName::parse(&name);
            if slots.contains(&profile_name) && !upsert {
                return Err(ProfileError::DuplicateProfile(name));
            }

            info!("start building profile table for {profile_name}");
            // metadata is validated before the entry's file is touched
            let metadata = spec.validate_metadata()?;
            let table = self.load_table(spec.file_path()?, staging)?;
            let (table, _) = reconcile_legacy(table, Some(ids))?;

            slots.insert(
                &profile_name,
                ProfileEntry {
                    metadata,
                    profile_data: table,
                },
            );
        }
        Ok(())
    }

    fn matrix_set_ref(
        &self,
        original_matrix_ref: &ObjRef,
        key: &str,
        what: &str,
    ) -> Result<ObjRef, ProfileError> {
        let matrix = self.workspace.get_object(original_matrix_ref)?;
        optional_ref(&matrix.data, key)?
            .ok_or_else(|| ProfileError::MissingReference(format!("cannot find {what}")))
    }

    fn save_legacy(
        &self,
        workspace_id: i64,
        name: &str,
        object: &FunctionalProfile,
    ) -> Result<ObjRef, ProfileError> {
        info!("start saving FunctionalProfile object: {name}");
        let value = serde_json::to_value(object)
            .map_err(|err| ProfileError::Workspace(err.to_string()))?;
        let info = self.workspace.save_object(
            workspace_id,
            &SaveSpec {
                object_type: LEGACY_OBJECT_TYPE.to_string(),
                name: name.to_string(),
                payload: SavePayload::Inline(value),
            },
        )?;
        Ok(info.reference())
    }

    fn finish(
        &self,
        reference: ObjRef,
        workspace_id: i64,
        build_report: bool,
    ) -> Result<ImportOutput, ProfileError> {
        let mut output = ImportOutput {
            func_profile_ref: reference,
            report_name: None,
            report_ref: None,
        };

        if build_report {
            info!("start generating report");
            let report = self.report.create_extended_report(&ReportParams {
                message: format!(
                    "FunctionalProfile {} saved at {}",
                    output.func_profile_ref,
                    chrono::Utc::now().to_rfc3339()
                ),
                objects_created: vec![CreatedObject {
                    reference: output.func_profile_ref.clone(),
                    description: "FunctionalProfile Object".to_string(),
                }],
                workspace_id,
                report_object_name: format!("import_func_profile_{}", uuid::Uuid::new_v4()),
            })?;
            output.report_name = Some(report.name);
            output.report_ref = Some(report.reference);
        }

        Ok(output)
    }
}
