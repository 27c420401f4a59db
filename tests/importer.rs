use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Value, json};
use tempfile::TempDir;

use profile_importer::assemble::{LEGACY_OBJECT_TYPE, PROFILE_OBJECT_TYPE};
use profile_importer::domain::ObjRef;
use profile_importer::error::ProfileError;
use profile_importer::importer::{
    ImportParams, LegacyImportParams, LegacyUpdateParams, ProfileImporter,
};
use profile_importer::workspace::{
    FetchedObject, ObjectInfo, ReportClient, ReportInfo, ReportParams, SampleClient, SavePayload,
    SaveSpec, WorkspaceClient,
};

/// In-memory stand-in for the data service: seeded objects keyed by
/// reference, saved specs recorded behind a shared handle.
#[derive(Clone, Default)]
struct MockWorkspace {
    objects: Arc<Mutex<HashMap<String, (String, Value)>>>,
    saved: Arc<Mutex<Vec<(i64, SaveSpec)>>>,
    staging_dir: Option<Utf8PathBuf>,
}

impl MockWorkspace {
    fn with_object(self, reference: &str, name: &str, data: Value) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(reference.to_string(), (name.to_string(), data));
        self
    }

    fn with_staging_dir(mut self, dir: Utf8PathBuf) -> Self {
        self.staging_dir = Some(dir);
        self
    }

    fn saved_payload(&self, index: usize) -> (i64, String, String, Value) {
        let saved = self.saved.lock().unwrap();
        let (workspace_id, spec) = &saved[index];
        let value = match &spec.payload {
            SavePayload::Inline(value) => value.clone(),
            SavePayload::JsonFile(path) => {
                serde_json::from_str(&std::fs::read_to_string(path.as_std_path()).unwrap()).unwrap()
            }
        };
        (
            *workspace_id,
            spec.object_type.clone(),
            spec.name.clone(),
            value,
        )
    }
}

impl WorkspaceClient for MockWorkspace {
    fn get_object(&self, reference: &ObjRef) -> Result<FetchedObject, ProfileError> {
        let objects = self.objects.lock().unwrap();
        let (name, data) = objects
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| ProfileError::Workspace(format!("no object {reference}")))?;
        let parts: Vec<i64> = reference
            .as_str()
            .split('/')
            .map(|segment| segment.parse().unwrap_or(1))
            .collect();
        Ok(FetchedObject {
            info: ObjectInfo {
                object_id: parts[1],
                name,
                version: parts[2],
                workspace_id: parts[0],
            },
            data,
        })
    }

    fn save_object(&self, workspace_id: i64, spec: &SaveSpec) -> Result<ObjectInfo, ProfileError> {
        let mut saved = self.saved.lock().unwrap();
        saved.push((workspace_id, spec.clone()));
        Ok(ObjectInfo {
            object_id: 10,
            name: spec.name.clone(),
            version: saved.len() as i64,
            workspace_id,
        })
    }

    fn download_staging_file(&self, subdir_path: &str) -> Result<Utf8PathBuf, ProfileError> {
        let staging_dir = self
            .staging_dir
            .as_ref()
            .ok_or_else(|| ProfileError::Staging("no staging area configured".to_string()))?;
        Ok(staging_dir.join(subdir_path))
    }
}

#[derive(Clone, Default)]
struct MockSamples {
    ids: BTreeSet<String>,
}

impl MockSamples {
    fn with_ids(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

impl SampleClient for MockSamples {
    fn get_ids_from_samples(&self, _: &ObjRef) -> Result<BTreeSet<String>, ProfileError> {
        Ok(self.ids.clone())
    }
}

struct MockReport;

impl ReportClient for MockReport {
    fn create_extended_report(&self, params: &ReportParams) -> Result<ReportInfo, ProfileError> {
        Ok(ReportInfo {
            name: params.report_object_name.clone(),
            reference: "9/9/9".parse().unwrap(),
        })
    }
}

fn write_fixture(dir: &TempDir, name: &str, content: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap()
        .join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn scratch(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
}

fn base_matrix() -> Value {
    json!({
        "sample_set_ref": "4/5/6",
        "amplicon_set_ref": "4/7/1",
        "row_attributemapping_ref": "8/8/8",
        "col_attributemapping_ref": "7/7/7",
    })
}

fn import_params(file_path: &str, extra: Value) -> ImportParams {
    let mut params = json!({
        "workspace_id": 7,
        "func_profile_obj_name": "my_profile",
        "base_object_ref": "1/2/3",
        "profile_file_path": file_path,
        "profile_category": "community",
        "profile_type": "amplicon",
        "build_report": false,
    });
    params
        .as_object_mut()
        .unwrap()
        .extend(extra.as_object().cloned().unwrap_or_default());
    ImportParams::from_value(&params).unwrap()
}

#[test]
fn imports_community_profile_without_transpose() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "profile.csv", "id,s1,s2,s3\npath1,1,2,3\npath2,4,5,6\n");

    let workspace = MockWorkspace::default().with_object("1/2/3", "matrix", base_matrix());
    let saved = Arc::clone(&workspace.saved);
    let importer = ProfileImporter::new(
        workspace.clone(),
        MockSamples::with_ids(&["s1", "s2", "s3"]),
        MockReport,
        scratch(&dir),
    );

    let output = importer
        .import_profile(import_params(file.as_str(), json!({})))
        .unwrap();
    assert_eq!(output.func_profile_ref.as_str(), "7/10/1");
    assert!(output.report_name.is_none());
    assert_eq!(saved.lock().unwrap().len(), 1);

    let (workspace_id, object_type, name, value) = workspace.saved_payload(0);
    assert_eq!(workspace_id, 7);
    assert_eq!(object_type, PROFILE_OBJECT_TYPE);
    assert_eq!(name, "my_profile");
    assert_eq!(value["data"]["col_ids"], json!(["s1", "s2", "s3"]));
    assert_eq!(value["data"]["row_ids"], json!(["path1", "path2"]));
    assert_eq!(value["data"]["values"][0], json!([1, 2, 3]));
    assert_eq!(value["profile_category"], json!("community"));
    assert_eq!(value["base_object_ref"], json!("1/2/3"));
    // community keeps the column-side mapping reference and drops the row side
    assert_eq!(value["col_attributemapping_ref"], json!("7/7/7"));
    assert!(value.get("row_attributemapping_ref").is_none());
}

#[test]
fn transposes_table_when_samples_sit_on_rows() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "profile.csv", "id,path1,path2\ns1,1,2\ns2,3,4\ns3,5,6\n");

    let workspace = MockWorkspace::default().with_object("1/2/3", "matrix", base_matrix());
    let importer = ProfileImporter::new(
        workspace.clone(),
        MockSamples::with_ids(&["s1", "s2", "s3"]),
        MockReport,
        scratch(&dir),
    );

    importer
        .import_profile(import_params(file.as_str(), json!({})))
        .unwrap();

    let (_, _, _, value) = workspace.saved_payload(0);
    assert_eq!(value["data"]["col_ids"], json!(["s1", "s2", "s3"]));
    assert_eq!(value["data"]["row_ids"], json!(["path1", "path2"]));
    assert_eq!(value["data"]["values"], json!([[1, 3, 5], [2, 4, 6]]));
}

#[test]
fn rejects_table_with_unmatched_identifiers() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "profile.csv", "id,s1,s9\npath1,1,2\n");

    let workspace = MockWorkspace::default().with_object("1/2/3", "matrix", base_matrix());
    let importer = ProfileImporter::new(
        workspace,
        MockSamples::with_ids(&["s1", "s2", "s3"]),
        MockReport,
        scratch(&dir),
    );

    let err = importer
        .import_profile(import_params(file.as_str(), json!({})))
        .unwrap_err();
    assert_matches!(err, ProfileError::IdentifierMismatch(ref ids) if ids.contains("s9"));
}

#[test]
fn validates_epistemology_before_touching_the_file() {
    let dir = TempDir::new().unwrap();

    let workspace = MockWorkspace::default().with_object("1/2/3", "matrix", base_matrix());
    let importer = ProfileImporter::new(
        workspace,
        MockSamples::with_ids(&["s1"]),
        MockReport,
        scratch(&dir),
    );

    // the file does not exist, so reaching the parser would fail differently
    let err = importer
        .import_profile(import_params(
            "/nonexistent/profile.csv",
            json!({ "data_epistemology": "guessed" }),
        ))
        .unwrap_err();
    assert_matches!(err, ProfileError::InvalidEpistemology(_));
}

#[test]
fn resolves_staging_paths_through_the_workspace() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir, "upload/profile.csv", "id,s1,s2\npath1,1,2\n");

    let workspace = MockWorkspace::default()
        .with_object("1/2/3", "matrix", base_matrix())
        .with_staging_dir(scratch(&dir));
    let importer = ProfileImporter::new(
        workspace.clone(),
        MockSamples::with_ids(&["s1", "s2"]),
        MockReport,
        scratch(&dir),
    );

    importer
        .import_profile(import_params(
            "upload/profile.csv",
            json!({ "staging_file": true }),
        ))
        .unwrap();

    let (_, _, _, value) = workspace.saved_payload(0);
    assert_eq!(value["data"]["col_ids"], json!(["s1", "s2"]));
}

#[test]
fn builds_report_when_requested() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "profile.csv", "id,s1\npath1,1\n");

    let workspace = MockWorkspace::default().with_object("1/2/3", "matrix", base_matrix());
    let importer = ProfileImporter::new(
        workspace,
        MockSamples::with_ids(&["s1"]),
        MockReport,
        scratch(&dir),
    );

    let output = importer
        .import_profile(import_params(file.as_str(), json!({ "build_report": true })))
        .unwrap();
    let name = output.report_name.unwrap();
    assert!(name.starts_with("import_func_profile_"));
    assert_eq!(output.report_ref.unwrap().as_str(), "9/9/9");
}

#[test]
fn imports_legacy_batch_into_named_slots() {
    let dir = TempDir::new().unwrap();
    let pathway = write_fixture(&dir, "pathway.csv", "id,s1,s2\np1,1,2\n");
    let cog = write_fixture(&dir, "cog.csv", "id,s1,s2\ncog1,3,4\n");

    let workspace = MockWorkspace::default();
    let importer = ProfileImporter::new(
        workspace.clone(),
        MockSamples::with_ids(&["s1", "s2"]),
        MockReport,
        scratch(&dir),
    );

    let params = LegacyImportParams::from_value(&json!({
        "workspace_id": 7,
        "func_profile_obj_name": "legacy_profile",
        "original_matrix_ref": "1/2/3",
        "community_profile": {
            "sample_set_ref": "4/5/6",
            "profiles": {
                "pathway": { "profile_file_path": pathway.as_str() },
                "cog": { "profile_file_path": cog.as_str() },
            },
        },
    }))
    .unwrap();

    let output = importer.import_legacy(params).unwrap();
    assert_eq!(output.func_profile_ref.as_str(), "7/10/1");

    let (_, object_type, name, value) = workspace.saved_payload(0);
    assert_eq!(object_type, LEGACY_OBJECT_TYPE);
    assert_eq!(name, "legacy_profile");
    assert_eq!(value["original_matrix_ref"], json!("1/2/3"));
    let community = &value["community_profile"];
    assert_eq!(community["sample_set_ref"], json!("4/5/6"));
    assert_eq!(community["pathway"]["profile_data"]["row_ids"], json!(["p1"]));
    assert_eq!(
        community["custom_profiles"]["cog"]["profile_data"]["col_ids"],
        json!(["s1", "s2"])
    );
    assert!(value.get("organism_profile").is_none());
}

#[test]
fn legacy_import_requires_branch_set_ref() {
    let dir = TempDir::new().unwrap();
    let importer = ProfileImporter::new(
        MockWorkspace::default(),
        MockSamples::default(),
        MockReport,
        scratch(&dir),
    );

    let params = LegacyImportParams::from_value(&json!({
        "workspace_id": 7,
        "func_profile_obj_name": "legacy_profile",
        "original_matrix_ref": "1/2/3",
        "community_profile": { "profiles": {} },
    }))
    .unwrap();

    assert_matches!(
        importer.import_legacy(params),
        Err(ProfileError::MissingReference(_))
    );
}

fn stored_legacy_object() -> Value {
    json!({
        "original_matrix_ref": "1/2/3",
        "community_profile": {
            "sample_set_ref": "4/5/6",
            "pathway": {
                "profile_data": {
                    "row_ids": ["p1"],
                    "col_ids": ["s1", "s2"],
                    "values": [[1, 2]],
                },
            },
        },
    })
}

#[test]
fn update_rejects_existing_name_without_upsert() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "pathway2.csv", "id,s1,s2\np9,9,9\n");

    let workspace = MockWorkspace::default().with_object(
        "3/4/5",
        "stored_profile",
        stored_legacy_object(),
    );
    let importer = ProfileImporter::new(
        workspace,
        MockSamples::with_ids(&["s1", "s2"]),
        MockReport,
        scratch(&dir),
    );

    let params = LegacyUpdateParams::from_value(&json!({
        "workspace_id": 7,
        "functional_profile_ref": "3/4/5",
        "community_profile": {
            "pathway": { "profile_file_path": file.as_str() },
        },
    }))
    .unwrap();

    let err = importer.update_legacy(params).unwrap_err();
    assert_matches!(err, ProfileError::DuplicateProfile(ref name) if name == "pathway");
}

#[test]
fn update_overwrites_existing_name_with_upsert() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "pathway2.csv", "id,s1,s2\np9,9,9\n");

    let workspace = MockWorkspace::default().with_object(
        "3/4/5",
        "stored_profile",
        stored_legacy_object(),
    );
    let importer = ProfileImporter::new(
        workspace.clone(),
        MockSamples::with_ids(&["s1", "s2"]),
        MockReport,
        scratch(&dir),
    );

    let params = LegacyUpdateParams::from_value(&json!({
        "workspace_id": 7,
        "functional_profile_ref": "3/4/5",
        "upsert": true,
        "community_profile": {
            "pathway": { "profile_file_path": file.as_str() },
        },
    }))
    .unwrap();

    let output = importer.update_legacy(params).unwrap();
    assert_eq!(output.func_profile_ref.as_str(), "7/10/1");

    // re-saved under the stored object's own name, with the replaced table
    let (_, object_type, name, value) = workspace.saved_payload(0);
    assert_eq!(object_type, LEGACY_OBJECT_TYPE);
    assert_eq!(name, "stored_profile");
    assert_eq!(
        value["community_profile"]["pathway"]["profile_data"]["row_ids"],
        json!(["p9"])
    );
}

#[test]
fn update_initializes_missing_branch_from_matrix() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "ko.csv", "id,otu1,otu2\nK00001,1,2\n");

    let workspace = MockWorkspace::default()
        .with_object("3/4/5", "stored_profile", stored_legacy_object())
        .with_object("1/2/3", "matrix", base_matrix())
        .with_object(
            "4/7/1",
            "amplicon_set",
            json!({ "amplicons": { "otu1": {}, "otu2": {} } }),
        );
    let importer = ProfileImporter::new(
        workspace.clone(),
        MockSamples::with_ids(&["s1", "s2"]),
        MockReport,
        scratch(&dir),
    );

    let params = LegacyUpdateParams::from_value(&json!({
        "workspace_id": 7,
        "functional_profile_ref": "3/4/5",
        "organism_profile": {
            "KO": { "profile_file_path": file.as_str() },
        },
    }))
    .unwrap();

    importer.update_legacy(params).unwrap();

    let (_, _, _, value) = workspace.saved_payload(0);
    let organism = &value["organism_profile"];
    // amplicon set ref pulled lazily from the original matrix object
    assert_eq!(organism["amplicon_set_ref"], json!("4/7/1"));
    assert_eq!(organism["KO"]["profile_data"]["col_ids"], json!(["otu1", "otu2"]));
    // untouched community branch survives the round trip
    assert_eq!(
        value["community_profile"]["pathway"]["profile_data"]["row_ids"],
        json!(["p1"])
    );
}
