use std::collections::BTreeSet;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::domain::ObjRef;
use crate::error::ProfileError;

/// Object info tuple fields the importer needs, picked out of the store's
/// 11-element info list (`[0]` object id, `[1]` name, `[4]` version, `[6]`
/// workspace id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub object_id: i64,
    pub name: String,
    pub version: i64,
    pub workspace_id: i64,
}

impl ObjectInfo {
    pub fn from_tuple(info: &Value) -> Result<Self, ProfileError> {
        let tuple = info
            .as_array()
            .ok_or_else(|| ProfileError::Workspace("object info is not a list".to_string()))?;
        let int_at = |index: usize| {
            tuple
                .get(index)
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    ProfileError::Workspace(format!("object info field {index} is not an integer"))
                })
        };
        let name = tuple
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| ProfileError::Workspace("object info has no name".to_string()))?
            .to_string();
        Ok(Self {
            object_id: int_at(0)?,
            name,
            version: int_at(4)?,
            workspace_id: int_at(6)?,
        })
    }

    /// `"wsid/objid/version"` reference to this exact version.
    pub fn reference(&self) -> ObjRef {
        ObjRef::versioned(self.workspace_id, self.object_id, self.version)
    }
}

#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub info: ObjectInfo,
    pub data: Value,
}

/// How the object payload reaches the store: inline for small objects, a
/// serialized JSON file on shared scratch for large ones.
#[derive(Debug, Clone)]
pub enum SavePayload {
    Inline(Value),
    JsonFile(Utf8PathBuf),
}

#[derive(Debug, Clone)]
pub struct SaveSpec {
    pub object_type: String,
    pub name: String,
    pub payload: SavePayload,
}

pub trait WorkspaceClient: Send + Sync {
    fn get_object(&self, reference: &ObjRef) -> Result<FetchedObject, ProfileError>;
    fn save_object(&self, workspace_id: i64, spec: &SaveSpec) -> Result<ObjectInfo, ProfileError>;
    fn download_staging_file(&self, subdir_path: &str) -> Result<Utf8PathBuf, ProfileError>;
}

pub trait SampleClient: Send + Sync {
    fn get_ids_from_samples(&self, sample_set_ref: &ObjRef)
    -> Result<BTreeSet<String>, ProfileError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedObject {
    #[serde(rename = "ref")]
    pub reference: ObjRef,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportParams {
    pub message: String,
    pub objects_created: Vec<CreatedObject>,
    pub workspace_id: i64,
    pub report_object_name: String,
}

#[derive(Debug, Clone)]
pub struct ReportInfo {
    pub name: String,
    pub reference: ObjRef,
}

pub trait ReportClient: Send + Sync {
    fn create_extended_report(&self, params: &ReportParams) -> Result<ReportInfo, ProfileError>;
}

/// Member identifiers of an amplicon set: the keys of its `amplicons`
/// mapping.
pub fn amplicon_ids(
    workspace: &impl WorkspaceClient,
    amplicon_set_ref: &ObjRef,
) -> Result<BTreeSet<String>, ProfileError> {
    info!("start retrieving OTU ids from amplicon set {amplicon_set_ref}");
    let object = workspace.get_object(amplicon_set_ref)?;
    let amplicons = object
        .data
        .get("amplicons")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            ProfileError::MissingReference(format!(
                "amplicon set {amplicon_set_ref} has no amplicons mapping"
            ))
        })?;
    Ok(amplicons.keys().cloned().collect())
}

enum RpcError {
    Transport(String),
    Status { status: u16, message: String },
    Service(String),
}

/// Minimal KBase-style JSON-RPC 1.1 transport shared by the HTTP clients.
#[derive(Clone)]
struct JsonRpc {
    client: Client,
    url: String,
}

impl JsonRpc {
    fn new(url: &str, token: &str) -> Result<Self, RpcError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("profile-importer/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RpcError::Transport(err.to_string()))?,
        );
        if !token.is_empty() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                HeaderValue::from_str(token).map_err(|err| RpcError::Transport(err.to_string()))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(1800))
            .build()
            .map_err(|err| RpcError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Calls `method` with a single positional parameter and returns the
    /// first element of the result list.
    fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "method": method,
            "params": [params],
            "version": "1.1",
            "id": uuid::Uuid::new_v4().to_string(),
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|err| RpcError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "service request failed".to_string());
            return Err(RpcError::Status { status, message });
        }

        let envelope: Value = response
            .json()
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        if let Some(error) = envelope.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown service error");
            return Err(RpcError::Service(message.to_string()));
        }

        envelope
            .get("result")
            .and_then(Value::as_array)
            .and_then(|result| result.first())
            .cloned()
            .ok_or_else(|| RpcError::Service("service returned no result".to_string()))
    }
}

/// Object store + staging area client, speaking the data service's JSON-RPC
/// callback endpoint.
#[derive(Clone)]
pub struct DataServiceHttpClient {
    rpc: JsonRpc,
}

impl DataServiceHttpClient {
    pub fn new(callback_url: &str, token: &str) -> Result<Self, ProfileError> {
        let rpc = JsonRpc::new(callback_url, token).map_err(map_workspace_err)?;
        Ok(Self { rpc })
    }
}

fn map_workspace_err(error: RpcError) -> ProfileError {
    match error {
        RpcError::Transport(message) | RpcError::Service(message) => {
            ProfileError::Workspace(message)
        }
        RpcError::Status { status, message } => ProfileError::WorkspaceStatus { status, message },
    }
}

impl WorkspaceClient for DataServiceHttpClient {
    fn get_object(&self, reference: &ObjRef) -> Result<FetchedObject, ProfileError> {
        let result = self
            .rpc
            .call(
                "DataFileUtil.get_objects",
                json!({ "object_refs": [reference.as_str()] }),
            )
            .map_err(map_workspace_err)?;

        let first = result
            .get("data")
            .and_then(Value::as_array)
            .and_then(|data| data.first())
            .ok_or_else(|| {
                ProfileError::Workspace(format!("object {reference} not found"))
            })?;
        let info = ObjectInfo::from_tuple(first.get("info").unwrap_or(&Value::Null))?;
        let data = first.get("data").cloned().unwrap_or(Value::Null);
        Ok(FetchedObject { info, data })
    }

    fn save_object(&self, workspace_id: i64, spec: &SaveSpec) -> Result<ObjectInfo, ProfileError> {
        let mut object = json!({
            "type": spec.object_type,
            "name": spec.name,
        });
        match &spec.payload {
            SavePayload::Inline(data) => {
                object["data"] = data.clone();
            }
            SavePayload::JsonFile(path) => {
                object["data_json_file"] = Value::String(path.to_string());
            }
        }

        let result = self
            .rpc
            .call(
                "DataFileUtil.save_objects",
                json!({ "id": workspace_id, "objects": [object] }),
            )
            .map_err(map_workspace_err)?;

        let info = result
            .as_array()
            .and_then(|infos| infos.first())
            .ok_or_else(|| ProfileError::Workspace("save returned no object info".to_string()))?;
        ObjectInfo::from_tuple(info)
    }

    fn download_staging_file(&self, subdir_path: &str) -> Result<Utf8PathBuf, ProfileError> {
        let map_err = |error: RpcError| match error {
            RpcError::Transport(message) | RpcError::Service(message) => {
                ProfileError::Staging(message)
            }
            RpcError::Status { status, message } => {
                ProfileError::Staging(format!("status {status}: {message}"))
            }
        };

        let result = self
            .rpc
            .call(
                "DataFileUtil.download_staging_file",
                json!({ "staging_file_subdir_path": subdir_path }),
            )
            .map_err(map_err)?;

        result
            .get("copy_file_path")
            .and_then(Value::as_str)
            .map(Utf8PathBuf::from)
            .ok_or_else(|| {
                ProfileError::Staging(format!("no copy_file_path returned for {subdir_path}"))
            })
    }
}

/// Sample lookup backed by the data service: fetches the sample set object
/// and collects its member ids.
#[derive(Clone)]
pub struct SampleServiceHttpClient {
    rpc: JsonRpc,
}

impl SampleServiceHttpClient {
    pub fn new(callback_url: &str, token: &str) -> Result<Self, ProfileError> {
        let rpc = JsonRpc::new(callback_url, token)
            .map_err(|error| match error {
                RpcError::Transport(message)
                | RpcError::Service(message) => ProfileError::SampleService(message),
                RpcError::Status { status, message } => {
                    ProfileError::SampleService(format!("status {status}: {message}"))
                }
            })?;
        Ok(Self { rpc })
    }
}

impl SampleClient for SampleServiceHttpClient {
    fn get_ids_from_samples(
        &self,
        sample_set_ref: &ObjRef,
    ) -> Result<BTreeSet<String>, ProfileError> {
        info!("start retrieving sample ids from sample set {sample_set_ref}");
        let map_err = |error: RpcError| match error {
            RpcError::Transport(message) | RpcError::Service(message) => {
                ProfileError::SampleService(message)
            }
            RpcError::Status { status, message } => {
                ProfileError::SampleService(format!("status {status}: {message}"))
            }
        };

        let result = self
            .rpc
            .call(
                "DataFileUtil.get_objects",
                json!({ "object_refs": [sample_set_ref.as_str()] }),
            )
            .map_err(map_err)?;

        let samples = result
            .get("data")
            .and_then(Value::as_array)
            .and_then(|data| data.first())
            .and_then(|object| object.get("data"))
            .and_then(|data| data.get("samples"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ProfileError::SampleService(format!(
                    "sample set {sample_set_ref} has no samples list"
                ))
            })?;

        let ids = samples
            .iter()
            .filter_map(|sample| {
                sample
                    .get("id")
                    .or_else(|| sample.get("name"))
                    .and_then(Value::as_str)
            })
            .map(str::to_string)
            .collect();
        Ok(ids)
    }
}

#[derive(Clone)]
pub struct ReportHttpClient {
    rpc: JsonRpc,
}

impl ReportHttpClient {
    pub fn new(callback_url: &str, token: &str) -> Result<Self, ProfileError> {
        let rpc = JsonRpc::new(callback_url, token).map_err(|error| match error {
            RpcError::Transport(message) | RpcError::Service(message) => {
                ProfileError::Report(message)
            }
            RpcError::Status { status, message } => {
                ProfileError::Report(format!("status {status}: {message}"))
            }
        })?;
        Ok(Self { rpc })
    }
}

impl ReportClient for ReportHttpClient {
    fn create_extended_report(&self, params: &ReportParams) -> Result<ReportInfo, ProfileError> {
        let map_err = |error: RpcError| match error {
            RpcError::Transport(message) | RpcError::Service(message) => {
                ProfileError::Report(message)
            }
            RpcError::Status { status, message } => {
                ProfileError::Report(format!("status {status}: {message}"))
            }
        };

        let params_value =
            serde_json::to_value(params).map_err(|err| ProfileError::Report(err.to_string()))?;
        let result = self
            .rpc
            .call("KBaseReport.create_extended_report", params_value)
            .map_err(map_err)?;

        let name = result
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProfileError::Report("report has no name".to_string()))?
            .to_string();
        let reference = result
            .get("ref")
            .and_then(Value::as_str)
            .ok_or_else(|| ProfileError::Report("report has no ref".to_string()))?
            .parse()?;

        Ok(ReportInfo { name, reference })
    }
}

/// Deserialization helper for collaborator payloads carrying an object
/// reference that may be absent.
pub fn optional_ref(data: &Value, key: &str) -> Result<Option<ObjRef>, ProfileError> {
    match data.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(Some(value.parse()?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_info_from_store_tuple() {
        let info = json!([12, "my_profile", "KBaseProfile.FunctionalProfile-1.0", "ts", 3, "user", 55, "ws_name", "checksum", 1024, null]);
        let parsed = ObjectInfo::from_tuple(&info).unwrap();
        assert_eq!(parsed.object_id, 12);
        assert_eq!(parsed.name, "my_profile");
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.workspace_id, 55);
        assert_eq!(parsed.reference().as_str(), "55/12/3");
    }

    #[test]
    fn object_info_rejects_short_tuple() {
        assert!(ObjectInfo::from_tuple(&json!([1, "name"])).is_err());
        assert!(ObjectInfo::from_tuple(&json!("not a list")).is_err());
    }

    #[test]
    fn optional_ref_handles_absent_and_present() {
        let data = json!({ "sample_set_ref": "1/2/3" });
        assert_eq!(
            optional_ref(&data, "sample_set_ref").unwrap().unwrap().as_str(),
            "1/2/3"
        );
        assert!(optional_ref(&data, "amplicon_set_ref").unwrap().is_none());
    }
}
