use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tracing::info;

use crate::error::ProfileError;
use crate::workspace::{ObjectInfo, SavePayload, SaveSpec, WorkspaceClient};

/// Largest payload the store accepts inline over the direct save path.
pub const MAX_INLINE_BYTES: u64 = 200 * 1024 * 1024;
/// Hard object size cap of the backing store.
pub const MAX_OBJECT_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveRoute {
    Direct,
    ScratchFile,
}

/// Picks the save path for a serialized payload of `len` bytes. The byte
/// thresholds mirror the backing store's own object-size limits.
pub fn route_for_size(len: u64) -> Result<SaveRoute, ProfileError> {
    if len > MAX_OBJECT_BYTES {
        return Err(ProfileError::ObjectTooLarge(len));
    }
    if len > MAX_INLINE_BYTES {
        return Ok(SaveRoute::ScratchFile);
    }
    Ok(SaveRoute::Direct)
}

/// Serializes an object, measures it, and saves it over whichever path its
/// size calls for. Scratch dumps go under a fresh per-call subdirectory so
/// concurrent callers sharing the scratch directory never collide.
pub struct SizeAwarePersister<'a, W: WorkspaceClient> {
    workspace: &'a W,
    scratch: &'a Utf8Path,
}

impl<'a, W: WorkspaceClient> SizeAwarePersister<'a, W> {
    pub fn new(workspace: &'a W, scratch: &'a Utf8Path) -> Self {
        Self { workspace, scratch }
    }

    pub fn save(
        &self,
        workspace_id: i64,
        object_type: &str,
        name: &str,
        data: &Value,
    ) -> Result<ObjectInfo, ProfileError> {
        let serialized =
            serde_json::to_vec(data).map_err(|err| ProfileError::Workspace(err.to_string()))?;
        let size = serialized.len() as u64;

        let payload = match route_for_size(size)? {
            SaveRoute::Direct => {
                info!("saving {name} inline ({size} bytes)");
                SavePayload::Inline(data.clone())
            }
            SaveRoute::ScratchFile => {
                info!("saving {name} via scratch file ({size} bytes)");
                SavePayload::JsonFile(self.write_scratch_dump(name, &serialized)?)
            }
        };

        self.workspace.save_object(
            workspace_id,
            &SaveSpec {
                object_type: object_type.to_string(),
                name: name.to_string(),
                payload,
            },
        )
    }

    fn write_scratch_dump(&self, name: &str, serialized: &[u8]) -> Result<Utf8PathBuf, ProfileError> {
        let call_dir = self
            .scratch
            .join(format!("func_profile_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(call_dir.as_std_path())
            .map_err(|err| ProfileError::Filesystem(err.to_string()))?;
        let dump_path = call_dir.join(format!("{name}.json"));
        fs::write(dump_path.as_std_path(), serialized)
            .map_err(|err| ProfileError::Filesystem(err.to_string()))?;
        Ok(dump_path)
    }
}
