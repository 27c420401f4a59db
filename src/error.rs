use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ProfileError {
    #[error("required keys {0} not in supplied parameters")]
    MissingParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("cannot parse {0}: please provide a valid tsv, workbook, or csv file")]
    Parse(String),

    #[error("profile file does not contain matching sample or amplicon set ids: {0}")]
    IdentifierMismatch(String),

    #[error("data epistemology can only be one of measured, asserted, predicted (got {0})")]
    InvalidEpistemology(String),

    #[error("missing reference: {0}")]
    MissingReference(String),

    #[error("profile [{0}] already exists, set upsert to overwrite it")]
    DuplicateProfile(String),

    #[error("serialized object is {0} bytes, over the 1 GiB object store limit")]
    ObjectTooLarge(u64),

    #[error("profile category must be community or organism (got {0})")]
    UnsupportedCategory(String),

    #[error("profile type must be amplicon, mg, or modelset (got {0})")]
    UnsupportedType(String),

    #[error("invalid object reference: {0}")]
    InvalidObjRef(String),

    #[error("malformed profile table: {0}")]
    MalformedTable(String),

    #[error("workspace request failed: {0}")]
    Workspace(String),

    #[error("workspace returned status {status}: {message}")]
    WorkspaceStatus { status: u16, message: String },

    #[error("staging file download failed: {0}")]
    Staging(String),

    #[error("sample service request failed: {0}")]
    SampleService(String),

    #[error("report request failed: {0}")]
    Report(String),

    #[error("missing config file profile-importer.json and no service environment set")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
