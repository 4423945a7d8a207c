use std::path::PathBuf;
use thiserror::Error;

/// Failures that end a pipeline run.
///
/// Recoverable problems (a single auxiliary file that could not be fetched, a
/// failed size probe) never show up here; they are logged where they happen
/// and reported through `Option` or [`crate::fetcher::FileOutcome`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unable to read configuration file {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse configuration file")]
    ConfigParse(#[from] toml::de::Error),

    #[error("product identifier {0:?} seems to be malformed")]
    MalformedIdentifier(String),

    #[error("unrecognized platform in product name {0:?}")]
    UnknownPlatform(String),

    #[error("lock file {0} is present, another run owns the output directory")]
    Locked(PathBuf),

    #[error("no {0} returned by the source archive")]
    MissingMetadata(String),

    #[error("unable to parse manifest")]
    ManifestParse(#[from] roxmltree::Error),

    #[error("no collection mapping for product {0:?}")]
    UnmappedProduct(String),

    #[error("unable to start item builder {program}")]
    BuilderSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("item builder exited with code {code}")]
    Builder { code: i32 },

    #[error("no item builder output found in {0}")]
    NoItemOutput(PathBuf),

    #[error("item builder output {path} is not a STAC item")]
    InvalidItem {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("upload rejected with code {code}: {message}")]
    UploadRejected { code: String, message: String },

    #[error("unexpected upload response: {0}")]
    UnexpectedUploadResponse(String),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Process exit code for this failure. The builder's own exit code is
    /// passed through, everything else is a plain failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Builder { code } if *code != 0 => *code,
            _ => 1,
        }
    }
}
