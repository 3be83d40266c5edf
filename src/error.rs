use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum XnatcError {
    #[error("invalid match pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid XNAT host URL: {0}")]
    InvalidHost(String),

    #[error("no credentials for {0}: pass --user/--password or add an entry to $HOME/.netrc")]
    #[diagnostic(help(
        "see https://xnat.readthedocs.io/en/latest/static/tutorial.html#credentials"
    ))]
    MissingCredentials(String),

    #[error("failed to read netrc file at {0}")]
    NetrcRead(PathBuf),

    #[error(
        "to upload data you must fully specify a project, subject, experiment and either a scan or an assessor"
    )]
    IncompleteUploadTarget,

    #[error("XNAT request failed: {0}")]
    XnatHttp(String),

    #[error("XNAT returned status {status}: {message}")]
    XnatStatus { status: u16, message: String },

    #[error("unexpected XNAT response: {0}")]
    XnatResponse(String),

    #[error("sidecar metadata error: {0}")]
    Sidecar(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
