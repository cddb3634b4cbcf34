//! Error types for the replication status subsystem.

use thiserror::Error;

/// Errors that can occur while loading configuration, ingesting events or
/// answering status queries.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Configuration file could not be parsed.
    #[error("config parse error: {msg}")]
    ConfigParse {
        /// Parser error message.
        msg: String,
    },

    /// Configuration file extension is neither `.toml` nor `.json`.
    #[error("unsupported config file extension: {ext}")]
    UnsupportedConfigFormat {
        /// The offending extension.
        ext: String,
    },

    /// A multi-project remote has a URL template without `${name}`.
    #[error("remote.{remote}.url \"{url}\" lacks ${{name}} placeholder")]
    MissingPlaceholder {
        /// Remote stanza name.
        remote: String,
        /// The URL template.
        url: String,
    },

    /// A regex project pattern failed to compile.
    #[error("remote.{remote}.projects pattern \"{pattern}\" is invalid: {source}")]
    InvalidProjectPattern {
        /// Remote stanza name.
        remote: String,
        /// The pattern as configured.
        pattern: String,
        /// Underlying regex error.
        source: regex::Error,
    },

    /// A URI template could not be parsed.
    #[error("malformed URI \"{uri}\": {reason}")]
    MalformedUri {
        /// The URI text.
        uri: String,
        /// Why parsing failed.
        reason: String,
    },

    /// Cached value could not be decoded.
    #[error("codec error")]
    Codec(#[from] CodecError),

    /// Persistence journal is corrupt.
    #[error("journal corrupted at offset {offset}: {msg}")]
    JournalCorrupted {
        /// Byte offset of the bad record.
        offset: u64,
        /// Error message describing the corruption.
        msg: String,
    },

    /// The ref lister does not know the project.
    #[error("project {project} does not exist")]
    ProjectNotFound {
        /// Project name.
        project: String,
    },

    /// The caller may not read status for this project.
    #[error("Administrate Server or Project owner required")]
    Forbidden,

    /// I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Decode failures raised by the cache serializers.
///
/// These are never mapped to a default value; a caller that gets one knows the
/// bytes were not produced by a compatible encoder.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input had no bytes at all.
    #[error("empty input")]
    Empty,

    /// Leading format version is not one this build understands.
    #[error("unsupported format version: expected {expected}, got {got}")]
    UnsupportedVersion {
        /// Version this build writes.
        expected: u8,
        /// Version found in the input.
        got: u8,
    },

    /// Payload did not decode.
    #[error("malformed payload")]
    Malformed(#[from] bincode::Error),

    /// Value could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(bincode::Error),

    /// Payload decoded but names a result this build does not know.
    #[error("unknown replication result: {0}")]
    UnknownResult(String),
}
