//! Stable error kinds (spec §7). These identifiers, not their `Debug`
//! rendering, are the contract: callers should match on variants, never on
//! message text.

use std::fmt;

use crate::object_id::ObjectId;

/// Context a façade verb attaches to a leaf error without changing its kind
/// (spec §7 "Propagation").
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    pub verb: Option<&'static str>,
    pub paths: Vec<String>,
}

impl OperationContext {
    pub fn for_verb(verb: &'static str) -> Self {
        Self {
            verb: Some(verb),
            paths: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(verb) = self.verb {
            write!(f, "during `{verb}`")?;
        }
        if !self.paths.is_empty() {
            write!(f, " (paths: {})", self.paths.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not a repository (no .wit directory found walking upward)")]
    NotARepository,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("malformed object{}: {1}", .0.as_ref().map(|id| format!(" {id}")).unwrap_or_default())]
    MalformedObject(Option<ObjectId>, String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: ObjectId, actual: ObjectId },

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("ref conflict on {name}: expected {expected:?}, found {actual:?}")]
    RefConflict {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },

    #[error("uncommitted changes would be lost")]
    IndexDirty,

    #[error("a merge is already in progress")]
    MergeInProgress,

    #[error("no merge is in progress")]
    NoMergeInProgress,

    #[error("merge conflict in: {}", .0.join(", "))]
    MergeConflict(Vec<String>),

    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    #[error("{source}{context}", context = .context.as_ref().map(|c| format!(" {c}")).unwrap_or_default())]
    Context {
        #[source]
        source: Box<Error>,
        context: Option<OperationContext>,
    },

    #[error(transparent)]
    Other(#[from] std::io::Error),
}

impl Error {
    /// Wraps this error with operation context, preserving the original
    /// variant for programmatic callers (spec §7).
    pub fn with_context(self, context: OperationContext) -> Self {
        Error::Context {
            source: Box::new(self),
            context: Some(context),
        }
    }

    /// The innermost, context-free variant.
    pub fn kind(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.kind(),
            other => other,
        }
    }

    /// Exit code per spec §6.3.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            Error::NotARepository => 2,
            Error::MergeConflict(_) | Error::IndexDirty => 3,
            Error::Other(_) => 128,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
