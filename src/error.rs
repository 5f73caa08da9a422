use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Reason code attached to a failed data-store command.
///
/// The command transport is the only place that looks at reply text; the
/// rest of the crate branches on these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// The node could not be reached at all
    Unreachable,
    /// A failover was sent to a node that is not a replica
    NotReplica,
    /// A replica query was sent to a node that is not a master
    NotMaster,
    /// The node table has no entry for the given member ID
    UnknownNode,
    /// A join failed but all nodes already agree on the slot configuration
    AlreadyAgreed,
    /// Any other rejected command
    Rejected,
}

impl fmt::Display for CommandErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "unreachable"),
            Self::NotReplica => write!(f, "not a replica"),
            Self::NotMaster => write!(f, "not a master"),
            Self::UnknownNode => write!(f, "unknown node"),
            Self::AlreadyAgreed => write!(f, "already agreed"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("redis command '{command}' failed on {node} ({kind}): {message}")]
    Command {
        node: String,
        command: String,
        kind: CommandErrorKind,
        message: String,
    },

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("Failed to parse {label} label: '{value}' ({pod})")]
    InvalidLabel {
        label: &'static str,
        value: String,
        pod: String,
    },

    #[error("Slot out of range: {0}")]
    SlotOutOfRange(String),

    #[error("Unsupported topology: {0}")]
    Unsupported(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Cluster recovery not complete")]
    RecoveryIncomplete,

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OperatorError {
    /// Build a command error.
    pub fn command(
        node: impl Into<String>,
        command: impl Into<String>,
        kind: CommandErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Command {
            node: node.into(),
            command: command.into(),
            kind,
            message: message.into(),
        }
    }

    /// Reason code of a failed command, if this is a command error.
    pub fn command_kind(&self) -> Option<CommandErrorKind> {
        match self {
            Self::Command { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether re-running the whole reconcile later may succeed.
    ///
    /// Structural errors (bad slot labels, unsupported topologies, bad
    /// configuration) need an operator to step in.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidLabel { .. }
                | Self::SlotOutOfRange(_)
                | Self::Unsupported(_)
                | Self::Config(_)
                | Self::Toml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
