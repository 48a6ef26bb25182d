//! Behavioral error taxonomy shared across components.
//!
//! Every component-specific error enum implements [`Classify`] so callers
//! can branch on *behavior* (retry, drop, escalate) without matching on
//! concrete variants across module boundaries. This mirrors the Go
//! upstream's informal convention of prefixing log lines with a severity
//! word, made mechanical.

use std::fmt;

/// One of the behavioral kinds named in the design's error-handling section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// RPC timeouts, P2P send failures, main-node DoubleSpend. Retried on
    /// the next poll cycle; never escalated.
    TransientNetwork,
    /// Feedback for an unknown proposal, a request at a height we cannot
    /// yet answer. Logged and dropped.
    TransientState,
    /// Wrong signer index, malformed wire payload, duplicate proposal.
    /// Refused to the sender; no state change.
    ProtocolInvalid,
    /// Malformed hash or amount from RPC. The single bad record is
    /// skipped; surrounding work continues.
    DataCorruption,
    /// Non-transient submission failure. Moved to the failed ledger,
    /// never retried automatically.
    TerminalBusiness,
    /// Configuration missing, database open failure. Surfaced to process
    /// startup; monitors never start.
    Fatal,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::TransientNetwork => "transient-network",
            Kind::TransientState => "transient-state",
            Kind::ProtocolInvalid => "protocol-invalid",
            Kind::DataCorruption => "data-corruption",
            Kind::TerminalBusiness => "terminal-business",
            Kind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Implemented by every component error enum so calling code can decide
/// retry/drop/escalate behavior generically.
pub trait Classify {
    fn kind(&self) -> Kind;

    fn is_retryable(&self) -> bool {
        matches!(self.kind(), Kind::TransientNetwork | Kind::TransientState)
    }
}
