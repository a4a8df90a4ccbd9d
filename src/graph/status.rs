//! Composite edge status and its derivation
//!
//! `derive` is the only place an edge status is computed. Everything that
//! mutates an edge's fingerprints, mock marker or validity snapshot calls
//! back into it (via `Edge::refresh_status`).

use super::contract::Validity;
use super::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};

/// The eight composite statuses.
///
/// Seven are produced per edge by [`derive`]; `PotentiallyStale` is only
/// produced by node aggregation ([`aggregate`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Producer output key is absent from the producer's current outputs
    MissingOutput,
    /// Edge still uses a placeholder because the real output never appeared
    Mock,
    /// Consumer has never observed the producer value
    Pending,
    Clean,
    CleanInvalid,
    Dirty,
    DirtyInvalid,
    /// Not dirty itself, but something upstream is
    PotentiallyStale,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingOutput => "missing-output",
            Self::Mock => "mock",
            Self::Pending => "pending",
            Self::Clean => "clean",
            Self::CleanInvalid => "clean-invalid",
            Self::Dirty => "dirty",
            Self::DirtyInvalid => "dirty-invalid",
            Self::PotentiallyStale => "potentially-stale",
        }
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, Self::Dirty | Self::DirtyInvalid)
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean | Self::CleanInvalid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::CleanInvalid | Self::DirtyInvalid)
    }

    /// Whether a node with this aggregate status makes its dependents stale
    pub fn taints_downstream(&self) -> bool {
        self.is_dirty() || *self == Self::PotentiallyStale
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "missing-output" => Self::MissingOutput,
            "mock" => Self::Mock,
            "pending" => Self::Pending,
            "clean" => Self::Clean,
            "clean-invalid" => Self::CleanInvalid,
            "dirty" => Self::Dirty,
            "dirty-invalid" => Self::DirtyInvalid,
            "potentially-stale" => Self::PotentiallyStale,
            other => return Err(format!("unknown status: {}", other)),
        })
    }
}

/// Everything an edge status depends on
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub output_exists: bool,
    pub producer_fingerprint: Option<&'a Fingerprint>,
    pub observed_fingerprint: Option<&'a Fingerprint>,
    pub is_mock: bool,
    pub validity: &'a Validity,
}

/// Derive the composite status of one edge.
///
/// Rules short-circuit in order: missing output, mock, pending, then the
/// drift x validity matrix. A mock edge has by definition never seen its
/// output, so an absent output on a mock edge is `Mock`, not
/// `MissingOutput`. Validation `error` and `unchecked` are not invalid.
pub fn derive(inputs: StatusInputs<'_>) -> Status {
    if !inputs.output_exists && !inputs.is_mock {
        return Status::MissingOutput;
    }
    if inputs.is_mock {
        return Status::Mock;
    }
    let Some(observed) = inputs.observed_fingerprint else {
        return Status::Pending;
    };

    let drift = inputs.producer_fingerprint != Some(observed);
    let invalid = inputs.validity.is_invalid();

    match (drift, invalid) {
        (false, false) => Status::Clean,
        (false, true) => Status::CleanInvalid,
        (true, false) => Status::Dirty,
        (true, true) => Status::DirtyInvalid,
    }
}

/// Combine a node's incoming edge statuses into its aggregate status.
///
/// `upstream_stale` is true when the producer of at least one clean or
/// clean-invalid incoming edge is itself dirty or potentially stale.
pub fn aggregate(incoming: &[Status], upstream_stale: bool) -> Status {
    let any = |pred: fn(&Status) -> bool| incoming.iter().any(pred);
    let invalid = any(Status::is_invalid);

    if any(Status::is_dirty) {
        return if invalid { Status::DirtyInvalid } else { Status::Dirty };
    }
    if any(|s| *s == Status::MissingOutput) {
        return Status::MissingOutput;
    }
    if upstream_stale {
        return Status::PotentiallyStale;
    }
    if any(|s| *s == Status::Pending) {
        return Status::Pending;
    }
    if any(|s| *s == Status::Mock) {
        return Status::Mock;
    }
    if invalid {
        Status::CleanInvalid
    } else {
        Status::Clean
    }
}
