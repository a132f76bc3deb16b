//! HaloError: Unified error type for halo-decomp public APIs
//!
//! Configuration and resource errors are fatal to the owning process (see
//! [`HaloError::exit_code`]); transport failures are reported per operation and
//! leave the decision to abort or continue with the caller.

use crate::algs::exchange::Region;
use crate::topology::grid::Axis;
use itertools::Itertools;
use std::path::PathBuf;
use thiserror::Error;

/// One failed send or receive inside a waited exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpFailure {
    /// Linear request index inside the pending exchange (`position * 4 + slot`).
    pub index: usize,
    pub axis: Axis,
    pub region: Region,
    /// Rank the operation targeted.
    pub peer: usize,
    pub reason: String,
}

/// Unified error type for halo-decomp operations.
#[derive(Debug, Error)]
pub enum HaloError {
    /// The requested decomposition does not cover the launched processes.
    #[error(
        "invalid number of processes (={process_count:4}): current domain decomposition = \
         [{:3}, {:3}, {:3}] ===> expected processes = {expected:4}",
        .extent[0], .extent[1], .extent[2]
    )]
    Decomposition {
        process_count: usize,
        extent: [usize; 3],
        expected: usize,
    },
    /// A rank outside `[0, process_count)`.
    #[error("rank {rank} out of range for {process_count} processes")]
    InvalidRank { rank: usize, process_count: usize },
    /// Exchange buffer length is not exactly four regions.
    #[error(
        "exchange buffer must hold 4 regions of {region_len} bytes ({expected} total), got {actual}"
    )]
    BufferSize {
        region_len: usize,
        expected: usize,
        actual: usize,
    },
    /// A received message does not match the posted receive length.
    #[error("message from rank {peer}: expected {expected} bytes, got {actual}")]
    MessageSize {
        peer: usize,
        expected: usize,
        actual: usize,
    },
    /// Send or receive addressed to a rank the communicator does not have.
    #[error("peer rank {peer} out of range for communicator of size {size}")]
    PeerOutOfRange { peer: usize, size: usize },
    /// A point-to-point operation with a neighbour failed.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// One or more operations of a waited exchange failed.
    #[error(
        "{} halo request(s) from rank {rank} failed: [{}]",
        .failures.len(),
        .failures.iter().map(|f| f.index).join(", ")
    )]
    Transport { rank: usize, failures: Vec<OpFailure> },
    /// A per-process log sink could not be created, read or removed.
    #[error("log sink `{}`: {source}", .path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("MPI initialization failed (already initialized?)")]
    MpiInit,
}

impl HaloError {
    /// Process exit status used when this error terminates a run.
    pub fn exit_code(&self) -> i32 {
        match self {
            HaloError::Decomposition { .. } => 255,
            _ => 1,
        }
    }

    pub(crate) fn sink(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HaloError::Sink {
            path: path.into(),
            source,
        }
    }
}
