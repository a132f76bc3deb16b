#![cfg_attr(docsrs, feature(doc_cfg))]
//! # halo-decomp
//!
//! Process topology and halo exchange for 3-D domain-decomposed simulations.
//! A fixed Cartesian grid of processes is laid over the domain; each process
//! knows its lower and upper neighbour along every axis, exchanges boundary
//! layers with them through tagged non-blocking sends and receives, and keeps
//! its own log files that are merged in rank order at shutdown.
//!
//! ## Features
//! - [`ProcessGrid`](topology::ProcessGrid): rank ↔ coordinate mapping with
//!   per-axis periodicity, validated against the launch size
//! - [`NeighborTable`](topology::NeighborTable): six neighbour ranks, `None`
//!   at non-periodic edges
//! - [`HaloExchange`](algs::exchange::HaloExchange): `begin_directional` /
//!   `begin_all` over caller-owned buffers, `wait` reporting every failed request
//! - [`concatenate_stream`](algs::concat::concatenate_stream): token-ring merge
//!   of per-process logs
//! - Pluggable communication backends: serial no-op, in-process ranks, and MPI
//!   (`mpi-support` feature)
//!
//! ## Usage
//!
//! ```no_run
//! use halo_decomp::prelude::*;
//!
//! # fn main() -> Result<(), HaloError> {
//! let universe = LocalUniverse::new(1);
//! let cfg = DecompositionConfig::new([1, 1, 1], [true; 3]);
//! let mut ctx = Context::initialize(universe.comm(0), "sim", &cfg)?;
//!
//! let mut halo = [0.0f64; 4 * 16];
//! let pending = ctx.begin_directional(Axis::X, ExchangeBuffer::from_elems(&mut halo, 16)?);
//! ctx.wait(pending)?;
//!
//! ctx.finalize()
//! # }
//! ```

pub mod algs;
pub mod config;
pub mod context;
pub mod halo_error;
pub mod io;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{
        CommTag, Communicator, LocalComm, LocalUniverse, NoComm, Wait,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::concat::concatenate_stream;
    pub use crate::algs::exchange::{
        ExchangeBuffer, ExchangeReport, HaloExchange, OpStatus, PendingExchange, Region,
    };
    pub use crate::config::DecompositionConfig;
    pub use crate::context::Context;
    pub use crate::halo_error::{HaloError, OpFailure};
    pub use crate::io::sinks::Channel;
    pub use crate::topology::{Axis, Coord, Direction, NeighborTable, ProcessGrid};
}
