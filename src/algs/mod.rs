//! Communication algorithms: the backend façade, halo exchange and log
//! concatenation.

pub mod communicator;
pub mod concat;
pub mod exchange;

pub use concat::concatenate_stream;
pub use exchange::HaloExchange;
