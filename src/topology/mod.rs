//! Process topology: the Cartesian grid and the neighbour table derived from it.

pub mod grid;
pub mod neighbors;

pub use grid::{Axis, Coord, Direction, ProcessGrid};
pub use neighbors::NeighborTable;
