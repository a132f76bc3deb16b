//! Cartesian process grid: rank ↔ 3-D coordinate mapping.
//!
//! Ranks are laid out row-major with the last axis varying fastest,
//! `rank = (c0 * e1 + c1) * e2 + c2`, which is the layout MPI Cartesian
//! communicators use without reordering.

use crate::halo_error::HaloError;
use itertools::iproduct;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-axis coordinate of a process in the grid.
pub type Coord = [usize; 3];

/// One of the three decomposition axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Axis> {
        Axis::ALL.get(i).copied()
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Side of a process along an axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Lower,
    Upper,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Lower, Direction::Upper];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Lower => Direction::Upper,
            Direction::Upper => Direction::Lower,
        }
    }
}

/// Fixed Cartesian decomposition of `process_count` processes.
///
/// Immutable once built; every accessor is a plain read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessGrid {
    process_count: usize,
    extent: [usize; 3],
    periodic: [bool; 3],
    rank: usize,
    coord: Coord,
}

impl ProcessGrid {
    /// Build the grid as seen from `rank`.
    ///
    /// # Errors
    /// - [`HaloError::Decomposition`] if `extent[0] * extent[1] * extent[2]`
    ///   differs from `process_count` (a zero extent always differs).
    /// - [`HaloError::InvalidRank`] if `rank >= process_count`.
    ///
    /// Both checks are local, so every process of a launch reaches the same
    /// verdict without communicating.
    pub fn new(
        process_count: usize,
        extent: [usize; 3],
        periodic: [bool; 3],
        rank: usize,
    ) -> Result<Self, HaloError> {
        Self::validate(process_count, extent)?;
        if rank >= process_count {
            return Err(HaloError::InvalidRank {
                rank,
                process_count,
            });
        }
        let mut grid = Self {
            process_count,
            extent,
            periodic,
            rank,
            coord: [0; 3],
        };
        grid.coord = grid
            .rank_to_coord(rank)
            .ok_or(HaloError::InvalidRank {
                rank,
                process_count,
            })?;
        Ok(grid)
    }

    /// Check that `extent` covers exactly `process_count` processes.
    pub fn validate(process_count: usize, extent: [usize; 3]) -> Result<(), HaloError> {
        let expected = extent
            .iter()
            .try_fold(1usize, |acc, &e| acc.checked_mul(e))
            .unwrap_or(usize::MAX);
        if expected == process_count && process_count > 0 {
            Ok(())
        } else {
            Err(HaloError::Decomposition {
                process_count,
                extent,
                expected,
            })
        }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn process_count(&self) -> usize {
        self.process_count
    }

    #[inline]
    pub fn extent(&self) -> [usize; 3] {
        self.extent
    }

    #[inline]
    pub fn periodic(&self) -> [bool; 3] {
        self.periodic
    }

    /// Coordinate of this process.
    #[inline]
    pub fn coord(&self) -> Coord {
        self.coord
    }

    /// Rank at `coord`, or `None` if any component is outside the grid.
    pub fn coord_to_rank(&self, coord: Coord) -> Option<usize> {
        if coord.iter().zip(self.extent).any(|(&c, e)| c >= e) {
            return None;
        }
        let [_, e1, e2] = self.extent;
        Some((coord[0] * e1 + coord[1]) * e2 + coord[2])
    }

    /// Coordinate of `rank`, or `None` if `rank >= process_count`.
    pub fn rank_to_coord(&self, rank: usize) -> Option<Coord> {
        if rank >= self.process_count {
            return None;
        }
        let [_, e1, e2] = self.extent;
        Some([rank / (e1 * e2), (rank / e2) % e1, rank % e2])
    }

    /// All coordinates, in rank order.
    pub fn coords(&self) -> impl Iterator<Item = Coord> + '_ {
        let [e0, e1, e2] = self.extent;
        iproduct!(0..e0, 0..e1, 0..e2).map(|(i, j, k)| [i, j, k])
    }

    /// Rank one step from `coord` along `axis`.
    ///
    /// Wraps on periodic axes; `None` when the step leaves a non-periodic
    /// grid or `coord` itself is outside the grid.
    pub fn shift(&self, coord: Coord, axis: Axis, direction: Direction) -> Option<usize> {
        let a = axis.index();
        let extent = self.extent[a];
        if coord[a] >= extent {
            return None;
        }
        let mut target = coord;
        target[a] = match direction {
            Direction::Lower if coord[a] > 0 => coord[a] - 1,
            Direction::Lower if self.periodic[a] => extent - 1,
            Direction::Upper if coord[a] + 1 < extent => coord[a] + 1,
            Direction::Upper if self.periodic[a] => 0,
            _ => return None,
        };
        self.coord_to_rank(target)
    }
}
