//! Lower/upper neighbour ranks of this process along each axis.

use crate::topology::grid::{Axis, Direction, ProcessGrid};

/// Neighbour ranks derived from a [`ProcessGrid`].
///
/// `None` marks "no neighbour" at a non-periodic grid edge. Degenerate grids
/// are kept as they are: with extent 2 on a periodic axis both sides name
/// the same rank, and with extent 1 both sides name this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborTable {
    ranks: [[Option<usize>; 2]; 3],
}

impl NeighborTable {
    pub fn from_grid(grid: &ProcessGrid) -> Self {
        let mut ranks = [[None; 2]; 3];
        for axis in Axis::ALL {
            for dir in Direction::ALL {
                ranks[axis.index()][dir.index()] = grid.shift(grid.coord(), axis, dir);
            }
        }
        Self { ranks }
    }

    #[inline]
    pub fn neighbor(&self, axis: Axis, direction: Direction) -> Option<usize> {
        self.ranks[axis.index()][direction.index()]
    }

    /// `[axis][direction]` table of all six neighbours.
    pub fn all(&self) -> [[Option<usize>; 2]; 3] {
        self.ranks
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, Direction, Option<usize>)> + '_ {
        Axis::ALL.into_iter().flat_map(move |axis| {
            Direction::ALL
                .into_iter()
                .map(move |dir| (axis, dir, self.neighbor(axis, dir)))
        })
    }
}
