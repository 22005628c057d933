//! Addressing on a finite square lattice.
//!
//! Sites are labeled by `(row, col)`, with row 0 on the top edge and column 0
//! on the left edge:
//! ```text
//!          col 0   col 1         col Lx-1
//! row 0      o ----- o --- ... --- o
//!            |       |             |
//! row 1      o ----- o --- ... --- o
//!            :       :             :
//! row Ly-1   o ----- o --- ... --- o
//! ```
//! Site tensors carry their four virtual legs in the order
//! `[left, down, right, up]`.

use std::{
    fmt,
    ops::{ Index, IndexMut },
};
use crate::error::{ EngineError, EngineResult };

/// A lattice site `(row, col)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteIdx {
    pub row: usize,
    pub col: usize,
}

impl SiteIdx {
    pub fn new(row: usize, col: usize) -> Self { Self { row, col } }

    /// Return the site `n` steps further along `orientation` (right for
    /// horizontal, down for vertical).
    pub fn shifted(self, orientation: Orientation, n: usize) -> Self {
        match orientation {
            Orientation::Horizontal => Self { row: self.row, col: self.col + n },
            Orientation::Vertical => Self { row: self.row + n, col: self.col },
        }
    }
}

impl From<(usize, usize)> for SiteIdx {
    fn from(rc: (usize, usize)) -> Self { Self { row: rc.0, col: rc.1 } }
}

impl fmt::Display for SiteIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// One of the four edges of the lattice.
///
/// Boundary MPSs grow inward from an edge; boundary-tensor caches grow along a
/// line from one of its two ends.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Position {
    Left,
    Down,
    Right,
    Up,
}

impl Position {
    pub const ALL: [Self; 4] = [Self::Left, Self::Down, Self::Right, Self::Up];

    /// Return the edge on the other side of the lattice.
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Down => Self::Up,
            Self::Right => Self::Left,
            Self::Up => Self::Down,
        }
    }

    /// Return `true` if `self` is the edge holding index 0 of its axis, i.e.
    /// `Left` or `Up`.
    pub fn is_lower(self) -> bool { matches!(self, Self::Left | Self::Up) }

    /// Orientation of the boundary MPS grown from this edge: `Up`/`Down`
    /// boundaries run horizontally.
    pub fn bmps_orientation(self) -> Orientation {
        match self {
            Self::Up | Self::Down => Orientation::Horizontal,
            Self::Left | Self::Right => Orientation::Vertical,
        }
    }

    /// Orientation of the line along which a boundary-tensor cache grown from
    /// this end runs: `Left`/`Right` ends belong to a horizontal line.
    pub fn bten_orientation(self) -> Orientation {
        match self {
            Self::Left | Self::Right => Orientation::Horizontal,
            Self::Up | Self::Down => Orientation::Vertical,
        }
    }

    pub(crate) fn as_index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Down => 1,
            Self::Right => 2,
            Self::Up => 3,
        }
    }
}

/// Direction of a bond, or of a lattice line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl Orientation {
    pub fn orthogonal(self) -> Self {
        match self {
            Self::Horizontal => Self::Vertical,
            Self::Vertical => Self::Horizontal,
        }
    }

    /// The two ends of a line with this orientation, lower end first.
    pub fn ends(self) -> (Position, Position) {
        match self {
            Self::Horizontal => (Position::Left, Position::Right),
            Self::Vertical => (Position::Up, Position::Down),
        }
    }

    /// The two boundary MPS edges bracketing a line with this orientation,
    /// with the one facing a line's `up` (horizontal) or `left` (vertical) legs
    /// first.
    pub fn bmps_edges(self) -> (Position, Position) {
        match self {
            Self::Horizontal => (Position::Up, Position::Down),
            Self::Vertical => (Position::Left, Position::Right),
        }
    }
}

/// Direction of a diagonal bond inside a 2x2 plaquette.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DiagonalDir {
    LeftUpToRightDown,
    LeftDownToRightUp,
}

/// A dense `rows x cols` grid of values, stored row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T> Grid<T> {
    /// Create a new grid by calling `f` on every site.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> Self
    where F: FnMut(SiteIdx) -> T
    {
        let data: Vec<T>
            = (0..rows * cols)
            .map(|k| f(SiteIdx::new(k / cols, k % cols)))
            .collect();
        Self { rows, cols, data }
    }

    /// Create a new grid from row-major data.
    ///
    /// Fails if `data` doesn't hold exactly `rows * cols` elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> EngineResult<Self> {
        if data.len() != rows * cols {
            return Err(EngineError::GridShape { rows, cols, len: data.len() });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize { self.rows }

    pub fn cols(&self) -> usize { self.cols }

    pub fn contains(&self, site: SiteIdx) -> bool {
        site.row < self.rows && site.col < self.cols
    }

    pub fn get(&self, site: SiteIdx) -> Option<&T> {
        self.contains(site).then(|| &self.data[site.row * self.cols + site.col])
    }

    pub fn get_mut(&mut self, site: SiteIdx) -> Option<&mut T> {
        if self.contains(site) {
            Some(&mut self.data[site.row * self.cols + site.col])
        } else {
            None
        }
    }

    /// Iterate over all sites and their values in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (SiteIdx, &T)> + '_ {
        let cols = self.cols;
        self.data.iter().enumerate()
            .map(move |(k, x)| (SiteIdx::new(k / cols, k % cols), x))
    }

    /// Iterate mutably over all sites and their values in row-major order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SiteIdx, &mut T)> + '_ {
        let cols = self.cols;
        self.data.iter_mut().enumerate()
            .map(move |(k, x)| (SiteIdx::new(k / cols, k % cols), x))
    }

    /// Apply `f` to every element.
    pub fn map<U, F>(&self, mut f: F) -> Grid<U>
    where F: FnMut(SiteIdx, &T) -> U
    {
        let data: Vec<U> = self.iter().map(|(s, x)| f(s, x)).collect();
        Grid { rows: self.rows, cols: self.cols, data }
    }
}

impl<T> Index<SiteIdx> for Grid<T> {
    type Output = T;

    fn index(&self, site: SiteIdx) -> &T {
        assert!(self.contains(site), "site {site} outside of {}x{} grid", self.rows, self.cols);
        &self.data[site.row * self.cols + site.col]
    }
}

impl<T> IndexMut<SiteIdx> for Grid<T> {
    fn index_mut(&mut self, site: SiteIdx) -> &mut T {
        assert!(self.contains(site), "site {site} outside of {}x{} grid", self.rows, self.cols);
        &mut self.data[site.row * self.cols + site.col]
    }
}

/// A classical configuration: one local-basis value per site.
pub type Configuration = Grid<usize>;

impl Configuration {
    /// Count the number of sites holding each local-basis value in
    /// `0..num_values`.
    pub fn occupancy(&self, num_values: usize) -> Vec<usize> {
        let mut counts = vec![0; num_values];
        self.data.iter()
            .filter(|v| **v < num_values)
            .for_each(|v| { counts[*v] += 1; });
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_row_major() {
        let g = Grid::from_fn(2, 3, |s| 10 * s.row + s.col);
        assert_eq!(g[SiteIdx::new(1, 2)], 12);
        let order: Vec<usize> = g.iter().map(|(_, x)| *x).collect();
        assert_eq!(order, vec![0, 1, 2, 10, 11, 12]);
        assert!(g.get(SiteIdx::new(2, 0)).is_none());
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(Grid::from_vec(2, 2, vec![0; 3]).is_err());
        assert!(Grid::from_vec(2, 2, vec![0; 4]).is_ok());
    }

    #[test]
    fn positions() {
        for p in Position::ALL {
            assert_eq!(p.opposite().opposite(), p);
            assert_ne!(p.is_lower(), p.opposite().is_lower());
            assert_eq!(p.bmps_orientation(), p.opposite().bmps_orientation());
            assert_ne!(p.bmps_orientation(), p.bten_orientation());
        }
        assert_eq!(Orientation::Horizontal.ends(), (Position::Left, Position::Right));
        assert_eq!(Orientation::Vertical.bmps_edges(), (Position::Left, Position::Right));
    }

    #[test]
    fn neel_occupancy() {
        let config: Configuration = Grid::from_fn(4, 4, |s| (s.row + s.col) % 2);
        assert_eq!(config.occupancy(2), vec![8, 8]);
        assert_eq!(SiteIdx::new(1, 1).shifted(Orientation::Vertical, 2), SiteIdx::new(3, 1));
    }
}
