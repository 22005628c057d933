//! Error type shared by the contraction engine and its consumers.
//!
//! Every precondition violation (calling a move before a grow, querying a site
//! outside of the cached frontier, feeding mismatched tensors, ...) is reported
//! as an [`EngineError`]; the engine never hands back a partially computed
//! value in these cases. Truncation inexactness is *not* an error and is
//! reported through [`TruncationReport`][crate::truncate::TruncationReport]
//! instead.

use ndarray as nd;
use ndarray_linalg::error::LinalgError;
use thiserror::Error;
use crate::lattice::{ Orientation, Position, SiteIdx };

#[derive(Debug, Error)]
pub enum EngineError {
    /// Returned when attempting to build a network or split-index TPS with zero
    /// rows or columns.
    #[error("error in lattice creation: cannot create for an empty lattice")]
    EmptyLattice,

    /// Returned when a grid of site tensors doesn't have the advertised
    /// number of rows and columns.
    #[error("error in lattice creation: expected {rows}x{cols} sites, got {len}")]
    GridShape { rows: usize, cols: usize, len: usize },

    /// Returned when a site has no tensors for its local basis.
    #[error("error in lattice creation: site {0} has an empty local basis")]
    EmptyBasis(SiteIdx),

    /// Returned when the tensors for different local basis values at a site
    /// have different shapes.
    #[error("error in lattice creation: basis tensors at site {0} differ in shape")]
    BasisShapeMismatch(SiteIdx),

    /// Returned when the bond connecting two neighboring sites has different
    /// dimensions on either side.
    #[error("bond mismatch between sites {0} and {1}: dimensions {2} and {3}")]
    BondMismatch(SiteIdx, SiteIdx, usize, usize),

    /// Returned when a leg on the edge of the lattice has dimension other than
    /// 1.
    #[error("site {0} has an open boundary leg of dimension {1}")]
    OpenBoundaryLeg(SiteIdx, usize),

    /// Returned when a configuration value doesn't address a tensor in the
    /// local basis of its site.
    #[error("configuration value {value} at site {site} outside of local basis of dimension {dim}")]
    ConfigOutOfRange { site: SiteIdx, value: usize, dim: usize },

    /// Returned when a site index falls outside of the lattice.
    #[error("site {0} is outside of the lattice")]
    SiteOutOfRange(SiteIdx),

    /// Returned when a row or column index falls outside of the lattice.
    #[error("line {line} is outside of the lattice (must be less than {bound})")]
    LineOutOfRange { line: usize, bound: usize },

    /// Returned when two sites expected to be neighbors along an orientation
    /// are not.
    #[error("sites {0} and {1} are not nearest neighbors along the {2:?} direction")]
    NotNeighbors(SiteIdx, SiteIdx, Orientation),

    /// Returned when a boundary MPS is required but the stack it lives in
    /// hasn't been grown far enough (e.g. a move step before any grow).
    #[error("boundary MPS from {0:?} not grown to cover {1} lines")]
    BmpsNotGrown(Position, usize),

    /// Returned when asked to grow a boundary MPS past the last lattice line.
    #[error("boundary MPS from {0:?} cannot absorb more lines")]
    BmpsExhausted(Position),

    /// Returned when a direction is used with a cache of the other
    /// orientation.
    #[error("direction {0:?} doesn't run along a {1:?} boundary-tensor cache")]
    WrongDirection(Position, Orientation),

    /// Returned when querying or moving a boundary-tensor cache before it has
    /// been initialized.
    #[error("boundary-tensor cache not initialized")]
    BTenNotInitialized,

    /// Returned when a boundary-tensor cache is used for a line other than the
    /// one it was initialized for.
    #[error("boundary-tensor cache holds {0:?} line {1}, but line {2} was requested")]
    BTenLineMismatch(Orientation, usize, usize),

    /// Returned when a move step would pop an environment that doesn't exist.
    #[error("boundary-tensor stack from {0:?} is empty")]
    BTenEmpty(Position),

    /// Returned when asked to grow a boundary-tensor stack that already spans
    /// its whole line.
    #[error("boundary-tensor stack from {0:?} already spans its whole line")]
    BTenExhausted(Position),

    /// Returned when a query window doesn't sit at the frontier of the
    /// boundary-tensor cache, or one of its environments has been discarded.
    #[error("window [{start}, {start} + {extent}) is outside of the cached frontier")]
    OutsideFrontier { start: usize, extent: usize },

    /// Returned for nonsensical truncation parameters.
    #[error("invalid truncation parameters: Dmin = {d_min}, Dmax = {d_max}")]
    InvalidTruncatePara { d_min: usize, d_max: usize },

    /// Returned when an array reshape fails.
    #[error("array shape error: {0}")]
    Shape(#[from] nd::ShapeError),

    /// Returned when a LAPACK routine fails.
    #[error("linear algebra error: {0}")]
    Linalg(#[from] LinalgError),
}

pub type EngineResult<T> = Result<T, EngineError>;
