//! Site tensors and the split-index tensor product state.
//!
//! A tensor product state (TPS, or PEPS) on an `Ly x Lx` lattice holds one
//! rank-5 tensor per site, with legs `[left, down, right, up, physical]`. For
//! sampling, it's more convenient to store each site as a list of rank-4
//! tensors, one per value of the physical index, so that fixing a classical
//! configuration simply selects one tensor per site:
//! ```text
//!            up                      up
//!            |                       |
//!   left --- T --- right  =>  left --- T[σ] --- right   for σ = 0, ..., d - 1
//!           /|                       |
//!       phys  down                  down
//! ```

use ndarray as nd;
use rand::Rng;
use crate::{
    error::{ EngineError, EngineResult },
    lattice::{ Configuration, Grid, SiteIdx },
    tensor::{ NoSymmetry, QuantumNumber, TenElem, elem },
};

/// Leg indices of a site tensor.
pub const LEFT: usize = 0;
pub const DOWN: usize = 1;
pub const RIGHT: usize = 2;
pub const UP: usize = 3;

/// A rank-4 site tensor with legs `[left, down, right, up]`, together with the
/// symmetry sector it carries.
#[derive(Clone, Debug, PartialEq)]
pub struct SiteTensor<A, Q> {
    pub data: nd::Array4<A>,
    pub div: Q,
}

impl<A, Q> SiteTensor<A, Q>
where
    A: TenElem,
    Q: QuantumNumber,
{
    pub fn new(data: nd::Array4<A>, div: Q) -> Self { Self { data, div } }

    /// Create a new site tensor in the trivial sector.
    pub fn trivial(data: nd::Array4<A>) -> Self { Self { data, div: Q::zero() } }

    /// Return the dimension of a leg.
    pub fn dim(&self, leg: usize) -> usize { self.data.shape()[leg] }

    /// Return all four leg dimensions.
    pub fn dims(&self) -> [usize; 4] {
        let sh = self.data.shape();
        [sh[0], sh[1], sh[2], sh[3]]
    }
}

/// Check that the leg dimensions of a grid of site tensors are compatible:
/// every bond has equal dimension on both of its ends and every leg on the
/// edge of the lattice has dimension 1.
pub(crate) fn check_bonds(dims: &Grid<[usize; 4]>) -> EngineResult<()> {
    if dims.rows() == 0 || dims.cols() == 0 { return Err(EngineError::EmptyLattice); }
    let rows = dims.rows();
    let cols = dims.cols();
    for (site, d) in dims.iter() {
        let edges = [
            (LEFT, site.col == 0),
            (DOWN, site.row == rows - 1),
            (RIGHT, site.col == cols - 1),
            (UP, site.row == 0),
        ];
        if let Some((leg, _)) = edges.iter().find(|(leg, edge)| *edge && d[*leg] != 1) {
            return Err(EngineError::OpenBoundaryLeg(site, d[*leg]));
        }
        if site.col + 1 < cols {
            let right = SiteIdx::new(site.row, site.col + 1);
            let dr = dims[right][LEFT];
            if d[RIGHT] != dr {
                return Err(EngineError::BondMismatch(site, right, d[RIGHT], dr));
            }
        }
        if site.row + 1 < rows {
            let below = SiteIdx::new(site.row + 1, site.col);
            let db = dims[below][UP];
            if d[DOWN] != db {
                return Err(EngineError::BondMismatch(site, below, d[DOWN], db));
            }
        }
    }
    Ok(())
}

/// A tensor product state stored with its physical index split off: for each
/// site, one [`SiteTensor`] per local basis value.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitIndexTps<A, Q> {
    tensors: Grid<Vec<SiteTensor<A, Q>>>,
}

impl<A, Q> SplitIndexTps<A, Q>
where
    A: TenElem,
    Q: QuantumNumber,
{
    /// Create a new split-index TPS.
    ///
    /// Fails if the lattice is empty, if any site has no basis tensors or
    /// basis tensors of unequal shapes, or if the bond dimensions are
    /// inconsistent (see [`EngineError::BondMismatch`] and
    /// [`EngineError::OpenBoundaryLeg`]).
    pub fn new(tensors: Grid<Vec<SiteTensor<A, Q>>>) -> EngineResult<Self> {
        if tensors.rows() == 0 || tensors.cols() == 0 {
            return Err(EngineError::EmptyLattice);
        }
        let mut dims: Vec<[usize; 4]> = Vec::with_capacity(tensors.rows() * tensors.cols());
        for (site, basis) in tensors.iter() {
            let first = basis.first().ok_or(EngineError::EmptyBasis(site))?;
            if basis.iter().any(|t| t.data.shape() != first.data.shape()) {
                return Err(EngineError::BasisShapeMismatch(site));
            }
            dims.push(first.dims());
        }
        check_bonds(&Grid::from_vec(tensors.rows(), tensors.cols(), dims)?)?;
        Ok(Self { tensors })
    }

    pub fn rows(&self) -> usize { self.tensors.rows() }

    pub fn cols(&self) -> usize { self.tensors.cols() }

    /// Return the number of local basis values at a site.
    pub fn phys_dim(&self, site: SiteIdx) -> EngineResult<usize> {
        self.tensors.get(site)
            .map(|basis| basis.len())
            .ok_or(EngineError::SiteOutOfRange(site))
    }

    /// Return the tensor for local basis value `value` at `site`.
    pub fn get(&self, site: SiteIdx, value: usize) -> EngineResult<&SiteTensor<A, Q>> {
        let basis = self.tensors.get(site).ok_or(EngineError::SiteOutOfRange(site))?;
        basis.get(value)
            .ok_or(EngineError::ConfigOutOfRange { site, value, dim: basis.len() })
    }

    /// Return the full set of basis tensors at `site`.
    pub fn basis(&self, site: SiteIdx) -> EngineResult<&[SiteTensor<A, Q>]> {
        self.tensors.get(site)
            .map(|basis| basis.as_slice())
            .ok_or(EngineError::SiteOutOfRange(site))
    }

    /// Slice the TPS down to a single tensor per site.
    ///
    /// Fails if `config` has the wrong shape or holds a value outside of some
    /// site's local basis.
    pub fn project(&self, config: &Configuration) -> EngineResult<Grid<SiteTensor<A, Q>>> {
        if config.rows() != self.rows() || config.cols() != self.cols() {
            return Err(EngineError::GridShape {
                rows: self.rows(),
                cols: self.cols(),
                len: config.rows() * config.cols(),
            });
        }
        let projected: Vec<SiteTensor<A, Q>>
            = config.iter()
            .map(|(site, value)| self.get(site, *value).cloned())
            .collect::<EngineResult<_>>()?;
        Grid::from_vec(self.rows(), self.cols(), projected)
    }

    /// Return the grid of all basis tensors.
    pub fn tensors(&self) -> &Grid<Vec<SiteTensor<A, Q>>> { &self.tensors }
}

impl<A> SplitIndexTps<A, NoSymmetry>
where A: TenElem
{
    /// Split a grid of rank-5 TPS tensors along their last (physical) leg.
    pub fn from_tps(tps: Grid<nd::Array5<A>>) -> EngineResult<Self> {
        let tensors: Grid<Vec<SiteTensor<A, NoSymmetry>>>
            = tps.map(|_, t| {
                t.axis_iter(nd::Axis(4))
                    .map(|slice| SiteTensor::trivial(slice.to_owned()))
                    .collect()
            });
        Self::new(tensors)
    }

    /// Generate a random split-index TPS with uniform bond dimension
    /// `bond_dim` in the bulk and elements drawn uniformly from `[-0.5, 0.5)`.
    pub fn random<R>(rows: usize, cols: usize, phys_dim: usize, bond_dim: usize, rng: &mut R)
        -> EngineResult<Self>
    where R: Rng
    {
        if rows == 0 || cols == 0 { return Err(EngineError::EmptyLattice); }
        let tensors: Grid<Vec<SiteTensor<A, NoSymmetry>>>
            = Grid::from_fn(rows, cols, |site| {
                let shape = (
                    if site.col == 0 { 1 } else { bond_dim },
                    if site.row == rows - 1 { 1 } else { bond_dim },
                    if site.col == cols - 1 { 1 } else { bond_dim },
                    if site.row == 0 { 1 } else { bond_dim },
                );
                (0..phys_dim)
                    .map(|_| {
                        let data = nd::Array4::from_shape_simple_fn(
                            shape, || elem(rng.gen::<f64>() - 0.5));
                        SiteTensor::trivial(data)
                    })
                    .collect()
            });
        Self::new(tensors)
    }
}
