//! Local energies of spin-1/2 Heisenberg models.
//!
//! For a configuration `σ`, the local energy is
//! `E_loc(σ) = Σ_σ' ⟨σ|H|σ'⟩ ψ(σ')/ψ(σ)`. With basis value 0 for spin down
//! and 1 for spin up, each bond `(i, j)` with coupling `J` contributes `+J/4`
//! if `σ_i = σ_j`, and `-J/4 + (J/2) ψ(σ^{ij})/ψ(σ)` otherwise, where `σ^{ij}`
//! is `σ` with the two values exchanged.
//!
//! While sweeping through the lattice the solvers also collect the holes
//! `∂ψ/∂T_i[σ_i]`, stored complex-conjugated, as needed for the energy
//! gradient.

use itertools::Itertools;
use ndarray as nd;
use num_traits::{ One, Zero };
use crate::{
    error::{ EngineError, EngineResult },
    lattice::{ DiagonalDir, Grid, Orientation, Position, SiteIdx },
    network::TensorNetwork2D,
    sample::TpsSample,
    tensor::{ QuantumNumber, TenElem, conj, elem },
    tps::SplitIndexTps,
};

/// Evaluates the local energy of a sample, together with its holes.
pub trait ModelEnergySolver<A, Q> {
    /// Return the local energy of `sample`, writing the conjugated hole of
    /// every site into `holes`.
    ///
    /// The sample's network is left in whatever state the sweep ends in; its
    /// configuration and tracked amplitude are untouched.
    fn cal_energy_and_holes(
        &self,
        sitps: &SplitIndexTps<A, Q>,
        sample: &mut TpsSample<A, Q>,
        holes: &mut Grid<nd::Array4<A>>,
    ) -> EngineResult<A>;
}

/// Heisenberg model on the square lattice, nearest-neighbor bonds only.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SquareHeisenberg;

/// J1-J2 Heisenberg model on the square lattice: unit nearest-neighbor
/// coupling plus coupling `j2` across both diagonals of every plaquette.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SquareJ1J2Heisenberg {
    pub j2: f64,
}

/// Heisenberg model on the triangular lattice, mapped onto the square PEPS by
/// taking the [`DiagonalDir::LeftDownToRightUp`] diagonal of every plaquette
/// as the third nearest-neighbor bond.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TriangleHeisenberg;

/// J1-J2 Heisenberg model on the triangular lattice.
///
/// In the square-PEPS embedding, the three next-nearest (distance √3)
/// neighbors are the [`DiagonalDir::LeftUpToRightDown`] diagonal of every
/// plaquette and the [`DiagonalDir::LeftDownToRightUp`] distance-√5 pairs of
/// every 2x3 and 3x2 block.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TriangleJ1J2Heisenberg {
    pub j2: f64,
}

// couplings beyond the nearest-neighbor bonds
#[derive(Clone, Debug, Default)]
struct Bonds {
    diagonal: Vec<(DiagonalDir, f64)>,
    sqrt5: Vec<(DiagonalDir, f64)>,
}

impl Bonds {
    fn needs_bten2(&self) -> bool { !self.diagonal.is_empty() || !self.sqrt5.is_empty() }
}

impl<A, Q> ModelEnergySolver<A, Q> for SquareHeisenberg
where
    A: TenElem,
    Q: QuantumNumber,
{
    fn cal_energy_and_holes(
        &self,
        sitps: &SplitIndexTps<A, Q>,
        sample: &mut TpsSample<A, Q>,
        holes: &mut Grid<nd::Array4<A>>,
    ) -> EngineResult<A>
    {
        heisenberg_energy(sitps, sample, holes, &Bonds::default())
    }
}

impl<A, Q> ModelEnergySolver<A, Q> for SquareJ1J2Heisenberg
where
    A: TenElem,
    Q: QuantumNumber,
{
    fn cal_energy_and_holes(
        &self,
        sitps: &SplitIndexTps<A, Q>,
        sample: &mut TpsSample<A, Q>,
        holes: &mut Grid<nd::Array4<A>>,
    ) -> EngineResult<A>
    {
        let bonds = Bonds {
            diagonal: vec![
                (DiagonalDir::LeftUpToRightDown, self.j2),
                (DiagonalDir::LeftDownToRightUp, self.j2),
            ],
            sqrt5: Vec::new(),
        };
        heisenberg_energy(sitps, sample, holes, &bonds)
    }
}

impl<A, Q> ModelEnergySolver<A, Q> for TriangleHeisenberg
where
    A: TenElem,
    Q: QuantumNumber,
{
    fn cal_energy_and_holes(
        &self,
        sitps: &SplitIndexTps<A, Q>,
        sample: &mut TpsSample<A, Q>,
        holes: &mut Grid<nd::Array4<A>>,
    ) -> EngineResult<A>
    {
        let bonds = Bonds {
            diagonal: vec![(DiagonalDir::LeftDownToRightUp, 1.0)],
            sqrt5: Vec::new(),
        };
        heisenberg_energy(sitps, sample, holes, &bonds)
    }
}

impl<A, Q> ModelEnergySolver<A, Q> for TriangleJ1J2Heisenberg
where
    A: TenElem,
    Q: QuantumNumber,
{
    fn cal_energy_and_holes(
        &self,
        sitps: &SplitIndexTps<A, Q>,
        sample: &mut TpsSample<A, Q>,
        holes: &mut Grid<nd::Array4<A>>,
    ) -> EngineResult<A>
    {
        let bonds = Bonds {
            diagonal: vec![
                (DiagonalDir::LeftDownToRightUp, 1.0),
                (DiagonalDir::LeftUpToRightDown, self.j2),
            ],
            sqrt5: vec![(DiagonalDir::LeftDownToRightUp, self.j2)],
        };
        heisenberg_energy(sitps, sample, holes, &bonds)
    }
}

// energy of one bond given the exchanged amplitude, if the values differ
fn bond_energy<A, F>(v1: usize, v2: usize, j: f64, inv_psi: A, psi_ex: F)
    -> EngineResult<A>
where
    A: TenElem,
    F: FnOnce() -> EngineResult<A>,
{
    if v1 == v2 {
        Ok(elem(0.25 * j))
    } else {
        Ok(elem::<A>(-0.25 * j) + elem::<A>(0.5 * j) * psi_ex()? * inv_psi)
    }
}

// the pair of sites swapped by a diagonal replacement anchored at `anchor`,
// left column first
fn diagonal_pair(anchor: SiteIdx, diag: DiagonalDir, o: Orientation, span: usize)
    -> (SiteIdx, SiteIdx)
{
    let SiteIdx { row: r, col: c } = anchor;
    let (dr, dc)
        = match o {
            Orientation::Horizontal => (1, span),
            Orientation::Vertical => (span, 1),
        };
    match diag {
        DiagonalDir::LeftDownToRightUp
            => (SiteIdx::new(r + dr, c), SiteIdx::new(r, c + dc)),
        DiagonalDir::LeftUpToRightDown
            => (SiteIdx::new(r, c), SiteIdx::new(r + dr, c + dc)),
    }
}

#[derive(Copy, Clone)]
enum Kind { Nnn, Sqrt5 }

fn diagonal_energy<A, Q>(
    sitps: &SplitIndexTps<A, Q>,
    tn: &TensorNetwork2D<A, Q>,
    anchor: SiteIdx,
    o: Orientation,
    (diag, j): (DiagonalDir, f64),
    kind: Kind,
    inv_psi: A,
) -> EngineResult<A>
where
    A: TenElem,
    Q: QuantumNumber,
{
    let span = match kind { Kind::Nnn => 1, Kind::Sqrt5 => 2 };
    let (left, right) = diagonal_pair(anchor, diag, o, span);
    let vl = tn.config()[left];
    let vr = tn.config()[right];
    bond_energy(vl, vr, j, inv_psi, || {
        let tl = sitps.get(left, vr)?;
        let tr = sitps.get(right, vl)?;
        match kind {
            Kind::Nnn => tn.replace_nnn_site_trace(anchor, diag, o, tl, tr),
            Kind::Sqrt5 => tn.replace_sqrt5_dist_two_site_trace(anchor, diag, o, tl, tr),
        }
    })
}

fn nn_energy<A, Q>(
    sitps: &SplitIndexTps<A, Q>,
    tn: &TensorNetwork2D<A, Q>,
    s1: SiteIdx,
    o: Orientation,
    inv_psi: A,
) -> EngineResult<A>
where
    A: TenElem,
    Q: QuantumNumber,
{
    let s2 = s1.shifted(o, 1);
    let v1 = tn.config()[s1];
    let v2 = tn.config()[s2];
    bond_energy(v1, v2, 1.0, inv_psi, || {
        tn.replace_nn_site_trace(s1, s2, o, sitps.get(s1, v2)?, sitps.get(s2, v1)?)
    })
}

fn heisenberg_energy<A, Q>(
    sitps: &SplitIndexTps<A, Q>,
    sample: &mut TpsSample<A, Q>,
    holes: &mut Grid<nd::Array4<A>>,
    bonds: &Bonds,
) -> EngineResult<A>
where
    A: TenElem,
    Q: QuantumNumber,
{
    let trunc = sample.trunc;
    let tn = &mut sample.tn;
    let rows = tn.rows();
    let cols = tn.cols();
    if holes.rows() != rows || holes.cols() != cols {
        return Err(EngineError::GridShape { rows, cols, len: holes.rows() * holes.cols() });
    }
    let fallback = A::one() / sample.amplitude;
    let mut energy = A::zero();

    // horizontal pass: holes, horizontal bonds, plaquette diagonals, and 2x3
    // blocks
    tn.generate_bmps_approach(Position::Up, &trunc)?;
    for row in 0..rows {
        tn.init_bten(Position::Left, row)?;
        tn.grow_full_bten(Position::Right, row, 1, true)?;
        let with_bten2 = bonds.needs_bten2() && row + 1 < rows && cols >= 2;
        if with_bten2 {
            tn.init_bten2(Position::Left, row)?;
            tn.grow_full_bten2(Position::Right, row, 2, true)?;
        }
        let inv_psi
            = if cols >= 2 {
                A::one() / tn.trace(SiteIdx::new(row, 0), Orientation::Horizontal)?
            } else {
                fallback
            };
        for col in 0..cols {
            let site = SiteIdx::new(row, col);
            holes[site] = conj(&tn.punch_hole(site, Orientation::Horizontal)?);
            if col + 1 < cols {
                energy += nn_energy(sitps, tn, site, Orientation::Horizontal, inv_psi)?;
            }
            if with_bten2 && col + 1 < cols {
                for &bond in bonds.diagonal.iter() {
                    energy += diagonal_energy(
                        sitps, tn, site, Orientation::Horizontal, bond, Kind::Nnn, inv_psi)?;
                }
            }
            if with_bten2 && col + 2 < cols {
                for &bond in bonds.sqrt5.iter() {
                    energy += diagonal_energy(
                        sitps, tn, site, Orientation::Horizontal, bond, Kind::Sqrt5, inv_psi)?;
                }
            }
            if with_bten2 && col + 2 < cols {
                tn.bten2_move_step(Position::Right, row)?;
            }
            if col + 1 < cols { tn.bten_move_step(Position::Right)?; }
        }
        if row + 1 < rows { tn.bmps_move_step(Position::Down, &trunc)?; }
    }

    // vertical pass: vertical bonds and 3x2 blocks
    if rows >= 2 {
        tn.generate_bmps_approach(Position::Left, &trunc)?;
        for col in 0..cols {
            tn.init_bten(Position::Up, col)?;
            tn.grow_full_bten(Position::Down, col, 2, true)?;
            let with_bten2 = !bonds.sqrt5.is_empty() && col + 1 < cols && rows >= 3;
            if with_bten2 {
                tn.init_bten2(Position::Up, col)?;
                tn.grow_full_bten2(Position::Down, col, 2, true)?;
            }
            let inv_psi = A::one() / tn.trace(SiteIdx::new(0, col), Orientation::Vertical)?;
            for row in 0..rows - 1 {
                let site = SiteIdx::new(row, col);
                energy += nn_energy(sitps, tn, site, Orientation::Vertical, inv_psi)?;
                if with_bten2 && row + 2 < rows {
                    for &bond in bonds.sqrt5.iter() {
                        energy += diagonal_energy(
                            sitps, tn, site, Orientation::Vertical, bond, Kind::Sqrt5, inv_psi)?;
                    }
                    if row + 3 < rows { tn.bten2_move_step(Position::Down, col)?; }
                }
                if row + 2 < rows { tn.bten_move_step(Position::Down)?; }
            }
            if col + 1 < cols { tn.bmps_move_step(Position::Right, &trunc)?; }
        }
    }
    Ok(energy)
}

/// Count the bonds of each kind a solver visits on a `rows x cols` lattice:
/// `(nearest, diagonal, sqrt5)`, where the diagonal and √5 counts are per
/// direction.
pub fn bond_counts(rows: usize, cols: usize) -> (usize, usize, usize) {
    let nearest = rows * cols.saturating_sub(1) + rows.saturating_sub(1) * cols;
    let diagonal = rows.saturating_sub(1) * cols.saturating_sub(1);
    let sqrt5
        = rows.saturating_sub(1) * cols.saturating_sub(2)
        + rows.saturating_sub(2) * cols.saturating_sub(1);
    (nearest, diagonal, sqrt5)
}

/// Return every site of a `rows x cols` lattice in row-major order.
pub fn sites(rows: usize, cols: usize) -> Vec<SiteIdx> {
    (0..rows).cartesian_product(0..cols)
        .map(SiteIdx::from)
        .collect()
}
