//! Running Monte-Carlo estimates of the energy and its gradient.
//!
//! With `O_i(σ) = conj(∂ψ/∂T_i[σ_i] / ψ(σ))` the log-derivative with respect to
//! the tensor at site `i` for basis value `σ_i` (and zero for every other basis
//! value), the energy gradient is
//!
//! <blockquote>
//!   <p style="font-size:20px">
//!     ∂<sub><i>i</i></sub><i>E</i>
//!       = ⟨<i>E</i><sub>loc</sub> <i>O</i><sub><i>i</i></sub>⟩
//!       − ⟨<i>E</i><sub>loc</sub>⟩ ⟨<i>O</i><sub><i>i</i></sub>⟩
//!   </p>
//! </blockquote>
//!
//! where averages are taken over samples drawn from `|ψ|²`.

use itertools::izip;
use ndarray as nd;
use num_traits::{ One, Zero };
use statrs::statistics::Statistics;
use crate::{
    error::{ EngineError, EngineResult },
    lattice::{ Configuration, Grid },
    tensor::{ QuantumNumber, TenElem, elem, real_f64 },
    tps::SplitIndexTps,
};

/// Sums of `O` and `E_loc O` for every site and basis value, plus the history
/// of local energies.
#[derive(Clone, Debug)]
pub struct SampleAccumulator<A> {
    energies: Vec<A>,
    o_sum: Grid<Vec<nd::Array4<A>>>,
    eo_sum: Grid<Vec<nd::Array4<A>>>,
}

impl<A> SampleAccumulator<A>
where A: TenElem
{
    /// Create a new, empty accumulator shaped like `sitps`.
    pub fn new<Q>(sitps: &SplitIndexTps<A, Q>) -> Self
    where Q: QuantumNumber
    {
        let o_sum: Grid<Vec<nd::Array4<A>>>
            = sitps.tensors().map(|_, basis| {
                basis.iter()
                    .map(|t| nd::Array4::zeros(t.data.raw_dim()))
                    .collect()
            });
        let eo_sum = o_sum.clone();
        Self { energies: Vec::new(), o_sum, eo_sum }
    }

    /// Return the number of samples pushed.
    pub fn samples(&self) -> usize { self.energies.len() }

    /// Add a sample with local energy `energy_loc`, conjugated holes `holes`,
    /// configuration `config`, and amplitude `amplitude`.
    ///
    /// Fails if `holes` or `config` don't match the shape of the lattice, or if
    /// any hole doesn't match the shape of its site tensor.
    pub fn push(
        &mut self,
        energy_loc: A,
        holes: &Grid<nd::Array4<A>>,
        config: &Configuration,
        amplitude: A,
    ) -> EngineResult<()>
    {
        let rows = self.o_sum.rows();
        let cols = self.o_sum.cols();
        for (r, c) in [(holes.rows(), holes.cols()), (config.rows(), config.cols())] {
            if r != rows || c != cols {
                return Err(EngineError::GridShape { rows, cols, len: r * c });
            }
        }
        for ((site, basis), (_, hole), (_, value)) in izip!(self.o_sum.iter(), holes.iter(), config.iter()) {
            let acc = basis.get(*value)
                .ok_or(EngineError::ConfigOutOfRange { site, value: *value, dim: basis.len() })?;
            if acc.shape() != hole.shape() { return Err(EngineError::BasisShapeMismatch(site)); }
        }

        let inv_psi = (A::one() / amplitude).conj();
        for (site, hole) in holes.iter() {
            let value = config[site];
            let o = hole.mapv(|h| h * inv_psi);
            self.eo_sum[site][value] += &o.mapv(|x| x * energy_loc);
            self.o_sum[site][value] += &o;
        }
        self.energies.push(energy_loc);
        Ok(())
    }

    /// Return the mean local energy, or `None` if no samples have been pushed.
    pub fn energy(&self) -> Option<A> {
        if self.energies.is_empty() { return None; }
        let n: A = elem(self.energies.len() as f64);
        let total = self.energies.iter().copied().fold(A::zero(), |acc, e| acc + e);
        Some(total / n)
    }

    /// Return the standard error of the mean of the real part of the local
    /// energy, or `None` with fewer than two samples.
    pub fn energy_error(&self) -> Option<f64> {
        if self.energies.len() < 2 { return None; }
        let re: Vec<f64> = self.energies.iter().map(|e| real_f64(e.re())).collect();
        let n = re.len() as f64;
        Some(re.iter().std_dev() / n.sqrt())
    }

    /// Return the energy gradient for every site and basis value, or `None` if
    /// no samples have been pushed.
    pub fn gradient(&self) -> Option<Grid<Vec<nd::Array4<A>>>> {
        let energy = self.energy()?;
        let inv_n: A = elem(1.0 / self.energies.len() as f64);
        let grad
            = self.o_sum.map(|site, o_basis| {
                o_basis.iter().zip(&self.eo_sum[site])
                    .map(|(o, eo)| {
                        eo.mapv(|x| x * inv_n) - o.mapv(|x| x * energy * inv_n)
                    })
                    .collect()
            });
        Some(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::{ lattice::SiteIdx, tensor::NoSymmetry, tps::SiteTensor };

    fn sitps() -> SplitIndexTps<f64, NoSymmetry> {
        let tensors
            = Grid::from_fn(1, 2, |_| {
                (0..2)
                    .map(|_| SiteTensor::trivial(nd::Array4::zeros((1, 1, 1, 1))))
                    .collect()
            });
        SplitIndexTps::new(tensors).unwrap()
    }

    fn holes(a: f64, b: f64) -> Grid<nd::Array4<f64>> {
        Grid::from_vec(1, 2, vec![
            nd::Array4::from_elem((1, 1, 1, 1), a),
            nd::Array4::from_elem((1, 1, 1, 1), b),
        ]).unwrap()
    }

    #[test]
    fn gradient_formula() {
        let mut acc = SampleAccumulator::new(&sitps());
        assert!(acc.energy().is_none());
        let c0: Configuration = Grid::from_vec(1, 2, vec![0, 1]).unwrap();
        let c1: Configuration = Grid::from_vec(1, 2, vec![0, 0]).unwrap();
        acc.push(-1.0, &holes(2.0, 4.0), &c0, 2.0).unwrap();
        acc.push(-3.0, &holes(1.0, 3.0), &c1, 0.5).unwrap();
        assert_eq!(acc.samples(), 2);
        assert_relative_eq!(acc.energy().unwrap(), -2.0);
        // standard deviation of {-1, -3} is √2
        assert_relative_eq!(acc.energy_error().unwrap(), 1.0, max_relative = 1e-12);

        // site (0, 0), value 0: O = 1 then 2
        let grad = acc.gradient().unwrap();
        let g00 = grad[SiteIdx::new(0, 0)][0][[0, 0, 0, 0]];
        let (eo, o) = ((-1.0 * 1.0 + -3.0 * 2.0) / 2.0, (1.0 + 2.0) / 2.0);
        assert_relative_eq!(g00, eo - (-2.0) * o, max_relative = 1e-12);
        // site (0, 1), value 1: O = 2 in the first sample only
        let g01 = grad[SiteIdx::new(0, 1)][1][[0, 0, 0, 0]];
        assert_relative_eq!(g01, (-1.0 * 2.0) / 2.0 - (-2.0) * 1.0, max_relative = 1e-12);
        // site (0, 1), value 0: O = 6 in the second sample only
        let g010 = grad[SiteIdx::new(0, 1)][0][[0, 0, 0, 0]];
        assert_relative_eq!(g010, (-3.0 * 6.0) / 2.0 - (-2.0) * 3.0, max_relative = 1e-12);
    }

    #[test]
    fn push_checks_shapes() {
        let mut acc = SampleAccumulator::new(&sitps());
        let bad: Configuration = Grid::from_vec(1, 2, vec![0, 2]).unwrap();
        assert!(matches!(
            acc.push(0.0, &holes(1.0, 1.0), &bad, 1.0),
            Err(EngineError::ConfigOutOfRange { value: 2, .. }),
        ));
        let wrong = Grid::from_fn(2, 1, |_| nd::Array4::zeros((1, 1, 1, 1)));
        let c: Configuration = Grid::from_vec(1, 2, vec![0, 0]).unwrap();
        assert!(matches!(
            acc.push(0.0, &wrong, &c, 1.0),
            Err(EngineError::GridShape { .. }),
        ));
        assert_eq!(acc.samples(), 0);
    }
}
