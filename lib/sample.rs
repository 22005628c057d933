//! Monte-Carlo sampling of configurations from a split-index TPS.
//!
//! A [`TpsSample`] pairs a configuration with its sliced network and the
//! amplitude `ψ(σ)`. [`TpsSample::mc_sweep`] visits every nearest-neighbor bond
//! once, proposes to exchange the two values across it, and accepts with the
//! Metropolis probability `min(1, |ψ(σ')/ψ(σ)|²)`. Exchanges conserve the
//! number of sites holding each basis value.

use log::debug;
use rand::{ Rng, seq::SliceRandom };
use crate::{
    error::{ EngineError, EngineResult },
    lattice::{ Configuration, Grid, Orientation, Position, SiteIdx },
    network::TensorNetwork2D,
    tensor::{ QuantumNumber, TenElem, real_f64 },
    tps::SplitIndexTps,
    truncate::TruncatePara,
};

/// A single Monte-Carlo state: the network sliced by the current
/// configuration, the configuration's amplitude, and the truncation policy
/// used to evaluate it.
#[derive(Clone, Debug)]
pub struct TpsSample<A, Q> {
    pub(crate) tn: TensorNetwork2D<A, Q>,
    pub(crate) amplitude: A,
    pub(crate) trunc: TruncatePara,
}

impl<A, Q> TpsSample<A, Q>
where
    A: TenElem,
    Q: QuantumNumber,
{
    /// Slice `sitps` by `config` and evaluate the amplitude.
    pub fn new(sitps: &SplitIndexTps<A, Q>, config: &Configuration, trunc: TruncatePara)
        -> EngineResult<Self>
    {
        trunc.validate()?;
        let mut tn = TensorNetwork2D::new(sitps, config)?;
        let amplitude = tn.amplitude(&trunc)?;
        Ok(Self { tn, amplitude, trunc })
    }

    /// Draw a uniformly random configuration holding `occupancy[v]` sites of
    /// each basis value `v`.
    ///
    /// Fails if the occupancies don't add up to the number of sites.
    pub fn random<R>(
        sitps: &SplitIndexTps<A, Q>,
        occupancy: &[usize],
        trunc: TruncatePara,
        rng: &mut R,
    ) -> EngineResult<Self>
    where R: Rng
    {
        let mut values: Vec<usize>
            = occupancy.iter().enumerate()
            .flat_map(|(v, n)| std::iter::repeat(v).take(*n))
            .collect();
        values.shuffle(rng);
        let config = Grid::from_vec(sitps.rows(), sitps.cols(), values)?;
        Self::new(sitps, &config, trunc)
    }

    pub fn config(&self) -> &Configuration { self.tn.config() }

    pub fn network(&self) -> &TensorNetwork2D<A, Q> { &self.tn }

    pub fn network_mut(&mut self) -> &mut TensorNetwork2D<A, Q> { &mut self.tn }

    /// Return the tracked amplitude of the current configuration.
    pub fn amplitude(&self) -> A { self.amplitude }

    pub fn trunc(&self) -> &TruncatePara { &self.trunc }

    /// Re-evaluate the amplitude from scratch.
    pub fn refresh_amplitude(&mut self) -> EngineResult<A> {
        self.amplitude = self.tn.amplitude(&self.trunc)?;
        Ok(self.amplitude)
    }

    /// Perform one sweep of exchange updates over every nearest-neighbor bond,
    /// horizontal bonds first (row by row, top to bottom) and then vertical
    /// ones (column by column, left to right), and return the fraction of
    /// proposals accepted.
    ///
    /// Bonds joining equal values count as proposals but are never applied.
    pub fn mc_sweep<R>(&mut self, sitps: &SplitIndexTps<A, Q>, rng: &mut R)
        -> EngineResult<f64>
    where R: Rng
    {
        if sitps.rows() != self.tn.rows() || sitps.cols() != self.tn.cols() {
            return Err(EngineError::GridShape {
                rows: self.tn.rows(),
                cols: self.tn.cols(),
                len: sitps.rows() * sitps.cols(),
            });
        }
        let rows = self.tn.rows();
        let cols = self.tn.cols();
        let mut accepted: usize = 0;
        let mut total: usize = 0;

        if cols >= 2 {
            self.tn.generate_bmps_approach(Position::Up, &self.trunc)?;
            for row in 0..rows {
                self.tn.init_bten(Position::Left, row)?;
                self.tn.grow_full_bten(Position::Right, row, 2, true)?;
                for col in 0..cols - 1 {
                    let s1 = SiteIdx::new(row, col);
                    let s2 = SiteIdx::new(row, col + 1);
                    total += 1;
                    if self.exchange(sitps, s1, s2, Orientation::Horizontal, rng)? {
                        accepted += 1;
                    }
                    if col < cols - 2 { self.tn.bten_move_step(Position::Right)?; }
                }
                if row < rows - 1 { self.tn.bmps_move_step(Position::Down, &self.trunc)?; }
            }
        }

        if rows >= 2 {
            self.tn.generate_bmps_approach(Position::Left, &self.trunc)?;
            for col in 0..cols {
                self.tn.init_bten(Position::Up, col)?;
                self.tn.grow_full_bten(Position::Down, col, 2, true)?;
                for row in 0..rows - 1 {
                    let s1 = SiteIdx::new(row, col);
                    let s2 = SiteIdx::new(row + 1, col);
                    total += 1;
                    if self.exchange(sitps, s1, s2, Orientation::Vertical, rng)? {
                        accepted += 1;
                    }
                    if row < rows - 2 { self.tn.bten_move_step(Position::Down)?; }
                }
                if col < cols - 1 { self.tn.bmps_move_step(Position::Right, &self.trunc)?; }
            }
        }

        let ratio = if total == 0 { 0.0 } else { accepted as f64 / total as f64 };
        debug!("exchange sweep: {}/{} accepted, amplitude = {:?}", accepted, total, self.amplitude);
        Ok(ratio)
    }

    // propose swapping the values at `s1` and `s2`, with the caches positioned
    // on the bond
    fn exchange<R>(
        &mut self,
        sitps: &SplitIndexTps<A, Q>,
        s1: SiteIdx,
        s2: SiteIdx,
        o: Orientation,
        rng: &mut R,
    ) -> EngineResult<bool>
    where R: Rng
    {
        let v1 = self.tn.config()[s1];
        let v2 = self.tn.config()[s2];
        if v1 == v2 { return Ok(false); }
        let t1 = sitps.get(s1, v2)?;
        let t2 = sitps.get(s2, v1)?;
        let psi_ex = self.tn.replace_nn_site_trace(s1, s2, o, t1, t2)?;
        let weight_ex = real_f64(psi_ex.square());
        let weight = real_f64(self.amplitude.square());
        let accept
            = weight_ex >= weight || rng.gen::<f64>() * weight < weight_ex;
        if accept {
            self.tn.update_site_config(s1, v2, sitps)?;
            self.tn.update_site_config(s2, v1, sitps)?;
            self.amplitude = psi_ex;
        }
        Ok(accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use crate::{ tensor::NoSymmetry, truncate::CompressScheme };

    #[test]
    fn random_config_has_occupancy() {
        let mut rng = ChaCha8Rng::seed_from_u64(10546);
        let sitps: SplitIndexTps<f64, NoSymmetry>
            = SplitIndexTps::random(3, 3, 2, 2, &mut rng).unwrap();
        let trunc = TruncatePara::new(1, 16, 0.0, CompressScheme::Svd);
        let sample = TpsSample::random(&sitps, &[5, 4], trunc, &mut rng).unwrap();
        assert_eq!(sample.config().occupancy(2), vec![5, 4]);
        assert!(TpsSample::random(&sitps, &[5, 5], trunc, &mut rng).is_err());
    }

    #[test]
    fn sweep_conserves_occupancy() {
        let mut rng = ChaCha8Rng::seed_from_u64(10546);
        let sitps: SplitIndexTps<f64, NoSymmetry>
            = SplitIndexTps::random(3, 3, 2, 2, &mut rng).unwrap();
        let trunc = TruncatePara::new(1, 16, 0.0, CompressScheme::Svd);
        let mut sample = TpsSample::random(&sitps, &[5, 4], trunc, &mut rng).unwrap();
        for _ in 0..4 {
            let ratio = sample.mc_sweep(&sitps, &mut rng).unwrap();
            assert!((0.0..=1.0).contains(&ratio));
            assert_eq!(sample.config().occupancy(2), vec![5, 4]);
        }
        let tracked = sample.amplitude();
        let fresh = sample.refresh_amplitude().unwrap();
        assert_relative_eq!(tracked, fresh, max_relative = 1e-8);
    }
}
