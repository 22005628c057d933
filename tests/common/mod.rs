#![allow(dead_code)]

use itertools::Itertools;
use ndarray as nd;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use peps_net::{
    CompressScheme,
    Configuration,
    Grid,
    NoSymmetry,
    QuantumNumber,
    SiteIdx,
    SplitIndexTps,
    TenElem,
    TruncatePara,
};

pub fn rng(seed: u64) -> ChaCha8Rng { ChaCha8Rng::seed_from_u64(seed) }

/// Random spin-1/2 TPS with uniform bond dimension.
pub fn random_tps(rows: usize, cols: usize, bond_dim: usize, seed: u64)
    -> SplitIndexTps<f64, NoSymmetry>
{
    SplitIndexTps::random(rows, cols, 2, bond_dim, &mut rng(seed)).unwrap()
}

/// Checkerboard configuration.
pub fn neel(rows: usize, cols: usize) -> Configuration {
    Grid::from_fn(rows, cols, |s| (s.row + s.col) % 2)
}

/// Truncation settings that keep every boundary MPS exact on the small
/// lattices used here.
pub fn exact() -> TruncatePara { TruncatePara::new(1, 64, 0.0, CompressScheme::Svd) }

/// Slice `sitps` by `config` into plain arrays.
pub fn sliced<A, Q>(sitps: &SplitIndexTps<A, Q>, config: &Configuration) -> Grid<nd::Array4<A>>
where
    A: TenElem,
    Q: QuantumNumber,
{
    sitps.project(config).unwrap().map(|_, t| t.data.clone())
}

/// Return `config` with the values at each pair of sites exchanged.
pub fn swapped(config: &Configuration, pairs: &[(SiteIdx, SiteIdx)]) -> Configuration {
    let mut new = config.clone();
    for (a, b) in pairs.iter().copied() {
        let va = new[a];
        new[a] = new[b];
        new[b] = va;
    }
    new
}

/// Contract a network of `[left, down, right, up]` site tensors by summing
/// explicitly over every bond index.
pub fn brute_amplitude<A>(sites: &Grid<nd::Array4<A>>) -> A
where A: TenElem
{
    let rows = sites.rows();
    let cols = sites.cols();
    let mut dims: Vec<usize> = Vec::new();
    for (r, c) in (0..rows).cartesian_product(0..cols - 1) {
        dims.push(sites[SiteIdx::new(r, c)].shape()[2]);
    }
    let nh = dims.len();
    for (r, c) in (0..rows - 1).cartesian_product(0..cols) {
        dims.push(sites[SiteIdx::new(r, c)].shape()[1]);
    }
    let term = |idx: &[usize]| -> A {
        let h = |r: usize, c: usize| idx[r * (cols - 1) + c];
        let v = |r: usize, c: usize| idx[nh + r * cols + c];
        sites.iter()
            .map(|(s, t)| {
                let (r, c) = (s.row, s.col);
                let left = if c > 0 { h(r, c - 1) } else { 0 };
                let down = if r + 1 < rows { v(r, c) } else { 0 };
                let right = if c + 1 < cols { h(r, c) } else { 0 };
                let up = if r > 0 { v(r - 1, c) } else { 0 };
                t[[left, down, right, up]]
            })
            .fold(A::one(), |acc, x| acc * x)
    };
    if dims.is_empty() { return term(&[]); }
    dims.iter()
        .map(|d| 0..*d)
        .multi_cartesian_product()
        .map(|idx| term(&idx))
        .fold(A::zero(), |acc, x| acc + x)
}

/// Exact amplitude of `config`.
pub fn brute<A, Q>(sitps: &SplitIndexTps<A, Q>, config: &Configuration) -> A
where
    A: TenElem,
    Q: QuantumNumber,
{
    brute_amplitude(&sliced(sitps, config))
}
