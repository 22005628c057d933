//! Dense tensor primitives used by the contraction engine.
//!
//! Tensors are plain [`ndarray`] arrays whose axes are identified by position.
//! The only non-trivial operation is the pairwise contraction ("tensordot")
//! over a set of matched axes,
//!
//! <blockquote>
//!   <p style="font-size:20px">
//!     <i>C</i><sub><i>a</i>,<i>b</i></sub>
//!       = Σ<sub><i>α</i></sub>
//!         <i>A</i><sub><i>a</i>,<i>α</i></sub>
//!         <i>B</i><sub><i>α</i>,<i>b</i></sub>
//!   </p>
//! </blockquote>
//!
//! which is computed by permuting the contracted axes to the inside, flattening
//! both operands to matrices, and calling a BLAS matrix product. The output
//! carries the free axes of `a` followed by the free axes of `b`, each in their
//! original order.
//!
//! Symmetry sectors enter only through the [`QuantumNumber`] carried alongside
//! each site tensor; the arrays themselves are always dense.

use std::{ fmt, ops::Add };
use ndarray as nd;
use ndarray_linalg::{
    SVDInto,
    types::{ Scalar, Lapack },
};
use num_traits::{ Float, ToPrimitive, Zero };
use crate::error::{ EngineError, EngineResult };

/// Element type of every tensor in the engine.
///
/// Covers `f32`, `f64`, `c32`, and `c64`; the engine only relies on ring
/// arithmetic, complex conjugation, and extraction of real parts.
pub trait TenElem: Scalar + Lapack { }

impl<A> TenElem for A where A: Scalar + Lapack { }

/// Convert an `f64` to a tensor element.
#[inline]
pub fn elem<A: TenElem>(x: f64) -> A { A::from_real(A::real(x)) }

/// Convert a real value back to `f64`, mapping failures to NaN.
#[inline]
pub fn real_f64<R: ToPrimitive>(x: R) -> f64 { x.to_f64().unwrap_or(f64::NAN) }

pub(crate) fn incompatible() -> EngineError {
    nd::ShapeError::from_kind(nd::ErrorKind::IncompatibleShape).into()
}

/// Reshape an owned array, first forcing it into row-major layout.
///
/// LAPACK routines may hand back column-major factors, which `into_shape`
/// would otherwise reinterpret in column-major order.
pub fn reshape<A, D, E>(arr: nd::Array<A, D>, shape: E)
    -> EngineResult<nd::Array<A, E::Dim>>
where
    A: Clone,
    D: nd::Dimension,
    E: nd::IntoDimension,
{
    let arr
        = if arr.is_standard_layout() {
            arr
        } else {
            arr.as_standard_layout().into_owned()
        };
    Ok(arr.into_shape(shape)?)
}

/// Permute the axes of an array and return the result in row-major layout.
///
/// *Panics* if `perm` is not a permutation of the array's axes.
pub fn permute<A, S, D>(arr: &nd::ArrayBase<S, D>, perm: &[usize]) -> nd::ArrayD<A>
where
    A: Clone,
    S: nd::Data<Elem = A>,
    D: nd::Dimension,
{
    arr.view().into_dyn()
        .permuted_axes(perm.to_vec())
        .as_standard_layout()
        .into_owned()
}

/// Contract `a` and `b` over the pairs of axes `(axes_a[k], axes_b[k])`.
///
/// The result has the uncontracted axes of `a` followed by those of `b`. If
/// every axis is contracted, the result is a zero-dimensional array.
///
/// Fails if `axes_a` and `axes_b` have different lengths, if any axis is out
/// of bounds, or if paired axes have different dimensions.
pub fn contract<A, Sa, Da, Sb, Db>(
    a: &nd::ArrayBase<Sa, Da>,
    b: &nd::ArrayBase<Sb, Db>,
    axes_a: &[usize],
    axes_b: &[usize],
) -> EngineResult<nd::ArrayD<A>>
where
    A: TenElem,
    Sa: nd::Data<Elem = A>,
    Da: nd::Dimension,
    Sb: nd::Data<Elem = A>,
    Db: nd::Dimension,
{
    let sh_a = a.shape();
    let sh_b = b.shape();
    if axes_a.len() != axes_b.len()
        || axes_a.iter().any(|k| *k >= sh_a.len())
        || axes_b.iter().any(|k| *k >= sh_b.len())
        || axes_a.iter().zip(axes_b).any(|(ka, kb)| sh_a[*ka] != sh_b[*kb])
    {
        return Err(incompatible());
    }
    let free_a: Vec<usize>
        = (0..sh_a.len()).filter(|k| !axes_a.contains(k)).collect();
    let free_b: Vec<usize>
        = (0..sh_b.len()).filter(|k| !axes_b.contains(k)).collect();
    let m: usize = free_a.iter().map(|k| sh_a[*k]).product();
    let n: usize = free_b.iter().map(|k| sh_b[*k]).product();
    let inner: usize = axes_a.iter().map(|k| sh_a[*k]).product();
    let out_shape: Vec<usize>
        = free_a.iter().map(|k| sh_a[*k])
        .chain(free_b.iter().map(|k| sh_b[*k]))
        .collect();

    let perm_a: Vec<usize> = free_a.iter().chain(axes_a).copied().collect();
    let perm_b: Vec<usize> = axes_b.iter().chain(&free_b).copied().collect();
    let mat_a: nd::Array2<A> = reshape(permute(a, &perm_a), (m, inner))?;
    let mat_b: nd::Array2<A> = reshape(permute(b, &perm_b), (inner, n))?;
    reshape(mat_a.dot(&mat_b), out_shape)
}

/// Fully contract two arrays of identical shape, i.e. `Σ a ⊙ b` without
/// conjugation.
pub fn inner<A, Sa, Sb, D>(a: &nd::ArrayBase<Sa, D>, b: &nd::ArrayBase<Sb, D>)
    -> EngineResult<A>
where
    A: TenElem,
    Sa: nd::Data<Elem = A>,
    Sb: nd::Data<Elem = A>,
    D: nd::Dimension,
{
    if a.shape() != b.shape() { return Err(incompatible()); }
    Ok(
        a.iter().zip(b)
            .map(|(ak, bk)| *ak * *bk)
            .fold(A::zero(), A::add)
    )
}

/// Element-wise complex conjugate.
#[inline]
pub fn conj<A, S, D>(arr: &nd::ArrayBase<S, D>) -> nd::Array<A, D>
where
    A: TenElem,
    S: nd::Data<Elem = A>,
    D: nd::Dimension,
{
    arr.mapv(|x| x.conj())
}

/// Squared Frobenius norm.
#[inline]
pub fn norm_sqr<A, S, D>(arr: &nd::ArrayBase<S, D>) -> A::Real
where
    A: TenElem,
    S: nd::Data<Elem = A>,
    D: nd::Dimension,
{
    arr.iter()
        .map(|x| x.square())
        .fold(A::Real::zero(), A::Real::add)
}

/// Result of a (possibly truncated) singular value decomposition `M ≈ U S Q`.
#[derive(Clone, Debug)]
pub struct Svd<A: TenElem> {
    pub u: nd::Array2<A>,
    pub s: Vec<A::Real>,
    pub q: nd::Array2<A>,
    pub rank: usize,
    /// Discarded singular-value weight relative to the total,
    /// `Σ_{i ≥ rank} s_i² / Σ_i s_i²`.
    pub trunc_err: A::Real,
}

impl<A: TenElem> Svd<A> {
    /// Return `U S`.
    pub fn us(&self) -> nd::Array2<A> {
        let mut us = self.u.clone();
        us.axis_iter_mut(nd::Axis(1))
            .zip(&self.s)
            .for_each(|(mut col, sk)| {
                col.mapv_inplace(|x| x.mul_real(*sk));
            });
        us
    }

    /// Return `S Q`.
    pub fn sq(&self) -> nd::Array2<A> {
        let mut sq = self.q.clone();
        sq.axis_iter_mut(nd::Axis(0))
            .zip(&self.s)
            .for_each(|(mut row, sk)| {
                row.mapv_inplace(|x| x.mul_real(*sk));
            });
        sq
    }
}

/// Pick the number of singular values to keep.
///
/// The smallest `D` in `[max(d_min, 1), min(d_max, nonzero)]` whose discarded
/// relative weight is at most `trunc_err` is kept; if there is none, the upper
/// end of the range is kept. Singular values that are exactly zero are never
/// kept, except that at least one value always survives. `s` must be sorted in
/// descending order.
pub fn truncation_rank<R: Float>(s: &[R], d_min: usize, d_max: usize, trunc_err: R)
    -> (usize, R)
{
    let total: R = s.iter().map(|sk| *sk * *sk).fold(R::zero(), R::add);
    let nonzero = s.iter().take_while(|sk| **sk > R::zero()).count().max(1);
    let hi = d_max.min(nonzero).max(1);
    let lo = d_min.max(1).min(hi);
    if total <= R::zero() { return (lo, R::zero()); }
    // tail[k] = Σ_{i ≥ k} s_i²
    let mut tail: Vec<R> = vec![R::zero(); s.len() + 1];
    for k in (0..s.len()).rev() {
        tail[k] = tail[k + 1] + s[k] * s[k];
    }
    let discarded = |d: usize| -> R { tail[d.min(s.len())] / total };
    let rank = (lo..=hi).find(|d| discarded(*d) <= trunc_err).unwrap_or(hi);
    (rank, discarded(rank))
}

/// Perform an SVD on `mat`, keeping singular values according to
/// [`truncation_rank`].
///
/// Fails if the underlying LAPACK call fails.
pub fn svd_truncate<A>(mat: nd::Array2<A>, d_min: usize, d_max: usize, trunc_err: A::Real)
    -> EngineResult<Svd<A>>
where A: TenElem
{
    let (Some(u), s, Some(q)) = mat.svd_into(true, true)?
        else { unreachable!() };
    let s: Vec<A::Real> = s.into_iter().collect();
    let (rank, err) = truncation_rank(&s, d_min, d_max, trunc_err);
    let u = u.slice(nd::s![.., ..rank]).to_owned();
    let q = q.slice(nd::s![..rank, ..]).to_owned();
    let s = s.into_iter().take(rank).collect();
    Ok(Svd { u, s, q, rank, trunc_err: err })
}

/// Perform an SVD on `mat`, dropping only exactly-zero singular values.
#[inline]
pub fn svd_exact<A>(mat: nd::Array2<A>) -> EngineResult<Svd<A>>
where A: TenElem
{
    svd_truncate(mat, 1, usize::MAX, A::Real::zero())
}

/// Label of a symmetry sector.
///
/// Sector labels fuse under an abelian group operation; a tensor network whose
/// site divergences don't fuse to the same total as another's describes a
/// state in a different sector.
pub trait QuantumNumber: Copy + Clone + PartialEq + Eq + fmt::Debug {
    /// Identity element.
    fn zero() -> Self;

    /// Group operation.
    fn fuse(self, other: Self) -> Self;

    /// Fuse a sequence of labels.
    fn fuse_all<I>(labels: I) -> Self
    where I: IntoIterator<Item = Self>
    {
        labels.into_iter().fold(Self::zero(), Self::fuse)
    }
}

/// The trivial symmetry: every tensor lives in the same sector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NoSymmetry;

impl QuantumNumber for NoSymmetry {
    fn zero() -> Self { Self }

    fn fuse(self, _other: Self) -> Self { Self }
}

/// U(1) charge, e.g. particle number or total *S*<sub>*z*</sub> (in units of
/// 1/2).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct U1(pub i32);

impl QuantumNumber for U1 {
    fn zero() -> Self { Self(0) }

    fn fuse(self, other: Self) -> Self { Self(self.0 + other.0) }
}

impl fmt::Display for U1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U1({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::ShapeBuilder;

    #[test]
    fn contract_matches_matmul() {
        let a: nd::Array2<f64> = nd::array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let b: nd::Array2<f64> = nd::array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let c = contract(&a, &b, &[1], &[0]).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c, a.dot(&b).into_dyn());
        // contracting on the "wrong" sides gives the transposed product
        let ct = contract(&b, &a, &[0], &[1]).unwrap();
        assert_eq!(ct, a.dot(&b).t().to_owned().into_dyn());
    }

    #[test]
    fn contract_keeps_free_axis_order() {
        let a: nd::Array3<f64>
            = nd::Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i + 10 * j + 100 * k) as f64);
        let b: nd::Array2<f64> = nd::Array2::eye(3);
        let c = contract(&a, &b, &[1], &[0]).unwrap();
        assert_eq!(c.shape(), &[2, 4, 3]);
        assert_eq!(c[[1, 2, 0]], a[[1, 0, 2]]);
        assert_eq!(c[[1, 3, 2]], a[[1, 2, 3]]);
    }

    #[test]
    fn full_contraction_is_scalar() {
        let a: nd::Array2<f64> = nd::array![[1.0, 2.0], [3.0, 4.0]];
        let c = contract(&a, &a, &[0, 1], &[0, 1]).unwrap();
        assert_eq!(c.ndim(), 0);
        assert_relative_eq!(c.sum(), 30.0);
        assert_relative_eq!(inner(&a, &a).unwrap(), 30.0);
    }

    #[test]
    fn contract_rejects_mismatch() {
        let a: nd::Array2<f64> = nd::Array2::zeros((2, 3));
        assert!(contract(&a, &a, &[1], &[1]).is_ok());
        assert!(contract(&a, &a, &[1], &[0]).is_err());
        assert!(contract(&a, &a, &[2], &[0]).is_err());
    }

    #[test]
    fn reshape_is_row_major() {
        let f: nd::Array2<f64>
            = nd::Array2::from_shape_vec((2, 2).f(), vec![1.0, 3.0, 2.0, 4.0]).unwrap();
        let flat: nd::Array1<f64> = reshape(f, 4).unwrap();
        assert_eq!(flat, nd::array![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn truncation_rank_bounds() {
        let s = [4.0_f64, 2.0, 1.0, 0.0];
        assert_eq!(truncation_rank(&s, 1, 10, 0.0).0, 3);
        assert_eq!(truncation_rank(&s, 1, 2, 0.0).0, 2);
        assert_eq!(truncation_rank(&s, 1, 10, 0.3).0, 1);
        assert_eq!(truncation_rank(&s, 2, 10, 0.3).0, 2);
        let (_, err) = truncation_rank(&s, 1, 1, 0.0);
        assert_relative_eq!(err, 5.0 / 21.0);
    }

    #[test]
    fn truncation_error_monotone_in_dmax() {
        let mat: nd::Array2<f64>
            = nd::Array2::from_shape_fn((6, 5), |(i, j)| ((i * 7 + j * 3) % 5) as f64 - 1.5 + 0.1 * (i * j) as f64);
        let errs: Vec<f64>
            = (1..=5)
            .map(|d_max| svd_truncate(mat.clone(), 1, d_max, 1e-14).unwrap().trunc_err)
            .collect();
        assert!(errs.windows(2).all(|w| w[1] <= w[0]));
        assert!(errs[4] <= 1e-14);
    }

    #[test]
    fn svd_reconstructs() {
        let mat: nd::Array2<f64>
            = nd::Array2::from_shape_fn((4, 3), |(i, j)| (i as f64 - j as f64).powi(2) + 0.5);
        let svd = svd_exact(mat.clone()).unwrap();
        let rec = svd.us().dot(&svd.q);
        rec.iter().zip(mat.iter())
            .for_each(|(r, m)| { assert_relative_eq!(r, m, epsilon = 1e-12); });
        let rec2 = svd.u.dot(&svd.sq());
        rec2.iter().zip(mat.iter())
            .for_each(|(r, m)| { assert_relative_eq!(r, m, epsilon = 1e-12); });
    }

    #[test]
    fn quantum_numbers_fuse() {
        assert_eq!(U1::fuse_all([U1(1), U1(-1), U1(2)]), U1(2));
        assert_eq!(NoSymmetry::fuse_all([NoSymmetry; 3]), NoSymmetry);
    }
}
