//! Truncation policy for boundary-MPS compression.

use crate::error::{ EngineError, EngineResult };

/// Algorithm used to recondition a boundary MPS after its initial SVD
/// truncation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompressScheme {
    /// Keep the SVD result as-is.
    Svd,
    /// Alternating least-squares over one tensor at a time; the bond
    /// dimension fixed by the SVD pass is kept.
    Variation1Site,
    /// Alternating least-squares over pairs of neighboring tensors, with the
    /// bond between them re-truncated at every step.
    #[default]
    Variation2Site,
}

/// Bond-dimension budget and compression settings, supplied with every grow
/// or move call.
///
/// `d_max` is a hard cap: no boundary-MPS bond ever exceeds it. `trunc_err`
/// is an early stop that lets bonds end up smaller than `d_max` when the
/// discarded weight allows it, but never below `d_min`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TruncatePara {
    pub d_min: usize,
    pub d_max: usize,
    pub trunc_err: f64,
    pub scheme: CompressScheme,
    /// Maximum number of back-and-forth variational sweeps.
    pub max_sweeps: usize,
    /// Relative change in the compressed state's norm below which the
    /// variational sweeps are considered converged.
    pub converge_tol: f64,
}

impl Default for TruncatePara {
    fn default() -> Self { Self::new(1, 16, 1e-12, CompressScheme::default()) }
}

impl TruncatePara {
    pub fn new(d_min: usize, d_max: usize, trunc_err: f64, scheme: CompressScheme)
        -> Self
    {
        Self { d_min, d_max, trunc_err, scheme, max_sweeps: 10, converge_tol: 1e-10 }
    }

    /// Set the variational sweep budget.
    pub fn with_sweeps(mut self, max_sweeps: usize, converge_tol: f64) -> Self {
        self.max_sweeps = max_sweeps;
        self.converge_tol = converge_tol;
        self
    }

    /// Fails if `d_max` is zero or less than `d_min`.
    pub fn validate(&self) -> EngineResult<()> {
        if self.d_max == 0 || self.d_min > self.d_max {
            Err(EngineError::InvalidTruncatePara { d_min: self.d_min, d_max: self.d_max })
        } else {
            Ok(())
        }
    }
}

/// Diagnostics for a single boundary-MPS compression.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TruncationReport {
    /// Largest relative weight discarded from the exact Schmidt spectrum of any
    /// bond in the SVD pass, or the relative fidelity loss `1 - ⟨C|C⟩/⟨M|M⟩` if
    /// variational sweeps were run. The former never grows with `d_max`.
    pub trunc_err: f64,
    /// Largest bond dimension of the compressed MPS.
    pub bond_dim: usize,
    /// Number of variational sweeps performed.
    pub sweeps: usize,
}
