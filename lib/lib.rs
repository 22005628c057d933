//! Boundary-MPS contraction of projected entangled-pair states (PEPS) sliced by
//! classical configurations, for variational Monte-Carlo.
//!
//! A split-index TPS ([`SplitIndexTps`]) stores one tensor per site and per
//! local basis value. Fixing a configuration selects one tensor per site and
//! leaves a scalar network, whose contraction is the wavefunction amplitude
//! `ψ(σ)`. [`TensorNetwork2D`] contracts it approximately with boundary MPSs
//! and answers local questions about it cheaply: the amplitude with a few site
//! tensors swapped out, and the environment ("hole") of any site.
//!
//! On top of the engine sit a Metropolis sampler ([`TpsSample`]), local-energy
//! solvers for Heisenberg models ([`solver`]), and an accumulator for energy
//! gradients ([`SampleAccumulator`]).

pub mod error;
pub mod tensor;
pub mod lattice;
pub mod tps;
pub mod truncate;
pub mod bmps;
pub mod bten;
pub mod network;
pub mod sample;
pub mod solver;
pub mod accumulate;

pub use error::{ EngineError, EngineResult };
pub use lattice::{ Configuration, DiagonalDir, Grid, Orientation, Position, SiteIdx };
pub use tensor::{ NoSymmetry, QuantumNumber, TenElem, U1 };
pub use tps::{ SiteTensor, SplitIndexTps };
pub use truncate::{ CompressScheme, TruncatePara, TruncationReport };
pub use bmps::BoundaryMps;
pub use bten::BTenCache;
pub use network::{ EngineStats, TensorNetwork2D };
pub use sample::TpsSample;
pub use solver::ModelEnergySolver;
pub use accumulate::SampleAccumulator;
