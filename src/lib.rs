//! Multi-GPU DTW barycenter averaging (DBA) for raw signal time series.
//!
//! The crate computes a representative "average" sequence per discovered
//! cluster of input sequences, where averaging respects non-linear time
//! warping (DTW). The heavy lifting is a swath-pipelined DTW engine with a
//! memory-adaptive striped path mode; it runs on the CPU by default and on
//! CUDA devices when built with the `cuda` feature.

pub mod average;
pub mod cluster;
pub mod cuda;
pub mod dba;
pub mod dtw;
pub mod pairwise;
pub mod persist;
pub mod utilities;
