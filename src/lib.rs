// Kernel Fisher discriminant analysis (KFDA)

#![doc = include_str!("../README.md")]

pub mod config;
pub mod eigen;
pub mod error;
pub mod kernel;
pub mod kfda;
pub mod linalg_backends;
pub mod regularize;
pub mod scatter;

pub use config::{EigenSolverKind, KfdaConfig, SingularityCheck};
pub use error::{KfdaError, Result};
pub use kernel::{Kernel, KernelParams, NamedKernel};
pub use kfda::{FitDiagnostics, KernelFda};

#[cfg(test)]
mod kfda_tests;
