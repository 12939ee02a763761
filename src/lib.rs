// Eigenfaces: PCA face recognition with the covariance matrix trick

#![doc = include_str!("../README.md")]

mod binary_io;
pub mod eigenfaces;
pub mod error;
pub mod linalg_backends;
pub mod matrix;
pub mod vector;

pub use eigenfaces::{Eigenfaces, EigenfacesConfig, ModelState};
pub use error::{EigenfacesError, Result};
pub use matrix::Matrix;
pub use vector::Vector;
