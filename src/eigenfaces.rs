// src/eigenfaces.rs

use crate::error::{EigenfacesError, Result};
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};
use crate::matrix::Matrix;
use crate::vector::Vector;
use log::{debug, info, log_enabled, trace, warn, Level};
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

/// Lifecycle of an [`Eigenfaces`] model.
///
/// `Empty` → `Collecting` (images added) → `Trained` (eigenpairs computed)
/// → `Ready` (eigenface basis built). Every operation checks the state and
/// fails with `PreconditionViolation` when called out of order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelState {
    Empty,
    Collecting,
    Trained,
    Ready,
}

/// Tunables for eigenface basis construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EigenfacesConfig {
    /// Scale every eigenface to unit length. With unit-length eigenfaces,
    /// `mean + eigenfaces * point` reconstructs a projected face.
    pub normalize_eigenfaces: bool,
    /// Eigenfaces whose raw norm is at or below this fraction of the largest
    /// raw norm are treated as numerically zero and stored as zero vectors.
    /// Only used when `normalize_eigenfaces` is set.
    pub degenerate_norm_tolerance: f64,
}

impl Default for EigenfacesConfig {
    fn default() -> Self {
        EigenfacesConfig {
            normalize_eigenfaces: true,
            degenerate_norm_tolerance: 1e-9,
        }
    }
}

/// PCA ("eigenfaces") face model trained with the covariance matrix trick.
///
/// Training images are the columns of an N x M dataset (N pixels, M images).
/// Instead of the N x N pixel covariance, the M x M matrix `(A^T A) / M` of the
/// zero-mean dataset `A` is decomposed, and its eigenvectors are lifted back
/// into pixel space to obtain the eigenfaces.
///
/// # Examples
///
/// ```
/// use eigenfaces::{Eigenfaces, Vector};
///
/// let mut model = Eigenfaces::new();
/// for face in [[0.0, 1.0, 2.0], [2.0, 1.0, 0.0], [1.0, 3.0, 1.0]] {
///     model.add_image(&Vector::from_vec(face.to_vec()).unwrap()).unwrap();
/// }
/// model.calculate_eigenvalues().unwrap();
/// let k = model.num_components_for(0.9).unwrap();
/// model.calculate_eigenfaces(k).unwrap();
/// let point = model
///     .project_in_eigenspace(&Vector::from_vec(vec![1.0, 1.0, 1.0]).unwrap())
///     .unwrap();
/// assert_eq!(point.len(), k);
/// ```
#[derive(Debug)]
pub struct Eigenfaces<B = LinAlgBackendProvider<f64>> {
    backend: B,
    config: EigenfacesConfig,
    state: ModelState,
    /// Fixed by the first image; 0 until then.
    pixels_per_image: usize,
    /// Reserved dataset columns not yet filled.
    preallocated_images: usize,
    /// Pixels x images; trailing `preallocated_images` columns are unfilled.
    dataset: Matrix,
    mean_face: Option<Vector>,
    zero_mean_dataset: Option<Matrix>,
    /// Sorted by descending absolute value.
    eigenvalues: Option<Vector>,
    /// Column i pairs with `eigenvalues[i]`.
    eigenvectors: Option<Matrix>,
    /// Pixels x `eigenface_components`.
    eigenfaces: Option<Matrix>,
    eigenface_components: usize,
}

impl Default for Eigenfaces {
    fn default() -> Self {
        Self::new()
    }
}

impl Eigenfaces {
    /// Creates an empty model using the default LAPACK backend.
    pub fn new() -> Self {
        Self::with_backend(LinAlgBackendProvider::new(), EigenfacesConfig::default())
    }

    pub fn with_config(config: EigenfacesConfig) -> Self {
        Self::with_backend(LinAlgBackendProvider::new(), config)
    }

    /// Reads a model written by [`Eigenfaces::write_to`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Self::read_from_with_backend(reader, LinAlgBackendProvider::new(), EigenfacesConfig::default())
    }

    /// Loads a model saved with [`Eigenfaces::save`].
    ///
    /// The loaded model is `Ready`: it can project and reconstruct faces but
    /// cannot be trained further, since the dataset is not part of the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let start = Instant::now();
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        let model = Self::read_from(&mut reader)?;
        info!(
            "Loaded eigenfaces model ({} pixels, {} components) from {:?} in {:?}",
            model.pixels_per_image,
            model.eigenface_components,
            path.as_ref(),
            start.elapsed()
        );
        Ok(model)
    }
}

impl<B: BackendEigh<f64>> Eigenfaces<B> {
    /// Creates an empty model that decomposes with `backend`.
    pub fn with_backend(backend: B, config: EigenfacesConfig) -> Self {
        Self {
            backend,
            config,
            state: ModelState::Empty,
            pixels_per_image: 0,
            preallocated_images: 0,
            dataset: Matrix::zeros(0, 0),
            mean_face: None,
            zero_mean_dataset: None,
            eigenvalues: None,
            eigenvectors: None,
            eigenfaces: None,
            eigenface_components: 0,
        }
    }

    fn precondition(&self, operation: &'static str) -> EigenfacesError {
        EigenfacesError::PreconditionViolation {
            operation,
            state: self.state,
        }
    }

    fn require(&self, operation: &'static str, allowed: &[ModelState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.precondition(operation))
        }
    }

    // --- Accessors ---

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn config(&self) -> &EigenfacesConfig {
        &self.config
    }

    /// Number of training images added so far (reserved slots excluded).
    pub fn image_count(&self) -> usize {
        if self.pixels_per_image == 0 {
            0
        } else {
            self.dataset.cols() - self.preallocated_images
        }
    }

    pub fn pixels_per_image(&self) -> usize {
        self.pixels_per_image
    }

    pub fn eigenface_components(&self) -> usize {
        self.eigenface_components
    }

    pub fn eigenvalues_count(&self) -> usize {
        self.eigenvalues.as_ref().map_or(0, Vector::len)
    }

    pub fn mean_face(&self) -> Option<&Vector> {
        self.mean_face.as_ref()
    }

    pub fn eigenvalues(&self) -> Option<&Vector> {
        self.eigenvalues.as_ref()
    }

    pub fn eigenvectors(&self) -> Option<&Matrix> {
        self.eigenvectors.as_ref()
    }

    pub fn eigenfaces(&self) -> Option<&Matrix> {
        self.eigenfaces.as_ref()
    }

    // --- Training set assembly ---

    /// Reserves room for `num_images` more training images.
    ///
    /// # Errors
    /// `InvalidArgument` if `num_images` is 0 or the grown dataset size would
    /// overflow; `PreconditionViolation` once the model has been trained.
    pub fn reserve(&mut self, num_images: usize) -> Result<()> {
        if num_images == 0 {
            return Err(EigenfacesError::InvalidArgument(
                "Invalid argument 'num_images' in reserve: it must be at least 1.".into(),
            ));
        }
        self.require("reserve", &[ModelState::Empty, ModelState::Collecting])?;

        let overflow = || {
            EigenfacesError::InvalidArgument(format!(
                "Invalid argument 'num_images' in reserve: {} more images overflows the dataset size.",
                num_images
            ))
        };
        let preallocated = self
            .preallocated_images
            .checked_add(num_images)
            .ok_or_else(overflow)?;
        let columns = self.dataset.cols().checked_add(num_images).ok_or_else(overflow)?;
        if self.pixels_per_image > 0 {
            if !dataset_fits(self.pixels_per_image, columns) {
                return Err(overflow());
            }
            self.dataset.resize(self.pixels_per_image, columns);
        }
        self.preallocated_images = preallocated;
        Ok(())
    }

    /// Adds one training image.
    ///
    /// The first image fixes the number of pixels per image; every later
    /// image must have the same length. Reserved slots are filled first.
    ///
    /// # Errors
    /// `InvalidArgument` on a pixel count mismatch (the model is left
    /// untouched); `PreconditionViolation` once the model has been trained.
    pub fn add_image(&mut self, face: &Vector) -> Result<()> {
        self.require("add_image", &[ModelState::Empty, ModelState::Collecting])?;

        if self.pixels_per_image == 0 {
            // Rows (pixels) x columns (images)
            let columns = self.preallocated_images.max(1);
            if !dataset_fits(face.len(), columns) {
                return Err(EigenfacesError::InvalidArgument(format!(
                    "A dataset of {} images of {} pixels does not fit in memory.",
                    columns,
                    face.len()
                )));
            }
            let mut dataset = Matrix::zeros(face.len(), columns);
            dataset.set_column(0, face)?;
            self.dataset = dataset;
            self.pixels_per_image = face.len();
            self.preallocated_images = self.preallocated_images.saturating_sub(1);
        } else {
            if face.len() != self.pixels_per_image {
                return Err(EigenfacesError::InvalidArgument(format!(
                    "Invalid face: it has {} pixels but this model uses {} pixels per image.",
                    face.len(),
                    self.pixels_per_image
                )));
            }
            if self.preallocated_images > 0 {
                let slot = self.dataset.cols() - self.preallocated_images;
                self.dataset.set_column(slot, face)?;
                self.preallocated_images -= 1;
            } else {
                let end = self.dataset.cols();
                self.dataset.insert_column(end, face)?;
            }
        }
        self.state = ModelState::Collecting;
        Ok(())
    }

    // --- Training ---

    /// Computes the mean face and the eigenpairs of the M x M covariance
    /// surrogate, sorted by descending absolute eigenvalue.
    ///
    /// Unfilled reserved columns are dropped first. Nothing is committed
    /// unless the whole computation succeeds.
    ///
    /// # Errors
    /// `PreconditionViolation` unless the model is `Collecting`;
    /// `ComputationFailure` if the eigendecomposition fails.
    pub fn calculate_eigenvalues(&mut self) -> Result<()> {
        self.require("calculate_eigenvalues", &[ModelState::Collecting])?;
        let start = Instant::now();
        let image_count = self.image_count();

        let trimmed = if self.preallocated_images > 0 {
            debug!(
                "Dropping {} unfilled reserved columns before training",
                self.preallocated_images
            );
            let mut d = self.dataset.clone();
            d.resize(self.pixels_per_image, image_count);
            Some(d)
        } else {
            None
        };
        let dataset = trimmed.as_ref().unwrap_or(&self.dataset);

        let mean_face = dataset.mean_column()?;
        let zero_mean_dataset = Matrix::from_array(
            dataset.as_array() - &mean_face.as_array().view().insert_axis(Axis(1)),
        );

        // (A^T A) / M is M x M, so the N x N pixel covariance is never formed.
        let mut covariance = zero_mean_dataset.transpose();
        covariance.mul_assign_matrix(&zero_mean_dataset)?;
        covariance /= image_count as f64;
        debug!(
            "Covariance surrogate is {}x{} for {} images of {} pixels",
            covariance.rows(),
            covariance.cols(),
            image_count,
            self.pixels_per_image
        );

        let (raw_values, raw_vectors) = covariance.symmetric_eigen(&self.backend)?;
        let (eigenvalues, eigenvectors) = sort_eigenpairs_by_magnitude(&raw_values, &raw_vectors)?;
        log_explained_variance(&eigenvalues);

        if let Some(d) = trimmed {
            self.dataset = d;
            self.preallocated_images = 0;
        }
        self.mean_face = Some(mean_face);
        self.zero_mean_dataset = Some(zero_mean_dataset);
        self.eigenvalues = Some(eigenvalues);
        self.eigenvectors = Some(eigenvectors);
        self.eigenfaces = None;
        self.eigenface_components = 0;
        self.state = ModelState::Trained;

        info!(
            "Computed {} eigenpairs from {} training images in {:?}",
            self.eigenvalues_count(),
            image_count,
            start.elapsed()
        );
        Ok(())
    }

    /// Builds the eigenface basis from the first `components` eigenpairs.
    ///
    /// Eigenface i is `sum_j eigenvectors[j][i] * zero_mean_dataset[:, j]`,
    /// scaled to unit length unless `normalize_eigenfaces` is off. Can be
    /// called again on a `Ready` model that was trained in this process to
    /// rebuild the basis with a different component count.
    ///
    /// # Errors
    /// `InvalidArgument` unless `1 <= components <= eigenvalues_count()`;
    /// `PreconditionViolation` before training or on a loaded model.
    pub fn calculate_eigenfaces(&mut self, components: usize) -> Result<()> {
        const OPERATION: &str = "calculate_eigenfaces";
        self.require(OPERATION, &[ModelState::Trained, ModelState::Ready])?;
        let (zero_mean_dataset, eigenvectors, eigenvalue_count) =
            match (&self.zero_mean_dataset, &self.eigenvectors, &self.eigenvalues) {
                (Some(z), Some(v), Some(l)) => (z, v, l.len()),
                _ => return Err(self.precondition(OPERATION)),
            };
        if components < 1 || components > eigenvalue_count {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Invalid argument components={}: it is not between 1 and {}.",
                components, eigenvalue_count
            )));
        }
        let start = Instant::now();

        let mut faces = Vec::with_capacity(components);
        for i in 0..components {
            let mut eigenface = Array1::<f64>::zeros(self.pixels_per_image);
            for (j, column) in zero_mean_dataset.as_array().columns().into_iter().enumerate() {
                eigenface.scaled_add(eigenvectors[(j, i)], &column);
            }
            faces.push(Vector::try_from(eigenface)?);
        }

        if self.config.normalize_eigenfaces {
            normalize_eigenfaces(&mut faces, self.config.degenerate_norm_tolerance);
        }

        self.eigenfaces = Some(Matrix::from_columns(&faces)?);
        self.eigenface_components = components;
        self.state = ModelState::Ready;
        info!(
            "Built {} eigenfaces of {} pixels in {:?}",
            components,
            self.pixels_per_image,
            start.elapsed()
        );
        Ok(())
    }

    // --- Variance ---

    fn trained_eigenvalues(&self, operation: &'static str) -> Result<&Vector> {
        self.require(operation, &[ModelState::Trained, ModelState::Ready])?;
        self.eigenvalues.as_ref().ok_or_else(|| self.precondition(operation))
    }

    /// Smallest number of components whose eigenvalues explain at least
    /// `target_variance` of the total (1.0 = all of it, 0.8 = 80%).
    ///
    /// Asking for 1.0 keeps every component, including numerically zero
    /// trailing ones. If rounding keeps the ratio below the target, the full
    /// eigenvalue count is returned.
    ///
    /// # Errors
    /// `InvalidArgument` unless `0 < target_variance <= 1`;
    /// `PreconditionViolation` before training.
    pub fn num_components_for(&self, target_variance: f64) -> Result<usize> {
        let eigenvalues = self.trained_eigenvalues("num_components_for")?;
        if !(target_variance > 0.0 && target_variance <= 1.0) {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Target variance {} is not in (0, 1].",
                target_variance
            )));
        }
        if target_variance >= 1.0 {
            return Ok(eigenvalues.len());
        }

        let total = eigenvalues.iter().fold(0.0, |acc, v| acc + v);
        let mut accum = 0.0;
        for (i, v) in eigenvalues.iter().enumerate() {
            accum += v;
            if accum / total >= target_variance {
                return Ok(i + 1);
            }
        }
        Ok(eigenvalues.len())
    }

    /// Fraction of the total variance carried by each sorted eigenvalue.
    pub fn explained_variance_ratios(&self) -> Result<Vector> {
        let eigenvalues = self.trained_eigenvalues("explained_variance_ratios")?;
        let total = eigenvalues.iter().fold(0.0, |acc, v| acc + v);
        Ok(eigenvalues / total)
    }

    // --- Recognition ---

    fn ready_basis(&self, operation: &'static str) -> Result<(&Vector, &Matrix)> {
        self.require(operation, &[ModelState::Ready])?;
        match (&self.mean_face, &self.eigenfaces) {
            (Some(mean), Some(basis)) => Ok((mean, basis)),
            _ => Err(self.precondition(operation)),
        }
    }

    /// Projects `face` into the eigenspace: component j is
    /// `eigenfaces[:, j] . (face - mean_face)`.
    ///
    /// # Errors
    /// `PreconditionViolation` unless the model is `Ready`; `InvalidArgument`
    /// if `face` does not have `pixels_per_image()` pixels.
    pub fn project_in_eigenspace(&self, face: &Vector) -> Result<Vector> {
        let (mean_face, basis) = self.ready_basis("project_in_eigenspace")?;
        if face.len() != mean_face.len() {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Cannot project a face of {} pixels with a model of {} pixels per image.",
                face.len(),
                mean_face.len()
            )));
        }
        let centered = (face - mean_face)?;
        let mut point = Vector::zeros(self.eigenface_components)?;
        for k in 0..self.eigenface_components {
            point[k] = basis.column(k)?.dot(&centered)?;
        }
        Ok(point)
    }

    /// Maps an eigenspace point back to pixel space:
    /// `mean_face + sum_j point[j] * eigenfaces[:, j]`.
    ///
    /// # Errors
    /// `PreconditionViolation` unless the model is `Ready`; `InvalidArgument`
    /// if `point` does not have `eigenface_components()` entries.
    pub fn reconstruct_from_eigenspace(&self, point: &Vector) -> Result<Vector> {
        let (mean_face, basis) = self.ready_basis("reconstruct_from_eigenspace")?;
        if point.len() != self.eigenface_components {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Eigenspace point has {} components but the model has {}.",
                point.len(),
                self.eigenface_components
            )));
        }
        let mut face = mean_face.clone();
        for k in 0..self.eigenface_components {
            face.try_add_assign(&(&basis.column(k)? * point[k]))?;
        }
        Ok(face)
    }

    // --- Persistence ---

    /// Writes eigenvalues, mean face, eigenvectors and eigenfaces, in that
    /// order, each in the plain vector/matrix binary layout.
    ///
    /// # Errors
    /// `PreconditionViolation` unless the model is `Ready`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        const OPERATION: &str = "write_to";
        let (mean_face, eigenfaces) = self.ready_basis(OPERATION)?;
        let (eigenvalues, eigenvectors) = match (&self.eigenvalues, &self.eigenvectors) {
            (Some(l), Some(v)) => (l, v),
            _ => return Err(self.precondition(OPERATION)),
        };
        eigenvalues.write_to(writer)?;
        mean_face.write_to(writer)?;
        eigenvectors.write_to(writer)?;
        eigenfaces.write_to(writer)?;
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        info!("Saved eigenfaces model to {:?}", path.as_ref());
        Ok(())
    }

    /// Reads a model written by [`Eigenfaces::write_to`] into a fresh `Ready`
    /// instance that decomposes with `backend`.
    ///
    /// # Errors
    /// `Io` for truncated input; `InvalidArgument` if the four blocks do not
    /// describe a consistent model.
    pub fn read_from_with_backend<R: Read>(
        reader: &mut R,
        backend: B,
        config: EigenfacesConfig,
    ) -> Result<Self> {
        let eigenvalues = Vector::read_from(reader)?;
        let mean_face = Vector::read_from(reader)?;
        let eigenvectors = Matrix::read_from(reader)?;
        let eigenfaces = Matrix::read_from(reader)?;

        let m = eigenvalues.len();
        if eigenvectors.rows() != m || eigenvectors.cols() != m {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Model file has {} eigenvalues but a {}x{} eigenvector matrix.",
                m,
                eigenvectors.rows(),
                eigenvectors.cols()
            )));
        }
        if eigenfaces.rows() != mean_face.len() {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Model file has a mean face of {} pixels but eigenfaces of {} pixels.",
                mean_face.len(),
                eigenfaces.rows()
            )));
        }
        if eigenfaces.cols() == 0 || eigenfaces.cols() > m {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Model file has {} eigenfaces for {} eigenvalues.",
                eigenfaces.cols(),
                m
            )));
        }

        let mut model = Self::with_backend(backend, config);
        model.pixels_per_image = mean_face.len();
        model.eigenface_components = eigenfaces.cols();
        model.mean_face = Some(mean_face);
        model.eigenvalues = Some(eigenvalues);
        model.eigenvectors = Some(eigenvectors);
        model.eigenfaces = Some(eigenfaces);
        model.state = ModelState::Ready;
        Ok(model)
    }
}

/// Whether a pixels x columns `f64` buffer stays within the allocation limit.
fn dataset_fits(pixels: usize, columns: usize) -> bool {
    pixels
        .checked_mul(columns)
        .and_then(|n| n.checked_mul(std::mem::size_of::<f64>()))
        .map_or(false, |bytes| bytes <= isize::MAX as usize)
}

/// Reorders eigenpairs by descending absolute eigenvalue, moving each
/// eigenvector column together with its eigenvalue. The sort is stable.
pub(crate) fn sort_eigenpairs_by_magnitude(values: &Vector, vectors: &Matrix) -> Result<(Vector, Matrix)> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .abs()
            .partial_cmp(&values[a].abs())
            .unwrap_or(Ordering::Equal)
    });
    let sorted_values = Vector::from_vec(order.iter().map(|&i| values[i]).collect())?;
    let sorted_vectors = vectors.select_columns(&order)?;
    Ok((sorted_values, sorted_vectors))
}

/// Scales each eigenface to unit length; numerically zero ones become zero.
fn normalize_eigenfaces(faces: &mut [Vector], tolerance: f64) {
    let norms: Vec<f64> = faces.iter().map(Vector::magnitude).collect();
    let largest = norms.iter().cloned().fold(0.0, f64::max);
    let floor = largest * tolerance;
    for (i, (face, &norm)) in faces.iter_mut().zip(norms.iter()).enumerate() {
        trace!("Eigenface {} has raw norm {:e}", i, norm);
        if norm > floor && norm > 0.0 {
            *face /= norm;
        } else {
            warn!(
                "Eigenface {} is numerically zero (norm {:e}, largest {:e}); storing it as zeros",
                i, norm, largest
            );
            face.zero();
        }
    }
}

fn log_explained_variance(eigenvalues: &Vector) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    let total = eigenvalues.iter().fold(0.0, |acc, v| acc + v);
    let mut accum = 0.0;
    debug!("Eigenvalues ({}): component / eigenvalue / cumulative variance", eigenvalues.len());
    for (i, v) in eigenvalues.iter().enumerate() {
        accum += v;
        debug!("{}\t{:e}\t{:.6}", i + 1, v, accum / total);
    }
}
