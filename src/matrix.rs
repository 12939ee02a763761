// src/matrix.rs

use crate::binary_io;
use crate::error::{EigenfacesError, Result};
use crate::linalg_backends::BackendEigh;
use crate::vector::Vector;
use log::trace;
use ndarray::{s, Array2, Axis, ShapeBuilder};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::ops::{DivAssign, Index, IndexMut, MulAssign};
use std::path::Path;

/// Dense `f64` matrix stored in **column-major** order.
///
/// Training faces live in the columns of a pixels x images matrix, so every
/// routine here is column oriented. Each constructor and each operation that
/// yields a matrix keeps the buffer column-major; the binary format writes
/// that buffer as is.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    data: Array2<f64>,
}

/// Returns `a` with a column-major buffer, copying only when needed.
fn column_major(a: Array2<f64>) -> Array2<f64> {
    if a.t().is_standard_layout() {
        a
    } else {
        let mut out = Array2::zeros((a.nrows(), a.ncols()).f());
        out.assign(&a);
        out
    }
}

impl Matrix {
    /// Creates a `rows` x `cols` matrix of zeros. Either dimension may be zero.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { data: Array2::zeros((rows, cols).f()) }
    }

    /// Wraps an ndarray matrix, converting it to column-major storage.
    pub fn from_array(data: Array2<f64>) -> Self {
        Self { data: column_major(data) }
    }

    /// Builds a matrix whose j-th column is `columns[j]`.
    ///
    /// # Errors
    /// `InvalidArgument` if `columns` is empty or the lengths differ.
    pub fn from_columns(columns: &[Vector]) -> Result<Self> {
        let rows = columns
            .first()
            .map(Vector::len)
            .ok_or_else(|| EigenfacesError::InvalidArgument("No columns supplied.".into()))?;
        let mut m = Self::zeros(rows, columns.len());
        for (j, col) in columns.iter().enumerate() {
            m.set_column(j, col)?;
        }
        Ok(m)
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn into_array(self) -> Array2<f64> {
        self.data
    }

    fn check_column_index(&self, j: usize, limit: usize) -> Result<()> {
        if j >= limit {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Column index {} out of range for a matrix with {} columns.",
                j,
                self.cols()
            )));
        }
        Ok(())
    }

    fn check_column_len(&self, column: &Vector) -> Result<()> {
        if column.len() != self.rows() {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Column of length {} does not fit a matrix with {} rows.",
                column.len(),
                self.rows()
            )));
        }
        Ok(())
    }

    /// Copies column `j` out as a `Vector`.
    pub fn column(&self, j: usize) -> Result<Vector> {
        self.check_column_index(j, self.cols())?;
        Vector::try_from(self.data.column(j).to_owned())
    }

    /// Replaces column `j`.
    pub fn set_column(&mut self, j: usize, column: &Vector) -> Result<()> {
        self.check_column_index(j, self.cols())?;
        self.check_column_len(column)?;
        self.data.column_mut(j).assign(column.as_array());
        Ok(())
    }

    /// Inserts `column` before index `j` (`j == cols()` appends), growing the
    /// column count by one. A matrix without columns adopts the column's length.
    pub fn insert_column(&mut self, j: usize, column: &Vector) -> Result<()> {
        self.check_column_index(j, self.cols() + 1)?;
        let cols = self.cols();
        let rows = if cols == 0 {
            column.len()
        } else {
            self.check_column_len(column)?;
            self.rows()
        };
        let mut grown = Array2::zeros((rows, cols + 1).f());
        if cols > 0 {
            grown.slice_mut(s![.., ..j]).assign(&self.data.slice(s![.., ..j]));
            grown
                .slice_mut(s![.., j + 1..])
                .assign(&self.data.slice(s![.., j..]));
        }
        grown.column_mut(j).assign(column.as_array());
        self.data = grown;
        Ok(())
    }

    /// Resizes to `rows` x `cols`, keeping the overlapping top-left block and
    /// zero-filling anything new.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        if rows == self.rows() && cols == self.cols() {
            return;
        }
        let keep_rows = rows.min(self.rows());
        let keep_cols = cols.min(self.cols());
        let mut resized = Array2::zeros((rows, cols).f());
        resized
            .slice_mut(s![..keep_rows, ..keep_cols])
            .assign(&self.data.slice(s![..keep_rows, ..keep_cols]));
        self.data = resized;
    }

    /// Per-row mean across all columns (the "mean column"), accumulated left to right.
    ///
    /// # Errors
    /// `InvalidArgument` if the matrix has no rows or no columns.
    pub fn mean_column(&self) -> Result<Vector> {
        if self.cols() == 0 || self.rows() == 0 {
            return Err(EigenfacesError::InvalidArgument(
                "Cannot take the mean column of an empty matrix.".into(),
            ));
        }
        let n = self.cols() as f64;
        let mut mean = Vector::zeros(self.rows())?;
        for (r, row) in self.data.axis_iter(Axis(0)).enumerate() {
            mean[r] = row.iter().fold(0.0, |acc, v| acc + v) / n;
        }
        Ok(mean)
    }

    pub fn transpose(&self) -> Matrix {
        Matrix::from_array(self.data.t().to_owned())
    }

    /// Matrix product `self * rhs`.
    ///
    /// # Errors
    /// `InvalidArgument` if `self.cols() != rhs.rows()`.
    pub fn dot(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols() != rhs.rows() {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Cannot multiply a {}x{} matrix by a {}x{} matrix.",
                self.rows(),
                self.cols(),
                rhs.rows(),
                rhs.cols()
            )));
        }
        Ok(Matrix::from_array(self.data.dot(&rhs.data)))
    }

    /// In-place product: `self = self * rhs`.
    pub fn mul_assign_matrix(&mut self, rhs: &Matrix) -> Result<()> {
        *self = self.dot(rhs)?;
        Ok(())
    }

    /// Gathers the given columns, in order, into a new matrix.
    pub fn select_columns(&self, indices: &[usize]) -> Result<Matrix> {
        for &j in indices {
            self.check_column_index(j, self.cols())?;
        }
        Ok(Matrix::from_array(self.data.select(Axis(1), indices)))
    }

    /// Symmetric eigendecomposition through `backend`.
    ///
    /// Returns the eigenvalues and a matrix holding one eigenvector per
    /// column. No ordering is imposed here.
    ///
    /// # Errors
    /// `InvalidArgument` for a non-square or empty matrix, `ComputationFailure`
    /// when the backend reports an error (e.g. the iteration did not converge).
    pub fn symmetric_eigen<B: BackendEigh<f64>>(&self, backend: &B) -> Result<(Vector, Matrix)> {
        if self.rows() != self.cols() || self.rows() == 0 {
            return Err(EigenfacesError::InvalidArgument(format!(
                "Symmetric eigendecomposition needs a non-empty square matrix, got {}x{}.",
                self.rows(),
                self.cols()
            )));
        }
        trace!("Running symmetric eigendecomposition on a {}x{} matrix", self.rows(), self.cols());
        let out = backend.eigh_upper(&self.data).map_err(|e| {
            EigenfacesError::ComputationFailure(format!(
                "Symmetric eigendecomposition of a {}x{} matrix failed: {}",
                self.rows(),
                self.cols(),
                e
            ))
        })?;
        if out.eigenvalues.len() != self.rows() || out.eigenvectors.dim() != self.data.dim() {
            return Err(EigenfacesError::ComputationFailure(format!(
                "Backend returned {} eigenvalues and a {:?} eigenvector matrix for a {}x{} input.",
                out.eigenvalues.len(),
                out.eigenvectors.dim(),
                self.rows(),
                self.cols()
            )));
        }
        Ok((Vector::try_from(out.eigenvalues)?, Matrix::from_array(out.eigenvectors)))
    }

    // --- Binary I/O ---

    /// Writes `[rows: u64][cols: u64][rows*cols x f64, column-major]`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        binary_io::write_u64(writer, self.rows() as u64)?;
        binary_io::write_u64(writer, self.cols() as u64)?;
        // The transpose of a column-major buffer is a standard-layout view
        // over the same memory.
        let transposed = self.data.t();
        match transposed.as_slice() {
            Some(values) => binary_io::write_f64s(writer, values)?,
            None => {
                let values: Vec<f64> = transposed.iter().copied().collect();
                binary_io::write_f64s(writer, &values)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let rows = binary_io::read_dimension(reader)?;
        let cols = binary_io::read_dimension(reader)?;
        let count = rows.checked_mul(cols).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("matrix dimensions {}x{} overflow", rows, cols),
            )
        })?;
        let values = binary_io::read_f64s(reader, count)?;
        let data = Array2::from_shape_vec((rows, cols).f(), values)
            .map_err(|e| EigenfacesError::InvalidArgument(format!("Bad matrix shape: {}", e)))?;
        Ok(Self { data })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        Self::read_from(&mut reader)
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[[r, c]]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[[r, c]]
    }
}

impl MulAssign<f64> for Matrix {
    fn mul_assign(&mut self, s: f64) {
        self.data.mapv_inplace(|v| v * s);
    }
}

impl DivAssign<f64> for Matrix {
    fn div_assign(&mut self, s: f64) {
        self.data.mapv_inplace(|v| v / s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg_backends::LinAlgBackendProvider;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::io::Cursor;

    fn v(values: &[f64]) -> Vector {
        Vector::from_vec(values.to_vec()).unwrap()
    }

    fn sample() -> Matrix {
        // 3 x 2, columns (1,2,3) and (4,5,6)
        Matrix::from_columns(&[v(&[1.0, 2.0, 3.0]), v(&[4.0, 5.0, 6.0])]).unwrap()
    }

    #[test]
    fn test_storage_is_column_major() {
        let m = Matrix::from_array(array![[1.0, 2.0], [3.0, 4.0]]);
        assert!(m.as_array().t().is_standard_layout());
        assert!(m.transpose().as_array().t().is_standard_layout());
        assert!(m.dot(&m).unwrap().as_array().t().is_standard_layout());
    }

    #[test]
    fn test_column_access() {
        let mut m = sample();
        assert_eq!(m.column(1).unwrap(), v(&[4.0, 5.0, 6.0]));
        m.set_column(0, &v(&[7.0, 8.0, 9.0])).unwrap();
        assert_eq!(m[(2, 0)], 9.0);
        assert!(matches!(m.column(2), Err(EigenfacesError::InvalidArgument(_))));
        assert!(matches!(
            m.set_column(0, &v(&[1.0])),
            Err(EigenfacesError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_insert_column() {
        let mut m = sample();
        m.insert_column(1, &v(&[0.0, 0.5, 1.0])).unwrap();
        assert_eq!(m.cols(), 3);
        assert_eq!(m.column(0).unwrap(), v(&[1.0, 2.0, 3.0]));
        assert_eq!(m.column(1).unwrap(), v(&[0.0, 0.5, 1.0]));
        assert_eq!(m.column(2).unwrap(), v(&[4.0, 5.0, 6.0]));
        m.insert_column(3, &v(&[-1.0, -2.0, -3.0])).unwrap();
        assert_eq!(m.column(3).unwrap(), v(&[-1.0, -2.0, -3.0]));
        assert!(m.insert_column(5, &v(&[0.0, 0.0, 0.0])).is_err());

        let mut empty = Matrix::zeros(0, 0);
        empty.insert_column(0, &v(&[1.0, 2.0])).unwrap();
        assert_eq!((empty.rows(), empty.cols()), (2, 1));
    }

    #[test]
    fn test_resize_keeps_leading_columns() {
        let mut m = sample();
        m.resize(3, 4);
        assert_eq!(m.column(1).unwrap(), v(&[4.0, 5.0, 6.0]));
        assert_eq!(m.column(3).unwrap(), v(&[0.0, 0.0, 0.0]));
        m.resize(3, 1);
        assert_eq!(m.cols(), 1);
        assert_eq!(m.column(0).unwrap(), v(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_mean_column() {
        assert_eq!(sample().mean_column().unwrap(), v(&[2.5, 3.5, 4.5]));
        assert!(Matrix::zeros(3, 0).mean_column().is_err());
    }

    #[test]
    fn test_transpose_product_is_small_square() {
        let a = sample(); // 3 x 2
        let mut c = a.transpose();
        c.mul_assign_matrix(&a).unwrap();
        assert_eq!((c.rows(), c.cols()), (2, 2));
        assert_eq!(c[(0, 0)], 14.0);
        assert_eq!(c[(0, 1)], 32.0);
        assert_eq!(c[(1, 0)], 32.0);
        assert_eq!(c[(1, 1)], 77.0);
        c /= 2.0;
        assert_eq!(c[(1, 1)], 38.5);
        c *= 2.0;
        assert_eq!(c[(1, 1)], 77.0);
        assert!(a.dot(&a).is_err());
    }

    #[test]
    fn test_select_columns() {
        let m = sample();
        let swapped = m.select_columns(&[1, 0]).unwrap();
        assert_eq!(swapped.column(0).unwrap(), m.column(1).unwrap());
        assert_eq!(swapped.column(1).unwrap(), m.column(0).unwrap());
        assert!(m.select_columns(&[2]).is_err());
    }

    #[test]
    fn test_symmetric_eigen() {
        let m = Matrix::from_array(array![[2.0, 1.0, 0.0], [1.0, 2.0, 0.0], [0.0, 0.0, 5.0]]);
        let (values, vectors) = m.symmetric_eigen(&LinAlgBackendProvider::new()).unwrap();
        assert_eq!(values.len(), 3);
        for i in 0..3 {
            let col = vectors.column(i).unwrap();
            assert_abs_diff_eq!(col.magnitude(), 1.0, epsilon = 1e-12);
            let av = m.as_array().dot(col.as_array());
            for r in 0..3 {
                assert_abs_diff_eq!(av[r], values[i] * col[r], epsilon = 1e-12);
            }
        }
        let mut sorted = values.as_slice().to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_abs_diff_eq!(sorted[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sorted[1], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sorted[2], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_symmetric_eigen_rejects_non_square() {
        let result = sample().symmetric_eigen(&LinAlgBackendProvider::new());
        assert!(matches!(result, Err(EigenfacesError::InvalidArgument(_))));
    }

    #[test]
    fn test_binary_layout_is_column_major() {
        let m = sample();
        let mut buf = Vec::new();
        m.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 16 + 6 * 8);
        assert_eq!(&buf[..8], &3u64.to_ne_bytes());
        assert_eq!(&buf[8..16], &2u64.to_ne_bytes());
        let payload: Vec<f64> = buf[16..]
            .chunks_exact(8)
            .map(|c| f64::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(payload, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(Matrix::read_from(&mut Cursor::new(buf)).unwrap(), m);
    }

    #[test]
    fn test_truncated_read_fails() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 4);
        assert!(matches!(
            Matrix::read_from(&mut Cursor::new(buf)),
            Err(EigenfacesError::Io(_))
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");
        let m = sample();
        m.save(&path).unwrap();
        assert_eq!(Matrix::load(&path).unwrap(), m);
    }
}
