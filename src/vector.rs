// src/vector.rs

use crate::binary_io;
use crate::error::{EigenfacesError, Result};
use crate::matrix::Matrix;
use float_cmp::{ApproxEq, F64Margin};
use ndarray::{s, Array1};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::ops::{Add, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Sub};
use std::path::Path;
use std::str::FromStr;

/// Fixed-length dense vector of `f64`.
///
/// The length is at least one and only changes through [`Vector::resize`].
/// Operations combining two vectors return `InvalidArgument` when the
/// lengths differ.
///
/// Reductions (`dot`, `magnitude`, `mean`) accumulate strictly left to right
/// so results are reproducible bit for bit.
#[derive(Clone, Debug, PartialEq)]
pub struct Vector {
    data: Array1<f64>,
}

impl Vector {
    /// Creates a vector of `len` zeros.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `len` is zero.
    pub fn zeros(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(EigenfacesError::InvalidArgument(
                "A vector must have at least one element.".into(),
            ));
        }
        Ok(Self { data: Array1::zeros(len) })
    }

    /// Takes ownership of `values`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `values` is empty.
    pub fn from_vec(values: Vec<f64>) -> Result<Self> {
        Self::try_from(Array1::from_vec(values))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`; kept for API symmetry with std collections.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_array(&self) -> &Array1<f64> {
        &self.data
    }

    pub fn into_array(self) -> Array1<f64> {
        self.data
    }

    /// Elements in order.
    ///
    /// # Panics
    /// Never: every constructor stores a freshly owned, standard-layout
    /// `Array1`, and no method hands out a strided view of it.
    pub fn as_slice(&self) -> &[f64] {
        self.data
            .as_slice()
            .expect("Vector storage is always standard layout")
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> + '_ {
        self.data.iter()
    }

    /// Sets every element to zero.
    pub fn zero(&mut self) -> &mut Self {
        self.data.fill(0.0);
        self
    }

    /// Changes the length, keeping the common prefix and zero-filling new slots.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `len` is zero.
    pub fn resize(&mut self, len: usize) -> Result<&mut Self> {
        let mut resized = Self::zeros(len)?;
        let common = len.min(self.len());
        resized
            .data
            .slice_mut(s![..common])
            .assign(&self.data.slice(s![..common]));
        *self = resized;
        Ok(self)
    }

    /// Dot product, accumulated left to right.
    ///
    /// # Errors
    /// `InvalidArgument` if the lengths differ.
    pub fn dot(&self, other: &Vector) -> Result<f64> {
        check_same_len(self, other, "dot product")?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .fold(0.0, |acc, (a, b)| acc + a * b))
    }

    /// Elementwise `self += rhs`. On a length mismatch `self` is untouched.
    pub fn try_add_assign(&mut self, rhs: &Vector) -> Result<&mut Self> {
        check_same_len(self, rhs, "addition")?;
        self.data += &rhs.data;
        Ok(self)
    }

    /// Elementwise `self -= rhs`. On a length mismatch `self` is untouched.
    pub fn try_sub_assign(&mut self, rhs: &Vector) -> Result<&mut Self> {
        check_same_len(self, rhs, "subtraction")?;
        self.data -= &rhs.data;
        Ok(self)
    }

    /// Euclidean norm.
    pub fn magnitude(&self) -> f64 {
        self.data.iter().fold(0.0, |acc, v| acc + v * v).sqrt()
    }

    pub fn mean(&self) -> f64 {
        self.data.iter().fold(0.0, |acc, v| acc + v) / self.len() as f64
    }

    pub fn min(&self) -> f64 {
        self.data[self.min_position()]
    }

    pub fn max(&self) -> f64 {
        self.data[self.max_position()]
    }

    /// Index of the smallest element; the first one wins on ties.
    pub fn min_position(&self) -> usize {
        let mut pos = 0;
        for (i, &v) in self.data.iter().enumerate().skip(1) {
            if self.data[pos] > v {
                pos = i;
            }
        }
        pos
    }

    /// Index of the largest element; the first one wins on ties.
    pub fn max_position(&self) -> usize {
        let mut pos = 0;
        for (i, &v) in self.data.iter().enumerate().skip(1) {
            if self.data[pos] < v {
                pos = i;
            }
        }
        pos
    }

    /// Elementwise comparison within `margin` (`(epsilon, ulps)` or an `F64Margin`).
    /// Vectors of different length are never equal.
    pub fn approx_eq(&self, other: &Vector, margin: impl Into<F64Margin>) -> bool {
        let margin = margin.into();
        self.len() == other.len()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(&a, &b)| a.approx_eq(b, margin))
    }

    /// Square matrix with this vector on its diagonal.
    pub fn diagonal_matrix(&self) -> Matrix {
        let n = self.len();
        let mut m = Matrix::zeros(n, n);
        for (i, &v) in self.data.iter().enumerate() {
            m[(i, i)] = v;
        }
        m
    }

    /// Reads one `(n)[ ... ]` vector from a text stream, consuming input up to
    /// and including its closing `]` so later vectors can be read from the
    /// same stream. Returns `Ok(None)` once only whitespace remains.
    ///
    /// # Errors
    /// `Parse` for a malformed vector (its text is consumed), `Io` if the
    /// stream cannot be read.
    pub fn read_text<R: BufRead>(reader: &mut R) -> Result<Option<Self>> {
        let mut token = Vec::new();
        reader.read_until(b']', &mut token)?;
        if token.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let text = std::str::from_utf8(&token)
            .map_err(|e| parse_error(format!("vector text is not valid UTF-8: {}", e)))?;
        text.parse().map(Some)
    }

    // --- Binary I/O ---

    /// Writes `[len: u64][len x f64]` in native byte order.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        binary_io::write_u64(writer, self.len() as u64)?;
        binary_io::write_f64s(writer, self.as_slice())?;
        Ok(())
    }

    /// Reads a vector written by [`Vector::write_to`].
    ///
    /// # Errors
    /// `Io` on truncated input, `InvalidArgument` for a zero length field.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let len = binary_io::read_dimension(reader)?;
        let values = binary_io::read_f64s(reader, len)?;
        Self::from_vec(values)
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

fn check_same_len(a: &Vector, b: &Vector, what: &str) -> Result<()> {
    if a.len() != b.len() {
        return Err(EigenfacesError::InvalidArgument(format!(
            "Vector length mismatch in {}: {} vs {}.",
            what,
            a.len(),
            b.len()
        )));
    }
    Ok(())
}

impl TryFrom<Array1<f64>> for Vector {
    type Error = EigenfacesError;

    fn try_from(data: Array1<f64>) -> Result<Self> {
        if data.is_empty() {
            return Err(EigenfacesError::InvalidArgument(
                "A vector must have at least one element.".into(),
            ));
        }
        // Re-own through to_vec so the buffer is always standard layout.
        if data.as_slice().is_some() {
            Ok(Self { data })
        } else {
            Ok(Self { data: Array1::from_vec(data.to_vec()) })
        }
    }
}

impl TryFrom<Vec<f64>> for Vector {
    type Error = EigenfacesError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::from_vec(values)
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.data[i]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.data[i]
    }
}

// --- Arithmetic ---

impl MulAssign<f64> for Vector {
    fn mul_assign(&mut self, s: f64) {
        self.data.mapv_inplace(|v| v * s);
    }
}

impl DivAssign<f64> for Vector {
    fn div_assign(&mut self, s: f64) {
        self.data.mapv_inplace(|v| v / s);
    }
}

// Vector/vector operators can fail on a length mismatch, so they yield a
// `Result` instead of panicking.
impl Add<&Vector> for &Vector {
    type Output = Result<Vector>;

    fn add(self, rhs: &Vector) -> Result<Vector> {
        let mut out = self.clone();
        out.try_add_assign(rhs)?;
        Ok(out)
    }
}

impl Sub<&Vector> for &Vector {
    type Output = Result<Vector>;

    fn sub(self, rhs: &Vector) -> Result<Vector> {
        let mut out = self.clone();
        out.try_sub_assign(rhs)?;
        Ok(out)
    }
}

impl Mul<f64> for &Vector {
    type Output = Vector;

    fn mul(self, s: f64) -> Vector {
        Vector { data: self.data.mapv(|v| s * v) }
    }
}

impl Mul<&Vector> for f64 {
    type Output = Vector;

    fn mul(self, v: &Vector) -> Vector {
        v * self
    }
}

impl Div<f64> for &Vector {
    type Output = Vector;

    fn div(self, s: f64) -> Vector {
        Vector { data: self.data.mapv(|v| v / s) }
    }
}

// --- Text I/O ---

/// Renders `(<n>)[ v0 v1 ... ]` using the shortest representation that
/// parses back to the same `f64`.
impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})[ ", self.len())?;
        for v in self.data.iter() {
            write!(f, "{} ", v)?;
        }
        write!(f, "]")
    }
}

fn parse_error(msg: impl Into<String>) -> EigenfacesError {
    EigenfacesError::Parse(msg.into())
}

/// Parses the `Display` format. On failure nothing is consumed from the
/// caller's point of view: an error is returned and no partial vector exists.
impl FromStr for Vector {
    type Err = EigenfacesError;

    fn from_str(text: &str) -> Result<Self> {
        let rest = text
            .trim_start()
            .strip_prefix('(')
            .ok_or_else(|| parse_error("expected '(' before the vector length"))?;
        let (len_text, rest) = rest
            .split_once(')')
            .ok_or_else(|| parse_error("expected ')' after the vector length"))?;
        let len: usize = len_text
            .trim()
            .parse()
            .map_err(|e| parse_error(format!("invalid vector length '{}': {}", len_text.trim(), e)))?;
        let rest = rest
            .trim_start()
            .strip_prefix('[')
            .ok_or_else(|| parse_error("expected '[' before the vector elements"))?;
        let (body, tail) = rest
            .split_once(']')
            .ok_or_else(|| parse_error("expected ']' after the vector elements"))?;
        if !tail.trim().is_empty() {
            return Err(parse_error(format!("unexpected trailing input '{}'", tail.trim())));
        }

        let values = body
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|e| parse_error(format!("invalid element '{}': {}", token, e)))
            })
            .collect::<Result<Vec<f64>>>()?;
        if values.len() != len {
            return Err(parse_error(format!(
                "declared length {} but found {} elements",
                len,
                values.len()
            )));
        }
        Self::from_vec(values).map_err(|_| parse_error("a vector must have at least one element"))
    }
}
