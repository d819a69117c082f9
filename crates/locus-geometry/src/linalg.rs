//! Small dense linear algebra.
//!
//! [`Matrix`] is a row-major `f64` matrix sized for the handful of shapes the
//! localization engine needs: 2×2 and 3×3 systems, and the N×3 Jacobian with
//! its 3×N transpose.  Every shape-dependent operation checks its operands
//! and reports [`LocalizationError::DimensionMismatch`] instead of panicking.
//!
//! # Example
//!
//! ```rust
//! use locus_geometry::linalg::Matrix;
//!
//! let a = Matrix::from_rows(&[[2.0, 0.0], [0.0, 4.0]]);
//! let x = a.solve(&[2.0, 2.0]).unwrap();
//! assert!((x[0] - 1.0).abs() < 1e-12);
//! assert!((x[1] - 0.5).abs() < 1e-12);
//! ```

use std::ops::{Index, IndexMut};

use crate::error::LocalizationError;

/// Determinants with a magnitude below this are treated as zero.
pub const DETERMINANT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Build a matrix from row-major `data`.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, LocalizationError> {
        if data.len() != rows * cols {
            return Err(LocalizationError::DimensionMismatch {
                operation: "new",
                left: (rows, cols),
                right: (data.len(), 1),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build a matrix from fixed-width rows.
    pub fn from_rows<const C: usize>(rows: &[[f64; C]]) -> Self {
        Self {
            rows: rows.len(),
            cols: C,
            data: rows.iter().flatten().copied().collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn transpose(&self) -> Self {
        let mut out = Self::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out[(c, r)] = self[(r, c)];
            }
        }
        out
    }

    /// Matrix product `self · rhs`.
    pub fn mul(&self, rhs: &Matrix) -> Result<Matrix, LocalizationError> {
        if self.cols != rhs.rows {
            return Err(LocalizationError::DimensionMismatch {
                operation: "multiply",
                left: self.shape(),
                right: rhs.shape(),
            });
        }
        let mut out = Self::zeros(self.rows, rhs.cols);
        for r in 0..self.rows {
            for c in 0..rhs.cols {
                out[(r, c)] = (0..self.cols).map(|k| self[(r, k)] * rhs[(k, c)]).sum::<f64>();
            }
        }
        Ok(out)
    }

    /// Matrix-vector product `self · v`.
    pub fn mul_vec(&self, v: &[f64]) -> Result<Vec<f64>, LocalizationError> {
        if self.cols != v.len() {
            return Err(LocalizationError::DimensionMismatch {
                operation: "multiply",
                left: self.shape(),
                right: (v.len(), 1),
            });
        }
        Ok((0..self.rows)
            .map(|r| (0..self.cols).map(|c| self[(r, c)] * v[c]).sum::<f64>())
            .collect())
    }

    /// Determinant of a 2×2 or 3×3 matrix.
    pub fn determinant(&self) -> Result<f64, LocalizationError> {
        let m = |r: usize, c: usize| self[(r, c)];
        match self.shape() {
            (2, 2) => Ok(m(0, 0) * m(1, 1) - m(0, 1) * m(1, 0)),
            (3, 3) => Ok(m(0, 0) * (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1))
                - m(0, 1) * (m(1, 0) * m(2, 2) - m(1, 2) * m(2, 0))
                + m(0, 2) * (m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0))),
            shape => Err(LocalizationError::DimensionMismatch {
                operation: "determinant",
                left: shape,
                right: (3, 3),
            }),
        }
    }

    /// Inverse of a 2×2 or 3×3 matrix via the adjugate.
    ///
    /// Fails with [`LocalizationError::SingularMatrix`] when
    /// `|det| < DETERMINANT_EPSILON`.
    pub fn invert(&self) -> Result<Matrix, LocalizationError> {
        let det = self.determinant()?;
        if !det.is_finite() || det.abs() < DETERMINANT_EPSILON {
            return Err(LocalizationError::SingularMatrix { determinant: det });
        }
        let m = |r: usize, c: usize| self[(r, c)];
        let adjugate = match self.rows {
            2 => Matrix::from_rows(&[[m(1, 1), -m(0, 1)], [-m(1, 0), m(0, 0)]]),
            _ => {
                let mut adj = Matrix::zeros(3, 3);
                for r in 0..3 {
                    for c in 0..3 {
                        // Cofactor of (c, r), i.e. already transposed.
                        let (r0, r1) = others(c);
                        let (c0, c1) = others(r);
                        let minor = m(r0, c0) * m(r1, c1) - m(r0, c1) * m(r1, c0);
                        adj[(r, c)] = if (r + c) % 2 == 0 { minor } else { -minor };
                    }
                }
                adj
            }
        };
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data: adjugate.data.iter().map(|v| v / det).collect(),
        })
    }

    /// Solve `self · x = b` for a 2×2 or 3×3 system.
    pub fn solve(&self, b: &[f64]) -> Result<Vec<f64>, LocalizationError> {
        self.invert()?.mul_vec(b)
    }

    /// The leading `n`×`n` block.
    pub fn top_left(&self, n: usize) -> Result<Matrix, LocalizationError> {
        if n > self.rows || n > self.cols {
            return Err(LocalizationError::DimensionMismatch {
                operation: "top_left",
                left: self.shape(),
                right: (n, n),
            });
        }
        let mut out = Matrix::zeros(n, n);
        for r in 0..n {
            for c in 0..n {
                out[(r, c)] = self[(r, c)];
            }
        }
        Ok(out)
    }
}

/// The two indices of `0..3` other than `i`, ascending.
fn others(i: usize) -> (usize, usize) {
    match i {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        assert!(r < self.rows && c < self.cols, "matrix index out of bounds");
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        assert!(r < self.rows && c < self.cols, "matrix index out of bounds");
        &mut self.data[r * self.cols + c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &Matrix, b: &Matrix) {
        assert_eq!(a.shape(), b.shape());
        for r in 0..a.rows() {
            for c in 0..a.cols() {
                assert!(
                    (a[(r, c)] - b[(r, c)]).abs() < 1e-9,
                    "({r},{c}): {} vs {}",
                    a[(r, c)],
                    b[(r, c)]
                );
            }
        }
    }

    fn identity(n: usize) -> Matrix {
        let mut m = Matrix::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    #[test]
    fn new_checks_data_length() {
        assert!(Matrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).is_ok());
        let err = Matrix::new(2, 2, vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, LocalizationError::DimensionMismatch { operation: "new", .. }));
    }

    #[test]
    fn transpose_swaps_shape() {
        let j = Matrix::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let t = j.transpose();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t[(2, 0)], 3.0);
        assert_eq!(t[(0, 1)], 4.0);
    }

    #[test]
    fn multiply_normal_equations_shape() {
        // 4×3 Jacobian → JᵀJ is 3×3.
        let j = Matrix::from_rows(&[
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
        ]);
        let h = j.transpose().mul(&j).unwrap();
        assert_eq!(h.shape(), (3, 3));
        assert_eq!(h[(0, 0)], 2.0);
        assert_eq!(h[(0, 1)], 1.0);
    }

    #[test]
    fn multiply_rejects_mismatched_shapes() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        let err = a.mul(&b).unwrap_err();
        assert_eq!(
            err,
            LocalizationError::DimensionMismatch {
                operation: "multiply",
                left: (2, 3),
                right: (2, 3),
            }
        );
        assert!(a.mul_vec(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn invert_2x2() {
        let a = Matrix::from_rows(&[[4.0, 7.0], [2.0, 6.0]]);
        let inv = a.invert().unwrap();
        assert_close(&a.mul(&inv).unwrap(), &identity(2));
    }

    #[test]
    fn invert_3x3() {
        let a = Matrix::from_rows(&[[2.0, -1.0, 0.0], [-1.0, 2.0, -1.0], [0.0, -1.0, 2.0]]);
        let inv = a.invert().unwrap();
        assert_close(&a.mul(&inv).unwrap(), &identity(3));
        assert_close(&inv.mul(&a).unwrap(), &identity(3));
    }

    #[test]
    fn invert_singular_is_an_error() {
        let a = Matrix::from_rows(&[[1.0, 2.0], [2.0, 4.0]]);
        assert!(matches!(a.invert(), Err(LocalizationError::SingularMatrix { .. })));

        let b = Matrix::from_rows(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1e-12]]);
        assert!(matches!(b.invert(), Err(LocalizationError::SingularMatrix { .. })));
    }

    #[test]
    fn invert_unsupported_shape() {
        assert!(matches!(
            Matrix::zeros(4, 4).invert(),
            Err(LocalizationError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            Matrix::zeros(2, 3).invert(),
            Err(LocalizationError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn solve_3x3_system() {
        let a = Matrix::from_rows(&[[3.0, 2.0, -1.0], [2.0, -2.0, 4.0], [-1.0, 0.5, -1.0]]);
        let x = a.solve(&[1.0, -2.0, 0.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-9);
        assert!((x[1] + 2.0).abs() < 1e-9);
        assert!((x[2] + 2.0).abs() < 1e-9);
    }

    #[test]
    fn top_left_block() {
        let a = Matrix::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let b = a.top_left(2).unwrap();
        assert_eq!(b, Matrix::from_rows(&[[1.0, 2.0], [4.0, 5.0]]));
        assert!(a.top_left(4).is_err());
    }
}
