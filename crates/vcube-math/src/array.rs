//! `Array` — a one-dimensional vector of reals.
//!
//! Thin newtype around `nalgebra::DVector<f64>` exposing only what the
//! optimization and calibration code needs.

use nalgebra::DVector;
use std::ops::{Add, Div, Index, IndexMut, Mul, Sub};
use vcube_core::Real;

/// A dynamically-sized 1D vector of `Real` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Array(DVector<Real>);

impl Array {
    /// Create a zero-filled array of length `n`.
    pub fn zeros(n: usize) -> Self {
        Self(DVector::zeros(n))
    }

    /// Create an array from a slice.
    pub fn from_slice(data: &[Real]) -> Self {
        Self(DVector::from_column_slice(data))
    }

    /// Create an array from a `Vec`.
    pub fn from_vec(data: Vec<Real>) -> Self {
        Self(DVector::from_vec(data))
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Return `true` if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the elements as a slice.
    pub fn as_slice(&self) -> &[Real] {
        self.0.as_slice()
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> Real {
        self.0.norm()
    }

    /// Squared Euclidean norm.
    pub fn norm_squared(&self) -> Real {
        self.0.norm_squared()
    }

    /// Iterator over elements.
    pub fn iter(&self) -> impl Iterator<Item = &Real> {
        self.0.iter()
    }
}

impl From<Vec<Real>> for Array {
    fn from(v: Vec<Real>) -> Self {
        Self::from_vec(v)
    }
}

impl Index<usize> for Array {
    type Output = Real;
    fn index(&self, i: usize) -> &Real {
        &self.0[i]
    }
}

impl IndexMut<usize> for Array {
    fn index_mut(&mut self, i: usize) -> &mut Real {
        &mut self.0[i]
    }
}

impl Add for &Array {
    type Output = Array;
    fn add(self, rhs: &Array) -> Array {
        Array(&self.0 + &rhs.0)
    }
}

impl Sub for &Array {
    type Output = Array;
    fn sub(self, rhs: &Array) -> Array {
        Array(&self.0 - &rhs.0)
    }
}

impl Mul<Real> for &Array {
    type Output = Array;
    fn mul(self, rhs: Real) -> Array {
        Array(&self.0 * rhs)
    }
}

impl Div<Real> for &Array {
    type Output = Array;
    fn div(self, rhs: Real) -> Array {
        Array(&self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_and_indexing() {
        let a = Array::from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(a.size(), 3);
        assert_eq!(a[1], 2.0);
        let z = Array::zeros(2);
        assert_eq!(z[0], 0.0);
    }

    #[test]
    fn arithmetic() {
        let a = Array::from_slice(&[1.0, 2.0]);
        let b = Array::from_slice(&[3.0, 5.0]);
        let s = &a + &b;
        assert_eq!(s[0], 4.0);
        let d = &b - &a;
        assert_eq!(d[1], 3.0);
        let m = &a * 2.0;
        assert_eq!(m[1], 4.0);
        let q = &b / 2.0;
        assert_eq!(q[0], 1.5);
    }

    #[test]
    fn norms() {
        let a = Array::from_slice(&[3.0, 4.0]);
        assert!((a.norm() - 5.0).abs() < 1e-12);
        assert!((a.norm_squared() - 25.0).abs() < 1e-12);
    }
}
