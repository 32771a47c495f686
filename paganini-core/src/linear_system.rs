use nalgebra::{DMatrix, DVector, SVD};

/// Wrapper around a dense square system matrix.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    pub matrix: DMatrix<f64>,
}

impl LinearSystem {
    pub fn from_matrix(matrix: DMatrix<f64>) -> Self {
        Self { matrix }
    }

    /// `I - J` for a square Jacobian `J`.
    pub fn identity_minus(jacobian: &DMatrix<f64>) -> Self {
        let n = jacobian.nrows();
        Self {
            matrix: DMatrix::identity(n, n) - jacobian,
        }
    }

    pub fn transpose(&self) -> Self {
        Self {
            matrix: self.matrix.transpose(),
        }
    }

    /// Solve `A x = b` by LU; `None` when singular or the solution is not finite.
    pub fn solve(&self, rhs: &DVector<f64>) -> Option<DVector<f64>> {
        let x = self.matrix.clone().lu().solve(rhs)?;
        x.iter().all(|v| v.is_finite()).then_some(x)
    }

    /// Solve `A X = B` column by column with a single factorization.
    pub fn solve_matrix(&self, rhs: &DMatrix<f64>) -> Option<DMatrix<f64>> {
        let x = self.matrix.clone().lu().solve(rhs)?;
        x.iter().all(|v| v.is_finite()).then_some(x)
    }

    /// Unit vector `u` minimizing `|A^T u|`: the left singular vector of the
    /// smallest singular value.
    pub fn left_null_vector(&self) -> Option<DVector<f64>> {
        if self.matrix.nrows() == 0 || self.matrix.ncols() == 0 {
            return None;
        }
        let svd = SVD::new(self.matrix.clone(), true, false);
        let u = svd.u?;
        let (idx, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        Some(u.column(idx).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn solves_small_system() {
        let sys = LinearSystem::from_matrix(DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]));
        let x = sys.solve(&DVector::from_vec(vec![3.0, 5.0])).unwrap();
        assert_abs_diff_eq!(x[0], 0.8, epsilon = 1e-14);
        assert_abs_diff_eq!(x[1], 1.4, epsilon = 1e-14);
    }

    #[test]
    fn singular_system_has_no_solution() {
        let sys = LinearSystem::from_matrix(DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]));
        assert!(sys.solve(&DVector::from_vec(vec![1.0, 0.0])).is_none());
    }

    #[test]
    fn left_null_vector_of_singular_iminus_j() {
        // J = [[0.5, 0.5], [0.5, 0.5]] has spectral radius 1
        let j = DMatrix::from_row_slice(2, 2, &[0.5, 0.5, 0.5, 0.5]);
        let sys = LinearSystem::identity_minus(&j);
        let u = sys.left_null_vector().unwrap();
        let residual = sys.matrix.transpose() * &u;
        assert_abs_diff_eq!(residual.amax(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(u.norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(u[0].abs(), u[1].abs(), epsilon = 1e-12);
    }

    #[test]
    fn matrix_solve_and_transpose() {
        let sys = LinearSystem::from_matrix(DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 1.0]));
        let x = sys.transpose().solve_matrix(&DMatrix::identity(2, 2)).unwrap();
        let back = sys.matrix.transpose() * x;
        assert_abs_diff_eq!((back - DMatrix::<f64>::identity(2, 2)).amax(), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn empty_system() {
        let sys = LinearSystem::identity_minus(&DMatrix::zeros(0, 0));
        assert!(sys.matrix.is_empty());
        assert!(sys.left_null_vector().is_none());
    }
}
