//! Small dense linear algebra for the closed-form models and the GP surrogate

use ndarray::{s, Array1, Array2, ArrayView1};

use crate::{FlashError, Result};

/// Lower-triangular Cholesky factor of a symmetric positive definite matrix
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let sum = a[[i, j]] - l.row(i).slice(s![..j]).dot(&l.row(j).slice(s![..j]));
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    Some(l)
}

/// Solve L y = b (forward substitution)
pub fn forward_substitute(l: &Array2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum = b[i] - l.row(i).slice(s![..i]).dot(&y.slice(s![..i]));
        y[i] = sum / l[[i, i]];
    }
    y
}

/// Solve Lᵀ x = y (back substitution)
pub fn back_substitute(l: &Array2<f64>, y: ArrayView1<f64>) -> Array1<f64> {
    let n = y.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum = y[i] - l.column(i).slice(s![i + 1..]).dot(&x.slice(s![i + 1..]));
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve A x = b for SPD A, adding diagonal jitter if the factorization fails
pub fn solve_spd(a: &Array2<f64>, b: ArrayView1<f64>) -> Result<Array1<f64>> {
    let mut jitter = 0.0;
    for _ in 0..6 {
        let m = a + &(Array2::<f64>::eye(a.nrows()) * jitter);
        if let Some(l) = cholesky(&m) {
            let y = forward_substitute(&l, b);
            return Ok(back_substitute(&l, y.view()));
        }
        jitter = if jitter == 0.0 { 1e-10 } else { jitter * 100.0 };
    }
    Err(FlashError::Numerical(
        "matrix is not positive definite".to_string(),
    ))
}

/// Row-major rows as a matrix; rows must share one length
pub fn to_matrix(rows: &[Vec<f64>]) -> Array2<f64> {
    let dim = rows.first().map_or(0, |r| r.len());
    Array2::from_shape_fn((rows.len(), dim), |(i, j)| rows[i][j])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_solve_spd() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let x = solve_spd(&a, array![2.0, 1.0].view()).unwrap();
        // 4x + 2y = 2, 2x + 3y = 1 -> x = 0.5, y = 0
        assert!((x[0] - 0.5).abs() < 1e-12);
        assert!(x[1].abs() < 1e-12);
    }

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 3.0, 0.5], [0.4, 0.5, 2.0]];
        let l = cholesky(&a).unwrap();
        let back = l.dot(&l.t());
        for (x, y) in back.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(cholesky(&a).is_none());
        assert!(solve_spd(&a, array![1.0, 1.0].view()).is_err());
    }

    #[test]
    fn test_to_matrix_shape() {
        let m = to_matrix(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
        assert_eq!(m.dim(), (3, 2));
        assert_eq!(m[[2, 1]], 6.0);
        assert_eq!(to_matrix(&[]).dim(), (0, 0));
    }
}
