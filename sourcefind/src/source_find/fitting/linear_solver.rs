//! Dense solver for the small normal-equation systems of the fitters.

/// Pivots smaller than this fraction of the largest matrix entry count as zero.
const RELATIVE_PIVOT_TOLERANCE: f64 = 1e-14;

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` if the matrix is singular or not finite.
#[allow(clippy::needless_range_loop)]
pub fn solve<const N: usize>(a: &[[f64; N]; N], b: &[f64; N]) -> Option<[f64; N]> {
    let mut matrix = *a;
    let mut rhs = *b;

    let scale = matrix
        .iter()
        .flatten()
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if !scale.is_finite() || scale == 0.0 {
        return None;
    }
    let tolerance = scale * RELATIVE_PIVOT_TOLERANCE;

    for col in 0..N {
        let pivot_row = (col..N)
            .max_by(|&i, &j| matrix[i][col].abs().total_cmp(&matrix[j][col].abs()))
            .unwrap_or(col);
        if matrix[pivot_row][col].abs() <= tolerance {
            return None;
        }
        if pivot_row != col {
            matrix.swap(col, pivot_row);
            rhs.swap(col, pivot_row);
        }

        let pivot = matrix[col];
        for row in (col + 1)..N {
            let factor = matrix[row][col] / pivot[col];
            if factor == 0.0 {
                continue;
            }
            for j in col..N {
                matrix[row][j] -= factor * pivot[j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        let tail: f64 = (i + 1..N).map(|j| matrix[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / matrix[i][i];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}
