use faer::Mat;

pub type DenseMatrix = Mat<f64>;

const SINGULAR_PIVOT_EPSILON: f64 = 1.0e-300;
const ILL_CONDITIONED_RELATIVE_PIVOT_EPSILON: f64 = 1.0e-14;
const NORMAL_EQUATION_RIDGE: f64 = 1.0e-12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LuError {
    #[error("LU factorization requires a square matrix, got {rows}x{cols}")]
    NonSquareMatrix { rows: usize, cols: usize },
    #[error("LU factorization requires a non-empty matrix")]
    EmptyMatrix,
    #[error("matrix is singular at pivot index {pivot_index}")]
    SingularMatrix { pivot_index: usize },
    #[error("matrix is ill-conditioned at pivot index {pivot_index}")]
    IllConditionedMatrix { pivot_index: usize },
    #[error("right-hand side length mismatch: expected {expected}, got {actual}")]
    RhsLengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LuDecomposition {
    lu: DenseMatrix,
    pivots: Vec<usize>,
    input_norm_infty: f64,
}

impl LuDecomposition {
    pub fn dimension(&self) -> usize {
        self.lu.nrows()
    }

    pub fn invert(&self) -> Result<DenseMatrix, LuError> {
        let dimension = self.dimension();
        for pivot_index in 0..dimension {
            if is_ill_conditioned_pivot(self.lu[(pivot_index, pivot_index)], self.input_norm_infty)
            {
                return Err(LuError::IllConditionedMatrix { pivot_index });
            }
        }

        let mut inverse = DenseMatrix::zeros(dimension, dimension);
        let mut unit = vec![0.0; dimension];
        for col in 0..dimension {
            unit.fill(0.0);
            unit[col] = 1.0;
            let solution = self.solve(&unit)?;
            for row in 0..dimension {
                inverse[(row, col)] = solution[row];
            }
        }

        Ok(inverse)
    }

    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, LuError> {
        let dimension = self.dimension();
        if rhs.len() != dimension {
            return Err(LuError::RhsLengthMismatch {
                expected: dimension,
                actual: rhs.len(),
            });
        }

        let mut forward = vec![0.0; dimension];
        for row in 0..dimension {
            let mut value = rhs[self.pivots[row]];
            for col in 0..row {
                value -= self.lu[(row, col)] * forward[col];
            }
            forward[row] = value;
        }

        let mut solution = vec![0.0; dimension];
        for row in (0..dimension).rev() {
            let mut value = forward[row];
            for col in (row + 1)..dimension {
                value -= self.lu[(row, col)] * solution[col];
            }

            let diagonal = self.lu[(row, row)];
            if diagonal.abs() <= SINGULAR_PIVOT_EPSILON {
                return Err(LuError::SingularMatrix { pivot_index: row });
            }
            solution[row] = value / diagonal;
        }

        Ok(solution)
    }
}

pub fn lu_factorize(matrix: &DenseMatrix) -> Result<LuDecomposition, LuError> {
    let dimension = validate_square_shape(matrix)?;
    let input_norm_infty = matrix_infinity_norm(matrix);
    let mut lu = matrix.clone();
    let mut pivots: Vec<usize> = (0..dimension).collect();

    for pivot_col in 0..dimension {
        let (pivot_row, pivot_abs) = select_pivot_row(&lu, pivot_col);
        if pivot_abs <= SINGULAR_PIVOT_EPSILON
            || pivot_abs <= input_norm_infty * ILL_CONDITIONED_RELATIVE_PIVOT_EPSILON
        {
            return Err(LuError::SingularMatrix {
                pivot_index: pivot_col,
            });
        }

        if pivot_row != pivot_col {
            swap_rows(&mut lu, pivot_col, pivot_row);
            pivots.swap(pivot_col, pivot_row);
        }

        let pivot = lu[(pivot_col, pivot_col)];
        for row in (pivot_col + 1)..dimension {
            lu[(row, pivot_col)] /= pivot;
            let multiplier = lu[(row, pivot_col)];
            for col in (pivot_col + 1)..dimension {
                let updated = lu[(row, col)] - multiplier * lu[(pivot_col, col)];
                lu[(row, col)] = updated;
            }
        }
    }

    Ok(LuDecomposition {
        lu,
        pivots,
        input_norm_infty,
    })
}

pub fn lu_solve(matrix: &DenseMatrix, rhs: &[f64]) -> Result<Vec<f64>, LuError> {
    lu_factorize(matrix)?.solve(rhs)
}

pub fn lu_invert(matrix: &DenseMatrix) -> Result<DenseMatrix, LuError> {
    lu_factorize(matrix)?.invert()
}

/// Normal matrix `AᵀA` of a column-stacked design.
pub fn gram_matrix(columns: &[Vec<f64>]) -> DenseMatrix {
    let count = columns.len();
    let mut gram = DenseMatrix::zeros(count, count);
    for row in 0..count {
        for col in row..count {
            let value = dot(&columns[row], &columns[col]);
            gram[(row, col)] = value;
            gram[(col, row)] = value;
        }
    }
    gram
}

/// Least-squares solution of `Σ_j x_j columns[j] ≈ rhs` through the normal
/// equations. A relative ridge keeps exactly collinear designs solvable.
pub fn solve_least_squares(columns: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>, LuError> {
    if columns.is_empty() {
        return Err(LuError::EmptyMatrix);
    }
    if let Some(column) = columns.iter().find(|column| column.len() != rhs.len()) {
        return Err(LuError::RhsLengthMismatch {
            expected: column.len(),
            actual: rhs.len(),
        });
    }

    let mut gram = gram_matrix(columns);
    add_relative_ridge(&mut gram, NORMAL_EQUATION_RIDGE);
    let projected: Vec<f64> = columns.iter().map(|column| dot(column, rhs)).collect();
    lu_solve(&gram, &projected)
}

pub fn add_relative_ridge(matrix: &mut DenseMatrix, relative: f64) {
    let dimension = matrix.nrows().min(matrix.ncols());
    let scale = (0..dimension)
        .map(|index| matrix[(index, index)].abs())
        .fold(0.0_f64, f64::max)
        .max(f64::MIN_POSITIVE);
    for index in 0..dimension {
        matrix[(index, index)] += relative * scale;
    }
}

pub fn dot(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter().zip(rhs).map(|(a, b)| a * b).sum()
}

fn validate_square_shape(matrix: &DenseMatrix) -> Result<usize, LuError> {
    let rows = matrix.nrows();
    let cols = matrix.ncols();
    if rows == 0 || cols == 0 {
        return Err(LuError::EmptyMatrix);
    }
    if rows != cols {
        return Err(LuError::NonSquareMatrix { rows, cols });
    }
    Ok(rows)
}

fn select_pivot_row(matrix: &DenseMatrix, pivot_col: usize) -> (usize, f64) {
    let mut best_row = pivot_col;
    let mut best_abs = matrix[(pivot_col, pivot_col)].abs();
    for row in (pivot_col + 1)..matrix.nrows() {
        let candidate = matrix[(row, pivot_col)].abs();
        if candidate > best_abs {
            best_abs = candidate;
            best_row = row;
        }
    }
    (best_row, best_abs)
}

fn swap_rows(matrix: &mut DenseMatrix, lhs: usize, rhs: usize) {
    if lhs == rhs {
        return;
    }
    for col in 0..matrix.ncols() {
        let value = matrix[(lhs, col)];
        matrix[(lhs, col)] = matrix[(rhs, col)];
        matrix[(rhs, col)] = value;
    }
}

fn is_ill_conditioned_pivot(pivot: f64, input_norm_infty: f64) -> bool {
    pivot.abs() <= input_norm_infty * ILL_CONDITIONED_RELATIVE_PIVOT_EPSILON
}

fn matrix_infinity_norm(matrix: &DenseMatrix) -> f64 {
    let mut best_row_sum: f64 = 0.0;
    for row in 0..matrix.nrows() {
        let row_sum: f64 = (0..matrix.ncols()).map(|col| matrix[(row, col)].abs()).sum();
        best_row_sum = best_row_sum.max(row_sum);
    }
    best_row_sum
}
