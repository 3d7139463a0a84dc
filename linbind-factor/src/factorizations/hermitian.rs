use linbind_core::{LinbindError, MatrixKind, MatrixStore, Result, Scalar};

use super::{permutations, Factorization};

/// `A = U·D·Uᴴ` in the block-pivoted upper form produced by `sytrf`/`hetrf`
/// with `uplo = 'U'`.
///
/// `D` is block diagonal with 1x1 and 2x2 blocks stored on and next to the
/// diagonal of `factor`; the columns above each block hold the multipliers of
/// the corresponding unit upper transformation. A positive `pivots[k]` marks a
/// 1x1 block whose row and column `k` were interchanged with `pivots[k]`; two
/// equal negative entries mark a 2x2 block.
#[derive(Debug, Clone)]
pub struct HermitianIndefinite<T: Scalar> {
    factor: MatrixStore<T>,
    pivots: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    /// First row/column of the block (0-based).
    start: usize,
    size: usize,
    /// Row/column interchanged with the first row of the block.
    swap: usize,
}

impl<T: Scalar> HermitianIndefinite<T> {
    pub fn new(factor: MatrixStore<T>, pivots: Vec<i32>) -> Result<Self> {
        let n = factor.nrow();
        if factor.ncol() != n {
            return Err(LinbindError::NotSquare {
                nrow: n,
                ncol: factor.ncol(),
            });
        }
        if pivots.len() != n {
            return Err(LinbindError::DimensionMismatch(format!(
                "{} pivots for a {}x{} factorization",
                pivots.len(),
                n,
                n
            )));
        }
        let model = HermitianIndefinite { factor, pivots };
        model.blocks()?;
        Ok(model)
    }

    pub fn factor(&self) -> &MatrixStore<T> {
        &self.factor
    }

    pub fn pivots(&self) -> &[i32] {
        &self.pivots
    }

    pub fn permutations(&self) -> usize {
        permutations(&self.pivots)
    }

    /// Diagonal blocks from the last one to the first, as the pivot vector
    /// can only be parsed in that direction.
    fn blocks(&self) -> Result<Vec<Block>> {
        let n = self.pivots.len();
        let check = |p: i32| -> Result<usize> {
            let p = p.unsigned_abs() as usize;
            if p == 0 || p > n {
                return Err(LinbindError::Domain(format!(
                    "pivot {} is outside rows 1..={}",
                    p, n
                )));
            }
            Ok(p - 1)
        };
        let mut blocks = Vec::new();
        let mut k = n;
        while k > 0 {
            let p = self.pivots[k - 1];
            if p > 0 {
                blocks.push(Block {
                    start: k - 1,
                    size: 1,
                    swap: check(p)?,
                });
                k -= 1;
            } else if k >= 2 && self.pivots[k - 2] == p {
                blocks.push(Block {
                    start: k - 2,
                    size: 2,
                    swap: check(p)?,
                });
                k -= 2;
            } else {
                return Err(LinbindError::Domain(format!(
                    "pivot {} at position {} does not close a 2x2 block",
                    p, k
                )));
            }
        }
        Ok(blocks)
    }
}

impl<T: Scalar> Factorization<T> for HermitianIndefinite<T> {
    fn dims(&self) -> (usize, usize) {
        (self.factor.nrow(), self.factor.ncol())
    }

    fn reconstruct(&self) -> Result<MatrixStore<T>> {
        let n = self.factor.nrow();
        let f = self.factor.raw_elements()?;
        let at = |row: usize, col: usize| f[row + n * col];
        let blocks = self.blocks()?;

        // D, mirrored to full Hermitian storage
        let mut m = vec![T::zero(); n * n];
        for block in &blocks {
            for col in block.start..block.start + block.size {
                for row in block.start..=col {
                    m[row + n * col] = at(row, col);
                    m[col + n * row] = at(row, col).conj();
                }
            }
        }

        // M <- P(k)·U(k)·M·U(k)ᴴ·P(k)ᵀ, innermost (leading) block first
        for block in blocks.iter().rev() {
            let cols = block.start..block.start + block.size;
            // rows above the block: M[r, :] += Σ_c v[r, c]·M[c, :]
            for row in 0..block.start {
                for j in 0..n {
                    let mut acc = T::zero();
                    for c in cols.clone() {
                        acc = acc + at(row, c) * m[c + n * j];
                    }
                    m[row + n * j] = m[row + n * j] + acc;
                }
            }
            // columns left of the block: M[:, r] += Σ_c M[:, c]·conj(v[r, c])
            for col in 0..block.start {
                for i in 0..n {
                    let mut acc = T::zero();
                    for c in cols.clone() {
                        acc = acc + m[i + n * c] * at(col, c).conj();
                    }
                    m[i + n * col] = m[i + n * col] + acc;
                }
            }
            let first = block.start;
            if block.swap != first {
                for j in 0..n {
                    m.swap(first + n * j, block.swap + n * j);
                }
                for i in 0..n {
                    m.swap(i + n * first, i + n * block.swap);
                }
            }
        }
        MatrixStore::from_buffer(n, n, m, MatrixKind::Dense)
    }
}
