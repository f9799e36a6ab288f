// Squared-L2 kernels. The scalar loop is shaped in lanes of 8 so LLVM can
// vectorise it; x86-64 builds with AVX2 and FMA enabled take the explicit path.

/// Squared Euclidean distance `sum((a_i - b_i)^2)`.
///
/// No square root: nearest-center search only needs the ordering.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");
    squared_l2_inner(a, b)
}

#[cfg(not(all(target_arch = "x86_64", target_feature = "avx2", target_feature = "fma")))]
#[inline]
fn squared_l2_inner(a: &[f32], b: &[f32]) -> f32 {
    let lanes = a.len() / 8;
    let mut acc = [0.0f32; 8];

    for i in 0..lanes {
        let base = i * 8;
        for j in 0..8 {
            let d = a[base + j] - b[base + j];
            acc[j] += d * d;
        }
    }

    let mut sum: f32 = acc.iter().sum();
    for i in lanes * 8..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

#[cfg(all(target_arch = "x86_64", target_feature = "avx2", target_feature = "fma"))]
#[inline]
fn squared_l2_inner(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    // SAFETY: avx2 and fma are enabled at compile time; loads are unaligned and
    // bounded by `lanes * 8 <= a.len() == b.len()`.
    unsafe {
        let mut acc = _mm256_setzero_ps();
        let lanes = a.len() / 8;
        for i in 0..lanes {
            let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
            let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
            let diff = _mm256_sub_ps(va, vb);
            acc = _mm256_fmadd_ps(diff, diff, acc);
        }

        let hi = _mm256_extractf128_ps(acc, 1);
        let lo = _mm256_castps256_ps128(acc);
        let quad = _mm_add_ps(lo, hi);
        let pair = _mm_add_ps(quad, _mm_movehl_ps(quad, quad));
        let single = _mm_add_ss(pair, _mm_movehdup_ps(pair));
        let mut sum = _mm_cvtss_f32(single);

        for i in lanes * 8..a.len() {
            let d = a[i] - b[i];
            sum += d * d;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squared_l2() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        assert!((squared_l2(&a, &b) - 27.0).abs() < 1e-6);
    }

    #[test]
    fn test_squared_l2_long_vector() {
        // 48 dims = one full SH colour row; exercises the lane loop.
        let a: Vec<f32> = (0..48).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..48).map(|i| i as f32 * 0.5 + 1.0).collect();
        assert!((squared_l2(&a, &b) - 48.0).abs() < 1e-4);
    }

    #[test]
    fn test_squared_l2_identical() {
        let a = [0.25f32; 13];
        assert_eq!(squared_l2(&a, &a), 0.0);
    }
}
