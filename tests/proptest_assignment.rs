//! Property tests for nearest-codeword assignment.

use proptest::prelude::*;
use splat_vq::distance::{squared_l2, CpuDistance, DistanceService};
use splat_vq::types::AttributeTensor;

fn tensor(dim: usize, max_rows: usize) -> impl Strategy<Value = AttributeTensor> {
    prop::collection::vec(prop::collection::vec(-100.0f32..100.0, dim), 1..max_rows)
        .prop_map(|rows| AttributeTensor::from_rows(&rows).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn assignment_is_deterministic(
        data in tensor(3, 200),
        centers in tensor(3, 20),
    ) {
        let svc = CpuDistance::default();
        let a = svc.nearest_indices(data.as_slice(), &centers);
        let b = svc.nearest_indices(data.as_slice(), &centers);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn assignment_is_the_argmin(
        data in tensor(4, 100),
        centers in tensor(4, 16),
    ) {
        let svc = CpuDistance::default();
        let indices = svc.nearest_indices(data.as_slice(), &centers);
        prop_assert_eq!(indices.len(), data.len());
        for (row, &idx) in data.rows().zip(indices.iter()) {
            prop_assert!((idx as usize) < centers.len());
            let chosen = squared_l2(row, centers.row(idx as usize));
            for c in centers.rows() {
                prop_assert!(chosen <= squared_l2(row, c));
            }
        }
    }

    #[test]
    fn chunking_never_changes_assignment(
        data in tensor(2, 300),
        centers in tensor(2, 10),
        chunk in 1usize..64,
    ) {
        let svc = CpuDistance::default();
        let whole = svc.nearest_indices(data.as_slice(), &centers);
        prop_assert_eq!(svc.nearest_indices_chunked(&data, &centers, chunk), whole);
    }

    #[test]
    fn codebook_rows_map_to_themselves(centers in tensor(3, 32)) {
        let svc = CpuDistance::default();
        let indices = svc.nearest_indices(centers.as_slice(), &centers);
        for (i, &idx) in indices.iter().enumerate() {
            prop_assert_eq!(squared_l2(centers.row(idx as usize), centers.row(i)), 0.0);
        }
    }
}
