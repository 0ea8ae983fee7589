//! Loop ordering for layout conversion.

/// Order axes innermost first by destination stride.
///
/// The destination is written sequentially, so its stride order drives the
/// loop nest; ties are broken by the source stride so extent-1 axes and
/// broadcast-like axes land in a stable position.
pub fn compute_order(dst_strides: &[usize], src_strides: &[usize]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..dst_strides.len()).collect();
    order.sort_by(|&a, &b| {
        dst_strides[a]
            .cmp(&dst_strides[b])
            .then(src_strides[a].cmp(&src_strides[b]))
    });
    order
}

/// Index of the axis with the smallest source stride, excluding `skip`.
pub fn innermost_src_axis(src_strides: &[usize], skip: usize) -> Option<usize> {
    (0..src_strides.len())
        .filter(|&i| i != skip)
        .min_by_key(|&i| src_strides[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_order_nhwc_destination() {
        // logical (n, c, h, w) with dims (2, 3, 4, 5), dst nhwc, src nchw
        let dst = [60usize, 1, 15, 3];
        let src = [60usize, 20, 5, 1];
        assert_eq!(compute_order(&dst, &src), vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_compute_order_tie_break() {
        let dst = [4usize, 4, 1];
        let src = [2usize, 1, 8];
        assert_eq!(compute_order(&dst, &src), vec![2, 1, 0]);
    }

    #[test]
    fn test_innermost_src_axis() {
        assert_eq!(innermost_src_axis(&[20, 1, 5], 1), Some(2));
        assert_eq!(innermost_src_axis(&[7], 0), None);
    }
}
