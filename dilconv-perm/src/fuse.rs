//! Axis merging for layout conversion.
//!
//! Input axes are listed innermost first, each with one stride per operand.
//! Extent-1 axes never move an offset and are dropped. An axis folds into the
//! group below it when, in every operand, stepping it once equals stepping
//! the whole group below once more.

/// Merge `dims` into the fewest loop axes that visit the same offsets.
///
/// `strides[k][i]` is operand `k`'s stride for axis `i`. Returns the merged
/// extents and, per operand, the stride of each merged axis. A tensor of
/// only unit axes collapses to a single axis of extent 1.
pub fn merge_axes(dims: &[usize], strides: &[Vec<usize>]) -> (Vec<usize>, Vec<Vec<usize>>) {
    let mut extents: Vec<usize> = Vec::with_capacity(dims.len());
    let mut merged: Vec<Vec<usize>> = vec![Vec::with_capacity(dims.len()); strides.len()];

    for (axis, &extent) in dims.iter().enumerate() {
        if extent == 1 {
            continue;
        }
        let folds = extents.last().is_some_and(|&below| {
            strides
                .iter()
                .zip(&merged)
                .all(|(s, m)| m.last().is_some_and(|&ms| s[axis] == below * ms))
        });
        if folds {
            if let Some(below) = extents.last_mut() {
                *below *= extent;
            }
        } else {
            extents.push(extent);
            for (m, s) in merged.iter_mut().zip(strides) {
                m.push(s[axis]);
            }
        }
    }

    if extents.is_empty() && !dims.is_empty() {
        extents.push(1);
        for (m, s) in merged.iter_mut().zip(strides) {
            m.push(s[0]);
        }
    }
    (extents, merged)
}
