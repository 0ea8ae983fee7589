//! Lossless layout conversion between two descriptors of the same tensor.

use smallvec::{smallvec, SmallVec};

use crate::fuse::merge_axes;
use crate::order::{compute_order, innermost_src_axis};
use crate::TRANSPOSE_TILE;
#[cfg(feature = "parallel")]
use crate::MIN_PARALLEL_LEN;
use dilconv_view::{Buffer, ConvError, DataType, Result, TensorDescriptor};

/// Stack-allocated index vector; layouts here are rank 4 or less.
type SVec<T> = SmallVec<[T; 8]>;

/// Convert `src` into a freshly allocated buffer laid out as `dst_desc`.
pub fn reorder(src: &Buffer, dst_desc: &TensorDescriptor) -> Result<Buffer> {
    let mut dst = Buffer::zeros(dst_desc)?;
    reorder_into(src, &mut dst)?;
    Ok(dst)
}

/// Convert `src` into `dst`, which must describe the same logical tensor.
///
/// Every element is moved bit-for-bit; only its memory position changes.
pub fn reorder_into(src: &Buffer, dst: &mut Buffer) -> Result<()> {
    ensure_same_tensor(src.desc(), dst.desc())?;

    if src.desc() == dst.desc() {
        log::trace!("reorder {} -> {}: identical layout", src.desc(), dst.desc());
        dst.data_mut().copy_from_slice(src.data());
        return Ok(());
    }

    log::trace!("reorder {} -> {}", src.desc(), dst.desc());
    let dims = src.dims().to_vec();
    let src_strides = positive_strides(src.strides())?;
    let dst_strides = positive_strides(dst.strides())?;
    permute_into(dst.data_mut(), &dst_strides, src.data(), &src_strides, &dims)
}

fn ensure_same_tensor(src: &TensorDescriptor, dst: &TensorDescriptor) -> Result<()> {
    if src.dims() != dst.dims() {
        return Err(ConvError::ShapeMismatch(
            src.dims().to_vec(),
            dst.dims().to_vec(),
        ));
    }
    if src.dtype() != dst.dtype() {
        return Err(ConvError::LayoutMismatch {
            operand: "reorder",
            expected: src.to_string(),
            actual: dst.to_string(),
        });
    }
    if src.dtype() != DataType::F32 {
        return Err(ConvError::UnsupportedDataType(src.dtype()));
    }
    Ok(())
}

fn positive_strides(strides: &[isize]) -> Result<Vec<usize>> {
    strides
        .iter()
        .map(|&s| {
            usize::try_from(s)
                .map_err(|_| ConvError::InvalidConfig(format!("negative stride {s}")))
        })
        .collect()
}

/// Strided-to-dense copy: `dst[dst_strides · i] = src[src_strides · i]` for
/// every logical index `i` of `dims`.
///
/// `dst` must be dense for `dst_strides`. Pipeline: order axes by
/// destination stride, merge axes contiguous in both operands, then split the
/// outermost axis into independent destination chunks.
pub fn permute_into(
    dst: &mut [f32],
    dst_strides: &[usize],
    src: &[f32],
    src_strides: &[usize],
    dims: &[usize],
) -> Result<()> {
    let rank = dims.len();
    if dst_strides.len() != rank || src_strides.len() != rank {
        return Err(ConvError::RankMismatch(dst_strides.len(), src_strides.len()));
    }
    let total: usize = dims.iter().product();
    if dst.len() != total {
        return Err(ConvError::BufferLength {
            expected: total,
            actual: dst.len(),
        });
    }
    if total == 0 {
        return Ok(());
    }
    let src_extent = 1 + dims
        .iter()
        .zip(src_strides.iter())
        .map(|(&d, &s)| (d - 1) * s)
        .sum::<usize>();
    if src_extent > src.len() {
        return Err(ConvError::BufferLength {
            expected: src_extent,
            actual: src.len(),
        });
    }

    let order = compute_order(dst_strides, src_strides);
    let ordered_dims: Vec<usize> = order.iter().map(|&a| dims[a]).collect();
    let ordered: Vec<Vec<usize>> = [dst_strides, src_strides]
        .iter()
        .map(|s| order.iter().map(|&a| s[a]).collect())
        .collect();
    let (dims, strides) = merge_axes(&ordered_dims, &ordered);
    let (dst_s, src_s) = (&strides[0], &strides[1]);

    if dims.len() == 1 && src_s[0] == 1 {
        dst.copy_from_slice(&src[..total]);
        return Ok(());
    }

    let outer = dims.len() - 1;
    let chunk = dst_s[outer];
    let inner_dims = &dims[..outer];
    let inner_dst = &dst_s[..outer];
    let inner_src = &src_s[..outer];
    let outer_src = src_s[outer];
    log::trace!(
        "permute_into: fused dims={:?} dst_strides={:?} src_strides={:?}",
        dims,
        dst_s,
        src_s
    );

    #[cfg(feature = "parallel")]
    {
        if total >= MIN_PARALLEL_LEN && dims[outer] > 1 {
            use rayon::prelude::*;
            dst.par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(j, block)| {
                    copy_block(block, inner_dims, inner_dst, inner_src, src, j * outer_src)
                });
            return Ok(());
        }
    }

    for (j, block) in dst.chunks_mut(chunk).enumerate() {
        copy_block(block, inner_dims, inner_dst, inner_src, src, j * outer_src);
    }
    Ok(())
}

/// Fill one dense destination chunk.
fn copy_block(
    dst: &mut [f32],
    dims: &[usize],
    dst_strides: &[usize],
    src_strides: &[usize],
    src: &[f32],
    base: usize,
) {
    if dims.is_empty() {
        dst[0] = src[base];
        return;
    }
    let run = dims[0];

    // Source contiguous along the innermost destination axis: whole runs.
    if src_strides[0] == 1 {
        for_each_offset(&dims[1..], &dst_strides[1..], &src_strides[1..], |d, s| {
            let s = base + s;
            dst[d..d + run].copy_from_slice(&src[s..s + run]);
        });
        return;
    }

    // Source contiguous along another axis: tiled 2-D transpose.
    if let Some(b) = innermost_src_axis(src_strides, 0).filter(|&b| src_strides[b] == 1) {
        let rest: SVec<usize> = (1..dims.len()).filter(|&a| a != b).collect();
        let rest_dims: SVec<usize> = rest.iter().map(|&a| dims[a]).collect();
        let rest_dst: SVec<usize> = rest.iter().map(|&a| dst_strides[a]).collect();
        let rest_src: SVec<usize> = rest.iter().map(|&a| src_strides[a]).collect();
        let (db, dsb, ss0) = (dims[b], dst_strides[b], src_strides[0]);
        for_each_offset(&rest_dims, &rest_dst, &rest_src, |d, s| {
            let s = base + s;
            for t0 in (0..run).step_by(TRANSPOSE_TILE) {
                let e0 = (t0 + TRANSPOSE_TILE).min(run);
                for tb in (0..db).step_by(TRANSPOSE_TILE) {
                    let eb = (tb + TRANSPOSE_TILE).min(db);
                    for ib in tb..eb {
                        let drow = d + ib * dsb;
                        let srow = s + ib;
                        for i0 in t0..e0 {
                            dst[drow + i0] = src[srow + i0 * ss0];
                        }
                    }
                }
            }
        });
        return;
    }

    // General gather.
    let ss0 = src_strides[0];
    for_each_offset(&dims[1..], &dst_strides[1..], &src_strides[1..], |d, s| {
        let s = base + s;
        for (i, v) in dst[d..d + run].iter_mut().enumerate() {
            *v = src[s + i * ss0];
        }
    });
}

/// Odometer over `dims` (innermost first), yielding `(dst, src)` offsets.
fn for_each_offset(
    dims: &[usize],
    dst_strides: &[usize],
    src_strides: &[usize],
    mut f: impl FnMut(usize, usize),
) {
    let rank = dims.len();
    let total: usize = dims.iter().product();
    let mut idx: SVec<usize> = smallvec![0; rank];
    let (mut d, mut s) = (0usize, 0usize);
    for _ in 0..total {
        f(d, s);
        for k in 0..rank {
            idx[k] += 1;
            d += dst_strides[k];
            s += src_strides[k];
            if idx[k] < dims[k] {
                break;
            }
            d -= idx[k] * dst_strides[k];
            s -= idx[k] * src_strides[k];
            idx[k] = 0;
        }
    }
}
