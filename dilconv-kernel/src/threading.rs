//! Data-parallel helpers for the compute kernels.
//!
//! With the `parallel` feature the helpers split work across the current
//! rayon pool (the engine installs its own pool around every primitive);
//! without it they degrade to plain sequential loops with the same results.

/// Minimum amount of work (in multiply-adds or elements) to justify
/// multi-threaded execution.
pub const MINTHREADLENGTH: usize = 1 << 15;

/// Run `f(index, chunk)` on every `chunk`-sized piece of `data`.
///
/// `work` is the estimated total cost; below [`MINTHREADLENGTH`] the loop
/// stays on the calling thread.
pub fn for_each_chunk_mut<F>(data: &mut [f32], chunk: usize, work: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    if chunk == 0 {
        return;
    }
    #[cfg(feature = "parallel")]
    {
        if work > MINTHREADLENGTH && data.len() > chunk {
            use rayon::prelude::*;
            data.par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(i, c)| f(i, c));
            return;
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = work;
    for (i, c) in data.chunks_mut(chunk).enumerate() {
        f(i, c);
    }
}

/// Fold every `chunk`-sized piece of `data` into an accumulator, then merge
/// the per-thread accumulators with `reduce`.
pub fn fold_chunks<T, I, F, R>(data: &[f32], chunk: usize, identity: I, fold: F, reduce: R) -> T
where
    T: Send,
    I: Fn() -> T + Send + Sync,
    F: Fn(T, &[f32]) -> T + Send + Sync,
    R: Fn(T, T) -> T + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if data.len() > MINTHREADLENGTH && data.len() > chunk {
            use rayon::prelude::*;
            return data
                .par_chunks(chunk)
                .fold(&identity, &fold)
                .reduce(&identity, &reduce);
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = &reduce;
    data.chunks(chunk).fold(identity(), fold)
}

/// Evaluate `f(i)` for `i in 0..len`, collecting results in order.
pub fn map_indices<T, F>(len: usize, work: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if work > MINTHREADLENGTH && len > 1 {
            use rayon::prelude::*;
            return (0..len).into_par_iter().map(f).collect();
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = work;
    (0..len).map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_each_chunk_mut_covers_all_chunks() {
        let mut data = vec![0.0f32; 1 << 17];
        let len = data.len();
        for_each_chunk_mut(&mut data, 1000, len, |i, c| c.fill(i as f32));
        assert_eq!(data[0], 0.0);
        assert_eq!(data[1999], 1.0);
        assert_eq!(*data.last().unwrap(), ((1 << 17) / 1000) as f32);
    }

    #[test]
    fn test_fold_chunks_sums_large_input() {
        let data = vec![1.0f32; 1 << 17];
        let total = fold_chunks(
            &data,
            64,
            || 0.0f64,
            |acc, c| acc + c.iter().map(|&v| v as f64).sum::<f64>(),
            |a, b| a + b,
        );
        assert_eq!(total, (1 << 17) as f64);
    }

    #[test]
    fn test_map_indices_preserves_order() {
        let out = map_indices(100, usize::MAX, |i| i * 2);
        assert_eq!(out, (0..100).map(|i| i * 2).collect::<Vec<_>>());
    }
}
