//! Owned `f32` storage addressed through a single descriptor.

use std::ops::{Index, IndexMut};
use std::sync::Arc;

use crate::desc::{DataType, TensorDescriptor};
use crate::{ConvError, Result};

/// Visit every logical index of `dims` in row-major order.
pub fn for_each_index(dims: &[usize], mut f: impl FnMut(&[usize])) {
    if dims.iter().any(|&d| d == 0) {
        return;
    }
    let rank = dims.len();
    let mut idx = vec![0usize; rank];
    loop {
        f(&idx);
        let mut axis = rank;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            idx[axis] += 1;
            if idx[axis] < dims[axis] {
                break;
            }
            idx[axis] = 0;
        }
    }
}

/// Contiguous block of `f32` values plus the descriptor that addresses it.
///
/// The descriptor is always resolved: a buffer never exists for a tensor
/// whose layout is still `Any`.
#[derive(Clone)]
pub struct Buffer {
    desc: TensorDescriptor,
    strides: Arc<[isize]>,
    data: Vec<f32>,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("desc", &self.desc.to_string())
            .field("strides", &self.strides)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Buffer {
    /// Allocate a zero-filled buffer for `desc`.
    pub fn zeros(desc: &TensorDescriptor) -> Result<Self> {
        Self::from_vec(desc, vec![0.0; desc.len()])
    }

    /// Wrap existing storage; `data` is in the descriptor's memory order.
    pub fn from_vec(desc: &TensorDescriptor, data: Vec<f32>) -> Result<Self> {
        if desc.dtype() != DataType::F32 {
            return Err(ConvError::UnsupportedDataType(desc.dtype()));
        }
        let strides = desc.strides()?;
        if data.len() != desc.len() {
            return Err(ConvError::BufferLength {
                expected: desc.len(),
                actual: data.len(),
            });
        }
        Ok(Self {
            desc: desc.clone(),
            strides: Arc::from(strides),
            data,
        })
    }

    /// Build a buffer by evaluating `f` at every logical index.
    pub fn from_fn(desc: &TensorDescriptor, mut f: impl FnMut(&[usize]) -> f32) -> Result<Self> {
        let mut buf = Self::zeros(desc)?;
        let strides = buf.strides.clone();
        let data = &mut buf.data;
        for_each_index(desc.dims(), |idx| {
            data[linear(idx, &strides)] = f(idx);
        });
        Ok(buf)
    }

    /// Build a buffer from values listed in logical row-major order.
    pub fn from_logical(desc: &TensorDescriptor, values: &[f32]) -> Result<Self> {
        if values.len() != desc.len() {
            return Err(ConvError::BufferLength {
                expected: desc.len(),
                actual: values.len(),
            });
        }
        let mut next = values.iter().copied();
        Self::from_fn(desc, |_| next.next().unwrap_or_default())
    }

    #[inline]
    pub fn desc(&self) -> &TensorDescriptor {
        &self.desc
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        self.desc.dims()
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw storage in memory order.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Element at a logical index.
    pub fn get(&self, index: &[usize]) -> f32 {
        self[index]
    }

    pub fn set(&mut self, index: &[usize], value: f32) {
        self[index] = value;
    }

    /// Checked element access.
    pub fn try_get(&self, index: &[usize]) -> Result<f32> {
        Ok(self.data[self.desc.offset_of(index)?])
    }

    /// Visit `(index, value)` pairs in logical row-major order, regardless of
    /// the physical layout.
    pub fn for_each_logical(&self, mut f: impl FnMut(&[usize], f32)) {
        for_each_index(self.desc.dims(), |idx| {
            f(idx, self.data[linear(idx, &self.strides)]);
        });
    }

    /// Copy of the values in logical row-major order.
    pub fn to_logical_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each_logical(|_, v| out.push(v));
        out
    }

    fn checked_offset(&self, index: &[usize]) -> usize {
        assert_eq!(index.len(), self.desc.rank());
        let dims = self.desc.dims();
        for (i, &ix) in index.iter().enumerate() {
            assert!(ix < dims[i]);
        }
        linear(index, &self.strides)
    }
}

#[inline]
fn linear(index: &[usize], strides: &[isize]) -> usize {
    index
        .iter()
        .zip(strides.iter())
        .map(|(&i, &s)| i * s as usize)
        .sum()
}

impl Index<&[usize]> for Buffer {
    type Output = f32;

    fn index(&self, index: &[usize]) -> &f32 {
        &self.data[self.checked_offset(index)]
    }
}

impl IndexMut<&[usize]> for Buffer {
    fn index_mut(&mut self, index: &[usize]) -> &mut f32 {
        let offset = self.checked_offset(index);
        &mut self.data[offset]
    }
}

impl<const N: usize> Index<[usize; N]> for Buffer {
    type Output = f32;

    fn index(&self, index: [usize; N]) -> &f32 {
        &self[&index[..]]
    }
}

impl<const N: usize> IndexMut<[usize; N]> for Buffer {
    fn index_mut(&mut self, index: [usize; N]) -> &mut f32 {
        &mut self[&index[..]]
    }
}
