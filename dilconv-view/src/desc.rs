//! Tensor descriptors: logical shape, element type and physical layout tag.
//!
//! A descriptor never owns data. Together, its [`LayoutTag`] and dims fully
//! determine a dense stride pattern, except for [`LayoutTag::Any`] which is a
//! placeholder an operator resolves while building its plan.

use std::fmt;
use std::sync::Arc;

use crate::{ConvError, Result};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    Bf16,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 | DataType::Bf16 => 2,
        }
    }

    /// Fail unless this is the one type the engine executes.
    pub fn ensure_supported(self) -> Result<()> {
        match self {
            DataType::F32 => Ok(()),
            other => Err(ConvError::UnsupportedDataType(other)),
        }
    }
}

/// Physical axis ordering for a logical shape.
///
/// Activations are logically `(N, C, H, W)`, weights `(O, I, KH, KW)` and
/// per-channel statistics `(C)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutTag {
    /// Plain 1-D vector.
    X,
    /// Channel-first activations, row-major in logical order.
    Nchw,
    /// Channel-last activations.
    Nhwc,
    /// Plain weights, row-major in logical order.
    Oihw,
    /// Output-channel-last weights with input channels outermost.
    Ihwo,
    /// Output-channel-last weights with the kernel window outermost.
    Hwio,
    /// Unconstrained: the operator picks the layout.
    Any,
}

impl LayoutTag {
    /// Logical axes listed from outermost to innermost in memory.
    pub fn axis_order(self) -> Option<&'static [usize]> {
        match self {
            LayoutTag::X => Some(&[0]),
            LayoutTag::Nchw | LayoutTag::Oihw => Some(&[0, 1, 2, 3]),
            LayoutTag::Nhwc => Some(&[0, 2, 3, 1]),
            LayoutTag::Ihwo => Some(&[1, 2, 3, 0]),
            LayoutTag::Hwio => Some(&[2, 3, 1, 0]),
            LayoutTag::Any => None,
        }
    }

    /// Rank this tag applies to, `None` for [`LayoutTag::Any`].
    pub fn rank(self) -> Option<usize> {
        self.axis_order().map(<[usize]>::len)
    }

    pub fn is_any(self) -> bool {
        matches!(self, LayoutTag::Any)
    }

    pub fn name(self) -> &'static str {
        match self {
            LayoutTag::X => "x",
            LayoutTag::Nchw => "nchw",
            LayoutTag::Nhwc => "nhwc",
            LayoutTag::Oihw => "oihw",
            LayoutTag::Ihwo => "ihwo",
            LayoutTag::Hwio => "hwio",
            LayoutTag::Any => "any",
        }
    }
}

/// Dense strides for `dims` laid out in `order` (outermost first).
pub fn dense_strides(dims: &[usize], order: &[usize]) -> Vec<isize> {
    let mut strides = vec![0isize; dims.len()];
    let mut step = 1isize;
    for &axis in order.iter().rev() {
        strides[axis] = step;
        step *= dims[axis] as isize;
    }
    strides
}

/// Row-major strides (last index varies fastest).
pub fn row_major_strides(dims: &[usize]) -> Vec<isize> {
    let order: Vec<usize> = (0..dims.len()).collect();
    dense_strides(dims, &order)
}

/// Immutable description of an N-D `f32` tensor: dims, element type, layout.
#[derive(Debug, Clone)]
pub struct TensorDescriptor {
    dims: Arc<[usize]>,
    dtype: DataType,
    tag: LayoutTag,
}

impl TensorDescriptor {
    /// Validate and build a descriptor.
    ///
    /// Every extent must be positive and, for concrete tags, the rank must
    /// match the tag.
    pub fn new(dims: &[usize], dtype: DataType, tag: LayoutTag) -> Result<Self> {
        if dims.is_empty() || dims.iter().any(|&d| d == 0) {
            return Err(ConvError::InvalidDims {
                dims: dims.to_vec(),
            });
        }
        if let Some(rank) = tag.rank() {
            if rank != dims.len() {
                return Err(ConvError::RankMismatch(dims.len(), rank));
            }
        }
        dims.iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| ConvError::SizeOverflow(dims.to_vec()))?;
        Ok(Self {
            dims: Arc::from(dims),
            dtype,
            tag,
        })
    }

    /// Shorthand for an `f32` descriptor.
    pub fn f32(dims: &[usize], tag: LayoutTag) -> Result<Self> {
        Self::new(dims, DataType::F32, tag)
    }

    /// An `f32` descriptor whose layout is left to the operator.
    pub fn any(dims: &[usize]) -> Result<Self> {
        Self::new(dims, DataType::F32, LayoutTag::Any)
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    #[inline]
    pub fn tag(&self) -> LayoutTag {
        self.tag
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of logical elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the layout has been fixed (tag is not `Any`).
    #[inline]
    pub fn is_resolved(&self) -> bool {
        !self.tag.is_any()
    }

    /// Size in bytes of the dense storage.
    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.dtype.size()
    }

    /// Physical axis order, failing for unresolved descriptors.
    pub fn axis_order(&self) -> Result<&'static [usize]> {
        self.tag
            .axis_order()
            .ok_or_else(|| ConvError::UnresolvedLayout(self.to_string()))
    }

    /// Dense strides implied by the tag.
    pub fn strides(&self) -> Result<Vec<isize>> {
        Ok(dense_strides(&self.dims, self.axis_order()?))
    }

    /// Same dims and element type, different layout.
    pub fn with_tag(&self, tag: LayoutTag) -> Result<Self> {
        Self::new(&self.dims, self.dtype, tag)
    }

    /// Memory offset of a logical index.
    pub fn offset_of(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() {
            return Err(ConvError::RankMismatch(index.len(), self.rank()));
        }
        let strides = self.strides()?;
        let mut offset = 0usize;
        for ((&i, &d), &s) in index.iter().zip(self.dims.iter()).zip(strides.iter()) {
            if i >= d {
                return Err(ConvError::ShapeMismatch(index.to_vec(), self.dims.to_vec()));
            }
            offset += i * s as usize;
        }
        Ok(offset)
    }

    /// Whether the two descriptors address memory identically.
    ///
    /// Axes of extent 1 are ignored: their stride never contributes to an
    /// offset, so `nchw` and `nhwc` coincide when `C == 1`.
    pub fn same_layout(&self, other: &Self) -> bool {
        if self.dims != other.dims || self.dtype != other.dtype {
            return false;
        }
        match (self.strides(), other.strides()) {
            (Ok(a), Ok(b)) => self
                .dims
                .iter()
                .zip(a.iter().zip(b.iter()))
                .all(|(&d, (sa, sb))| d == 1 || sa == sb),
            _ => self.tag == other.tag,
        }
    }
}

impl PartialEq for TensorDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.same_layout(other)
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dtype = match self.dtype {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::Bf16 => "bf16",
        };
        write!(f, "{dtype}[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, "x")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]:{}", self.tag.name())
    }
}
