//! Layout negotiation between caller-owned buffers and an operator's plan.
//!
//! The negotiator never picks a layout itself: the preferred descriptor of
//! every operand comes from a built plan (anything implementing
//! [`LayoutPreference`]). It only compares, and reorders when the comparison
//! says the layouts differ.

use std::borrow::Cow;
use std::fmt;

use dilconv_perm::{reorder, reorder_into};
use dilconv_view::{Buffer, ConvError, Result, TensorDescriptor};
use serde::Serialize;

/// Operator family of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Convolution,
    BatchNorm,
}

/// Position of an operand in an operator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Src,
    Weights,
    Dst,
    Mean,
    Variance,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Src => "src",
            Role::Weights => "weights",
            Role::Dst => "dst",
            Role::Mean => "mean",
            Role::Variance => "variance",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A built plan that knows the resolved layout it wants for each operand.
pub trait LayoutPreference {
    fn kind(&self) -> OpKind;

    /// Resolved descriptor for `role`, or `None` if the operator has no such
    /// operand.
    fn preferred(&self, role: Role) -> Option<&TensorDescriptor>;
}

/// Decision for one operand.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandPlan {
    pub role: Role,
    pub canonical: TensorDescriptor,
    pub preferred: TensorDescriptor,
    pub reorder: bool,
}

/// Result of [`LayoutNegotiator::negotiate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiation {
    pub kind: OpKind,
    pub operands: Vec<OperandPlan>,
}

impl Negotiation {
    pub fn operand(&self, role: Role) -> Option<&OperandPlan> {
        self.operands.iter().find(|o| o.role == role)
    }

    pub fn needs_reorder(&self, role: Role) -> bool {
        self.operand(role).is_some_and(|o| o.reorder)
    }

    pub fn reorder_count(&self) -> usize {
        self.operands.iter().filter(|o| o.reorder).count()
    }
}

pub struct LayoutNegotiator;

impl LayoutNegotiator {
    /// Compare each caller descriptor with the plan's preferred one.
    pub fn negotiate<P: LayoutPreference + ?Sized>(
        plan: &P,
        canonical: &[(Role, &TensorDescriptor)],
    ) -> Result<Negotiation> {
        let mut operands = Vec::with_capacity(canonical.len());
        for &(role, desc) in canonical {
            desc.dtype().ensure_supported()?;
            if !desc.is_resolved() {
                return Err(ConvError::UnresolvedLayout(desc.to_string()));
            }
            let preferred = plan
                .preferred(role)
                .ok_or(ConvError::UnsupportedLayout {
                    operand: role.name(),
                    tag: desc.tag(),
                })?;
            if preferred.dims() != desc.dims() {
                return Err(ConvError::ShapeMismatch(
                    desc.dims().to_vec(),
                    preferred.dims().to_vec(),
                ));
            }
            let reorder = desc != preferred;
            log::debug!(
                "{:?} {role}: caller {desc}, engine {preferred}{}",
                plan.kind(),
                if reorder { ", reorder" } else { "" }
            );
            operands.push(OperandPlan {
                role,
                canonical: desc.clone(),
                preferred: preferred.clone(),
                reorder,
            });
        }
        Ok(Negotiation {
            kind: plan.kind(),
            operands,
        })
    }

    /// Present `buf` in the `preferred` layout: borrowed as-is when the
    /// layouts already match, otherwise reordered into a new buffer.
    pub fn bind_input<'a>(buf: &'a Buffer, preferred: &TensorDescriptor) -> Result<Cow<'a, Buffer>> {
        if buf.desc() == preferred {
            Ok(Cow::Borrowed(buf))
        } else {
            Ok(Cow::Owned(reorder(buf, preferred)?))
        }
    }

    /// Prepare an output slot in the `preferred` layout for `buf`.
    pub fn bind_output<'a>(buf: &'a mut Buffer, preferred: &TensorDescriptor) -> Result<OutputBinding<'a>> {
        if buf.dims() != preferred.dims() {
            return Err(ConvError::ShapeMismatch(
                buf.dims().to_vec(),
                preferred.dims().to_vec(),
            ));
        }
        let staging = if buf.desc() == preferred {
            None
        } else {
            Some(Buffer::zeros(preferred)?)
        };
        Ok(OutputBinding {
            target: buf,
            staging,
        })
    }
}

/// Output slot produced by [`LayoutNegotiator::bind_output`].
///
/// Kernels write into [`OutputBinding::buffer_mut`]; [`OutputBinding::finish`]
/// moves the result into the caller's buffer when a staging buffer was used.
#[derive(Debug)]
pub struct OutputBinding<'a> {
    target: &'a mut Buffer,
    staging: Option<Buffer>,
}

impl OutputBinding<'_> {
    pub fn is_staged(&self) -> bool {
        self.staging.is_some()
    }

    pub fn buffer(&self) -> &Buffer {
        match &self.staging {
            Some(staging) => staging,
            None => &*self.target,
        }
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        match &mut self.staging {
            Some(staging) => staging,
            None => &mut *self.target,
        }
    }

    /// Reorder the staged result (if any) into the caller's buffer.
    pub fn finish(self) -> Result<()> {
        if let Some(staging) = self.staging {
            log::trace!("write back {} -> {}", staging.desc(), self.target.desc());
            reorder_into(&staging, self.target)?;
        }
        Ok(())
    }
}
