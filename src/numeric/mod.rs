//! Numeric element and accumulator types
//!
//! Weights, biases and activations are stored in any [`Element`] type
//! (`f16`, `bf16`, `f32`, `f64`). All sums and products run in the
//! [`Accumulator`] type, using its native IEEE arithmetic: overflow yields
//! `±inf`, invalid operations yield `NaN`, nothing saturates or panics.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub};

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// Numeric representation selectable in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    /// IEEE 754 half precision
    F16,
    /// bfloat16
    Bf16,
    /// IEEE 754 single precision
    F32,
    /// IEEE 754 double precision
    F64,
}

impl NumericKind {
    /// Whether this kind can be used as an accumulator
    pub fn is_accumulator(&self) -> bool {
        matches!(self, NumericKind::F32 | NumericKind::F64)
    }

    /// Storage size of one element in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            NumericKind::F16 | NumericKind::Bf16 => 2,
            NumericKind::F32 => 4,
            NumericKind::F64 => 8,
        }
    }
}

impl fmt::Display for NumericKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericKind::F16 => write!(f, "f16"),
            NumericKind::Bf16 => write!(f, "bf16"),
            NumericKind::F32 => write!(f, "f32"),
            NumericKind::F64 => write!(f, "f64"),
        }
    }
}

/// A storage element of a tensor, weight or bias array
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Configuration tag for this type
    const KIND: NumericKind;

    fn to_f64(self) -> f64;

    fn from_f64(value: f64) -> Self;
}

/// Arithmetic type used for every sum and product in the pipeline
pub trait Accumulator:
    Element
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + AddAssign
{
    const ZERO: Self;
    const ONE: Self;
    const NEG_INFINITY: Self;

    fn exp(self) -> Self;

    fn sqrt(self) -> Self;

    fn max(self, other: Self) -> Self;

    /// Convert a storage element into the accumulator domain
    #[inline]
    fn widen<E: Element>(value: E) -> Self {
        Self::from_f64(value.to_f64())
    }
}

impl Element for f16 {
    const KIND: NumericKind = NumericKind::F16;

    #[inline]
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }
}

impl Element for bf16 {
    const KIND: NumericKind = NumericKind::Bf16;

    #[inline]
    fn to_f64(self) -> f64 {
        bf16::to_f64(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        bf16::from_f64(value)
    }
}

impl Element for f32 {
    const KIND: NumericKind = NumericKind::F32;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Element for f64 {
    const KIND: NumericKind = NumericKind::F64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

impl Accumulator for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const NEG_INFINITY: Self = f32::NEG_INFINITY;

    #[inline]
    fn exp(self) -> Self {
        f32::exp(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        f32::max(self, other)
    }
}

impl Accumulator for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const NEG_INFINITY: Self = f64::NEG_INFINITY;

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        f64::max(self, other)
    }
}
