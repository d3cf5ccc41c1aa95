//! Shape arithmetic shared across the planner.
//!
//! All extents are unsigned 32-bit. The helpers widen to 64 bits internally
//! and saturate on the way back down so boundary values cannot wrap.

use std::ops::Mul;

use serde::{Deserialize, Serialize};

/// Tensor extents in NHWC order.
pub type TensorShape = [u32; 4];

/// Ceiling division, saturating at `u32::MAX`.
pub fn div_round_up(numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 {
        return u32::MAX;
    }
    let value = (u64::from(numerator) + u64::from(denominator) - 1) / u64::from(denominator);
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Rounds `value` up to the nearest multiple of `multiple`, saturating at
/// `u32::MAX`.
pub fn round_up_to_multiple(value: u32, multiple: u32) -> u32 {
    if multiple == 0 {
        return value;
    }
    let rounded = u64::from(div_round_up(value, multiple)) * u64::from(multiple);
    u32::try_from(rounded).unwrap_or(u32::MAX)
}

/// Number of elements in a shape, saturating at `u32::MAX`.
pub fn shape_element_count(shape: TensorShape) -> u32 {
    let count = shape.iter().fold(1u64, |acc, &dim| {
        acc.saturating_mul(u64::from(dim))
    });
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// An exact rational scale factor applied to a single tensor axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    pub const ONE: Fraction = Fraction {
        numerator: 1,
        denominator: 1,
    };

    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Fraction {
            numerator,
            denominator,
        }
    }

    /// Scales `value`, saturating at `u32::MAX`.
    pub fn apply(self, value: u32) -> u32 {
        if self.denominator == 0 {
            return u32::MAX;
        }
        let scaled = u64::from(value) * u64::from(self.numerator) / u64::from(self.denominator);
        u32::try_from(scaled).unwrap_or(u32::MAX)
    }
}

impl Mul for Fraction {
    type Output = Fraction;

    fn mul(self, rhs: Fraction) -> Fraction {
        Fraction {
            numerator: self.numerator.saturating_mul(rhs.numerator),
            denominator: self.denominator.saturating_mul(rhs.denominator),
        }
    }
}

/// Per-axis scale applied to an operation's input shape to obtain its output
/// shape. The MCE and a fused PLE kernel each contribute one; the product of
/// the two describes the whole pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeMultiplier {
    pub h: Fraction,
    pub w: Fraction,
    pub c: Fraction,
}

impl ShapeMultiplier {
    pub const IDENTITY: ShapeMultiplier = ShapeMultiplier {
        h: Fraction::ONE,
        w: Fraction::ONE,
        c: Fraction::ONE,
    };

    pub fn apply_to(self, shape: TensorShape) -> TensorShape {
        [
            shape[0],
            self.h.apply(shape[1]),
            self.w.apply(shape[2]),
            self.c.apply(shape[3]),
        ]
    }
}

impl Mul for ShapeMultiplier {
    type Output = ShapeMultiplier;

    fn mul(self, rhs: ShapeMultiplier) -> ShapeMultiplier {
        ShapeMultiplier {
            h: self.h * rhs.h,
            w: self.w * rhs.w,
            c: self.c * rhs.c,
        }
    }
}

/// Derives the fixed-point `{multiplier, shift}` pair that best approximates
/// `factor`, with the multiplier held in 16 bits. Factors too large for any
/// shift saturate to `(u16::MAX, 0)`; factors below the smallest
/// representable step clamp to `(1, 16)`.
pub fn calculate_rescale_multiplier_and_shift(factor: f64) -> (u16, u16) {
    for shift in (0..=16u16).rev() {
        let multiplier = (factor * f64::from(1u32 << shift)).round();
        if multiplier < 1.0 {
            return (1, shift);
        }
        if multiplier < 65536.0 {
            return (multiplier as u16, shift);
        }
    }
    (u16::MAX, 0)
}
