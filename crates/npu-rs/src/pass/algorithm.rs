//! Convolution algorithm selection.
//!
//! Winograd trades larger intermediates for fewer multiplications, so it is
//! only worth issuing when the multiplication count actually drops below the
//! direct form. Kernels wider than the wide-kernel size decompose into
//! multiple sub-kernels, which the winograd count accounts for.

use serde::{Deserialize, Serialize};

use crate::capabilities::HardwareCapabilities;
use crate::graph::{AlgorithmHint, MceOperation, MceOperationData, Stride};
use crate::utils::{div_round_up, round_up_to_multiple, TensorShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MceAlgorithm {
    Direct,
    Winograd,
}

/// Compares multiplication counts for a `kernel_w x kernel_h` convolution and
/// picks winograd only when it is a strict win.
pub fn choose_conv_algorithm(
    caps: &HardwareCapabilities,
    kernel_w: u32,
    kernel_h: u32,
) -> MceAlgorithm {
    let wide_kernel_size = caps.wide_kernel_size;
    let (mults_direct, mults_winograd) = if kernel_w == 1 || kernel_h == 1 {
        (
            kernel_w * kernel_h * caps.output_size_per_winograd_2d * caps.output_size_per_winograd_1d,
            caps.macs_per_winograd_1d * div_round_up(kernel_w * kernel_h, wide_kernel_size),
        )
    } else {
        (
            kernel_w * kernel_h * caps.output_size_per_winograd_2d * caps.output_size_per_winograd_2d,
            caps.macs_per_winograd_2d
                * div_round_up(kernel_w, wide_kernel_size)
                * div_round_up(kernel_h, wide_kernel_size),
        )
    };

    if mults_winograd < mults_direct {
        MceAlgorithm::Winograd
    } else {
        MceAlgorithm::Direct
    }
}

/// Applies the winograd gate: the node's hint, the global enable, plain
/// convolution only, unit stride, no upscaling. Anything else is direct.
pub fn select_mce_algorithm(
    mce: &MceOperationData,
    caps: &HardwareCapabilities,
    enable_winograd: bool,
) -> MceAlgorithm {
    if mce.algorithm_hint == AlgorithmHint::AllowWinograd
        && enable_winograd
        && mce.operation == MceOperation::Convolution
        && mce.stride == (Stride { x: 1, y: 1 })
        && mce.upscale_factor == 1
    {
        choose_conv_algorithm(caps, mce.weights.dimensions[1], mce.weights.dimensions[0])
    } else {
        MceAlgorithm::Direct
    }
}

/// Winograd kernels are padded up to a multiple of 3 on any axis that is not
/// already 1; strategy selection has to plan for the padded shape.
pub fn winograd_weights_shape(shape: TensorShape) -> TensorShape {
    let mut rounded = shape;
    for axis in 0..2 {
        if rounded[axis] != 1 {
            rounded[axis] = round_up_to_multiple(rounded[axis], 3);
        }
    }
    rounded
}
