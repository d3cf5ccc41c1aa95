//! Hardware capability table.
//!
//! The capability set is read-only configuration supplied by the caller; the
//! planner never mutates it. The `Default` values describe an eight-engine
//! variant and are the configuration the integration tests run against.

use serde::{Deserialize, Serialize};

use crate::utils::TensorShape;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareCapabilities {
    pub number_of_engines: u32,
    pub ifm_per_engine: u32,
    pub ofm_per_engine: u32,
    /// Total OFM generated per cycle across all engines.
    pub number_of_ofm: u32,
    /// Number of SRAM banks addressable by the DMA.
    pub number_of_srams: u32,
    pub mac_units_per_engine: u32,
    pub total_accumulators_per_engine: u32,
    /// Smallest unit of output the MCE produces, in NHWC.
    pub patch_shape: TensorShape,
    /// Packing unit of the brick-group (NHWCB) format, in NHWC.
    pub brick_group_shape: TensorShape,
    /// Output elements produced per 1-D winograd patch.
    pub output_size_per_winograd_1d: u32,
    /// Output elements produced per 2-D winograd patch.
    pub output_size_per_winograd_2d: u32,
    /// Multiplications consumed per 1-D winograd patch.
    pub macs_per_winograd_1d: u32,
    /// Multiplications consumed per 2-D winograd patch.
    pub macs_per_winograd_2d: u32,
    /// Sub-kernel size that wide kernels decompose into.
    pub wide_kernel_size: u32,
    /// Total SRAM available to pass planning, in bytes.
    pub sram_size: u32,
}

impl Default for HardwareCapabilities {
    fn default() -> Self {
        HardwareCapabilities {
            number_of_engines: 8,
            ifm_per_engine: 2,
            ofm_per_engine: 2,
            number_of_ofm: 16,
            number_of_srams: 16,
            mac_units_per_engine: 8,
            total_accumulators_per_engine: 1024,
            patch_shape: [1, 4, 4, 1],
            brick_group_shape: [1, 8, 8, 16],
            output_size_per_winograd_1d: 2,
            output_size_per_winograd_2d: 2,
            macs_per_winograd_1d: 4,
            macs_per_winograd_2d: 16,
            wide_kernel_size: 3,
            sram_size: 0x0010_0000,
        }
    }
}
