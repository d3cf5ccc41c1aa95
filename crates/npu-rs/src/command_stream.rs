//! Wire-level records handed to the command-stream assembler, plus the
//! DRAM buffer-table seam.
//!
//! Serialization of the stream itself and DRAM lifetime management are the
//! assembler's business; the planner only constructs one [`McePle`] record
//! per committed pass and registers the buffers it references.

use serde::{Deserialize, Serialize};

use crate::pass::BlockConfig;
use crate::utils::TensorShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Qasymm8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandDataFormat {
    Nhwc,
    Nhwcb,
    NhwcbCompressed,
    WeightStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLocation {
    Dram,
    Sram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsampleMode {
    Off,
    Transpose,
}

/// Programmable kernels the PLE can run fused behind the MCE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PleOperation {
    Passthrough,
    Interleave2x2Stride2,
    MaxPool2x2Stride2,
    MaxPool3x3Stride2,
    MeanXy8x8,
    Sigmoid,
}

/// Strategy tags as the firmware sees them. The firmware schedules from the
/// stripe and tile shapes, not from the tag, so the compiler-side
/// fully-connected strategy maps onto `Strategy1` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SramAllocationStrategy {
    Strategy0,
    Strategy1,
    Strategy3,
    Strategy4,
    Strategy5,
    Strategy6,
    Strategy7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SramConfig {
    pub allocation_strategy: SramAllocationStrategy,
}

/// Per-tensor slice of an [`McePle`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorBufferInfo {
    pub data_type: DataType,
    pub data_format: CommandDataFormat,
    pub tensor_shape: TensorShape,
    pub supertensor_shape: TensorShape,
    pub supertensor_offset: TensorShape,
    pub stripe_shape: TensorShape,
    pub tile_size: u32,
    pub dram_buffer_id: u32,
    pub sram_offset: u32,
    pub zero_point: u8,
    pub data_location: DataLocation,
}

impl Default for TensorBufferInfo {
    fn default() -> Self {
        TensorBufferInfo {
            data_type: DataType::Qasymm8,
            data_format: CommandDataFormat::Nhwcb,
            tensor_shape: [0; 4],
            supertensor_shape: [0; 4],
            supertensor_offset: [0; 4],
            stripe_shape: [0; 4],
            tile_size: 0,
            dram_buffer_id: 0,
            sram_offset: 0,
            zero_point: 0,
            data_location: DataLocation::Dram,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MceData {
    pub operation: crate::graph::MceOperation,
    pub algorithm: crate::pass::MceAlgorithm,
    pub stride: crate::graph::Stride,
    pub activation_min: u8,
    pub activation_max: u8,
    pub upsample_mode: UpsampleMode,
    pub uninterleaved_input_shape: TensorShape,
    pub output_shape: TensorShape,
    pub output_stripe_shape: TensorShape,
    pub output_zero_point: i16,
    pub output_rescale_multiplier: u16,
    pub output_rescale_shift: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PleData {
    /// SRAM offset the kernel code is loaded at.
    pub ce_sram: u32,
    pub ple_sram: u32,
    pub operation: PleOperation,
}

/// One fused MCE + PLE hardware command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McePle {
    pub sram_config: SramConfig,
    pub input_info: TensorBufferInfo,
    pub weight_info: TensorBufferInfo,
    pub output_info: TensorBufferInfo,
    pub block_config: BlockConfig,
    pub weight_metadata_buffer_id: u32,
    pub mce_data: MceData,
    pub ple_data: PleData,
}

pub trait CommandSink {
    fn push_mce_ple(&mut self, command: McePle);
}

/// In-memory sink collecting the emitted records in order.
#[derive(Debug, Default)]
pub struct CommandStream {
    commands: Vec<McePle>,
}

impl CommandStream {
    pub fn new() -> Self {
        CommandStream::default()
    }

    pub fn commands(&self) -> &[McePle] {
        &self.commands
    }
}

impl CommandSink for CommandStream {
    fn push_mce_ple(&mut self, command: McePle) {
        self.commands.push(command);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferType {
    Intermediate,
    ConstantDma,
    ConstantControlUnit,
}

/// DRAM buffer table owned by the surrounding compile driver.
pub trait BufferManager {
    /// Registers constant data and returns its buffer id.
    fn add_dram_constant(&mut self, buffer_type: BufferType, data: Vec<u8>) -> u32;
    /// Reserves an intermediate DRAM buffer of `size` bytes.
    fn add_dram(&mut self, buffer_type: BufferType, size: u32) -> u32;
    /// Records a buffer that stays resident in SRAM at `offset`.
    fn add_sram(&mut self, size: u32, offset: u32) -> u32;
}

/// Simple table-backed [`BufferManager`] for tests and standalone use.
#[derive(Debug, Default)]
pub struct BufferTable {
    entries: Vec<BufferEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEntry {
    DramConstant { buffer_type: BufferType, data: Vec<u8> },
    Dram { buffer_type: BufferType, size: u32 },
    Sram { size: u32, offset: u32 },
}

impl BufferTable {
    pub fn new() -> Self {
        BufferTable::default()
    }

    pub fn entries(&self) -> &[BufferEntry] {
        &self.entries
    }

    fn push(&mut self, entry: BufferEntry) -> u32 {
        self.entries.push(entry);
        self.entries.len() as u32 - 1
    }
}

impl BufferManager for BufferTable {
    fn add_dram_constant(&mut self, buffer_type: BufferType, data: Vec<u8>) -> u32 {
        self.push(BufferEntry::DramConstant { buffer_type, data })
    }

    fn add_dram(&mut self, buffer_type: BufferType, size: u32) -> u32 {
        self.push(BufferEntry::Dram { buffer_type, size })
    }

    fn add_sram(&mut self, size: u32, offset: u32) -> u32 {
        self.push(BufferEntry::Sram { size, offset })
    }
}
