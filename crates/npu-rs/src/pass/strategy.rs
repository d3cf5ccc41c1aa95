//! Streaming-strategy seam and the ordered `(strategy, block config)` probe.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capabilities::HardwareCapabilities;
use crate::graph::{MceOperation, MceOperationData, WeightFormat};
use crate::pass::strategies::StrategyFc;
use crate::pass::{BlockConfig, MceAlgorithm};
use crate::sram::SramAllocator;
use crate::utils::{ShapeMultiplier, TensorShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StrategyKind {
    #[default]
    Strategy0,
    Strategy1,
    Strategy3,
    Strategy4,
    Strategy5,
    Strategy6,
    Strategy7,
    StrategyFc,
}

/// One SRAM tile: its offset, the stripe shape it streams, and the total
/// tile footprint in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SramAllocation {
    pub offset: u32,
    pub stripe_shape: TensorShape,
    pub tile_size: u32,
}

/// The per-pass plan a successful strategy probe produces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TensorConfig {
    pub strategy: StrategyKind,
    pub block_width: u32,
    pub block_height: u32,
    pub input: SramAllocation,
    pub output: SramAllocation,
    pub weights: SramAllocation,
    pub ple_code: SramAllocation,
}

/// Everything a strategy needs to decide whether it can lay the pass out.
#[derive(Debug, Clone, Copy)]
pub struct StrategyRequest<'a> {
    pub caps: &'a HardwareCapabilities,
    /// The MCE input shape, which may come from a supertensor and so differ
    /// from the first working node's own shape.
    pub input_shape: TensorShape,
    /// Shape of the last working node's output.
    pub output_shape: TensorShape,
    pub weights_format: WeightFormat,
    /// Weight shape after any winograd padding.
    pub weights_shape: TensorShape,
    pub block_config: BlockConfig,
    pub shape_multiplier: ShapeMultiplier,
    /// Whether the pass input is already resident in SRAM, and where.
    pub input_in_sram: bool,
    pub input_sram_offset: u32,
    pub algorithm: MceAlgorithm,
    /// Upper bound on output stripe depth; `u32::MAX` when unconstrained.
    pub depth_max: u32,
}

/// A scheme for laying input, output, and weight stripes out across SRAM.
///
/// `try_setup` must be pure on failure: when it returns `false` neither the
/// config nor the allocator may have been touched.
pub trait SramStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn try_setup(
        &self,
        request: &StrategyRequest<'_>,
        config: &mut TensorConfig,
        allocator: &mut SramAllocator,
    ) -> bool;
}

/// Fully connected schedules with its own strategy family; everything else
/// uses the caller's allow-list unchanged.
pub fn valid_strategies(
    mce: &MceOperationData,
    allowed: &[Arc<dyn SramStrategy>],
) -> Vec<Arc<dyn SramStrategy>> {
    if mce.operation == MceOperation::FullyConnected {
        vec![Arc::new(StrategyFc)]
    } else {
        allowed.to_vec()
    }
}

/// Probes every `(strategy, block config)` pair in order and keeps the first
/// layout that fits. On success the allocator holds the winning reservations
/// and `config` is fully populated.
pub fn choose_and_setup_strategy(
    strategies: &[Arc<dyn SramStrategy>],
    block_configs: &[BlockConfig],
    request: StrategyRequest<'_>,
    config: &mut TensorConfig,
    allocator: &mut SramAllocator,
) -> bool {
    for strategy in strategies {
        for block_config in block_configs {
            let request = StrategyRequest {
                block_config: *block_config,
                ..request
            };
            if strategy.try_setup(&request, config, allocator) {
                config.strategy = strategy.kind();
                config.block_width = block_config.width;
                config.block_height = block_config.height;
                return true;
            }
        }
    }
    false
}
