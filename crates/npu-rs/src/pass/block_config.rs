//! Block-config filtering and ranking.
//!
//! Candidates arrive as the caller's allow-list and leave filtered down to
//! what the chosen algorithm and the fused PLE kernel can execute, ordered so
//! the most promising config is tried first. An empty result is a planning
//! failure ("no block config") reported by the strategy selector upstream.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::capabilities::HardwareCapabilities;
use crate::command_stream::PleOperation;
use crate::graph::{FuseOnlyPleData, MceOperation, MceOperationData};
use crate::pass::MceAlgorithm;
use crate::utils::TensorShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockConfig {
    pub width: u32,
    pub height: u32,
}

impl BlockConfig {
    pub const fn new(width: u32, height: u32) -> Self {
        BlockConfig { width, height }
    }

    fn area(self) -> u32 {
        self.width * self.height
    }
}

/// Every block shape the hardware can issue, largest first.
pub fn default_block_configs() -> Vec<BlockConfig> {
    vec![
        BlockConfig::new(16, 16),
        BlockConfig::new(32, 8),
        BlockConfig::new(8, 32),
        BlockConfig::new(16, 8),
        BlockConfig::new(8, 16),
        BlockConfig::new(8, 8),
    ]
}

pub fn filter_and_sort_block_configs(
    mce: &MceOperationData,
    ple: Option<&FuseOnlyPleData>,
    allowed: &[BlockConfig],
    caps: &HardwareCapabilities,
    output_shape: TensorShape,
    algorithm: MceAlgorithm,
) -> Vec<BlockConfig> {
    let weights_height = mce.weights.dimensions[0];
    let weights_width = mce.weights.dimensions[1];

    let mut res: Vec<BlockConfig> = allowed.to_vec();

    if algorithm == MceAlgorithm::Winograd {
        let winograd_2d = weights_height > 1 && weights_width > 1;
        // 1-D winograd can produce twice the output elements per block, so
        // the accumulator budget stretches twice as far.
        let max_allowed_wxh =
            caps.total_accumulators_per_engine / if winograd_2d { 4 } else { 2 };
        res.retain(|config| config.area() <= max_allowed_wxh);
        res.sort_by(|a, b| {
            winograd_order(*a, *b, output_shape, weights_width, weights_height)
        });
    }

    if mce.operation == MceOperation::FullyConnected {
        res.retain(|config| *config == BlockConfig::new(8, 8));
    }

    if let Some(ple) = ple {
        match ple.operation {
            PleOperation::Interleave2x2Stride2 => {
                res.retain(|config| *config == BlockConfig::new(16, 16));
            }
            PleOperation::MaxPool2x2Stride2 => {
                let supported = [
                    BlockConfig::new(16, 16),
                    BlockConfig::new(32, 8),
                    BlockConfig::new(8, 8),
                ];
                res.retain(|config| supported.contains(config));
            }
            PleOperation::MeanXy8x8 => {
                res.retain(|config| *config == BlockConfig::new(8, 8));
            }
            PleOperation::MaxPool3x3Stride2 => {
                let supported = [BlockConfig::new(32, 8), BlockConfig::new(8, 8)];
                res.retain(|config| supported.contains(config));
            }
            _ => {}
        }
    }

    res
}

/// Ordering used under winograd. Configs the whole output plane fits into
/// come first, tightest fit leading; among the rest, the config leaving the
/// largest partial blocks at the plane's edge wins.
///
/// Example on a 17x17 output plane:
///   16x16 blocks: score = 17%16 + 17%16 = 2
///   32x8  blocks: score = 17%32 + 17%8  = 18, so 32x8 is preferred.
fn winograd_order(
    a: BlockConfig,
    b: BlockConfig,
    output_shape: TensorShape,
    weights_width: u32,
    weights_height: u32,
) -> Ordering {
    let fits = |config: BlockConfig| {
        output_shape[1] <= config.height && output_shape[2] <= config.width
    };

    match (fits(a), fits(b)) {
        (true, true) => a.area().cmp(&b.area()),
        (false, false) => {
            let remainder =
                |config: BlockConfig| output_shape[1] % config.height + output_shape[2] % config.width;
            let (rem_a, rem_b) = (remainder(a), remainder(b));
            if rem_a == rem_b {
                // Favour the larger block dimension along the longer kernel
                // axis.
                if weights_width > weights_height {
                    (b.width, b.height).cmp(&(a.width, a.height))
                } else {
                    (b.height, b.width).cmp(&(a.height, a.width))
                }
            } else {
                rem_b.cmp(&rem_a)
            }
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    }
}
