//! Built-in streaming strategies.
//!
//! Each strategy lays the pass out differently across SRAM: whole-tensor
//! residency, weight streaming, or input streaming. All of them probe a copy
//! of the allocator and only write through on success, so a failed probe
//! leaves both the allocator and the config untouched. Callers with unusual
//! memory systems can substitute their own implementations through the
//! [`SramStrategy`] seam.

use crate::pass::strategy::{SramAllocation, SramStrategy, StrategyKind, StrategyRequest, TensorConfig};
use crate::sram::SramAllocator;
use crate::utils::{div_round_up, round_up_to_multiple, shape_element_count, TensorShape};

/// Reserved footprint for the PLE kernel code blob.
const PLE_CODE_SIZE: u32 = 0x1000;

fn round_to_brick_group(shape: TensorShape, brick_group: TensorShape) -> TensorShape {
    [
        shape[0],
        round_up_to_multiple(shape[1], brick_group[1]),
        round_up_to_multiple(shape[2], brick_group[2]),
        round_up_to_multiple(shape[3], brick_group[3]),
    ]
}

/// One candidate layout: stripe shape plus the number of stripes the tile
/// ring holds.
struct TilePlan {
    stripe_shape: TensorShape,
    num_stripes_in_tile: u32,
}

impl TilePlan {
    fn single(stripe_shape: TensorShape) -> Self {
        TilePlan {
            stripe_shape,
            num_stripes_in_tile: 1,
        }
    }

    fn tile_size(&self) -> u32 {
        shape_element_count(self.stripe_shape).saturating_mul(self.num_stripes_in_tile)
    }
}

/// Reserves input, output, weights, and PLE code on a probe copy of the
/// allocator and commits only when all four fit.
fn commit_layout(
    request: &StrategyRequest<'_>,
    input: TilePlan,
    output: TilePlan,
    weights: TilePlan,
    config: &mut TensorConfig,
    allocator: &mut SramAllocator,
) -> bool {
    if shape_element_count(request.input_shape) == 0
        || shape_element_count(request.output_shape) == 0
    {
        return false;
    }

    let mut probe = allocator.clone();

    let input_offset = if request.input_in_sram {
        request.input_sram_offset
    } else {
        match probe.reserve(input.tile_size()) {
            Some(offset) => offset,
            None => return false,
        }
    };
    let Some(output_offset) = probe.reserve(output.tile_size()) else {
        return false;
    };
    let Some(weights_offset) = probe.reserve(weights.tile_size()) else {
        return false;
    };
    let Some(ple_offset) = probe.reserve(PLE_CODE_SIZE) else {
        return false;
    };

    config.input = SramAllocation {
        offset: input_offset,
        stripe_shape: input.stripe_shape,
        tile_size: input.tile_size(),
    };
    config.output = SramAllocation {
        offset: output_offset,
        stripe_shape: output.stripe_shape,
        tile_size: output.tile_size(),
    };
    config.weights = SramAllocation {
        offset: weights_offset,
        stripe_shape: weights.stripe_shape,
        tile_size: weights.tile_size(),
    };
    config.ple_code = SramAllocation {
        offset: ple_offset,
        stripe_shape: [0; 4],
        tile_size: PLE_CODE_SIZE,
    };
    *allocator = probe;
    true
}

/// Streams the IFM through SRAM one row of brick groups at a time; weights
/// stay resident. Suits tall inputs with modest weight footprints.
pub struct Strategy0;

impl SramStrategy for Strategy0 {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Strategy0
    }

    fn try_setup(
        &self,
        request: &StrategyRequest<'_>,
        config: &mut TensorConfig,
        allocator: &mut SramAllocator,
    ) -> bool {
        // Streaming reloads the input from DRAM; an input pinned in SRAM
        // has nothing to stream.
        if request.input_in_sram {
            return false;
        }

        let brick_group = request.caps.brick_group_shape;
        let input_full = round_to_brick_group(request.input_shape, brick_group);
        let output_full = round_to_brick_group(request.output_shape, brick_group);
        if output_full[3] > request.depth_max {
            return false;
        }

        let input_stripe = [input_full[0], brick_group[1], input_full[2], input_full[3]];
        let num_input_stripes = div_round_up(input_full[1], brick_group[1]);

        let output_stripe_height = round_up_to_multiple(
            request.shape_multiplier.h.apply(brick_group[1]),
            brick_group[1],
        );
        let output_stripe = [
            output_full[0],
            output_stripe_height,
            output_full[2],
            output_full[3],
        ];
        let num_output_stripes = div_round_up(output_full[1], output_stripe_height);

        commit_layout(
            request,
            TilePlan {
                stripe_shape: input_stripe,
                // Neighbouring stripes stay resident for the kernel halo.
                num_stripes_in_tile: num_input_stripes.min(3),
            },
            TilePlan {
                stripe_shape: output_stripe,
                num_stripes_in_tile: num_output_stripes.min(2),
            },
            TilePlan::single(request.weights_shape),
            config,
            allocator,
        )
    }
}

/// Keeps the whole IFM resident and streams weights (and the OFM) in depth
/// stripes. Suits deep outputs whose weights dwarf the activations.
pub struct Strategy1;

impl SramStrategy for Strategy1 {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Strategy1
    }

    fn try_setup(
        &self,
        request: &StrategyRequest<'_>,
        config: &mut TensorConfig,
        allocator: &mut SramAllocator,
    ) -> bool {
        let brick_group = request.caps.brick_group_shape;
        let input_full = round_to_brick_group(request.input_shape, brick_group);
        let output_full = round_to_brick_group(request.output_shape, brick_group);

        let stripe_depth = round_up_to_multiple(request.caps.number_of_ofm, brick_group[3])
            .min(request.depth_max)
            .min(output_full[3]);
        if stripe_depth == 0 {
            return false;
        }
        let output_stripe = [
            output_full[0],
            output_full[1],
            output_full[2],
            stripe_depth,
        ];
        let num_depth_stripes = div_round_up(output_full[3], stripe_depth);

        let weights = request.weights_shape;
        let weights_plan = match request.weights_format {
            crate::graph::WeightFormat::Hwio => TilePlan {
                stripe_shape: [weights[0], weights[1], weights[2], stripe_depth.min(weights[3])],
                num_stripes_in_tile: if num_depth_stripes > 1 { 2 } else { 1 },
            },
            // Depthwise weights are small; keep them whole.
            crate::graph::WeightFormat::Hwim => TilePlan::single(weights),
        };

        commit_layout(
            request,
            TilePlan::single(input_full),
            TilePlan {
                stripe_shape: output_stripe,
                num_stripes_in_tile: if num_depth_stripes > 1 { 2 } else { 1 },
            },
            weights_plan,
            config,
            allocator,
        )
    }
}

/// Everything resident: one stripe per tensor covering the whole tensor.
/// The only strategy whose output can stay in SRAM for the next pass.
pub struct Strategy3;

impl SramStrategy for Strategy3 {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Strategy3
    }

    fn try_setup(
        &self,
        request: &StrategyRequest<'_>,
        config: &mut TensorConfig,
        allocator: &mut SramAllocator,
    ) -> bool {
        let brick_group = request.caps.brick_group_shape;
        let input_full = round_to_brick_group(request.input_shape, brick_group);
        let output_full = round_to_brick_group(request.output_shape, brick_group);
        if output_full[3] > request.depth_max {
            return false;
        }

        commit_layout(
            request,
            TilePlan::single(input_full),
            TilePlan::single(output_full),
            TilePlan::single(request.weights_shape),
            config,
            allocator,
        )
    }
}

/// Fully-connected layout: the input is viewed as an 8x8 plane and the OFM
/// ping-pongs through SRAM in engine-width depth stripes.
pub struct StrategyFc;

impl SramStrategy for StrategyFc {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StrategyFc
    }

    fn try_setup(
        &self,
        request: &StrategyRequest<'_>,
        config: &mut TensorConfig,
        allocator: &mut SramAllocator,
    ) -> bool {
        let brick_group = request.caps.brick_group_shape;
        let input_full = round_to_brick_group(request.input_shape, brick_group);
        let output_full = round_to_brick_group(request.output_shape, brick_group);

        let stripe_depth = round_up_to_multiple(request.caps.number_of_ofm, brick_group[3])
            .min(request.depth_max)
            .min(output_full[3]);
        if stripe_depth == 0 {
            return false;
        }
        let num_depth_stripes = div_round_up(output_full[3], stripe_depth);
        let ping_pong = if num_depth_stripes > 1 { 2 } else { 1 };

        let weights = request.weights_shape;

        commit_layout(
            request,
            TilePlan::single(input_full),
            TilePlan {
                stripe_shape: [output_full[0], output_full[1], output_full[2], stripe_depth],
                num_stripes_in_tile: ping_pong,
            },
            TilePlan {
                stripe_shape: [weights[0], weights[1], weights[2], stripe_depth.min(weights[3])],
                num_stripes_in_tile: ping_pong,
            },
            config,
            allocator,
        )
    }
}

/// The probe order used when the caller does not supply its own list:
/// most-resident first.
pub fn default_strategies() -> Vec<std::sync::Arc<dyn SramStrategy>> {
    vec![
        std::sync::Arc::new(Strategy3),
        std::sync::Arc::new(Strategy1),
        std::sync::Arc::new(Strategy0),
    ]
}
