use std::cell::RefCell;

use anyhow::Result;
use npu_rs::command_stream::{
    BufferEntry, BufferTable, BufferType, CommandDataFormat, CommandStream, DataLocation,
    PleOperation, SramAllocationStrategy, UpsampleMode,
};
use npu_rs::graph::{
    AlgorithmHint, BufferLocation, DataFormat, FuseOnlyPleData, Graph, MceOperation,
    MceOperationData, NodeId, NodeKind, QuantizationInfo, Stride, WeightFormat, WeightsInfo,
};
use npu_rs::pass::{CompileOptions, PassPlanner, PlanOutcome};
use npu_rs::utils::{
    calculate_rescale_multiplier_and_shift, Fraction, ShapeMultiplier, TensorShape,
};
use npu_rs::weights::{
    weight_stripe_size_and_depth, EncodedWeights, UncompressedWeightEncoder, WeightEncoder,
};
use npu_rs::{HardwareCapabilities, SramAllocator};

fn quant() -> QuantizationInfo {
    QuantizationInfo::new(0, 0.5)
}

fn add_input(graph: &mut Graph, shape: TensorShape, format: DataFormat) -> NodeId {
    let input = graph.add_node(NodeKind::Input, shape, format, quant(), &[]);
    graph.set_location(input, BufferLocation::Dram);
    graph.set_buffer_id(input, 7);
    input
}

fn conv_data(kernel_h: u32, kernel_w: u32, ifm: u32, ofm: u32) -> MceOperationData {
    MceOperationData {
        operation: MceOperation::Convolution,
        weights: WeightsInfo {
            dimensions: [kernel_h, kernel_w, ifm, ofm],
            format: WeightFormat::Hwio,
            quant_info: QuantizationInfo::new(3, 0.5),
        },
        stride: Stride { x: 1, y: 1 },
        upscale_factor: 1,
        algorithm_hint: AlgorithmHint::AllowWinograd,
        uninterleaved_input_shape: [0; 4],
        shape_multiplier: ShapeMultiplier::IDENTITY,
    }
}

fn plan_and_emit(
    graph: &mut Graph,
    seed: NodeId,
    caps: &HardwareCapabilities,
    encoder: &dyn WeightEncoder,
) -> (npu_rs::McePlePass, BufferTable, CommandStream) {
    let options = CompileOptions::default();
    let mut allocator = SramAllocator::new(caps.sram_size);
    let planner = PassPlanner::new(caps, &options);
    let PlanOutcome::Pass(pass) = planner.plan_pass(graph, seed, &mut allocator, 0) else {
        panic!("expected a committed pass");
    };
    let mut buffers = BufferTable::new();
    let mut stream = CommandStream::new();
    pass.emit(graph, caps, encoder, &mut buffers, &mut stream)
        .expect("emission failed");
    (*pass, buffers, stream)
}

#[test]
fn rescale_multiplier_and_shift_maximise_precision() {
    assert_eq!(calculate_rescale_multiplier_and_shift(1.0), (32768, 15));
    assert_eq!(calculate_rescale_multiplier_and_shift(2.0), (32768, 14));
    // Factors too large for any shift saturate.
    assert_eq!(calculate_rescale_multiplier_and_shift(70000.0), (u16::MAX, 0));
}

#[test]
fn emitted_record_carries_the_planned_layout() {
    let caps = HardwareCapabilities::default();
    let mut graph = Graph::new();
    let input = add_input(&mut graph, [1, 16, 16, 16], DataFormat::Nhwcb);
    let mce = graph.add_node(
        NodeKind::MceOperation(Box::new(conv_data(3, 3, 16, 16))),
        [1, 16, 16, 16],
        DataFormat::Nhwcb,
        quant(),
        &[input],
    );

    let (pass, buffers, stream) =
        plan_and_emit(&mut graph, mce, &caps, &UncompressedWeightEncoder);

    let [command] = stream.commands() else {
        panic!("expected exactly one command");
    };
    assert_eq!(
        command.sram_config.allocation_strategy,
        SramAllocationStrategy::Strategy3
    );
    assert_eq!(command.block_config.width, 16);
    assert_eq!(command.block_config.height, 16);
    assert_eq!(command.input_info.dram_buffer_id, 7);
    assert_eq!(command.input_info.data_location, DataLocation::Dram);
    assert_eq!(command.input_info.stripe_shape, pass.tensor_config().input.stripe_shape);
    assert_eq!(command.output_info.data_location, DataLocation::Sram);
    assert_eq!(command.output_info.sram_offset, pass.output_sram_offset());
    assert_eq!(command.weight_info.data_format, CommandDataFormat::WeightStream);
    assert_eq!(command.weight_info.zero_point, 3);
    assert_eq!(command.ple_data.operation, PleOperation::Passthrough);
    assert_eq!(command.mce_data.upsample_mode, UpsampleMode::Off);
    // Winograd pads the emitted weight shape on both kernel axes.
    assert_eq!(command.weight_info.tensor_shape, [3, 3, 16, 16]);

    // Weights and metadata land in the constant tables; the SRAM output is
    // registered where the pass left it.
    assert!(matches!(
        buffers.entries()[0],
        BufferEntry::DramConstant {
            buffer_type: BufferType::ConstantDma,
            ..
        }
    ));
    assert!(matches!(
        buffers.entries()[1],
        BufferEntry::DramConstant {
            buffer_type: BufferType::ConstantControlUnit,
            ..
        }
    ));
    assert!(matches!(
        buffers.entries()[2],
        BufferEntry::Sram { offset, .. } if offset == pass.output_sram_offset()
    ));
    assert_eq!(graph.node(mce).buffer_id(), Some(2));
}

#[test]
fn interleave_divides_the_mce_output_stripe_depth() {
    let caps = HardwareCapabilities::default();
    let mut graph = Graph::new();
    let input = add_input(&mut graph, [1, 16, 16, 16], DataFormat::Nhwcb);
    let mce = graph.add_node(
        NodeKind::MceOperation(Box::new(conv_data(3, 3, 16, 16))),
        [1, 16, 16, 16],
        DataFormat::Nhwcb,
        quant(),
        &[input],
    );
    let interleave = graph.add_node(
        NodeKind::FuseOnlyPle(FuseOnlyPleData {
            operation: PleOperation::Interleave2x2Stride2,
            agnostic_to_requantisation: true,
            shape_multiplier: ShapeMultiplier {
                h: Fraction::new(1, 2),
                w: Fraction::new(1, 2),
                c: Fraction::new(4, 1),
            },
        }),
        [1, 8, 8, 64],
        DataFormat::Nhwcb,
        quant(),
        &[mce],
    );

    let (pass, _, stream) = plan_and_emit(&mut graph, mce, &caps, &UncompressedWeightEncoder);
    assert!(pass.nodes().contains(&interleave));

    let [command] = stream.commands() else {
        panic!("expected exactly one command");
    };
    assert_eq!(command.ple_data.operation, PleOperation::Interleave2x2Stride2);
    assert_eq!(
        command.mce_data.output_stripe_shape[3],
        pass.tensor_config().output.stripe_shape[3] / 4
    );
}

#[test]
fn sigmoid_bounds_follow_the_fixed_point_rescale() {
    let caps = HardwareCapabilities::default();
    let mut graph = Graph::new();
    let input = add_input(&mut graph, [1, 16, 16, 16], DataFormat::Nhwcb);
    let mce = graph.add_node(
        NodeKind::MceOperation(Box::new(conv_data(3, 3, 16, 16))),
        [1, 16, 16, 16],
        DataFormat::Nhwcb,
        QuantizationInfo::new(0, 1.0),
        &[input],
    );
    let sigmoid = graph.add_node(
        NodeKind::FuseOnlyPle(FuseOnlyPleData {
            operation: PleOperation::Sigmoid,
            agnostic_to_requantisation: false,
            shape_multiplier: ShapeMultiplier::IDENTITY,
        }),
        [1, 16, 16, 16],
        DataFormat::Nhwcb,
        QuantizationInfo::new(0, 1.0),
        &[mce],
    );

    let (pass, _, stream) = plan_and_emit(&mut graph, mce, &caps, &UncompressedWeightEncoder);
    assert!(pass.nodes().contains(&sigmoid));

    // rescale = 1.0 * log2(e) * 256 = 369.33; mult = 47274 at shift 7;
    // abs_max = ceil(2^22 / 47274) - 1 = 88.
    let [command] = stream.commands() else {
        panic!("expected exactly one command");
    };
    assert_eq!(command.mce_data.output_rescale_multiplier, 47274);
    assert_eq!(command.mce_data.output_rescale_shift, 7);
    assert_eq!(command.mce_data.activation_min, 0);
    assert_eq!(command.mce_data.activation_max, 88);
}

#[test]
fn sigmoid_zero_abs_max_falls_back_to_the_unit_clamp() {
    let caps = HardwareCapabilities::default();
    let mut graph = Graph::new();
    let input = add_input(&mut graph, [1, 16, 16, 16], DataFormat::Nhwcb);
    // A huge input scale saturates the rescale multiplier, collapsing
    // abs_max to zero.
    let mce = graph.add_node(
        NodeKind::MceOperation(Box::new(conv_data(3, 3, 16, 16))),
        [1, 16, 16, 16],
        DataFormat::Nhwcb,
        QuantizationInfo::new(128, 300.0),
        &[input],
    );
    let _sigmoid = graph.add_node(
        NodeKind::FuseOnlyPle(FuseOnlyPleData {
            operation: PleOperation::Sigmoid,
            agnostic_to_requantisation: false,
            shape_multiplier: ShapeMultiplier::IDENTITY,
        }),
        [1, 16, 16, 16],
        DataFormat::Nhwcb,
        QuantizationInfo::new(128, 300.0),
        &[mce],
    );

    let (_, _, stream) = plan_and_emit(&mut graph, mce, &caps, &UncompressedWeightEncoder);
    let [command] = stream.commands() else {
        panic!("expected exactly one command");
    };
    assert_eq!(
        command.mce_data.output_rescale_multiplier,
        i16::MAX as u16
    );
    assert_eq!(command.mce_data.output_rescale_shift, 0);
    assert_eq!(command.mce_data.activation_min, 127);
    assert_eq!(command.mce_data.activation_max, 129);
}

#[test]
fn fused_requantize_supplies_the_weight_encoding_quantisation() {
    struct RecordingEncoder {
        seen: RefCell<Vec<QuantizationInfo>>,
    }

    impl WeightEncoder for RecordingEncoder {
        fn encode(
            &self,
            _mce: &MceOperationData,
            _stripe_depth: u32,
            _stripe_size: u32,
            quant_info: QuantizationInfo,
        ) -> Result<EncodedWeights> {
            self.seen.borrow_mut().push(quant_info);
            Ok(EncodedWeights {
                data: vec![0; 4],
                metadata: vec![0; 4],
            })
        }
    }

    let caps = HardwareCapabilities::default();
    let mut graph = Graph::new();
    let input = add_input(&mut graph, [1, 16, 16, 16], DataFormat::Nhwcb);
    let mce = graph.add_node(
        NodeKind::MceOperation(Box::new(conv_data(3, 3, 16, 16))),
        [1, 16, 16, 16],
        DataFormat::Nhwcb,
        quant(),
        &[input],
    );
    let pool = graph.add_node(
        NodeKind::FuseOnlyPle(FuseOnlyPleData {
            operation: PleOperation::MaxPool2x2Stride2,
            agnostic_to_requantisation: true,
            shape_multiplier: ShapeMultiplier {
                h: Fraction::new(1, 2),
                w: Fraction::new(1, 2),
                c: Fraction::ONE,
            },
        }),
        [1, 8, 8, 16],
        DataFormat::Nhwcb,
        quant(),
        &[mce],
    );
    let requant_info = QuantizationInfo::new(32, 0.25);
    let requant = graph.add_node(
        NodeKind::Requantize,
        [1, 8, 8, 16],
        DataFormat::Nhwcb,
        requant_info,
        &[pool],
    );

    let encoder = RecordingEncoder {
        seen: RefCell::new(Vec::new()),
    };
    let (pass, _, stream) = plan_and_emit(&mut graph, mce, &caps, &encoder);
    assert!(pass.nodes().contains(&requant));

    // The requantize's parameters reach both the weight encoder and the MCE
    // output stage, even though it was admitted after the pooling kernel.
    assert_eq!(encoder.seen.borrow().as_slice(), &[requant_info]);
    let [command] = stream.commands() else {
        panic!("expected exactly one command");
    };
    assert_eq!(command.mce_data.output_zero_point, 32);
}

#[test]
fn extract_subtensor_reads_through_the_supertensor() {
    let caps = HardwareCapabilities::default();
    let mut graph = Graph::new();
    let input = add_input(&mut graph, [1, 32, 32, 16], DataFormat::Nhwcb);
    let extract = graph.add_node(
        NodeKind::ExtractSubtensor {
            supertensor_offset: [0, 8, 8, 0],
        },
        [1, 16, 16, 16],
        DataFormat::Nhwcb,
        quant(),
        &[input],
    );
    let mce = graph.add_node(
        NodeKind::MceOperation(Box::new(conv_data(3, 3, 16, 16))),
        [1, 16, 16, 16],
        DataFormat::Nhwcb,
        quant(),
        &[extract],
    );

    let (pass, _, stream) = plan_and_emit(&mut graph, extract, &caps, &UncompressedWeightEncoder);
    assert_eq!(pass.nodes(), &[extract, mce]);

    let [command] = stream.commands() else {
        panic!("expected exactly one command");
    };
    // The MCE reads the carved-out region; DMA addressing still needs the
    // enclosing tensor.
    assert_eq!(command.input_info.tensor_shape, [1, 16, 16, 16]);
    assert_eq!(command.input_info.supertensor_shape, [1, 32, 32, 16]);
    assert_eq!(command.input_info.supertensor_offset, [0, 8, 8, 0]);
}

#[test]
fn fully_connected_rides_on_the_strategy1_tag() {
    let caps = HardwareCapabilities::default();
    let mut graph = Graph::new();
    let input = add_input(&mut graph, [1, 1, 1, 256], DataFormat::Nhwc);
    let mut data = conv_data(1, 1, 256, 32);
    data.operation = MceOperation::FullyConnected;
    let mce = graph.add_node(
        NodeKind::MceOperation(Box::new(data)),
        [1, 1, 1, 32],
        DataFormat::Nhwc,
        quant(),
        &[input],
    );

    let (pass, _, stream) = plan_and_emit(&mut graph, mce, &caps, &UncompressedWeightEncoder);
    assert_eq!(
        pass.tensor_config().strategy,
        npu_rs::pass::StrategyKind::StrategyFc
    );

    let [command] = stream.commands() else {
        panic!("expected exactly one command");
    };
    // The firmware has no fully-connected tag; the stripe shapes carry the
    // schedule.
    assert_eq!(
        command.sram_config.allocation_strategy,
        SramAllocationStrategy::Strategy1
    );
    assert_eq!(command.output_info.data_format, CommandDataFormat::Nhwc);
}

#[test]
fn weight_stripe_depth_depends_on_the_weight_format() {
    let hwio = WeightsInfo {
        dimensions: [3, 3, 16, 32],
        format: WeightFormat::Hwio,
        quant_info: quant(),
    };
    let (size, depth) =
        weight_stripe_size_and_depth(&hwio, Stride { x: 1, y: 1 }, [3, 3, 16, 8]);
    assert_eq!(size, 16);
    assert_eq!(depth, 8);

    // Depthwise weights are interleaved by the stride product.
    let hwim = WeightsInfo {
        dimensions: [3, 3, 16, 1],
        format: WeightFormat::Hwim,
        quant_info: quant(),
    };
    let (size, depth) =
        weight_stripe_size_and_depth(&hwim, Stride { x: 2, y: 2 }, [3, 3, 16, 1]);
    assert_eq!(size, 16);
    assert_eq!(depth, 4);
}
