use npu_rs::graph::{
    AlgorithmHint, MceOperation, MceOperationData, QuantizationInfo, Stride, WeightFormat,
    WeightsInfo,
};
use npu_rs::pass::{choose_conv_algorithm, select_mce_algorithm, winograd_weights_shape, MceAlgorithm};
use npu_rs::utils::ShapeMultiplier;
use npu_rs::HardwareCapabilities;

fn conv(kernel_h: u32, kernel_w: u32) -> MceOperationData {
    MceOperationData {
        operation: MceOperation::Convolution,
        weights: WeightsInfo {
            dimensions: [kernel_h, kernel_w, 16, 16],
            format: WeightFormat::Hwio,
            quant_info: QuantizationInfo::new(0, 0.5),
        },
        stride: Stride { x: 1, y: 1 },
        upscale_factor: 1,
        algorithm_hint: AlgorithmHint::AllowWinograd,
        uninterleaved_input_shape: [1, 16, 16, 16],
        shape_multiplier: ShapeMultiplier::IDENTITY,
    }
}

#[test]
fn two_d_winograd_wins_when_multiplications_drop() {
    // 3x3 kernel: direct = 3*3*2*2 = 36, winograd = 16*1*1 = 16.
    let caps = HardwareCapabilities::default();
    assert_eq!(choose_conv_algorithm(&caps, 3, 3), MceAlgorithm::Winograd);
}

#[test]
fn one_d_winograd_follows_the_mac_count() {
    let mut caps = HardwareCapabilities::default();
    // 1x3 kernel: direct = 3*2*2 = 12, winograd = 4*1 = 4.
    assert_eq!(choose_conv_algorithm(&caps, 3, 1), MceAlgorithm::Winograd);

    // Doubling the winograd MAC cost still leaves it ahead: 8 < 12.
    caps.macs_per_winograd_1d = 8;
    assert_eq!(choose_conv_algorithm(&caps, 3, 1), MceAlgorithm::Winograd);

    // 1x2 kernel: direct = 2*2*2 = 8, winograd = 8*1 = 8, not a strict win.
    assert_eq!(choose_conv_algorithm(&caps, 2, 1), MceAlgorithm::Direct);
    caps.macs_per_winograd_1d = 4;
    assert_eq!(choose_conv_algorithm(&caps, 2, 1), MceAlgorithm::Winograd);
}

#[test]
fn winograd_gate_requires_plain_unit_stride_convolution() {
    let caps = HardwareCapabilities::default();

    let allowed = conv(3, 3);
    assert_eq!(
        select_mce_algorithm(&allowed, &caps, true),
        MceAlgorithm::Winograd
    );
    assert_eq!(
        select_mce_algorithm(&allowed, &caps, false),
        MceAlgorithm::Direct
    );

    let mut strided = conv(3, 3);
    strided.stride = Stride { x: 2, y: 2 };
    assert_eq!(
        select_mce_algorithm(&strided, &caps, true),
        MceAlgorithm::Direct
    );

    let mut upscaled = conv(3, 3);
    upscaled.upscale_factor = 2;
    assert_eq!(
        select_mce_algorithm(&upscaled, &caps, true),
        MceAlgorithm::Direct
    );

    let mut depthwise = conv(3, 3);
    depthwise.operation = MceOperation::DepthwiseConvolution;
    depthwise.weights.format = WeightFormat::Hwim;
    assert_eq!(
        select_mce_algorithm(&depthwise, &caps, true),
        MceAlgorithm::Direct
    );

    let mut pinned = conv(3, 3);
    pinned.algorithm_hint = AlgorithmHint::RequireDirect;
    assert_eq!(
        select_mce_algorithm(&pinned, &caps, true),
        MceAlgorithm::Direct
    );
}

#[test]
fn winograd_weight_shapes_round_up_to_multiples_of_three() {
    assert_eq!(winograd_weights_shape([3, 3, 16, 16]), [3, 3, 16, 16]);
    assert_eq!(winograd_weights_shape([5, 5, 16, 16]), [6, 6, 16, 16]);
    // An axis of extent 1 is left alone.
    assert_eq!(winograd_weights_shape([1, 7, 16, 16]), [1, 9, 16, 16]);
    assert_eq!(winograd_weights_shape([4, 1, 16, 16]), [6, 1, 16, 16]);
}
