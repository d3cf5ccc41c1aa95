use npu_rs::utils::{
    div_round_up, round_up_to_multiple, shape_element_count, Fraction, ShapeMultiplier,
};

#[test]
fn div_round_up_saturates_at_the_boundaries() {
    assert_eq!(div_round_up(10, 3), 4);
    assert_eq!(div_round_up(12, 3), 4);
    assert_eq!(div_round_up(0, 8), 0);
    assert_eq!(div_round_up(u32::MAX, 1), u32::MAX);
    assert_eq!(div_round_up(5, 0), u32::MAX);
}

#[test]
fn round_up_to_multiple_saturates_at_the_boundaries() {
    assert_eq!(round_up_to_multiple(17, 8), 24);
    assert_eq!(round_up_to_multiple(16, 8), 16);
    assert_eq!(round_up_to_multiple(0, 8), 0);
    assert_eq!(round_up_to_multiple(u32::MAX - 1, 16), u32::MAX);
}

#[test]
fn shape_element_count_saturates_instead_of_wrapping() {
    assert_eq!(shape_element_count([1, 16, 16, 16]), 4096);
    assert_eq!(shape_element_count([0, 16, 16, 16]), 0);
    assert_eq!(
        shape_element_count([u32::MAX, u32::MAX, 2, 2]),
        u32::MAX
    );
}

#[test]
fn shape_multipliers_compose_axis_by_axis() {
    let pool = ShapeMultiplier {
        h: Fraction::new(1, 2),
        w: Fraction::new(1, 2),
        c: Fraction::ONE,
    };
    let interleave_channels = ShapeMultiplier {
        h: Fraction::ONE,
        w: Fraction::ONE,
        c: Fraction::new(4, 1),
    };
    let combined = pool * interleave_channels;
    assert_eq!(combined.apply_to([1, 16, 16, 16]), [1, 8, 8, 64]);
    assert_eq!(
        ShapeMultiplier::IDENTITY.apply_to([1, 17, 33, 5]),
        [1, 17, 33, 5]
    );
}
