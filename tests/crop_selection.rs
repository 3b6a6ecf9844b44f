use gridcascade::lowlevel::MIN_CROP_SIDE_FLOOR;
use gridcascade::{
    select_crops, BoxCoords, CascadeError, CellIndex, Detection, DetectionGrid, GroupFlag,
    ImageSize, OverflowPolicy, SelectorConfig, StageOutput,
};

const FLAG_ON: f32 = 4.0;
const FLAG_OFF: f32 = -4.0;

fn det(row: usize, col: usize, bbox: [f32; 4], confidence: f32, flag: Option<f32>) -> Detection {
    Detection {
        bbox: BoxCoords::new(bbox[0], bbox[1], bbox[2], bbox[3]),
        confidence,
        class_probs: None,
        group: flag.map(|logit| GroupFlag { logit }),
        offset: None,
        cell: CellIndex { row, col, slot: 0 },
    }
}

/// 2x2 grid, one slot per cell; `flags[i]` marks cell `i` (row-major) as a group.
fn grid_with(flags: [bool; 4], confidences: [f32; 4]) -> DetectionGrid {
    let boxes = [
        [0.1, 0.1, 0.3, 0.3],
        [0.6, 0.1, 0.9, 0.4],
        [0.1, 0.6, 0.4, 0.9],
        [0.6, 0.6, 0.8, 0.8],
    ];
    let dets = (0..4)
        .map(|i| {
            let flag = if flags[i] { FLAG_ON } else { FLAG_OFF };
            det(i / 2, i % 2, boxes[i], confidences[i], Some(flag))
        })
        .collect();
    DetectionGrid::new(2, 2, 1, dets).unwrap()
}

fn size() -> ImageSize {
    ImageSize::new(416, 416).unwrap()
}

#[test]
fn no_groups_means_no_crops_and_everything_carried() {
    let stage = StageOutput::new(vec![
        grid_with([false; 4], [0.9; 4]),
        grid_with([false; 4], [0.1; 4]),
    ]);
    let selection = select_crops(&stage, size(), &SelectorConfig::default()).unwrap();
    assert_eq!(selection.plan.total_crops(), 0);
    assert_eq!(selection.plan.counts(), vec![0, 0]);
    assert_eq!(selection.carried[0].len(), 4);
    assert_eq!(selection.carried[1].len(), 4);
    assert!(selection.carried[1].iter().all(|c| c.image() == 1));
}

#[test]
fn groups_become_crops_in_row_major_order() {
    let stage = StageOutput::new(vec![grid_with(
        [false, true, false, true],
        [0.2, 0.4, 0.6, 0.8],
    )]);
    let selection = select_crops(&stage, size(), &SelectorConfig::default()).unwrap();
    let crops = selection.plan.crops(0);
    assert_eq!(crops.len(), 2);
    assert_eq!((crops[0].source.row, crops[0].source.col), (0, 1));
    assert_eq!((crops[1].source.row, crops[1].source.col), (1, 1));
    assert_eq!(crops[0].slot, 0);
    assert_eq!(crops[1].slot, 1);
    let expected = [0.6, 0.1, 0.9, 0.4];
    for (got, want) in crops[0].rect.to_array().iter().zip(expected.iter()) {
        assert!((got - want).abs() < 1e-6);
    }

    let carried: Vec<_> = selection.carried[0]
        .iter()
        .map(|c| (c.detection().cell.row, c.detection().cell.col))
        .collect();
    assert_eq!(carried, vec![(0, 0), (1, 0)]);
}

#[test]
fn selection_is_deterministic() {
    let stage = StageOutput::new(vec![
        grid_with([true, true, false, true], [0.5, 0.5, 0.5, 0.5]),
        grid_with([true, false, true, false], [0.3, 0.9, 0.4, 0.1]),
    ]);
    let cfg = SelectorConfig {
        max_crops_per_image: 2,
        ..SelectorConfig::default()
    };
    let first = select_crops(&stage, size(), &cfg).unwrap();
    for _ in 0..10 {
        assert_eq!(select_crops(&stage, size(), &cfg).unwrap(), first);
    }
}

#[test]
fn cap_keeps_most_confident_groups_and_carries_the_rest() {
    let stage = StageOutput::new(vec![grid_with([true; 4], [0.3, 0.9, 0.5, 0.7])]);
    let cfg = SelectorConfig {
        max_crops_per_image: 2,
        overflow: OverflowPolicy::Cap,
        ..SelectorConfig::default()
    };
    let selection = select_crops(&stage, size(), &cfg).unwrap();
    let sources: Vec<_> = selection
        .plan
        .crops(0)
        .iter()
        .map(|c| (c.source.row, c.source.col))
        .collect();
    assert_eq!(sources, vec![(0, 1), (1, 1)]);
    assert_eq!(selection.carried[0].len(), 2);
    assert_eq!(selection.plan.total_crops() + selection.carried[0].len(), 4);
}

#[test]
fn reject_fails_on_overflow() {
    let stage = StageOutput::new(vec![
        grid_with([false; 4], [0.5; 4]),
        grid_with([true; 4], [0.5; 4]),
    ]);
    let cfg = SelectorConfig {
        max_crops_per_image: 3,
        overflow: OverflowPolicy::Reject,
        ..SelectorConfig::default()
    };
    let err = select_crops(&stage, size(), &cfg).unwrap_err();
    assert_eq!(
        err,
        CascadeError::TooManyGroups {
            image: 1,
            count: 4,
            max: 3,
        }
    );
}

#[test]
fn min_group_confidence_filters_flagged_boxes() {
    let stage = StageOutput::new(vec![grid_with([true; 4], [0.1, 0.9, 0.2, 0.8])]);
    let cfg = SelectorConfig {
        min_group_confidence: 0.5,
        ..SelectorConfig::default()
    };
    let selection = select_crops(&stage, size(), &cfg).unwrap();
    assert_eq!(selection.plan.total_crops(), 2);
    assert_eq!(selection.carried[0].len(), 2);
}

#[test]
fn fallback_picks_top_k_without_group_flags() {
    let dets = (0..4)
        .map(|i| {
            let conf = [0.6, 0.2, 0.9, 0.6][i];
            det(i / 2, i % 2, [0.2, 0.2, 0.4, 0.4], conf, None)
        })
        .collect();
    let stage = StageOutput::new(vec![DetectionGrid::new(2, 2, 1, dets).unwrap()]);
    let cfg = SelectorConfig {
        fallback_top_k: 2,
        ..SelectorConfig::default()
    };
    let selection = select_crops(&stage, size(), &cfg).unwrap();
    let sources: Vec<_> = selection
        .plan
        .crops(0)
        .iter()
        .map(|c| (c.source.row, c.source.col))
        .collect();
    // Ties on 0.6 resolve to the earlier cell.
    assert_eq!(sources, vec![(0, 0), (1, 0)]);

    let none = select_crops(&stage, size(), &SelectorConfig::default()).unwrap();
    assert_eq!(none.plan.total_crops(), 0);
}

#[test]
fn tiny_group_box_is_grown_to_minimum_size() {
    let dets = vec![det(0, 0, [0.5, 0.5, 0.5001, 0.5001], 0.9, Some(FLAG_ON))];
    let stage = StageOutput::new(vec![DetectionGrid::new(1, 1, 1, dets).unwrap()]);
    let cfg = SelectorConfig {
        min_crop_side: 0.05,
        min_crop_pixels: 52.0,
        ..SelectorConfig::default()
    };
    let selection = select_crops(&stage, ImageSize::new(416, 208).unwrap(), &cfg).unwrap();
    let rect = selection.plan.crops(0)[0].rect;
    assert!((rect.width() - 0.125).abs() < 1e-5);
    assert!((rect.height() - 0.25).abs() < 1e-5);
    assert!(rect.width() > 0.0 && rect.height() > 0.0);
}

#[test]
fn border_group_crop_stays_inside_image() {
    let dets = vec![det(0, 0, [0.0, 0.0, 0.0, 0.01], 0.9, Some(FLAG_ON))];
    let stage = StageOutput::new(vec![DetectionGrid::new(1, 1, 1, dets).unwrap()]);
    let cfg = SelectorConfig {
        min_crop_side: 0.2,
        ..SelectorConfig::default()
    };
    let rect = select_crops(&stage, size(), &cfg).unwrap().plan.crops(0)[0].rect;
    assert_eq!(rect.xmin(), 0.0);
    assert_eq!(rect.ymin(), 0.0);
    assert!((rect.xmax() - 0.2).abs() < 1e-6);
    assert!((rect.ymax() - 0.2).abs() < 1e-6);
}

#[test]
fn offset_and_margin_widen_the_crop() {
    let mut group = det(0, 0, [0.4, 0.4, 0.6, 0.6], 0.9, Some(FLAG_ON));
    group.offset = Some([0.5, 0.0]);
    let stage = StageOutput::new(vec![DetectionGrid::new(1, 1, 1, vec![group]).unwrap()]);
    let cfg = SelectorConfig {
        margin: 0.05,
        ..SelectorConfig::default()
    };
    let rect = select_crops(&stage, size(), &cfg).unwrap().plan.crops(0)[0].rect;
    // Half extent x: 0.1 * 1.5 + 0.05; y: 0.1 + 0.05.
    assert!((rect.xmin() - 0.3).abs() < 1e-6);
    assert!((rect.xmax() - 0.7).abs() < 1e-6);
    assert!((rect.ymin() - 0.35).abs() < 1e-6);
    assert!((rect.ymax() - 0.65).abs() < 1e-6);
}

#[test]
fn invalid_selector_config_is_rejected() {
    let stage = StageOutput::new(vec![grid_with([false; 4], [0.5; 4])]);
    let cfg = SelectorConfig {
        group_threshold: 1.5,
        ..SelectorConfig::default()
    };
    assert!(matches!(
        select_crops(&stage, size(), &cfg),
        Err(CascadeError::InvalidConfig { ref option, .. }) if option == "group_threshold"
    ));
}

#[test]
fn min_crop_side_below_float_resolution_is_rejected() {
    let point = vec![det(0, 0, [0.5, 0.5, 0.5, 0.5], 0.9, Some(FLAG_ON))];
    let stage = StageOutput::new(vec![DetectionGrid::new(1, 1, 1, point).unwrap()]);
    let cfg = SelectorConfig {
        min_crop_side: 1e-9,
        ..SelectorConfig::default()
    };
    assert!(matches!(
        cfg.validate(),
        Err(CascadeError::InvalidConfig { ref option, .. }) if option == "min_crop_side"
    ));
    assert!(matches!(
        select_crops(&stage, size(), &cfg),
        Err(CascadeError::InvalidConfig { ref option, .. }) if option == "min_crop_side"
    ));
}

#[test]
fn point_group_at_smallest_side_yields_valid_crop() {
    for center in [0.0, 0.5, 0.999_99, 1.0] {
        let point = vec![det(
            0,
            0,
            [center, center, center, center],
            0.9,
            Some(FLAG_ON),
        )];
        let stage = StageOutput::new(vec![DetectionGrid::new(1, 1, 1, point).unwrap()]);
        let cfg = SelectorConfig {
            min_crop_side: MIN_CROP_SIDE_FLOOR,
            ..SelectorConfig::default()
        };
        let rect = select_crops(&stage, size(), &cfg).unwrap().plan.crops(0)[0].rect;
        assert!(rect.width() > 0.0 && rect.height() > 0.0, "{center}: {rect:?}");
        assert!(rect.xmin() >= 0.0 && rect.xmax() <= 1.0);
    }
}
