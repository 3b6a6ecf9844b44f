use gridcascade::{
    format_stage, CascadeError, CodecVariant, GridOffsets, HeadConfig, ProjectionView,
    RawProjection,
};

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Builds a projection where every box record is produced by `record`.
fn projection(
    images: usize,
    grid: &GridOffsets,
    cfg: &HeadConfig,
    record: impl Fn(usize, usize, usize, usize) -> Vec<f32>,
) -> RawProjection {
    let layout = cfg.layout().unwrap();
    let mut data = Vec::new();
    for image in 0..images {
        for row in 0..grid.cells_y() {
            for col in 0..grid.cells_x() {
                for slot in 0..cfg.num_boxes {
                    let rec = record(image, row, col, slot);
                    assert_eq!(rec.len(), layout.channels_per_box());
                    data.extend(rec);
                }
            }
        }
    }
    RawProjection::from_vec(
        data,
        images,
        grid.cells_y(),
        grid.cells_x(),
        layout.channels_per_cell(),
    )
    .unwrap()
}

#[test]
fn minimal_head_yields_one_detection_per_slot() {
    let grid = GridOffsets::new(3, 4).unwrap();
    let cfg = HeadConfig {
        num_boxes: 2,
        ..HeadConfig::default()
    };
    let proj = projection(2, &grid, &cfg, |image, row, col, slot| {
        let conf = (image * 100 + row * 10 + col) as f32 * 0.01 - slot as f32;
        vec![0.0, 0.0, -2.0, -2.0, conf]
    });

    let formatted = format_stage(proj.view(), &grid, &cfg).unwrap();
    assert!(formatted.loss.is_none());
    let output = formatted.output;
    assert_eq!(output.batch_size(), 2);
    assert_eq!(output.num_detections(), 2 * 3 * 4 * 2);

    let det = output.grid(1).unwrap().get(2, 3, 1).unwrap();
    assert_eq!((det.cell.row, det.cell.col, det.cell.slot), (2, 3, 1));
    assert!((det.confidence - sigmoid(1.23 - 1.0)).abs() < 1e-6);
    assert!(det.class_probs.is_none());
    assert!(det.group.is_none());
    assert!(det.offset.is_none());
    let [cx, cy] = det.bbox.center();
    assert!((cx - 3.5 / 4.0).abs() < 1e-6);
    assert!((cy - 2.5 / 3.0).abs() < 1e-6);
}

#[test]
fn full_head_decodes_every_component() {
    let grid = GridOffsets::square(2).unwrap();
    let cfg = HeadConfig {
        num_boxes: 1,
        with_classification: true,
        num_classes: 3,
        with_group_flags: true,
        with_offsets: true,
        ..HeadConfig::default()
    };
    let proj = projection(1, &grid, &cfg, |_, row, col, _| {
        let group = if row == 1 && col == 0 { 4.0 } else { -4.0 };
        vec![
            0.0, 0.0, -1.0, -1.0, 2.0, 0.0, 1.0, group, 1.0, 2.0, 3.0,
        ]
    });

    let output = format_stage(proj.view(), &grid, &cfg).unwrap().output;
    let grid_out = output.grid(0).unwrap();
    let flagged: Vec<_> = grid_out
        .iter()
        .filter(|det| det.group.unwrap().is_set(0.5))
        .map(|det| (det.cell.row, det.cell.col))
        .collect();
    assert_eq!(flagged, vec![(1, 0)]);

    let det = grid_out.get(0, 1, 0).unwrap();
    let probs = det.class_probs.as_ref().unwrap();
    assert_eq!(probs.len(), 3);
    assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    assert!(probs[0] < probs[1] && probs[1] < probs[2]);
    assert_eq!(det.best_class().unwrap().0, 2);

    let [ox, oy] = det.offset.unwrap();
    assert!((ox - 0.5).abs() < 1e-6);
    assert!((oy - sigmoid(1.0)).abs() < 1e-6);
    assert!((det.confidence - sigmoid(2.0)).abs() < 1e-6);
}

#[test]
fn training_variant_collects_loss_inputs_in_detection_order() {
    let grid = GridOffsets::square(2).unwrap();
    let cfg = HeadConfig {
        num_boxes: 2,
        with_group_flags: true,
        variant: CodecVariant::Training,
        ..HeadConfig::default()
    };
    let proj = projection(2, &grid, &cfg, |image, row, col, slot| {
        let tag = (image * 8 + (row * 2 + col) * 2 + slot) as f32;
        vec![0.0, 0.0, -1.0, -1.0, 0.0, tag]
    });

    let formatted = format_stage(proj.view(), &grid, &cfg).unwrap();
    let loss = formatted.loss.unwrap();
    assert_eq!(loss.len(), formatted.output.num_detections());
    assert!(loss.class_probs.is_none());
    assert!(loss.offsets.is_none());

    let logits = loss.group_logits.unwrap();
    let expected: Vec<f32> = (0..16).map(|v| v as f32).collect();
    assert_eq!(logits, expected);

    // Cell (1, 1) of any image shifts the center by (1, 1) cell units.
    assert_eq!(loss.shifted_centers[7], [1.5, 1.5]);
    assert!((loss.log_scales[0][0] - (-1.0 - 2.0f32.ln())).abs() < 1e-6);
}

#[test]
fn channel_mismatch_is_reported() {
    let grid = GridOffsets::square(2).unwrap();
    let cfg = HeadConfig {
        num_boxes: 2,
        ..HeadConfig::default()
    };
    let data = vec![0.0f32; 2 * 2 * 6];
    let view = ProjectionView::new(&data, 1, 2, 2, 6).unwrap();
    let err = format_stage(view, &grid, &cfg).unwrap_err();
    assert_eq!(
        err,
        CascadeError::ShapeMismatch {
            context: "projection channels",
            expected: 10,
            got: 6,
        }
    );
}

#[test]
fn grid_mismatch_is_reported() {
    let grid = GridOffsets::square(3).unwrap();
    let cfg = HeadConfig::default();
    let data = vec![0.0f32; 2 * 3 * 5];
    let view = ProjectionView::new(&data, 1, 2, 3, 5).unwrap();
    assert!(matches!(
        format_stage(view, &grid, &cfg),
        Err(CascadeError::ShapeMismatch { .. })
    ));
}

#[test]
fn classification_needs_more_than_one_class() {
    let grid = GridOffsets::square(1).unwrap();
    let cfg = HeadConfig {
        with_classification: true,
        num_classes: 1,
        ..HeadConfig::default()
    };
    let data = vec![0.0f32; 6];
    let view = ProjectionView::new(&data, 1, 1, 1, 6).unwrap();
    let err = format_stage(view, &grid, &cfg).unwrap_err();
    assert!(matches!(
        err,
        CascadeError::InvalidConfig { ref option, .. } if option == "num_classes"
    ));
}

#[test]
fn empty_batch_formats_to_empty_output() {
    let grid = GridOffsets::square(2).unwrap();
    let cfg = HeadConfig::default();
    let view = ProjectionView::new(&[], 0, 2, 2, 5).unwrap();
    let output = format_stage(view, &grid, &cfg).unwrap().output;
    assert_eq!(output.batch_size(), 0);
}
