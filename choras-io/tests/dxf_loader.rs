use std::path::PathBuf;

use choras_core::{
    diagnostics::DiagnosticKind,
    document::{Entity, Face},
    geometry::Point3,
};
use choras_io::{DocumentLoader, DxfFacade, ImportOptions, IoError, load_source};

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

fn assert_point(actual: Point3, expected: (f64, f64, f64)) {
    assert!(
        (actual.x() - expected.0).abs() < 1e-6
            && (actual.y() - expected.1).abs() < 1e-6
            && (actual.z() - expected.2).abs() < 1e-6,
        "{actual:?} != {expected:?}"
    );
}

#[test]
fn bulge_segment_becomes_three_point_arc() {
    let loader = DxfFacade::new();
    let report = loader
        .load(&fixture("bulge_polyline.dxf"))
        .expect("读取带 bulge 的 DXF 失败");

    let arcs: Vec<_> = report
        .document
        .entities()
        .filter_map(|(_, entity)| match entity {
            Entity::Arc(arc) => Some(arc),
            _ => None,
        })
        .collect();
    assert_eq!(arcs.len(), 1, "期望仅有一个圆弧实体");

    // CAD 平面中的 (0,0) → (2,0)，中点 (1,1)；旋转后 (x, y, z) → (x, -z, y)
    let arc = arcs[0];
    assert_point(arc.start, (0.0, 0.0, 0.0));
    assert_point(arc.end, (2.0, 0.0, 0.0));
    assert_point(arc.mid, (1.0, 0.0, 1.0));
    assert!((arc.radius - 1.0).abs() < 1e-6);
    assert!(report.diagnostics.is_empty());
}

#[test]
fn insert_applies_scale_rotation_translation_then_global_rotation() {
    let report = DxfFacade::new()
        .load(&fixture("block_insert.dxf"))
        .expect("读取块参照 DXF 失败");
    let document = &report.document;

    let line = document
        .entities()
        .find_map(|(_, entity)| match entity {
            Entity::Line(line) => Some(line),
            _ => None,
        })
        .expect("块展开后缺少 LINE");
    assert_point(line.start, (10.0, 0.0, 0.0));
    assert_point(line.end, (10.0, 0.0, 2.0));
    assert_eq!(line.layer, "FURNITURE");

    let (_, seat) = document.meshes().next().expect("块展开后缺少 3DFACE 网格");
    assert_eq!(seat.faces, vec![Face::Quad([0, 1, 2, 3])]);
    assert_eq!(seat.material.as_deref(), Some("SEAT"));
    assert_point(seat.vertices[2], (8.0, -0.5, 2.0));

    let instance = document
        .entities()
        .find_map(|(_, entity)| match entity {
            Entity::BlockInstance(instance) => Some(instance),
            _ => None,
        })
        .expect("缺少块参照记录");
    assert_eq!(instance.block, "CHAIR");
    assert_point(instance.insert, (10.0, 0.0, 0.0));

    assert!(document.block("*Model_Space").is_none());
    assert_eq!(document.entity_count(), 3);
}

#[test]
fn skipped_entities_are_reported_not_fatal() {
    let report = DxfFacade::new()
        .load(&fixture("block_insert.dxf"))
        .expect("读取块参照 DXF 失败");

    let kinds: Vec<DiagnosticKind> = report.diagnostics.iter().map(|diag| diag.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DiagnosticKind::UnsupportedEntity,
            DiagnosticKind::UnsupportedEntity,
            DiagnosticKind::MissingBlock,
        ]
    );
    assert!(report.diagnostics[0].message.contains("CIRCLE"));
    assert!(report.diagnostics[1].message.contains("TEXT"));
    assert!(report.diagnostics[2].message.contains("GHOST"));
}

#[test]
fn three_dfaces_keep_layers_for_grouping() {
    let report = DxfFacade::new()
        .load(&fixture("cube_faces.dxf"))
        .expect("读取立方体 DXF 失败");
    let meshes: Vec<_> = report.document.meshes().map(|(_, mesh)| mesh).collect();
    assert_eq!(meshes.len(), 6);
    assert!(meshes.iter().all(|mesh| mesh.faces.len() == 1));

    let keys: Vec<String> = meshes.iter().map(|mesh| mesh.material_key()).collect();
    // 图层 "0" 占据索引 1
    assert_eq!(keys, vec!["M_2", "M_3", "M_4", "M_4", "M_4", "M_4"]);
}

#[test]
fn corrupt_dxf_is_reported_as_corrupt_source() {
    let err = DxfFacade::new()
        .load(&fixture("corrupt.dxf"))
        .expect_err("组码无法解析时应失败");
    match err {
        IoError::CorruptSource { message, .. } => assert!(message.contains("ten")),
        other => panic!("期望 CorruptSource，实际为 {other:?}"),
    }
}

#[test]
fn missing_file_is_source_not_found() {
    let err = load_source(&fixture("does_not_exist.dxf"), &ImportOptions::default())
        .expect_err("缺失文件应失败");
    assert!(matches!(err, IoError::SourceNotFound { .. }));
}

#[test]
fn dispatch_rejects_unknown_extension() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("model.stl");
    std::fs::write(&path, "solid empty\nendsolid\n").expect("写入临时文件失败");

    let err = load_source(&path, &ImportOptions::default()).expect_err("未知格式应失败");
    assert!(matches!(err, IoError::UnsupportedFormat(_)));
}

#[test]
fn dispatch_honours_batch_size() {
    let options = ImportOptions {
        dxf_batch_size: 1,
        ..ImportOptions::default()
    };
    let report = load_source(&fixture("cube_faces.dxf"), &options).expect("导入失败");
    assert_eq!(report.document.meshes().count(), 6);
    assert_eq!(report.document.name(), "cube_faces");
}
