use std::fs;
use std::path::PathBuf;

use choras_io::{
    DocumentLoader, ImportOptions, IoError, ObjFacade, load_intermediate, load_source,
    save_intermediate,
};

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

#[test]
fn obj_is_split_per_material_and_cleaned_copy_written() {
    let out = tempfile::tempdir().expect("创建临时目录失败");
    let loader = ObjFacade::with_clean_dir(out.path());
    let report = loader.load(&fixture("room.obj")).expect("读取 OBJ 失败");

    let meshes: Vec<_> = report.document.meshes().map(|(_, mesh)| mesh).collect();
    assert_eq!(meshes.len(), 2);
    assert_eq!(meshes[0].material.as_deref(), Some("M_1"));
    assert_eq!(meshes[0].faces.len(), 2);
    assert_eq!(meshes[1].material.as_deref(), Some("Plaster"));
    assert_eq!(meshes[1].faces.len(), 4);
    assert!(
        meshes
            .iter()
            .all(|mesh| mesh.object_id.as_deref() == Some("Room"))
    );

    let cleaned = fs::read_to_string(out.path().join("room_clean.obj")).expect("缺少清洗结果");
    let lines: Vec<&str> = cleaned.lines().collect();
    for (index, line) in lines.iter().enumerate() {
        if line.starts_with("f ") {
            assert!(
                lines[index - 1].starts_with("usemtl "),
                "第 {index} 行的面前缺少 usemtl"
            );
        }
    }
    assert_eq!(cleaned.matches("usemtl M_1").count(), 2);
    assert_eq!(cleaned.matches("usemtl Plaster").count(), 4);
}

#[test]
fn non_numeric_vertex_is_corrupt_source() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("broken.obj");
    fs::write(&path, "v 0 0 0\nv one 0 0\nf 1 2 1\n").expect("写入临时文件失败");

    let options = ImportOptions {
        clean_dir: Some(dir.path().join("clean")),
        ..ImportOptions::default()
    };
    let err = load_source(&path, &options).expect_err("非数字坐标应失败");
    match err {
        IoError::CorruptSource { message, .. } => assert!(message.contains("one")),
        other => panic!("期望 CorruptSource，实际为 {other:?}"),
    }
}

#[test]
fn intermediate_document_round_trips_meshes() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let options = ImportOptions {
        clean_dir: Some(dir.path().to_path_buf()),
        ..ImportOptions::default()
    };
    let report = load_source(&fixture("room.obj"), &options).expect("读取 OBJ 失败");

    let json_path = dir.path().join("room.json");
    save_intermediate(&report.document, &json_path).expect("写出中间文档失败");
    let restored = load_intermediate(&json_path).expect("读取中间文档失败");

    let original: Vec<_> = report.document.meshes().map(|(_, mesh)| mesh.clone()).collect();
    let reloaded: Vec<_> = restored.meshes().map(|(_, mesh)| mesh.clone()).collect();
    assert_eq!(original, reloaded);
    assert_eq!(restored.name(), "room");

    let via_dispatch = load_source(&json_path, &options).expect("按扩展名读取中间文档失败");
    assert_eq!(via_dispatch.document.meshes().count(), 2);
}
