use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use choras_core::diagnostics::Diagnostic;
use choras_core::document::{DEFAULT_MATERIAL, Document, Face, Mesh};
use choras_core::geometry::Point3;
use tracing::{debug, warn};

use crate::{DocumentLoader, ImportReport, IoError, polygon_faces, read_source};

/// 清洗后的 OBJ 文本，以及按首次出现顺序排列的材质名。
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedObj {
    pub text: String,
    pub materials: Vec<String>,
}

/// 让每个 `f` 行前都紧跟一条 `usemtl`。
///
/// 原有的 `usemtl` 行被吸收为“当前材质”，在下一个面之前重新写出；
/// 首个材质出现之前的面依次使用 `M_1`、`M_2`……，分配后即成为当前材质。
pub fn clean_obj(source: &str) -> CleanedObj {
    let mut text = String::with_capacity(source.len());
    let mut materials: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut synthetic_counter = 1usize;

    for line in source.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("usemtl") => {
                if let Some(name) = tokens.next() {
                    current = Some(name.to_string());
                }
            }
            Some("f") => {
                let material = match &current {
                    Some(name) => name.clone(),
                    None => {
                        let name = format!("M_{synthetic_counter}");
                        synthetic_counter += 1;
                        current = Some(name.clone());
                        name
                    }
                };
                if !materials.contains(&material) {
                    materials.push(material.clone());
                }
                text.push_str("usemtl ");
                text.push_str(&material);
                text.push('\n');
                text.push_str(line);
                text.push('\n');
            }
            _ => {
                text.push_str(line);
                text.push('\n');
            }
        }
    }

    CleanedObj { text, materials }
}

pub struct ObjFacade {
    clean_dir: Option<PathBuf>,
}

impl ObjFacade {
    pub fn new() -> Self {
        Self { clean_dir: None }
    }

    pub fn with_clean_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            clean_dir: Some(dir.into()),
        }
    }

    fn clean_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("model");
        let file_name = format!("{stem}_clean.obj");
        match &self.clean_dir {
            Some(dir) => dir.join(file_name),
            None => source.with_file_name(file_name),
        }
    }
}

impl Default for ObjFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentLoader for ObjFacade {
    fn load(&self, path: &Path) -> Result<ImportReport, IoError> {
        let data = read_source(path)?;
        let cleaned = clean_obj(&data);

        let clean_path = self.clean_path(path);
        if let Some(parent) = clean_path.parent() {
            fs::create_dir_all(parent).map_err(|source| IoError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&clean_path, &cleaned.text).map_err(|source| IoError::WriteError {
            path: clean_path.clone(),
            source,
        })?;
        debug!(
            path = %clean_path.display(),
            materials = cleaned.materials.len(),
            "OBJ 清洗结果已写出"
        );

        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("obj");
        parse_cleaned(&cleaned, name).map_err(|err| IoError::CorruptSource {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

#[derive(Debug)]
struct ObjError {
    line: usize,
    message: String,
}

impl std::fmt::Display for ObjError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "第 {} 行：{}", self.line, self.message)
    }
}

/// 单个材质的子网格，顶点按首次引用重新编号。
struct SubMeshBuilder {
    material: String,
    object: Option<String>,
    remap: HashMap<usize, u32>,
    vertices: Vec<Point3>,
    faces: Vec<Face>,
}

impl SubMeshBuilder {
    fn new(material: String, object: Option<String>) -> Self {
        Self {
            material,
            object,
            remap: HashMap::new(),
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    fn local_index(&mut self, global: usize, positions: &[Point3]) -> u32 {
        *self.remap.entry(global).or_insert_with(|| {
            self.vertices.push(positions[global]);
            (self.vertices.len() - 1) as u32
        })
    }
}

fn parse_cleaned(cleaned: &CleanedObj, name: &str) -> Result<ImportReport, ObjError> {
    let mut positions: Vec<Point3> = Vec::new();
    let mut builders: Vec<SubMeshBuilder> = Vec::new();
    // 子网格按 (材质, 对象) 区分，同一材质的不同对象互不合并
    let mut by_key: HashMap<(String, Option<String>), usize> = HashMap::new();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut current_material: Option<String> = None;
    let mut current_object: Option<String> = None;

    for (index, line) in cleaned.text.lines().enumerate() {
        let line_number = index + 1;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let coords = tokens
                    .take(3)
                    .map(|raw| {
                        raw.parse::<f64>().map_err(|_| ObjError {
                            line: line_number,
                            message: format!("顶点坐标 \"{raw}\" 无法解析为数字"),
                        })
                    })
                    .collect::<Result<Vec<f64>, ObjError>>()?;
                let point = Point3::from_slice(&coords).ok_or_else(|| ObjError {
                    line: line_number,
                    message: format!("顶点只有 {} 个坐标分量", coords.len()),
                })?;
                positions.push(point.to_y_up());
            }
            Some("usemtl") => current_material = tokens.next().map(str::to_string),
            Some("o") | Some("g") => {
                let label: Vec<&str> = tokens.collect();
                if !label.is_empty() {
                    current_object = Some(label.join(" "));
                }
            }
            Some("f") => {
                let mut resolved: Vec<usize> = Vec::new();
                let mut out_of_range = None;
                for token in tokens {
                    match resolve_index(token, positions.len(), line_number)? {
                        Some(global) => resolved.push(global),
                        None => out_of_range = Some(token.to_string()),
                    }
                }
                if let Some(token) = out_of_range {
                    record(
                        &mut diagnostics,
                        Diagnostic::degenerate(format!(
                            "第 {line_number} 行的面引用了越界的顶点 {token}，已跳过"
                        )),
                    );
                    continue;
                }
                if resolved.len() < 3 {
                    record(
                        &mut diagnostics,
                        Diagnostic::degenerate(format!(
                            "第 {line_number} 行的面只有 {} 个顶点，已跳过",
                            resolved.len()
                        )),
                    );
                    continue;
                }

                // 清洗保证每个面前都有 usemtl
                let material = current_material
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MATERIAL.to_string());
                let key = (material.clone(), current_object.clone());
                let slot = *by_key.entry(key).or_insert_with(|| {
                    builders.push(SubMeshBuilder::new(material, current_object.clone()));
                    builders.len() - 1
                });
                let builder = &mut builders[slot];
                let local: Vec<u32> = resolved
                    .iter()
                    .map(|&global| builder.local_index(global, &positions))
                    .collect();
                builder.faces.extend(polygon_faces(&local));
            }
            _ => {}
        }
    }

    let mut document = Document::new(name);
    for builder in builders {
        let material_index = cleaned
            .materials
            .iter()
            .position(|material| *material == builder.material)
            .map(|position| position as u32 + 1);
        let mut mesh =
            Mesh::new(builder.vertices, builder.faces, "0").with_material(builder.material);
        mesh.material_index = material_index;
        mesh.object_id = builder.object;
        document.add_mesh(mesh);
    }

    Ok(ImportReport {
        document,
        diagnostics,
    })
}

/// 解析 `v`、`v/vt`、`v//vn`、`v/vt/vn` 形式的面顶点；负数为相对索引。
/// 越界返回 `Ok(None)`。
fn resolve_index(
    token: &str,
    vertex_count: usize,
    line: usize,
) -> Result<Option<usize>, ObjError> {
    let raw = token.split('/').next().unwrap_or(token);
    let value = raw.parse::<i64>().map_err(|_| ObjError {
        line,
        message: format!("面顶点 \"{token}\" 无法解析为索引"),
    })?;
    let count = vertex_count as i64;
    let resolved = if value > 0 { value - 1 } else { count + value };
    if value == 0 || resolved < 0 || resolved >= count {
        return Ok(None);
    }
    Ok(Some(resolved as usize))
}

fn record(diagnostics: &mut Vec<Diagnostic>, diagnostic: Diagnostic) {
    warn!(kind = diagnostic.kind.describe(), "{}", diagnostic.message);
    diagnostics.push(diagnostic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use choras_core::diagnostics::DiagnosticKind;

    const TWO_MATERIALS: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 0 0 1
f 1 2 3
usemtl Brick
f 1 3 4
f 1 2 5
";

    #[test]
    fn cleaning_puts_usemtl_before_every_face() {
        let cleaned = clean_obj(TWO_MATERIALS);
        let lines: Vec<&str> = cleaned.text.lines().collect();
        assert_eq!(
            &lines[5..],
            &[
                "usemtl M_1",
                "f 1 2 3",
                "usemtl Brick",
                "f 1 3 4",
                "usemtl Brick",
                "f 1 2 5",
            ]
        );
        assert_eq!(cleaned.materials, vec!["M_1".to_string(), "Brick".to_string()]);
    }

    #[test]
    fn synthetic_material_persists_until_next_usemtl() {
        let cleaned = clean_obj("v 0 0 0\nf 1 1 1\nf 1 1 1\nusemtl A\nf 1 1 1\n");
        assert_eq!(cleaned.materials, vec!["M_1".to_string(), "A".to_string()]);
        assert_eq!(cleaned.text.matches("usemtl M_1").count(), 2);
    }

    #[test]
    fn submeshes_follow_material_order_and_reindex() {
        let cleaned = clean_obj(TWO_MATERIALS);
        let report = parse_cleaned(&cleaned, "room").expect("parse");
        let meshes: Vec<_> = report.document.meshes().map(|(_, mesh)| mesh).collect();
        assert_eq!(meshes.len(), 2);
        assert_eq!(meshes[0].material.as_deref(), Some("M_1"));
        assert_eq!(meshes[0].material_index, Some(1));
        assert_eq!(meshes[0].vertices.len(), 3);
        assert_eq!(meshes[1].material.as_deref(), Some("Brick"));
        assert_eq!(meshes[1].material_index, Some(2));
        assert_eq!(meshes[1].vertices.len(), 5);
        assert_eq!(
            meshes[1].faces,
            vec![Face::Triangle([0, 1, 2]), Face::Triangle([0, 3, 4])]
        );
    }

    #[test]
    fn vertices_are_rotated_to_y_up() {
        let cleaned = clean_obj("v 1 2 3\nv 0 0 0\nv 1 0 0\nf 1 2 3\n");
        let report = parse_cleaned(&cleaned, "rot").expect("parse");
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        let first = mesh.vertices[0];
        assert!((first.x() - 1.0).abs() < 1e-12);
        assert!((first.y() + 3.0).abs() < 1e-12);
        assert!((first.z() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn relative_and_slashed_indices_resolve() {
        let cleaned = clean_obj(
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nv 0.5 1.5 0\nf -5/1/1 -4/2/1 -3//1 -2 -1\n",
        );
        let report = parse_cleaned(&cleaned, "pentagon").expect("parse");
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        assert_eq!(mesh.faces.len(), 3);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn degenerate_faces_are_skipped_with_diagnostics() {
        let cleaned = clean_obj("v 0 0 0\nv 1 0 0\nv 1 1 0\nf 1 2\nf 1 2 9\nf 1 2 3\n");
        let report = parse_cleaned(&cleaned, "bad").expect("parse");
        assert_eq!(report.diagnostics.len(), 2);
        assert!(
            report
                .diagnostics
                .iter()
                .all(|diag| diag.kind == DiagnosticKind::DegenerateTopology)
        );
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        assert_eq!(mesh.faces.len(), 1);
    }

    #[test]
    fn non_numeric_vertex_is_an_error() {
        let cleaned = clean_obj("v 0 zero 0\n");
        let err = parse_cleaned(&cleaned, "broken").err().expect("should fail");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn object_names_become_object_ids() {
        let cleaned = clean_obj("o Stage\nv 0 0 0\nv 1 0 0\nv 1 1 0\nusemtl Wood\nf 1 2 3\n");
        let report = parse_cleaned(&cleaned, "stage").expect("parse");
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        assert_eq!(mesh.object_id.as_deref(), Some("Stage"));
        assert_eq!(mesh.material_key(), "Wood");
    }

    #[test]
    fn objects_sharing_a_material_stay_separate() {
        let cleaned = clean_obj(
            "o Wall\nv 0 0 0\nv 1 0 0\nv 1 1 0\nusemtl Brick\nf 1 2 3\n\
             o Floor\nv 0 0 1\nusemtl Brick\nf 1 2 4\n\
             o Wall\nusemtl Brick\nf 2 3 4\n",
        );
        let report = parse_cleaned(&cleaned, "room").expect("parse");
        let meshes: Vec<_> = report.document.meshes().map(|(_, mesh)| mesh).collect();
        assert_eq!(meshes.len(), 2);
        assert_eq!(meshes[0].object_id.as_deref(), Some("Wall"));
        assert_eq!(meshes[0].faces.len(), 2);
        assert_eq!(meshes[1].object_id.as_deref(), Some("Floor"));
        assert_eq!(meshes[1].faces.len(), 1);
        assert!(meshes.iter().all(|mesh| mesh.material_key() == "Brick"));
        assert_eq!(meshes[0].material_index, meshes[1].material_index);
    }
}
