use std::collections::HashMap;
use std::fs;
use std::path::Path;

use choras_core::document::Document;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::errors::{EngineError, MismatchCause, ReconcileError};
use crate::topology::{object_key, physical_name};

static PHYSICAL_SURFACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*Physical Surface\("([^"]*)"\)"#).expect("valid physical surface regex")
});

/// 材质名 → 对象 ID 列表。回写时每遇到一个物理面组就从对应列表末尾取出一个 ID。
/// 键和值都按 GEO 组名规则清理，与写出的组名一致。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialMapping {
    entries: HashMap<String, Vec<String>>,
}

impl MaterialMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// 扫描文档中的网格，按材质键收集对象 ID（同一材质下不重复）。
    pub fn from_document(document: &Document) -> Self {
        let mut mapping = Self::new();
        for (id, mesh) in document.meshes() {
            let object = physical_name(&object_key(id, mesh));
            let objects = mapping
                .entries
                .entry(physical_name(&mesh.material_key()))
                .or_default();
            if !objects.contains(&object) {
                objects.push(object);
            }
        }
        mapping
    }

    pub fn insert(&mut self, material: impl Into<String>, object_id: impl Into<String>) {
        self.entries
            .entry(physical_name(&material.into()))
            .or_default()
            .push(physical_name(&object_id.into()));
    }

    pub fn objects(&self, material: &str) -> Option<&[String]> {
        self.entries.get(material).map(Vec::as_slice)
    }
}

impl<K, V> FromIterator<(K, V)> for MaterialMapping
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (material, object) in iter {
            mapping.insert(material, object);
        }
        mapping
    }
}

/// 被回写的物理面组，按文件中出现的顺序记录 `(原组名, 新组名)`。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub renamed: Vec<(String, String)>,
}

/// 逐行替换 `Physical Surface("<键>")` 中的组名，其余字节保持不变。
pub fn reconcile_text(
    text: &str,
    mapping: &MaterialMapping,
) -> Result<(String, ReconcileReport), ReconcileError> {
    let mut remaining = mapping.entries.clone();
    let mut report = ReconcileReport::default();
    let mut out = String::with_capacity(text.len());

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let Some(name) = PHYSICAL_SURFACE
            .captures(line)
            .and_then(|captures| captures.get(1))
        else {
            out.push_str(line);
            continue;
        };

        let key = name.as_str();
        let objects = remaining
            .get_mut(key)
            .ok_or_else(|| ReconcileError::MaterialMismatch {
                key: key.to_string(),
                line: index + 1,
                cause: MismatchCause::Unmapped,
            })?;
        let object = objects.pop().ok_or_else(|| ReconcileError::MaterialMismatch {
            key: key.to_string(),
            line: index + 1,
            cause: MismatchCause::Exhausted,
        })?;

        debug!(line = index + 1, from = key, to = %object, "回写物理面组");
        out.push_str(&line[..name.start()]);
        out.push_str(&object);
        out.push_str(&line[name.end()..]);
        report.renamed.push((key.to_string(), object));
    }

    Ok((out, report))
}

/// 就地回写 GEO 文件；失败时文件保持原样。
pub fn reconcile_file(
    path: &Path,
    mapping: &MaterialMapping,
) -> Result<ReconcileReport, ReconcileError> {
    let text = fs::read_to_string(path).map_err(|source| EngineError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let (rewritten, report) = reconcile_text(&text, mapping)?;
    fs::write(path, rewritten).map_err(|source| EngineError::WriteError {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        path = %path.display(),
        renamed = report.renamed.len(),
        "材质回写完成"
    );
    Ok(report)
}
