use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use choras_core::diagnostics::Diagnostic;
use choras_core::document::{Document, Face};
use thiserror::Error;
use tracing::{debug, info};

mod dxf;
mod obj;

pub use dxf::{DEFAULT_BATCH_SIZE, DxfFacade};
pub use obj::{CleanedObj, ObjFacade, clean_obj};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("源文件不存在：{path:?}")]
    SourceNotFound { path: PathBuf },
    #[error("不支持的文件格式：{0}")]
    UnsupportedFormat(String),
    #[error("源文件 {path:?} 内容损坏：{message}")]
    CorruptSource { path: PathBuf, message: String },
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("中间文档 {path:?} 序列化失败：{source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 按扩展名识别的输入格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Dxf,
    Obj,
    /// 已序列化的中间文档（JSON）。
    Document,
}

impl SourceFormat {
    /// 扩展名不区分大小写；无扩展名或未知扩展名返回 `UnsupportedFormat`。
    pub fn from_path(path: &Path) -> Result<Self, IoError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "dxf" => Ok(SourceFormat::Dxf),
            "obj" => Ok(SourceFormat::Obj),
            "json" => Ok(SourceFormat::Document),
            "" => Err(IoError::UnsupportedFormat(format!(
                "{} 缺少扩展名",
                path.display()
            ))),
            other => Err(IoError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceFormat::Dxf => "dxf",
            SourceFormat::Obj => "obj",
            SourceFormat::Document => "json",
        }
    }
}

/// 导入结果：文档本身以及导入过程中累积的可恢复诊断。
#[derive(Debug, Default)]
pub struct ImportReport {
    pub document: Document,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportReport {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            diagnostics: Vec::new(),
        }
    }
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<ImportReport, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError>;
}

/// 导入阶段的可调参数。
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub dxf_batch_size: usize,
    /// OBJ 清洗结果 `<stem>_clean.obj` 的输出目录；为空时写到源文件旁。
    pub clean_dir: Option<PathBuf>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dxf_batch_size: DEFAULT_BATCH_SIZE,
            clean_dir: None,
        }
    }
}

/// 检查源文件并按格式分派到对应的导入器。
pub fn load_source(path: &Path, options: &ImportOptions) -> Result<ImportReport, IoError> {
    if !path.is_file() {
        return Err(IoError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }
    let format = SourceFormat::from_path(path)?;
    debug!(path = %path.display(), format = format.name(), "开始导入源文件");

    let report = match format {
        SourceFormat::Dxf => DxfFacade::with_batch_size(options.dxf_batch_size).load(path)?,
        SourceFormat::Obj => {
            let facade = match &options.clean_dir {
                Some(dir) => ObjFacade::with_clean_dir(dir.clone()),
                None => ObjFacade::new(),
            };
            facade.load(path)?
        }
        SourceFormat::Document => JsonDocumentFacade::new().load(path)?,
    };

    info!(
        path = %path.display(),
        entities = report.document.entity_count(),
        meshes = report.document.meshes().count(),
        diagnostics = report.diagnostics.len(),
        "源文件导入完成"
    );
    Ok(report)
}

/// 中间文档的 JSON 读写。
pub struct JsonDocumentFacade;

impl JsonDocumentFacade {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonDocumentFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentLoader for JsonDocumentFacade {
    fn load(&self, path: &Path) -> Result<ImportReport, IoError> {
        let data = read_source(path)?;
        let document: Document =
            serde_json::from_str(&data).map_err(|err| IoError::CorruptSource {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(ImportReport::new(document))
    }
}

impl DocumentSaver for JsonDocumentFacade {
    fn save(&self, document: &Document, path: &Path) -> Result<(), IoError> {
        let file = File::create(path).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), document).map_err(|source| {
            IoError::Serialize {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!(path = %path.display(), "中间文档已写出");
        Ok(())
    }
}

pub fn save_intermediate(document: &Document, path: &Path) -> Result<(), IoError> {
    JsonDocumentFacade::new().save(document, path)
}

pub fn load_intermediate(path: &Path) -> Result<Document, IoError> {
    if !path.is_file() {
        return Err(IoError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }
    JsonDocumentFacade::new()
        .load(path)
        .map(|report| report.document)
}

/// 多边形面：3/4 个顶点原样保留，更多顶点以首顶点做扇形三角化，不足 3 个返回空。
pub(crate) fn polygon_faces(indices: &[u32]) -> Vec<Face> {
    if let Some(face) = Face::from_indices(indices) {
        return vec![face];
    }
    if indices.len() < 3 {
        return Vec::new();
    }
    indices[1..]
        .windows(2)
        .map(|pair| Face::Triangle([indices[0], pair[0], pair[1]]))
        .collect()
}

pub(crate) fn read_source(path: &Path) -> Result<String, IoError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            IoError::SourceNotFound {
                path: path.to_path_buf(),
            }
        } else {
            IoError::ReadError {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}
