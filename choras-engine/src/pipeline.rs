use std::fs;
use std::path::{Path, PathBuf};

use choras_io::{DEFAULT_BATCH_SIZE, ImportOptions, IoError, load_source, save_intermediate};
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::geo::{GeoWriter, MesherSettings};
use crate::reconcile::{MaterialMapping, ReconcileReport, reconcile_file};
use crate::task::ConversionTask;
use crate::topology::{ExtractOptions, GroupingMode, TopologyExtractor};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// `<stem>.json`、`<stem>.geo` 与 OBJ 清洗结果的输出目录。
    pub output_dir: PathBuf,
    pub extract: ExtractOptions,
    pub mesher: MesherSettings,
    pub dxf_batch_size: usize,
    /// 写出 GEO 后是否按文档中的对象 ID 回写物理面组名。
    pub reconcile: bool,
}

impl PipelineOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            extract: ExtractOptions::default(),
            mesher: MesherSettings::default(),
            dxf_batch_size: DEFAULT_BATCH_SIZE,
            reconcile: false,
        }
    }
}

/// 一次成功转换的产物。
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub document_path: PathBuf,
    pub geo_path: PathBuf,
    pub points: usize,
    pub lines: usize,
    pub surfaces: usize,
    pub groups: usize,
    pub reconcile: Option<ReconcileReport>,
}

/// 导入 → 中间文档 → 拓扑提取 → GEO →（可选）材质回写。不保存跨任务状态。
#[derive(Debug, Clone)]
pub struct ConversionPipeline {
    options: PipelineOptions,
}

impl ConversionPipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    /// 驱动任务走完状态机；致命错误会把任务标记为 `Error` 并原样返回。
    pub fn run(&self, task: &mut ConversionTask) -> Result<ConversionOutput, PipelineError> {
        task.start()?;
        match self.execute(task) {
            Ok(output) => {
                task.complete()?;
                info!(
                    task = task.id(),
                    geo = %output.geo_path.display(),
                    diagnostics = task.diagnostics().len(),
                    "转换完成"
                );
                Ok(output)
            }
            Err(err) => {
                warn!(task = task.id(), error = %err, "转换失败");
                task.fail(err.to_string())?;
                Err(err)
            }
        }
    }

    fn execute(&self, task: &mut ConversionTask) -> Result<ConversionOutput, PipelineError> {
        let source_path = task.source().to_path_buf();
        let output_dir = &self.options.output_dir;
        fs::create_dir_all(output_dir).map_err(|source| IoError::WriteError {
            path: output_dir.clone(),
            source,
        })?;

        let import = ImportOptions {
            dxf_batch_size: self.options.dxf_batch_size,
            clean_dir: Some(output_dir.clone()),
        };
        let report = load_source(&source_path, &import)?;
        task.record_diagnostics(report.diagnostics);
        let document = report.document;
        if let Some(bounds) = document.bounds() {
            debug!(
                layers = document.layers().count(),
                extent = ?bounds.size().as_vec3(),
                "文档包围盒"
            );
        }

        let stem = file_stem(&source_path);
        let document_path = output_dir.join(format!("{stem}.json"));
        save_intermediate(&document, &document_path)?;

        let description = TopologyExtractor::new(self.options.extract.clone()).extract(&document);
        task.record_diagnostics(description.diagnostics.iter().cloned());

        let geo_path = output_dir.join(format!("{stem}.geo"));
        GeoWriter::new(self.options.mesher).write(&description, &geo_path)?;

        // 按对象分组时组名已是对象 ID，没有可回写的材质键
        let reconcile = match (self.options.reconcile, self.options.extract.grouping) {
            (true, GroupingMode::PerObject) => {
                warn!(task = task.id(), "按对象分组时跳过材质回写");
                None
            }
            (true, GroupingMode::PerMaterial) => {
                let mapping = MaterialMapping::from_document(&document);
                Some(reconcile_file(&geo_path, &mapping)?)
            }
            (false, _) => None,
        };

        Ok(ConversionOutput {
            document_path,
            geo_path,
            points: description.point_count(),
            lines: description.line_count(),
            surfaces: description.surface_count(),
            groups: description.groups.len(),
            reconcile,
        })
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}
