use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use choras_config::{AppConfig, ConfigError, Grouping};
use choras_engine::geo::MesherSettings;
use choras_engine::pipeline::{ConversionOutput, ConversionPipeline, PipelineOptions};
use choras_engine::reconcile::{MaterialMapping, reconcile_file};
use choras_engine::task::ConversionTask;
use choras_engine::topology::{ExtractOptions, GroupingMode};
use choras_io::{SourceFormat, load_intermediate};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

/// 将 DXF/OBJ 模型转换为 GEO 边界描述。
#[derive(Parser)]
#[command(name = "choras", version, long_about = None)]
struct Cli {
    /// 配置文件路径，缺省时读取 `CHORAS_CONFIG` 或 `./config/default.toml`
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 转换单个 DXF/OBJ 文件
    Convert {
        source: PathBuf,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        volume_name: Option<String>,

        /// per-material 或 per-object
        #[arg(long)]
        grouping: Option<GroupingMode>,

        /// 写出后按对象 ID 回写物理面组名
        #[arg(long)]
        reconcile: bool,
    },

    /// 用中间文档中的对象 ID 回写已有 GEO 文件
    Reconcile {
        geo: PathBuf,

        #[arg(long)]
        document: PathBuf,
    },

    /// 递归转换目录下全部 DXF/OBJ 文件
    Batch {
        dir: PathBuf,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_configuration(cli.config.clone());
    init_logging(&config);

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "执行失败");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: &AppConfig) -> Result<()> {
    match cli.command {
        Commands::Convert {
            source,
            output_dir,
            volume_name,
            grouping,
            reconcile,
        } => {
            let mut options = pipeline_options(config, &source, output_dir);
            if let Some(name) = volume_name {
                options.extract.volume_name = name;
            }
            if let Some(mode) = grouping {
                options.extract.grouping = mode;
            }
            options.reconcile |= reconcile;

            let mut task = ConversionTask::new(1, &source);
            let output = ConversionPipeline::new(options)
                .run(&mut task)
                .with_context(|| format!("转换 {} 失败", source.display()))?;
            report(&output, task.diagnostics().len());
            Ok(())
        }
        Commands::Reconcile { geo, document } => {
            let document = load_intermediate(&document)
                .with_context(|| format!("读取中间文档 {} 失败", document.display()))?;
            let mapping = MaterialMapping::from_document(&document);
            let result = reconcile_file(&geo, &mapping)
                .with_context(|| format!("回写 {} 失败", geo.display()))?;
            for (from, to) in &result.renamed {
                println!("{from} -> {to}");
            }
            Ok(())
        }
        Commands::Batch { dir, output_dir } => run_batch(config, &dir, output_dir),
    }
}

fn run_batch(config: &AppConfig, dir: &Path, output_dir: Option<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        bail!("目录不存在：{}", dir.display());
    }
    let sources = collect_sources(dir);
    info!(dir = %dir.display(), count = sources.len(), "开始批量转换");

    let mut failed = 0usize;
    for (index, source) in sources.iter().enumerate() {
        let options = pipeline_options(config, source, output_dir.clone());
        let mut task = ConversionTask::new(index as u64 + 1, source);
        match ConversionPipeline::new(options).run(&mut task) {
            Ok(output) => report(&output, task.diagnostics().len()),
            Err(err) => {
                failed += 1;
                eprintln!("{}: {err}", source.display());
            }
        }
    }

    println!("converted {} of {} files", sources.len() - failed, sources.len());
    if failed > 0 {
        bail!("{failed} 个文件转换失败");
    }
    Ok(())
}

/// 递归收集 DXF/OBJ 源文件，跳过 OBJ 清洗产生的 `_clean.obj`。
fn collect_sources(dir: &Path) -> Vec<PathBuf> {
    let mut sources: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "遍历目录时跳过无法访问的条目");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            matches!(
                SourceFormat::from_path(path),
                Ok(SourceFormat::Dxf | SourceFormat::Obj)
            )
        })
        .filter(|path| {
            !path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem.ends_with("_clean"))
        })
        .collect();
    sources.sort();
    sources
}

/// 命令行参数优先，其次配置文件，最后回退到源文件所在目录。
fn pipeline_options(
    config: &AppConfig,
    source: &Path,
    output_dir: Option<PathBuf>,
) -> PipelineOptions {
    let output_dir = output_dir
        .or_else(|| config.output.directory.clone())
        .or_else(|| {
            source
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
        .unwrap_or_else(|| PathBuf::from("."));

    let mut options = PipelineOptions::new(output_dir);
    options.extract = ExtractOptions {
        grouping: match config.conversion.grouping {
            Grouping::PerMaterial => GroupingMode::PerMaterial,
            Grouping::PerObject => GroupingMode::PerObject,
        },
        volume_name: config.conversion.volume_name.clone(),
    };
    options.mesher = MesherSettings {
        algorithm: config.mesher.algorithm,
        algorithm_3d: config.mesher.algorithm_3d,
        characteristic_length_from_points: config.mesher.characteristic_length_from_points,
        point_characteristic_length: config.mesher.point_characteristic_length,
    };
    options.dxf_batch_size = config.conversion.dxf_batch_size.max(1);
    options.reconcile = config.conversion.reconcile;
    options
}

fn report(output: &ConversionOutput, diagnostics: usize) {
    println!(
        "{}: {} points, {} lines, {} surfaces, {} groups, {} warnings",
        output.geo_path.display(),
        output.points,
        output.lines,
        output.surfaces,
        output.groups,
        diagnostics
    );
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            eprintln!("加载指定配置 {} 失败，使用默认配置：{err}", path.display());
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        eprintln!("加载默认配置 {} 失败，使用内建默认值：{err}", path.display());
                    }
                    ConfigError::Context { .. } => {
                        eprintln!("加载默认配置失败，使用内建默认值：{err}");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
