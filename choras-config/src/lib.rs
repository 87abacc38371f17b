use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "CHORAS_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub mesher: MesherConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `CHORAS_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grouping {
    #[default]
    PerMaterial,
    PerObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversionConfig {
    #[serde(default)]
    pub grouping: Grouping,
    #[serde(default = "ConversionConfig::default_volume_name")]
    pub volume_name: String,
    #[serde(default = "ConversionConfig::default_batch_size")]
    pub dxf_batch_size: usize,
    #[serde(default)]
    pub reconcile: bool,
}

impl ConversionConfig {
    fn default_volume_name() -> String {
        "RoomVolume".to_string()
    }

    fn default_batch_size() -> usize {
        1000
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            grouping: Grouping::default(),
            volume_name: Self::default_volume_name(),
            dxf_batch_size: Self::default_batch_size(),
            reconcile: false,
        }
    }
}

/// GEO 文件末尾的网格划分指令。
#[derive(Debug, Clone, Deserialize)]
pub struct MesherConfig {
    #[serde(default = "MesherConfig::default_algorithm")]
    pub algorithm: u32,
    #[serde(default = "MesherConfig::default_algorithm_3d")]
    pub algorithm_3d: u32,
    #[serde(default = "MesherConfig::default_true")]
    pub characteristic_length_from_points: bool,
    #[serde(default = "MesherConfig::default_point_length")]
    pub point_characteristic_length: f64,
}

impl MesherConfig {
    fn default_algorithm() -> u32 {
        6
    }

    fn default_algorithm_3d() -> u32 {
        1
    }

    fn default_true() -> bool {
        true
    }

    fn default_point_length() -> f64 {
        1.0
    }
}

impl Default for MesherConfig {
    fn default() -> Self {
        Self {
            algorithm: Self::default_algorithm(),
            algorithm_3d: Self::default_algorithm_3d(),
            characteristic_length_from_points: true,
            point_characteristic_length: Self::default_point_length(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// 输出目录；为空时写到源文件所在目录。
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_mesher_conventions() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.conversion.grouping, Grouping::PerMaterial);
        assert_eq!(cfg.conversion.volume_name, "RoomVolume");
        assert_eq!(cfg.conversion.dxf_batch_size, 1000);
        assert!(!cfg.conversion.reconcile);
        assert_eq!(cfg.mesher.algorithm, 6);
        assert_eq!(cfg.mesher.algorithm_3d, 1);
        assert!(cfg.mesher.characteristic_length_from_points);
        assert_eq!(cfg.mesher.point_characteristic_length, 1.0);
        assert!(cfg.output.directory.is_none());
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [conversion]
            grouping = "per-object"
            volume_name = "Hall"
            reconcile = true

            [mesher]
            algorithm = 5
            point_characteristic_length = 0.5

            [output]
            directory = "../out"
            "#
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.conversion.grouping, Grouping::PerObject);
        assert_eq!(cfg.conversion.volume_name, "Hall");
        assert_eq!(cfg.conversion.dxf_batch_size, 1000);
        assert!(cfg.conversion.reconcile);
        assert_eq!(cfg.mesher.algorithm, 5);
        assert_eq!(cfg.mesher.algorithm_3d, 1);
        assert_eq!(cfg.mesher.point_characteristic_length, 0.5);
        assert_eq!(
            cfg.output
                .directory
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("../out".to_string())
        );
    }

    #[test]
    fn unknown_grouping_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[conversion]\ngrouping = \"per-layer\"").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let err = AppConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
