// 配置管理模块
//
// 配置是显式传递的值：加载后由调用方在构造各组件时注入，
// 不放入全局状态，便于测试时注入独立的临时目录。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppResult;
use crate::models;
use crate::utils::resolve_tool_path;

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 原始上传文件目录
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// 分轨输出目录
    #[serde(default = "default_stems_dir")]
    pub stems_dir: PathBuf,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_stems_dir() -> PathBuf {
    PathBuf::from("stems")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            stems_dir: default_stems_dir(),
        }
    }
}

/// 格式归一化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// ffmpeg 程序路径
    #[serde(default = "default_ffmpeg_program")]
    pub ffmpeg_program: String,
}

fn default_ffmpeg_program() -> String {
    resolve_tool_path("ffmpeg")
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            ffmpeg_program: default_ffmpeg_program(),
        }
    }
}

/// 分轨配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationConfig {
    /// 分离引擎程序路径
    #[serde(default = "default_engine_program")]
    pub engine_program: String,
    /// 模型优先级列表，靠前的优先尝试
    #[serde(default = "default_models")]
    pub models: Vec<String>,
}

fn default_engine_program() -> String {
    resolve_tool_path("demucs")
}

fn default_models() -> Vec<String> {
    models::default_model_priority()
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            engine_program: default_engine_program(),
            models: default_models(),
        }
    }
}

/// 工作线程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 工作线程数，即同时处理的任务数上限
    #[serde(default = "default_worker_threads")]
    pub threads: usize,
}

fn default_worker_threads() -> usize {
    // 分离引擎非常吃内存/显存，默认接近串行执行
    num_cpus::get().min(2).max(1)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: default_worker_threads(),
        }
    }
}

/// 限额配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// 单个账户最多保留的任务数，演示任务不计入
    #[serde(default = "default_max_owner_jobs")]
    pub max_owner_jobs: usize,
}

fn default_max_owner_jobs() -> usize {
    3
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_owner_jobs: default_max_owner_jobs(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub separation: SeparationConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub limits: LimitConfig,
    #[serde(default)]
    pub log_level: LogLevel,
}

/// 加载配置文件，不存在时写入默认配置
pub fn load_config(config_path: &Path) -> AppResult<AppConfig> {
    let config = if config_path.exists() {
        let content = fs::read_to_string(config_path)?;
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("配置文件 JSON 解析失败: {}，使用默认配置", e);
            AppConfig::default()
        })
    } else {
        let config = AppConfig::default();
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(config_path, content)?;
        config
    };

    Ok(config)
}

/// 保存配置
pub fn save_config(config_path: &Path, config: &AppConfig) -> AppResult<()> {
    // 先序列化再写入，避免写入一半的配置文件
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.separation.models, vec!["htdemucs_6s", "htdemucs"]);
        assert_eq!(config.limits.max_owner_jobs, 3);
        assert!(config.worker.threads >= 1);
    }

    #[test]
    fn test_load_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.limits.max_owner_jobs, 3);

        // 再次加载读取到同样的内容
        let reloaded = load_config(&path).unwrap();
        assert_eq!(reloaded.separation.models, config.separation.models);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"limits": {"max_owner_jobs": 10}}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.limits.max_owner_jobs, 10);
        assert_eq!(config.separation.models, vec!["htdemucs_6s", "htdemucs"]);
    }
}
