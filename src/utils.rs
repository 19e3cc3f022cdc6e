// 工具模块

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use serde::{Deserialize, Serialize};

use crate::models::StemLabel;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// Windows 下隐藏控制台窗口的标志
#[cfg(target_os = "windows")]
pub const CREATE_NO_WINDOW: u32 = 0x08000000;

/// 创建一个隐藏控制台窗口的 Command（Windows 专用）
/// 在非 Windows 平台上等同于 Command::new
#[cfg(target_os = "windows")]
pub fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(target_os = "windows"))]
pub fn hidden_command(program: &str) -> Command {
    Command::new(program)
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    /// 从数据库文本解析，未知值按 queued 处理
    pub fn parse(s: &str) -> JobStatus {
        match s {
            "processing" => JobStatus::Processing,
            "complete" => JobStatus::Complete,
            "error" => JobStatus::Error,
            _ => JobStatus::Queued,
        }
    }

    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

/// 分轨结果文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StemFile {
    pub label: StemLabel,
    pub file_path: String,
}

/// 任务信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: String,
    /// 所属账户，演示任务为 None
    pub owner: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
    /// 原始上传文件路径，创建后不再变更
    pub source_path: String,
    pub status: JobStatus,
    /// 仅在 error 状态下有值
    pub error_message: Option<String>,
    /// 仅在 complete 状态下非空
    #[serde(default)]
    pub stems: Vec<StemFile>,
    pub created_at: String,
    pub updated_at: String,
}

/// 生成 UUID
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 当前本地时间的文本时间戳
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// 获取可执行文件所在目录
pub fn get_exe_dir() -> Option<PathBuf> {
    std::env::current_exe().ok()?.parent().map(|p| p.to_path_buf())
}

/// 解析程序路径，优先使用可执行文件同级的 tools 目录
pub fn resolve_tool_path(tool_name: &str) -> String {
    #[cfg(target_os = "windows")]
    let file_name = format!("{}.exe", tool_name);
    #[cfg(not(target_os = "windows"))]
    let file_name = tool_name.to_string();

    if let Some(exe_dir) = get_exe_dir() {
        // 检查 tools 子目录
        let tool_path = exe_dir.join("tools").join(&file_name);
        if tool_path.exists() {
            return tool_path.to_string_lossy().to_string();
        }
        // 检查可执行文件同级目录
        let tool_path = exe_dir.join(&file_name);
        if tool_path.exists() {
            return tool_path.to_string_lossy().to_string();
        }
    }

    // 回退到系统 PATH
    tool_name.to_string()
}

/// 移动文件，重命名跨文件系统失败时回退为复制后删除
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

/// 删除文件，文件不存在时不算错误
pub fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
