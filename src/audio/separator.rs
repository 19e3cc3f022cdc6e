// 分离引擎调用模块

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::audio::locator;
use crate::config::SeparationConfig;
use crate::error::{AppError, AppResult};
use crate::models::StemLabel;
use crate::utils::hidden_command;

/// 诊断信息截断长度
const DIAGNOSTIC_MAX_CHARS: usize = 500;

/// 依优先级逐个模型调用分离引擎，返回分轨标签到落盘路径的映射
///
/// 单个模型失败（进程无法启动、非零退出、或输出中没有可识别分轨）
/// 只在本地记录并换下一个模型；对同一模型重试没有意义，失败通常由
/// 输入/硬件特性决定，只有换模型才可能恢复。全部模型失败后才返回
/// Separation 错误，错误信息来自最后一个尝试的模型。
pub fn separate(
    input_path: &Path,
    scratch_dir: &Path,
    dest_dir: &Path,
    job_id: &str,
    config: &SeparationConfig,
) -> AppResult<HashMap<StemLabel, PathBuf>> {
    if config.models.is_empty() {
        return Err(AppError::Config("模型优先级列表为空".to_string()));
    }

    let mut last_diagnostic = String::new();

    for model in &config.models {
        info!("[SEPARATOR] 尝试模型: {}", model);
        match run_model(input_path, scratch_dir, dest_dir, job_id, model, config) {
            Ok(stems) => {
                info!("[SEPARATOR] 模型 {} 成功，产出 {} 个分轨", model, stems.len());
                return Ok(stems);
            }
            Err(AppError::Engine(diagnostic)) => {
                warn!("[SEPARATOR] 模型 {} 失败，尝试下一个模型", model);
                last_diagnostic = diagnostic;
            }
            // 数据库/IO 等环境错误换模型也无法恢复，直接上抛
            Err(e) => return Err(e),
        }
    }

    error!("[SEPARATOR] 所有模型均失败");
    Err(AppError::Separation(last_diagnostic))
}

/// 运行单个模型，失败统一以 Engine 错误返回（内部错误，供回退判断）
fn run_model(
    input_path: &Path,
    scratch_dir: &Path,
    dest_dir: &Path,
    job_id: &str,
    model: &str,
    config: &SeparationConfig,
) -> AppResult<HashMap<StemLabel, PathBuf>> {
    let args = vec![
        "--name".to_string(), model.to_string(),
        "--out".to_string(), scratch_dir.to_string_lossy().to_string(),
        input_path.to_string_lossy().to_string(),
    ];

    info!(
        "[SEPARATOR] 引擎命令: {} {}",
        config.engine_program,
        args.join(" ")
    );

    let output = hidden_command(&config.engine_program)
        .args(&args)
        .output()
        .map_err(|e| {
            AppError::Engine(format!(
                "启动分离引擎 ({}) 失败: {}",
                model, e
            ))
        })?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            "[SEPARATOR] 引擎退出码: {:?}, 模型: {}",
            output.status.code(),
            model
        );
        let diagnostic = format!("{}\n{}", stdout.trim(), stderr.trim());
        return Err(AppError::Engine(format!(
            "分离引擎 ({}) 失败: {}",
            model,
            diagnostic
                .trim()
                .chars()
                .take(DIAGNOSTIC_MAX_CHARS)
                .collect::<String>()
        )));
    }

    let stems = locator::collect_stems(scratch_dir, job_id, dest_dir)?;
    if stems.is_empty() {
        // 引擎正常退出但没有产出可识别的分轨，同样按模型失败处理
        return Err(AppError::Engine(format!(
            "分离引擎 ({}) 未产出可识别的分轨文件",
            model
        )));
    }

    Ok(stems)
}
