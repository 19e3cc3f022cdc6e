// 音频格式归一化模块

use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::ConversionConfig;
use crate::error::{AppError, AppResult};
use crate::utils::hidden_command;

/// 归一化目标采样率
pub const CANONICAL_SAMPLE_RATE: u32 = 44100;
/// 归一化目标声道数
pub const CANONICAL_CHANNELS: u32 = 2;
/// 诊断信息截断长度
const DIAGNOSTIC_MAX_CHARS: usize = 500;

/// 将输入音频归一化为分离引擎稳定可读的 44.1kHz 双声道 WAV
///
/// 输入已是 WAV 时直接返回原路径，不做复制；否则调用 ffmpeg 转换，
/// 输出写入调用方提供的 scratch 目录，目录的清理由调用方负责。
pub fn normalize(
    input_path: &Path,
    scratch_dir: &Path,
    config: &ConversionConfig,
) -> AppResult<PathBuf> {
    let is_wav = input_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);

    if is_wav {
        info!("[NORMALIZE] 输入已是 WAV，直接使用: {}", input_path.display());
        return Ok(input_path.to_path_buf());
    }

    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input");
    let wav_path = scratch_dir.join(format!("{}_converted.wav", stem));

    info!(
        "[NORMALIZE] 转换为 WAV: {} -> {}",
        input_path.display(),
        wav_path.display()
    );

    let args = vec![
        "-y".to_string(),
        "-i".to_string(), input_path.to_string_lossy().to_string(),
        "-ar".to_string(), CANONICAL_SAMPLE_RATE.to_string(),
        "-ac".to_string(), CANONICAL_CHANNELS.to_string(),
        "-f".to_string(), "wav".to_string(),
        wav_path.to_string_lossy().to_string(),
    ];

    let output = hidden_command(&config.ffmpeg_program)
        .args(&args)
        .output()
        .map_err(|e| {
            AppError::Conversion(format!("启动 {} 失败: {}", config.ffmpeg_program, e))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            "[NORMALIZE] ffmpeg 转换失败，退出码: {:?}",
            output.status.code()
        );
        return Err(AppError::Conversion(format!(
            "ffmpeg 转换失败: {}",
            stderr.trim().chars().take(DIAGNOSTIC_MAX_CHARS).collect::<String>()
        )));
    }

    Ok(wav_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bogus_config() -> ConversionConfig {
        // 指向不存在的程序：只要归一化尝试调用转换工具就必然报错
        ConversionConfig {
            ffmpeg_program: "/nonexistent/ffmpeg".to_string(),
        }
    }

    #[test]
    fn test_wav_passthrough_skips_conversion() {
        let scratch = tempfile::tempdir().unwrap();
        let input = Path::new("/music/track.wav");

        let result = normalize(input, scratch.path(), &bogus_config()).unwrap();
        assert_eq!(result, input.to_path_buf());
    }

    #[test]
    fn test_wav_passthrough_case_insensitive() {
        let scratch = tempfile::tempdir().unwrap();
        let input = Path::new("/music/track.WAV");

        let result = normalize(input, scratch.path(), &bogus_config()).unwrap();
        assert_eq!(result, input.to_path_buf());
    }

    #[test]
    fn test_missing_tool_is_conversion_error() {
        let scratch = tempfile::tempdir().unwrap();
        let input = Path::new("/music/track.mp3");

        let err = normalize(input, scratch.path(), &bogus_config()).unwrap_err();
        match err {
            AppError::Conversion(message) => {
                assert!(message.contains("/nonexistent/ffmpeg"));
            }
            other => panic!("错误类型不对: {:?}", other),
        }
    }
}
