// 输出文件定位模块

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::AppResult;
use crate::models::StemLabel;
use crate::utils::{move_file, remove_file_if_exists};

/// 识别为音频输出的扩展名
const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac"];

/// 在引擎输出树中定位分轨文件并移入目标目录
///
/// 引擎的输出层级不是稳定契约（通常嵌套模型名/输入名子目录），
/// 所以只向下搜索固定的两层，取第一个包含音频文件的目录。
/// 目录内主名不在词汇表中的文件一律忽略；找不到任何可用结果时
/// 返回空映射而不是错误，由调用方按模型失败处理。
pub fn collect_stems(
    scratch_dir: &Path,
    job_id: &str,
    dest_dir: &Path,
) -> AppResult<HashMap<StemLabel, PathBuf>> {
    let mut results = HashMap::new();

    let stem_dir = match find_stem_dir(scratch_dir) {
        Some(dir) => dir,
        None => {
            warn!(
                "[LOCATOR] 未在 {} 下找到引擎输出目录",
                scratch_dir.display()
            );
            return Ok(results);
        }
    };

    debug!("[LOCATOR] 引擎输出目录: {}", stem_dir.display());
    fs::create_dir_all(dest_dir)?;

    let mut entries: Vec<PathBuf> = fs::read_dir(&stem_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s,
            None => continue,
        };
        let label = match StemLabel::parse(stem) {
            Some(label) => label,
            None => {
                debug!("[LOCATOR] 忽略无法识别的输出文件: {}", path.display());
                continue;
            }
        };

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let dest = dest_dir.join(format!("{}_{}{}", job_id, label.as_str(), ext));

        // 覆盖上一次失败尝试遗留的同名文件
        remove_file_if_exists(&dest)?;
        move_file(&path, &dest)?;
        results.insert(label, dest);
    }

    info!(
        "[LOCATOR] 任务 {} 共定位 {} 个分轨文件",
        job_id,
        results.len()
    );
    Ok(results)
}

/// 向下最多搜索两层，返回第一个包含音频文件的目录
fn find_stem_dir(root: &Path) -> Option<PathBuf> {
    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .flatten()
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        if contains_audio_file(entry.path()) {
            return Some(entry.path().to_path_buf());
        }
    }
    None
}

fn contains_audio_file(dir: &Path) -> bool {
    match fs::read_dir(dir) {
        Ok(entries) => entries.flatten().any(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .map(|x| AUDIO_EXTENSIONS.contains(&x.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        }),
        Err(_) => false,
    }
}
