// 任务执行模块

use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::audio::{normalizer, separator};
use crate::config::AppConfig;
use crate::database::Database;
use crate::error::AppResult;
use crate::utils::StemFile;

/// 执行单个任务的完整流水线：归一化 -> 分离 -> 落盘
///
/// 状态流转 queued -> processing -> complete | error。进入 processing
/// 时任务已不在存储中说明被并发删除，静默返回。任何阶段出错都会把
/// 截断后的错误信息写入任务记录；写入失败本身只记日志不再上抛，
/// 避免二次失败逃出执行器。
pub fn run_job(
    db: &Database,
    config: &AppConfig,
    job_id: &str,
    source_path: &Path,
) -> AppResult<()> {
    if !db.mark_processing(job_id)? {
        debug!("[RUNNER] 任务 {} 不存在或已结束，跳过", job_id);
        return Ok(());
    }

    info!(
        "[RUNNER] 任务 {} 开始处理: {}",
        job_id,
        source_path.display()
    );

    match process(db, config, job_id, source_path) {
        Ok(count) => {
            info!("[RUNNER] 任务 {} 处理完成，共 {} 个分轨", job_id, count);
        }
        Err(e) => {
            error!("[RUNNER] 任务 {} 处理失败: {}", job_id, e);
            if let Err(record_err) = db.fail_job(job_id, &e.to_string()) {
                warn!(
                    "[RUNNER] 任务 {} 记录失败状态时出错: {}",
                    job_id, record_err
                );
            }
        }
    }

    Ok(())
}

fn process(
    db: &Database,
    config: &AppConfig,
    job_id: &str,
    source_path: &Path,
) -> AppResult<usize> {
    let stems_dir = &config.storage.stems_dir;
    std::fs::create_dir_all(stems_dir)?;

    // 任务级 scratch 目录，作用域结束时无条件删除，成功失败都一样
    let scratch = tempfile::Builder::new()
        .prefix(&format!("_tmp_{}_", job_id))
        .tempdir_in(stems_dir)?;

    let normalized = normalizer::normalize(source_path, scratch.path(), &config.conversion)?;
    let located = separator::separate(
        &normalized,
        scratch.path(),
        stems_dir,
        job_id,
        &config.separation,
    )?;

    let stems: Vec<StemFile> = located
        .into_iter()
        .map(|(label, path)| StemFile {
            label,
            file_path: path.to_string_lossy().to_string(),
        })
        .collect();

    // 分轨记录与状态翻转在同一事务中提交，不会出现部分结果
    db.complete_job(job_id, &stems)?;
    Ok(stems.len())
}
