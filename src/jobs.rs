// 任务管理模块

use std::path::Path;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::utils::{generate_id, now_timestamp, remove_file_if_exists, Job, JobStatus};

/// 允许上传的音频扩展名
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg", "aac"];

/// 校验文件扩展名是否允许上传
pub fn is_allowed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 创建任务记录（初始状态 queued）
///
/// 普通账户受任务数量上限约束，演示任务不计入；上限检查在这里做，
/// 上传大小/类型校验由外部接口层负责。
pub fn create_job(
    db: &Database,
    config: &AppConfig,
    title: &str,
    owner: Option<&str>,
    source_path: &Path,
) -> AppResult<Job> {
    if !is_allowed_extension(source_path) {
        return Err(AppError::InvalidArgument(format!(
            "不支持的文件类型: {}",
            source_path.display()
        )));
    }

    if let Some(owner) = owner {
        let count = db.count_owner_jobs(owner)?;
        if count >= config.limits.max_owner_jobs {
            return Err(AppError::LimitExceeded(format!(
                "账户任务数已达上限 ({})",
                config.limits.max_owner_jobs
            )));
        }
    }

    let now = now_timestamp();
    let job = Job {
        id: generate_id(),
        title: title.to_string(),
        owner: owner.map(|o| o.to_string()),
        is_demo: false,
        source_path: source_path.to_string_lossy().to_string(),
        status: JobStatus::Queued,
        error_message: None,
        stems: Vec::new(),
        created_at: now.clone(),
        updated_at: now,
    };
    db.create_job(&job)?;

    info!("[JOBS] 创建任务 {}: {}", job.id, job.title);
    Ok(job)
}

/// 删除任务
///
/// 先尽力删除源文件与所有分轨文件，文件缺失不算错误，然后删除记录。
pub fn delete_job(db: &Database, job_id: &str) -> AppResult<()> {
    let job = db
        .get_job(job_id)?
        .ok_or_else(|| AppError::NotFound(format!("任务不存在: {}", job_id)))?;

    if let Err(e) = remove_file_if_exists(Path::new(&job.source_path)) {
        warn!("[JOBS] 删除源文件失败 {}: {}", job.source_path, e);
    }
    for stem in &job.stems {
        if let Err(e) = remove_file_if_exists(Path::new(&stem.file_path)) {
            warn!("[JOBS] 删除分轨文件失败 {}: {}", stem.file_path, e);
        }
    }

    db.delete_job(job_id)?;
    info!("[JOBS] 任务 {} 已删除", job_id);
    Ok(())
}
