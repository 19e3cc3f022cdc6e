// StemCut - 异步音频分轨处理服务
// 主入口文件：把本地音频文件登记为任务，后台处理并轮询到终止状态

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use stemcut::config;
use stemcut::database::Database;
use stemcut::error::AppResult;
use stemcut::jobs;
use stemcut::logging;
use stemcut::models;
use stemcut::pipeline::worker::WorkerPool;
use stemcut::utils::{generate_id, JobStatus};

/// 获取应用数据目录
fn get_app_data_dir() -> PathBuf {
    // 优先使用环境变量，便于部署时指定
    if let Some(dir) = std::env::var_os("STEMCUT_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    // 回退到系统数据目录
    dirs::data_local_dir()
        .map(|p| p.join("stemcut"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn main() {
    // 列出内置模型后直接退出
    if std::env::args().nth(1).as_deref() == Some("--models") {
        for model in models::get_available_models() {
            println!("{}  {} 轨  {}", model.name, model.stems, model.description);
        }
        return;
    }

    let app_dir = get_app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        eprintln!("创建应用数据目录失败: {}", e);
        std::process::exit(1);
    }

    // 配置显式加载后传入各组件，不放入全局状态
    let config_path = app_dir.join("config.json");
    let mut app_config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("配置初始化失败: {}", e);
            std::process::exit(1);
        }
    };

    // 相对的存储路径挂到数据目录下
    if app_config.storage.upload_dir.is_relative() {
        app_config.storage.upload_dir = app_dir.join(&app_config.storage.upload_dir);
    }
    if app_config.storage.stems_dir.is_relative() {
        app_config.storage.stems_dir = app_dir.join(&app_config.storage.stems_dir);
    }

    // 初始化日志系统 - guard 必须保持存活，否则异步日志线程会提前退出
    let _log_guard = logging::init_logging(&app_dir, &app_config.log_level);

    info!("StemCut 启动中...");
    info!("数据目录: {:?}", app_dir);

    if let Err(e) = run(&app_dir, app_config) {
        error!("运行失败: {}", e);
        std::process::exit(1);
    }
}

fn run(app_dir: &Path, app_config: config::AppConfig) -> AppResult<()> {
    std::fs::create_dir_all(&app_config.storage.upload_dir)?;
    std::fs::create_dir_all(&app_config.storage.stems_dir)?;

    let db_path = app_dir.join("stemcut.db");
    let db = Arc::new(Database::open(&db_path)?);
    let app_config = Arc::new(app_config);

    let inputs: Vec<String> = std::env::args().skip(1).collect();
    if inputs.is_empty() {
        eprintln!("用法: stemcut <音频文件>...");
        return Ok(());
    }

    let pool = WorkerPool::new(db.clone(), app_config.clone());

    // 逐个登记并提交任务
    let mut job_ids = Vec::new();
    for input in &inputs {
        let source = Path::new(input);
        if !source.exists() {
            error!("输入文件不存在: {}", input);
            continue;
        }
        if !jobs::is_allowed_extension(source) {
            error!("不支持的文件类型: {}", input);
            continue;
        }

        // 原始文件复制进上传目录，此后源文件归任务所有
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let dest = app_config
            .storage
            .upload_dir
            .join(format!("{}.{}", generate_id(), ext));
        std::fs::copy(source, &dest)?;

        let title = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("未命名");
        let job = jobs::create_job(&db, &app_config, title, None, &dest)?;
        pool.submit(&job.id, &dest)?;

        println!("任务已提交: {} ({})", job.id, title);
        job_ids.push(job.id);
    }

    // 轮询任务状态直到全部到达终止状态
    loop {
        let mut pending = 0;
        for id in &job_ids {
            if let Some(job) = db.get_job(id)? {
                if !job.status.is_terminal() {
                    pending += 1;
                }
            }
        }
        if pending == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    for id in &job_ids {
        if let Some(job) = db.get_job(id)? {
            match job.status {
                JobStatus::Complete => {
                    println!("任务 {} 完成:", job.id);
                    for stem in &job.stems {
                        println!("  {}: {}", stem.label, stem.file_path);
                    }
                }
                JobStatus::Error => {
                    println!(
                        "任务 {} 失败: {}",
                        job.id,
                        job.error_message.unwrap_or_default()
                    );
                }
                _ => {}
            }
        }
    }

    pool.shutdown();
    Ok(())
}
