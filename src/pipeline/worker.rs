// 后台工作线程池模块

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::pipeline::runner;

/// 待执行任务
struct JobRequest {
    job_id: String,
    source_path: PathBuf,
}

/// 后台工作线程池
///
/// 提交队列无界，submit 即发即忘、永不阻塞调用方；并发度由固定数量
/// 的工作线程限制，外部引擎非常吃资源，不能无限并发。Drop 时关闭
/// 队列并等待所有线程把已入队的任务跑完。
pub struct WorkerPool {
    tx: Option<Sender<JobRequest>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// 创建线程池，线程数取配置值（至少 1）
    pub fn new(db: Arc<Database>, config: Arc<AppConfig>) -> WorkerPool {
        let threads = config.worker.threads.max(1);
        let (tx, rx) = unbounded::<JobRequest>();

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = rx.clone();
            let db = db.clone();
            let config = config.clone();
            handles.push(thread::spawn(move || {
                worker_loop(index, rx, db, config);
            }));
        }

        info!("[WORKER] 工作线程池已启动，线程数: {}", threads);
        WorkerPool {
            tx: Some(tx),
            handles,
        }
    }

    /// 提交任务，不等待执行
    pub fn submit(&self, job_id: &str, source_path: &Path) -> AppResult<()> {
        let request = JobRequest {
            job_id: job_id.to_string(),
            source_path: source_path.to_path_buf(),
        };

        match &self.tx {
            Some(tx) => {
                tx.send(request)
                    .map_err(|_| AppError::Queue("任务队列已关闭".to_string()))?;
                debug!("[WORKER] 任务 {} 已入队", job_id);
                Ok(())
            }
            None => Err(AppError::Queue("任务队列已关闭".to_string())),
        }
    }

    /// 关闭队列并等待所有工作线程退出
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        // 关闭发送端后，工作线程在清空已入队任务后退出
        self.tx.take();
        for handle in self.handles.drain(..) {
            if let Err(panic_info) = handle.join() {
                error!(
                    "[WORKER] 工作线程异常退出: {}",
                    panic_message(panic_info.as_ref())
                );
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn worker_loop(index: usize, rx: Receiver<JobRequest>, db: Arc<Database>, config: Arc<AppConfig>) {
    debug!("[WORKER] 线程 {} 启动", index);

    for request in rx {
        // catch_unwind 隔离单个任务的崩溃，线程继续服务后续任务
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            runner::run_job(&db, &config, &request.job_id, &request.source_path)
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("[WORKER] 任务 {} 执行出错: {}", request.job_id, e);
            }
            Err(panic_info) => {
                let message = panic_message(panic_info.as_ref());
                error!("[WORKER] 任务 {} 发生 panic: {}", request.job_id, message);
                // 尽力把崩溃写入任务记录
                let _ = db.fail_job(&request.job_id, &format!("内部错误: {}", message));
            }
        }
    }

    debug!("[WORKER] 线程 {} 退出", index);
}

fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
