// 数据库模块

use rusqlite::{params, Connection};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::models::StemLabel;
use crate::utils::{now_timestamp, Job, JobStatus, StemFile};

/// 任务记录中错误信息的截断长度
const ERROR_MESSAGE_MAX_CHARS: usize = 500;

/// 任务存储
///
/// 任务记录在 processing 之后只由对应的执行器写入；
/// 存储内部用互斥锁串行化所有访问，多行写入走事务，作为并发写入的兜底。
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// 打开数据库并初始化表结构
    pub fn open(db_path: &Path) -> AppResult<Database> {
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// 打开内存数据库（测试用）
    pub fn open_in_memory() -> AppResult<Database> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> AppResult<()> {
        // 创建任务表
        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                owner TEXT,
                is_demo INTEGER NOT NULL DEFAULT 0,
                source_path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs(owner)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
            [],
        )?;

        // 创建分轨结果表
        conn.execute(
            "CREATE TABLE IF NOT EXISTS stems (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                stem_type TEXT NOT NULL,
                file_path TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_stems_job ON stems(job_id)",
            [],
        )?;

        Ok(())
    }

    // ==================== 任务操作 ====================

    /// 创建任务记录
    pub fn create_job(&self, job: &Job) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO jobs (id, title, owner, is_demo, source_path, status, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.title,
                job.owner,
                job.is_demo,
                job.source_path,
                job.status.as_str(),
                job.error_message,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    }

    /// 获取单个任务（含分轨结果）
    pub fn get_job(&self, id: &str) -> AppResult<Option<Job>> {
        let conn = self.conn.lock();

        let mut job = {
            let mut stmt = conn.prepare(
                "SELECT id, title, owner, is_demo, source_path, status, error_message, created_at, updated_at
                 FROM jobs WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Some(Self::row_to_job(row)?),
                None => None,
            }
        };

        if let Some(job) = job.as_mut() {
            job.stems = Self::query_stems(&conn, id)?;
        }

        Ok(job)
    }

    /// 标记任务进入 processing，返回是否确实发生了状态流转
    ///
    /// 任务不存在（并发删除）或已越过 queued 状态时返回 false，
    /// 状态流转只能单向推进。
    pub fn mark_processing(&self, id: &str) -> AppResult<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE jobs SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![id, now_timestamp()],
        )?;
        Ok(affected > 0)
    }

    /// 标记任务完成并写入分轨结果
    ///
    /// 分轨记录与状态翻转在同一事务中提交，不会出现部分结果；
    /// complete 状态必须携带至少一个分轨。
    pub fn complete_job(&self, id: &str, stems: &[StemFile]) -> AppResult<()> {
        if stems.is_empty() {
            return Err(AppError::InvalidArgument(
                "完成任务必须至少携带一个分轨结果".to_string(),
            ));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for stem in stems {
            tx.execute(
                "INSERT INTO stems (job_id, stem_type, file_path) VALUES (?1, ?2, ?3)",
                params![id, stem.label.as_str(), stem.file_path],
            )?;
        }

        let affected = tx.execute(
            "UPDATE jobs SET status = 'complete', error_message = NULL, updated_at = ?2
             WHERE id = ?1 AND status = 'processing'",
            params![id, now_timestamp()],
        )?;

        if affected == 0 {
            // 任务在处理期间被删除或状态异常，丢弃事务回滚分轨记录
            return Err(AppError::NotFound(format!("任务不存在或已结束: {}", id)));
        }

        tx.commit()?;
        Ok(())
    }

    /// 标记任务失败，错误信息截断后写入
    ///
    /// 任务已是终止状态或已被删除时不做任何修改。
    pub fn fail_job(&self, id: &str, message: &str) -> AppResult<()> {
        let truncated: String = message.chars().take(ERROR_MESSAGE_MAX_CHARS).collect();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE jobs SET status = 'error', error_message = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('queued', 'processing')",
            params![id, truncated, now_timestamp()],
        )?;
        Ok(())
    }

    /// 删除任务记录（含分轨记录）
    pub fn delete_job(&self, id: &str) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM stems WHERE job_id = ?1", [id])?;
        conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        Ok(())
    }

    // ==================== 查询操作 ====================

    /// 统计某个账户的任务数（演示任务不计入）
    pub fn count_owner_jobs(&self, owner: &str) -> AppResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE owner = ?1 AND is_demo = 0",
            [owner],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 获取某个账户的任务列表（按创建时间倒序）
    pub fn list_owner_jobs(&self, owner: &str) -> AppResult<Vec<Job>> {
        let conn = self.conn.lock();

        let mut jobs = {
            let mut stmt = conn.prepare(
                "SELECT id, title, owner, is_demo, source_path, status, error_message, created_at, updated_at
                 FROM jobs WHERE owner = ?1 ORDER BY created_at DESC",
            )?;
            let iter = stmt.query_map([owner], Self::row_to_job)?;
            let mut jobs = Vec::new();
            for job in iter {
                jobs.push(job?);
            }
            jobs
        };

        Self::attach_stems(&conn, &mut jobs)?;
        Ok(jobs)
    }

    /// 获取所有已完成的演示任务（按标题排序）
    pub fn list_demo_jobs(&self) -> AppResult<Vec<Job>> {
        let conn = self.conn.lock();

        let mut jobs = {
            let mut stmt = conn.prepare(
                "SELECT id, title, owner, is_demo, source_path, status, error_message, created_at, updated_at
                 FROM jobs WHERE is_demo = 1 AND status = 'complete' ORDER BY title COLLATE NOCASE ASC",
            )?;
            let iter = stmt.query_map([], Self::row_to_job)?;
            let mut jobs = Vec::new();
            for job in iter {
                jobs.push(job?);
            }
            jobs
        };

        Self::attach_stems(&conn, &mut jobs)?;
        Ok(jobs)
    }

    // ==================== 内部辅助 ====================

    fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
        let status: String = row.get(5)?;
        Ok(Job {
            id: row.get(0)?,
            title: row.get(1)?,
            owner: row.get(2)?,
            is_demo: row.get(3)?,
            source_path: row.get(4)?,
            status: JobStatus::parse(&status),
            error_message: row.get(6)?,
            stems: Vec::new(),
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn query_stems(conn: &Connection, job_id: &str) -> AppResult<Vec<StemFile>> {
        let mut stmt = conn.prepare(
            "SELECT stem_type, file_path FROM stems WHERE job_id = ?1 ORDER BY stem_type",
        )?;
        let iter = stmt.query_map([job_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut stems = Vec::new();
        for item in iter {
            let (label_str, file_path) = item?;
            // 词汇表外的历史记录直接跳过
            if let Some(label) = StemLabel::parse(&label_str) {
                stems.push(StemFile { label, file_path });
            }
        }
        Ok(stems)
    }

    /// 批量挂载分轨记录（一次查询，避免 N+1）
    fn attach_stems(conn: &Connection, jobs: &mut [Job]) -> AppResult<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let mut stems_map: HashMap<String, Vec<StemFile>> = HashMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT job_id, stem_type, file_path FROM stems ORDER BY stem_type")?;
            let iter = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for item in iter {
                let (job_id, label_str, file_path) = item?;
                if let Some(label) = StemLabel::parse(&label_str) {
                    stems_map
                        .entry(job_id)
                        .or_default()
                        .push(StemFile { label, file_path });
                }
            }
        }

        for job in jobs.iter_mut() {
            if let Some(stems) = stems_map.remove(&job.id) {
                job.stems = stems;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_id;

    fn sample_job(id: &str, owner: Option<&str>) -> Job {
        let now = now_timestamp();
        Job {
            id: id.to_string(),
            title: format!("测试任务 {}", id),
            owner: owner.map(|o| o.to_string()),
            is_demo: false,
            source_path: format!("/uploads/{}.mp3", id),
            status: JobStatus::Queued,
            error_message: None,
            stems: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn sample_stems() -> Vec<StemFile> {
        vec![
            StemFile {
                label: StemLabel::Vocals,
                file_path: "/stems/1_vocals.wav".to_string(),
            },
            StemFile {
                label: StemLabel::Drums,
                file_path: "/stems/1_drums.wav".to_string(),
            },
        ]
    }

    #[test]
    fn test_stems_present_iff_complete() {
        let db = Database::open_in_memory().unwrap();
        db.create_job(&sample_job("a", None)).unwrap();

        let job = db.get_job("a").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.stems.is_empty());
        assert!(job.error_message.is_none());

        assert!(db.mark_processing("a").unwrap());
        db.complete_job("a", &sample_stems()).unwrap();

        let job = db.get_job("a").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.stems.len(), 2);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_complete_requires_stems() {
        let db = Database::open_in_memory().unwrap();
        db.create_job(&sample_job("a", None)).unwrap();
        assert!(db.mark_processing("a").unwrap());

        assert!(db.complete_job("a", &[]).is_err());

        // 状态不应被破坏
        let job = db.get_job("a").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.stems.is_empty());
    }

    #[test]
    fn test_error_message_iff_error() {
        let db = Database::open_in_memory().unwrap();
        db.create_job(&sample_job("a", None)).unwrap();
        assert!(db.mark_processing("a").unwrap());

        let long_message: String = "坏".repeat(800);
        db.fail_job("a", &long_message).unwrap();

        let job = db.get_job("a").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.stems.is_empty());
        let message = job.error_message.unwrap();
        assert_eq!(message.chars().count(), ERROR_MESSAGE_MAX_CHARS);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let db = Database::open_in_memory().unwrap();
        db.create_job(&sample_job("a", None)).unwrap();

        assert!(db.mark_processing("a").unwrap());
        // 不能从 processing 再次进入 processing
        assert!(!db.mark_processing("a").unwrap());

        db.complete_job("a", &sample_stems()).unwrap();

        // 终止状态之后 fail_job 不再生效
        db.fail_job("a", "late failure").unwrap();
        let job = db.get_job("a").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.error_message.is_none());

        // 终止状态之后也不能回到 processing
        assert!(!db.mark_processing("a").unwrap());
    }

    #[test]
    fn test_mark_processing_missing_job() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.mark_processing("ghost").unwrap());
    }

    #[test]
    fn test_complete_after_concurrent_delete() {
        let db = Database::open_in_memory().unwrap();
        db.create_job(&sample_job("a", None)).unwrap();
        assert!(db.mark_processing("a").unwrap());

        db.delete_job("a").unwrap();
        assert!(db.complete_job("a", &sample_stems()).is_err());

        // 事务回滚，不应留下孤儿分轨记录
        assert!(db.get_job("a").unwrap().is_none());
    }

    #[test]
    fn test_delete_job_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.create_job(&sample_job("a", None)).unwrap();

        db.delete_job("a").unwrap();
        assert!(db.get_job("a").unwrap().is_none());
        // 记录已不存在时删除也应成功
        db.delete_job("a").unwrap();
    }

    #[test]
    fn test_count_owner_jobs_excludes_demo() {
        let db = Database::open_in_memory().unwrap();
        db.create_job(&sample_job("a", Some("user-1"))).unwrap();
        db.create_job(&sample_job("b", Some("user-1"))).unwrap();

        let mut demo = sample_job("c", Some("user-1"));
        demo.is_demo = true;
        db.create_job(&demo).unwrap();

        assert_eq!(db.count_owner_jobs("user-1").unwrap(), 2);
        assert_eq!(db.count_owner_jobs("user-2").unwrap(), 0);
    }

    #[test]
    fn test_list_owner_jobs_with_stems() {
        let db = Database::open_in_memory().unwrap();
        db.create_job(&sample_job("a", Some("user-1"))).unwrap();
        db.create_job(&sample_job("b", Some("user-1"))).unwrap();
        db.create_job(&sample_job("c", Some("user-2"))).unwrap();

        assert!(db.mark_processing("a").unwrap());
        db.complete_job("a", &sample_stems()).unwrap();

        let jobs = db.list_owner_jobs("user-1").unwrap();
        assert_eq!(jobs.len(), 2);
        let completed = jobs.iter().find(|j| j.id == "a").unwrap();
        assert_eq!(completed.stems.len(), 2);
        let queued = jobs.iter().find(|j| j.id == "b").unwrap();
        assert!(queued.stems.is_empty());
    }

    #[test]
    fn test_list_demo_jobs_only_complete() {
        let db = Database::open_in_memory().unwrap();

        let mut demo_done = sample_job(&generate_id(), None);
        demo_done.is_demo = true;
        db.create_job(&demo_done).unwrap();
        assert!(db.mark_processing(&demo_done.id).unwrap());
        db.complete_job(&demo_done.id, &sample_stems()).unwrap();

        let mut demo_pending = sample_job(&generate_id(), None);
        demo_pending.is_demo = true;
        db.create_job(&demo_pending).unwrap();

        let demos = db.list_demo_jobs().unwrap();
        assert_eq!(demos.len(), 1);
        assert_eq!(demos[0].id, demo_done.id);
    }
}
