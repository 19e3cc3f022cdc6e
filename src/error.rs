// 错误处理模块

use thiserror::Error;
use serde::Serialize;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("格式转换错误: {0}")]
    Conversion(String),

    /// 单个模型的引擎调用失败，仅在模型回退时内部使用，不直接写入任务记录
    #[error("引擎调用错误: {0}")]
    Engine(String),

    #[error("分轨处理错误: {0}")]
    Separation(String),

    #[error("任务队列错误: {0}")]
    Queue(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("超出限制: {0}")]
    LimitExceeded(String),
}

// 实现 Serialize 以便外部接口层直接传递错误
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
