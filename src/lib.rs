// StemCut - 异步音频分轨处理服务
//
// 上传的音频文件经过 队列 -> 归一化 -> 分离引擎 -> 结果落盘 的
// 异步流水线，产出按乐器/人声分类的分轨文件。

pub mod audio;
pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod utils;
