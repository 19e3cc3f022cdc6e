// 模型管理模块

use serde::{Deserialize, Serialize};

/// 可识别的分轨类别
///
/// 词汇表与具体引擎无关且封闭，引擎输出中不在词汇表内的文件一律丢弃，
/// 这样引擎新增输出类别时不会产生脏数据。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StemLabel {
    Vocals,
    Drums,
    Bass,
    Guitar,
    Piano,
    Other,
}

impl StemLabel {
    pub const ALL: [StemLabel; 6] = [
        StemLabel::Vocals,
        StemLabel::Drums,
        StemLabel::Bass,
        StemLabel::Guitar,
        StemLabel::Piano,
        StemLabel::Other,
    ];

    /// 从文件主名解析分轨类别（大小写不敏感），无法识别返回 None
    pub fn parse(stem: &str) -> Option<StemLabel> {
        match stem.to_ascii_lowercase().as_str() {
            "vocals" => Some(StemLabel::Vocals),
            "drums" => Some(StemLabel::Drums),
            "bass" => Some(StemLabel::Bass),
            "guitar" => Some(StemLabel::Guitar),
            "piano" => Some(StemLabel::Piano),
            "other" => Some(StemLabel::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StemLabel::Vocals => "vocals",
            StemLabel::Drums => "drums",
            StemLabel::Bass => "bass",
            StemLabel::Guitar => "guitar",
            StemLabel::Piano => "piano",
            StemLabel::Other => "other",
        }
    }
}

impl std::fmt::Display for StemLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模型信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// 引擎侧的模型名
    pub name: String,
    /// 输出轨道数
    pub stems: u8,
    /// 模型描述
    pub description: String,
}

/// 获取所有内置模型，按优先级排序（靠前的优先尝试）
pub fn get_available_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            name: "htdemucs_6s".to_string(),
            stems: 6,
            description: "6 轨模型：人声/鼓/贝斯/吉他/钢琴/其他".to_string(),
        },
        ModelInfo {
            name: "htdemucs".to_string(),
            stems: 4,
            description: "4 轨回退模型：人声/鼓/贝斯/其他".to_string(),
        },
    ]
}

/// 根据名称获取模型信息
pub fn get_model_by_name(name: &str) -> Option<ModelInfo> {
    get_available_models().into_iter().find(|m| m.name == name)
}

/// 默认的模型优先级列表
pub fn default_model_priority() -> Vec<String> {
    get_available_models().into_iter().map(|m| m.name).collect()
}
