//! 数据加载错误类型定义

use std::path::PathBuf;
use thiserror::Error;

use super::pickle::PickleError;

/// 数据加载相关错误
#[derive(Debug, Error)]
pub enum DataError {
    /// 文件未找到
    #[error("文件未找到: {0}")]
    FileNotFound(PathBuf),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    /// pickle 反序列化失败
    #[error("pickle 解析失败 ({path}): {source}")]
    Pickle {
        path: PathBuf,
        #[source]
        source: PickleError,
    },

    /// 格式错误（如缺少字段、记录长度不对）
    #[error("格式错误: {0}")]
    FormatError(String),

    /// 形状不匹配
    #[error("形状不匹配: 期望 {expected:?}, 实际 {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// ndarray 重塑失败
    #[error("重塑失败: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// 标签越界
    #[error("第 {index} 个标签 {label} 不在 [0, {num_classes}) 范围内")]
    InvalidLabel {
        index: usize,
        label: i64,
        num_classes: usize,
    },

    /// 索引越界
    #[error("索引越界: {index} >= {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// 批大小非法
    #[error("batch_size 必须大于 0")]
    InvalidBatchSize,

    /// 数据集为空
    #[error("数据集为空")]
    EmptyDataset,

    /// 尚未调用 load()
    #[error("数据尚未加载，请先调用 load()")]
    NotLoaded,

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}
