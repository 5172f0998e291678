//! 数据加载模块
//!
//! 提供 CIFAR-10 分片读取、变换和批处理功能。
//!
//! # 主要组件
//!
//! - [`CifarLoader`]: 单个划分的加载器，支持顺序与随机批次
//! - [`CifarDataManager`]: 同时持有训练集与测试集的入口
//! - [`CifarConfig`]: 数据目录、分片列表等配置，可从 JSON 读取
//! - [`RawBatch`] / [`ShardFormat`]: 分片反序列化结果与文件格式
//! - [`pickle`]: 读取 Python 版本分片所需的 pickle 解码器
//! - [`transforms`]: 数据变换函数（归一化、通道换位、one-hot 等）
//! - [`DataError`]: 数据加载错误类型
//!
//! # 使用示例
//!
//! ```ignore
//! use cifar_loader::data::{CifarConfig, CifarDataManager};
//!
//! let config = CifarConfig::new("CIFAR10_data").seed(42);
//! let mut data = CifarDataManager::new(&config)?;
//!
//! for _ in 0..1000 {
//!     let (x_batch, y_batch) = data.train_mut().next_batch(100)?;
//!     model.forward(&x_batch)?;
//! }
//! ```

pub mod config;
pub mod error;
mod loader;
mod manager;
pub mod pickle;
pub mod shard;
pub mod transforms;

#[cfg(test)]
mod tests;

// Re-exports
pub use config::CifarConfig;
pub use error::DataError;
pub use loader::CifarLoader;
pub use manager::CifarDataManager;
pub use shard::{RawBatch, ShardFormat};
