//! 数据集配置
//!
//! 数据目录、分片列表等全部显式传入，可从 JSON 文件读取：
//!
//! ```json
//! { "data_dir": "CIFAR10_data", "format": "binary", "seed": 42 }
//! ```
//!
//! 未出现的字段使用 CIFAR-10 的默认值。

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::DataError;
use super::shard::ShardFormat;

/// CIFAR-10 的类别数
pub const NUM_CLASSES: usize = 10;

/// 元数据（类别名称）分片的基础名
pub const META_FILE: &str = "batches.meta";

/// 默认训练分片 `data_batch_1` .. `data_batch_5`
pub fn default_train_files() -> Vec<String> {
    (1..=5).map(|i| format!("data_batch_{i}")).collect()
}

/// 默认测试分片 `test_batch`
pub fn default_test_files() -> Vec<String> {
    vec!["test_batch".to_string()]
}

fn default_num_classes() -> usize {
    NUM_CLASSES
}

fn default_label_key() -> String {
    "labels".to_string()
}

/// CIFAR 数据集配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CifarConfig {
    /// 分片所在目录
    pub data_dir: PathBuf,
    #[serde(default)]
    pub format: ShardFormat,
    /// 训练分片基础名（不含 `.bin` 后缀）
    #[serde(default = "default_train_files")]
    pub train_files: Vec<String>,
    /// 测试分片基础名
    #[serde(default = "default_test_files")]
    pub test_files: Vec<String>,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    /// pickle 字典中标签所在的键
    #[serde(default = "default_label_key")]
    pub label_key: String,
    /// random_batch 的随机种子；None 时从系统熵初始化
    #[serde(default)]
    pub seed: Option<u64>,
}

impl CifarConfig {
    /// 以默认布局指向 `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            format: ShardFormat::default(),
            train_files: default_train_files(),
            test_files: default_test_files(),
            num_classes: NUM_CLASSES,
            label_key: default_label_key(),
            seed: None,
        }
    }

    pub fn format(mut self, format: ShardFormat) -> Self {
        self.format = format;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// 从 JSON 文件读取配置并校验
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| DataError::FileNotFound(path.to_path_buf()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| DataError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 字符串读取配置并校验
    pub fn from_json_str(json: &str) -> Result<Self, DataError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| DataError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DataError> {
        if self.train_files.is_empty() {
            return Err(DataError::Config("train_files 不能为空".to_string()));
        }
        if self.test_files.is_empty() {
            return Err(DataError::Config("test_files 不能为空".to_string()));
        }
        if self.num_classes == 0 {
            return Err(DataError::Config("num_classes 必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 训练分片的完整路径
    pub fn train_paths(&self) -> Vec<PathBuf> {
        self.resolve(&self.train_files)
    }

    /// 测试分片的完整路径
    pub fn test_paths(&self) -> Vec<PathBuf> {
        self.resolve(&self.test_files)
    }

    /// 类别名称文件的完整路径
    pub fn meta_path(&self) -> PathBuf {
        match self.format {
            ShardFormat::Pickle => self.data_dir.join(META_FILE),
            ShardFormat::Binary => self.data_dir.join(format!("{META_FILE}.txt")),
        }
    }

    fn resolve(&self, names: &[String]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| self.data_dir.join(self.format.file_name(name)))
            .collect()
    }
}
