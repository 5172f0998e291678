//! CIFAR-10 训练/测试划分的组合入口
//!
//! 构造时即加载两个划分；任何一个失败都会使构造失败，不做延迟加载或重试。

use std::path::PathBuf;

use super::config::CifarConfig;
use super::error::DataError;
use super::loader::CifarLoader;
use super::shard::read_label_names;

/// 持有训练集与测试集两个 [`CifarLoader`]
#[derive(Debug, Clone)]
pub struct CifarDataManager {
    train: CifarLoader,
    test: CifarLoader,
    label_names: Option<Vec<String>>,
}

impl CifarDataManager {
    /// 按配置加载训练集（默认 5 个分片）与测试集（默认 1 个分片）
    pub fn new(config: &CifarConfig) -> Result<Self, DataError> {
        config.validate()?;
        log::info!("从 {} 加载 CIFAR 数据", config.data_dir.display());

        // 两个划分使用不同的派生种子，避免抽样序列完全相同
        let train = build_loader(config.train_paths(), config, 0).load()?;
        let test = build_loader(config.test_paths(), config, 1).load()?;

        let meta_path = config.meta_path();
        let label_names = if meta_path.exists() {
            let names = read_label_names(&meta_path, config.format)?;
            log::debug!("类别名称: {:?}", names);
            Some(names)
        } else {
            log::warn!("未找到类别名称文件 {}", meta_path.display());
            None
        };

        Ok(Self {
            train,
            test,
            label_names,
        })
    }

    /// 使用默认配置加载 `data_dir` 下的数据
    pub fn from_dir(data_dir: impl Into<PathBuf>) -> Result<Self, DataError> {
        Self::new(&CifarConfig::new(data_dir))
    }

    pub fn train(&self) -> &CifarLoader {
        &self.train
    }

    pub fn test(&self) -> &CifarLoader {
        &self.test
    }

    pub fn train_mut(&mut self) -> &mut CifarLoader {
        &mut self.train
    }

    pub fn test_mut(&mut self) -> &mut CifarLoader {
        &mut self.test
    }

    /// 元数据中的类别名称（若存在）
    pub fn label_names(&self) -> Option<&[String]> {
        self.label_names.as_deref()
    }

    /// 类别索引对应的名称
    pub fn label_name(&self, class: usize) -> Option<&str> {
        self.label_names
            .as_ref()
            .and_then(|names| names.get(class))
            .map(String::as_str)
    }
}

fn build_loader(paths: Vec<PathBuf>, config: &CifarConfig, seed_offset: u64) -> CifarLoader {
    let loader = CifarLoader::new(paths)
        .format(config.format)
        .num_classes(config.num_classes)
        .label_key(&config.label_key);
    match config.seed {
        Some(seed) => loader.seed(seed.wrapping_add(seed_offset)),
        None => loader,
    }
}
