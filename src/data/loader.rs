/*
 * @Author       : 老董
 * @Date         : 2025-01-21
 * @Description  : CifarLoader - 单个数据划分（训练/测试）的加载与批量采样
 *
 * 提供：
 * - 多分片读取、拼接、归一化与 one-hot 编码 (load)
 * - 顺序批次，游标按样本数取模回绕 (next_batch)
 * - 有放回随机批次 (random_batch)
 */

use std::path::PathBuf;

use ndarray::{Array1, Array2, Array3, Array4, Axis, concatenate, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::NUM_CLASSES;
use super::error::DataError;
use super::shard::{RawBatch, ShardFormat};
use super::transforms::{argmax_labels, one_hot, to_channel_last};

/// 已加载的图像与标签，第一维始终一致
#[derive(Debug, Clone)]
struct Loaded {
    /// [N, 32, 32, 3]，值域 [0, 1]
    images: Array4<f32>,
    /// [N, num_classes] (one-hot)
    labels: Array2<f32>,
}

impl Loaded {
    fn len(&self) -> usize {
        self.labels.nrows()
    }
}

/// CifarLoader - 持有一个数据划分的全部样本
///
/// # 示例
/// ```ignore
/// let mut train = CifarLoader::new(["data/data_batch_1", "data/data_batch_2"])
///     .seed(42)
///     .load()?;
///
/// let (x, y) = train.next_batch(128)?;   // [128, 32, 32, 3], [128, 10]
/// let (x, y) = train.random_batch(64)?;  // 有放回抽样
/// ```
#[derive(Debug, Clone)]
pub struct CifarLoader {
    sources: Vec<PathBuf>,
    format: ShardFormat,
    num_classes: usize,
    label_key: String,
    data: Option<Loaded>,
    cursor: usize,
    rng: StdRng,
}

impl CifarLoader {
    /// 创建尚未加载的 CifarLoader
    ///
    /// # 参数
    /// - `sources`: 分片文件路径，按给定顺序读取
    pub fn new<I, P>(sources: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            format: ShardFormat::default(),
            num_classes: NUM_CLASSES,
            label_key: "labels".to_string(),
            data: None,
            cursor: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// 设置分片格式
    pub fn format(mut self, format: ShardFormat) -> Self {
        self.format = format;
        self
    }

    /// 设置 one-hot 的类别数
    pub fn num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// 设置 pickle 字典中标签所在的键
    pub fn label_key(mut self, key: &str) -> Self {
        self.label_key = key.to_string();
        self
    }

    /// 设置随机种子（用于 random_batch）
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// 读取全部分片并构建图像、标签数组
    ///
    /// 任一分片缺失或格式错误都会直接返回错误，不做部分加载。
    /// 成功后游标归零，并返回自身以便链式调用。
    pub fn load(mut self) -> Result<Self, DataError> {
        log::info!("开始加载 {} 个分片 ({:?})", self.sources.len(), self.format);

        let mut batches = Vec::with_capacity(self.sources.len());
        for path in &self.sources {
            let batch = RawBatch::read(path, self.format, &self.label_key)?;
            log::debug!("已读取 {}: {} 个样本", path.display(), batch.len());
            batches.push(batch);
        }

        let total: usize = batches.iter().map(RawBatch::len).sum();
        if total == 0 {
            return Err(DataError::EmptyDataset);
        }

        let views: Vec<_> = batches.iter().map(|b| b.data.view()).collect();
        let pixels = concatenate(Axis(0), &views)?;
        let raw_labels: Vec<i64> = batches
            .iter()
            .flat_map(|b| b.labels.iter().copied())
            .collect();

        let labels = one_hot(&raw_labels, self.num_classes)?;
        let images = to_channel_last(pixels)?;

        log::info!(
            "加载完成: {} 个样本, images {:?}, labels {:?}",
            total,
            images.shape(),
            labels.shape()
        );

        self.data = Some(Loaded { images, labels });
        self.cursor = 0;
        Ok(self)
    }

    /// 顺序取出 `[cursor, cursor + batch_size)` 的样本
    ///
    /// 超出末尾时只返回剩余部分（单次调用内不回绕），
    /// 随后游标移动到 `(cursor + batch_size) % N`。
    ///
    /// # 返回
    /// (images, labels)，形状分别为 [B, 32, 32, 3] 和 [B, num_classes]
    pub fn next_batch(
        &mut self,
        batch_size: usize,
    ) -> Result<(Array4<f32>, Array2<f32>), DataError> {
        if batch_size == 0 {
            return Err(DataError::InvalidBatchSize);
        }
        let data = self.data.as_ref().ok_or(DataError::NotLoaded)?;
        let n = data.len();

        let start = self.cursor;
        let end = start.saturating_add(batch_size).min(n);
        let images = data.images.slice(s![start..end, .., .., ..]).to_owned();
        let labels = data.labels.slice(s![start..end, ..]).to_owned();

        self.cursor = (start + batch_size % n) % n;
        Ok((images, labels))
    }

    /// 有放回地均匀抽取 `batch_size` 个样本；不影响 next_batch 的游标
    ///
    /// batch_size 大于样本数时仍返回恰好 batch_size 行（必然有重复）。
    pub fn random_batch(
        &mut self,
        batch_size: usize,
    ) -> Result<(Array4<f32>, Array2<f32>), DataError> {
        if batch_size == 0 {
            return Err(DataError::InvalidBatchSize);
        }
        let data = self.data.as_ref().ok_or(DataError::NotLoaded)?;
        let n = data.len();

        let indices: Vec<usize> = (0..batch_size).map(|_| self.rng.gen_range(0..n)).collect();
        Ok((
            data.images.select(Axis(0), &indices),
            data.labels.select(Axis(0), &indices),
        ))
    }

    /// 获取第 index 个样本
    ///
    /// # 返回
    /// (image, label) 元组
    /// - image: [32, 32, 3]
    /// - label: [num_classes] (one-hot)
    pub fn get(&self, index: usize) -> Result<(Array3<f32>, Array1<f32>), DataError> {
        let data = self.data.as_ref().ok_or(DataError::NotLoaded)?;
        if index >= data.len() {
            return Err(DataError::IndexOutOfBounds {
                index,
                len: data.len(),
            });
        }
        Ok((
            data.images.index_axis(Axis(0), index).to_owned(),
            data.labels.row(index).to_owned(),
        ))
    }

    /// 每个样本的类别索引（one-hot 的逆变换）
    pub fn class_indices(&self) -> Result<Vec<usize>, DataError> {
        let labels = self.labels().ok_or(DataError::NotLoaded)?;
        Ok(argmax_labels(labels.view()))
    }

    /// 游标归零
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// 当前游标位置
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 返回样本数量（未加载时为 0）
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Loaded::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// 全部图像 [N, 32, 32, 3]
    pub fn images(&self) -> Option<&Array4<f32>> {
        self.data.as_ref().map(|d| &d.images)
    }

    /// 全部标签 [N, num_classes]
    pub fn labels(&self) -> Option<&Array2<f32>> {
        self.data.as_ref().map(|d| &d.labels)
    }
}
