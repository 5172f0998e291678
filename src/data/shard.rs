//! CIFAR 分片的读取与校验
//!
//! 每个分片反序列化为一个 [`RawBatch`]：`data` 为 [N, 3072] 的原始像素，
//! `labels` 为 N 个整数标签。形状在读出后立即校验，不把问题拖到重塑阶段。

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::error::DataError;
use super::pickle::{self, Value};
use super::transforms::PIXELS_PER_IMAGE;

/// 二进制版本中每条记录的字节数：1 字节标签 + 3072 字节像素
pub const BINARY_RECORD_LEN: usize = 1 + PIXELS_PER_IMAGE;

/// 分片文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardFormat {
    /// Python 版本：pickle 序列化的 `{"data": ..., "labels": [...]}`
    #[default]
    Pickle,
    /// 二进制版本：定长记录 `<1 字节标签><3072 字节像素>`
    Binary,
}

impl ShardFormat {
    /// 分片基础名对应的实际文件名（二进制版本带 `.bin` 后缀）
    pub fn file_name(&self, base_name: &str) -> String {
        match self {
            ShardFormat::Pickle => base_name.to_string(),
            ShardFormat::Binary => format!("{base_name}.bin"),
        }
    }
}

/// 单个分片反序列化后的原始记录
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    /// 原始像素 [N, 3072]，每行按 CHW 存放
    pub data: Array2<u8>,
    /// 整数标签，长度 N
    pub labels: Vec<i64>,
}

impl RawBatch {
    /// 校验像素长度与标签数量后构造
    pub fn new(pixels: Vec<u8>, labels: Vec<i64>) -> Result<Self, DataError> {
        if pixels.len() % PIXELS_PER_IMAGE != 0 {
            return Err(DataError::FormatError(format!(
                "像素字节数 {} 不是 {} 的整数倍",
                pixels.len(),
                PIXELS_PER_IMAGE
            )));
        }
        let n = pixels.len() / PIXELS_PER_IMAGE;
        if labels.len() != n {
            return Err(DataError::ShapeMismatch {
                expected: vec![n],
                got: vec![labels.len()],
            });
        }

        let data = Array2::from_shape_vec((n, PIXELS_PER_IMAGE), pixels)?;
        Ok(Self { data, labels })
    }

    /// 样本数量
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// 从解码后的 pickle 字典中取出 `data` 与 `label_key` 两项
    pub fn from_pickle(value: &Value, label_key: &str) -> Result<Self, DataError> {
        if !matches!(value, Value::Dict(_)) {
            return Err(DataError::FormatError(format!(
                "顶层对象应为 dict，实际为 {}",
                value.type_name()
            )));
        }

        let data = value
            .get("data")
            .ok_or_else(|| DataError::FormatError("缺少键 `data`".to_string()))?;
        let labels = value
            .get(label_key)
            .ok_or_else(|| DataError::FormatError(format!("缺少键 `{label_key}`")))?;

        let pixels = pixels_from_value(data)?;
        let labels = labels_from_value(labels)?;
        Self::new(pixels, labels)
    }

    /// 按格式读取一个分片文件
    pub fn read(path: &Path, format: ShardFormat, label_key: &str) -> Result<Self, DataError> {
        let reader = open(path)?;

        match format {
            ShardFormat::Pickle => {
                let value = pickle::from_reader(reader).map_err(|source| DataError::Pickle {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_pickle(&value, label_key)
            }
            ShardFormat::Binary => Self::from_binary(reader),
        }
    }

    /// 解析二进制版本的定长记录
    pub fn from_binary<R: Read>(mut reader: R) -> Result<Self, DataError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        if bytes.len() % BINARY_RECORD_LEN != 0 {
            return Err(DataError::FormatError(format!(
                "文件长度 {} 不是记录长度 {} 的整数倍",
                bytes.len(),
                BINARY_RECORD_LEN
            )));
        }

        let n = bytes.len() / BINARY_RECORD_LEN;
        let mut labels = Vec::with_capacity(n);
        let mut pixels = Vec::with_capacity(n * PIXELS_PER_IMAGE);
        for record in bytes.chunks_exact(BINARY_RECORD_LEN) {
            labels.push(i64::from(record[0]));
            pixels.extend_from_slice(&record[1..]);
        }
        Self::new(pixels, labels)
    }
}

fn open(path: &Path) -> Result<BufReader<File>, DataError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DataError::FileNotFound(path.to_path_buf()),
        _ => DataError::IoError(e),
    })?;
    Ok(BufReader::new(file))
}

/// `data` 可以是 uint8 ndarray、字节串或整数列表
fn pixels_from_value(value: &Value) -> Result<Vec<u8>, DataError> {
    match value {
        Value::Array(array) => {
            let valid_shape = match array.shape.as_slice() {
                [_] => true,
                [_, cols] => *cols == PIXELS_PER_IMAGE,
                _ => false,
            };
            if !valid_shape {
                return Err(DataError::ShapeMismatch {
                    expected: vec![array.shape.first().copied().unwrap_or(0), PIXELS_PER_IMAGE],
                    got: array.shape.clone(),
                });
            }
            array
                .to_u8_vec()
                .map_err(|e| DataError::FormatError(format!("`data`: {e}")))
        }
        Value::Bytes(bytes) => Ok(bytes.to_vec()),
        Value::Str(text) => {
            pickle::latin1_encode(text).map_err(|e| DataError::FormatError(format!("`data`: {e}")))
        }
        Value::List(items) => items
            .iter()
            .map(|item| {
                item.as_int()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| DataError::FormatError("`data` 中存在非字节值".to_string()))
            })
            .collect(),
        other => Err(DataError::FormatError(format!(
            "`data` 类型不支持: {}",
            other.type_name()
        ))),
    }
}

/// 标签可以是整数列表/元组或一维整数 ndarray
fn labels_from_value(value: &Value) -> Result<Vec<i64>, DataError> {
    match value {
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|item| {
                item.as_int().ok_or_else(|| {
                    DataError::FormatError(format!("标签应为 int，实际为 {}", item.type_name()))
                })
            })
            .collect(),
        Value::Array(array) if array.shape.len() == 1 => array
            .to_i64_vec()
            .map_err(|e| DataError::FormatError(format!("标签: {e}"))),
        Value::Array(array) => Err(DataError::ShapeMismatch {
            expected: vec![array.len()],
            got: array.shape.clone(),
        }),
        other => Err(DataError::FormatError(format!(
            "标签类型不支持: {}",
            other.type_name()
        ))),
    }
}

/// 读取类别名称
///
/// pickle 版本为 `batches.meta` 中的 `label_names` 列表；
/// 二进制版本为 `batches.meta.txt`，每行一个名称。
pub fn read_label_names(path: &Path, format: ShardFormat) -> Result<Vec<String>, DataError> {
    match format {
        ShardFormat::Pickle => {
            let value = pickle::from_reader(open(path)?).map_err(|source| {
                DataError::Pickle {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            let Some(Value::List(names)) = value.get("label_names") else {
                return Err(DataError::FormatError(
                    "元数据中缺少 `label_names` 列表".to_string(),
                ));
            };
            names
                .iter()
                .map(|name| match name {
                    Value::Str(s) => Ok(s.to_string()),
                    Value::Bytes(b) => Ok(pickle::latin1_decode(b)),
                    other => Err(DataError::FormatError(format!(
                        "类别名称应为字符串，实际为 {}",
                        other.type_name()
                    ))),
                })
                .collect()
        }
        ShardFormat::Binary => {
            let mut text = String::new();
            open(path)?.read_to_string(&mut text)?;
            Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect())
        }
    }
}
