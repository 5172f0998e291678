//! 数据变换函数
//!
//! 提供常用的数据预处理操作，如归一化、通道换位、one-hot 编码等。

use ndarray::{Array, Array2, Array4, ArrayView2, Dimension};

use super::error::DataError;

/// 图像边长
pub const IMAGE_SIZE: usize = 32;
/// 通道数（RGB）
pub const CHANNELS: usize = 3;
/// 单张图像的字节数 3*32*32
pub const PIXELS_PER_IMAGE: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

/// 将 0-255 像素值归一化到 0-1
///
/// # 参数
/// - `pixels`: 任意维度的 `u8` 数组
///
/// # 返回
/// 同形状的 `f32` 数组，值范围 [0, 1]
pub fn normalize_pixels<D: Dimension>(pixels: &Array<u8, D>) -> Array<f32, D> {
    pixels.mapv(|p| f32::from(p) / 255.0)
}

/// 将扁平的 [N, 3072] 原始像素转换为 [N, 32, 32, 3] 的归一化图像
///
/// 每行按通道优先（CHW）存放：先 1024 个 R，再 1024 个 G，最后 1024 个 B。
/// 先重塑为 [N, 3, 32, 32]，再换位为通道在后（HWC），最后除以 255。
pub fn to_channel_last(raw: Array2<u8>) -> Result<Array4<f32>, DataError> {
    let (n, cols) = raw.dim();
    if cols != PIXELS_PER_IMAGE {
        return Err(DataError::ShapeMismatch {
            expected: vec![n, PIXELS_PER_IMAGE],
            got: vec![n, cols],
        });
    }

    let chw = raw.into_shape((n, CHANNELS, IMAGE_SIZE, IMAGE_SIZE))?;
    let hwc = chw.permuted_axes([0, 2, 3, 1]);
    Ok(normalize_pixels(&hwc).as_standard_layout().into_owned())
}

/// 将类别索引转换为 one-hot 编码
///
/// # 参数
/// - `labels`: 类别索引，值应在 0..num_classes
/// - `num_classes`: 类别总数
///
/// # 返回
/// one-hot 编码矩阵，形状 [N, num_classes]；
/// 任一标签越界时返回 `DataError::InvalidLabel`
///
/// # 示例
/// ```ignore
/// let encoded = one_hot(&[0, 2, 1], 3)?;
/// // 结果: [[1,0,0], [0,0,1], [0,1,0]]
/// ```
pub fn one_hot(labels: &[i64], num_classes: usize) -> Result<Array2<f32>, DataError> {
    let mut out = Array2::zeros((labels.len(), num_classes));
    for (index, &label) in labels.iter().enumerate() {
        let class_idx = usize::try_from(label)
            .ok()
            .filter(|&c| c < num_classes)
            .ok_or(DataError::InvalidLabel {
                index,
                label,
                num_classes,
            })?;
        out[[index, class_idx]] = 1.0;
    }
    Ok(out)
}

/// one-hot 的逆变换：每行取值为 1 的列
pub fn argmax_labels(one_hot: ArrayView2<f32>) -> Vec<usize> {
    one_hot
        .outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}
