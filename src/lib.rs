//! # Cifar Loader
//!
//! 用纯 rust 读取 [CIFAR-10](https://www.cs.toronto.edu/~kriz/cifar.html) 数据集：
//! 解析 Python 版本（pickle）或二进制版本的分片，得到 `[N, 32, 32, 3]` 的归一化图像
//! 与 `[N, 10]` 的 one-hot 标签，并提供顺序/随机两种批量采样方式，供训练循环使用。
//!

pub mod data;
