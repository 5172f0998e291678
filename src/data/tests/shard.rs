//! 分片读取单元测试

use std::path::Path;

use crate::data::pickle::opcodes::*;
use crate::data::shard::{BINARY_RECORD_LEN, read_label_names};
use crate::data::transforms::PIXELS_PER_IMAGE;
use crate::data::{DataError, RawBatch, ShardFormat};

use super::fixtures::{
    PickleWriter, TestDir, binary_shard, meta_pickle, pickle_with_label_key, py2_cifar_pickle,
    py3_bytes_pickle, synthetic_pixels,
};

#[test]
fn test_raw_batch_new() {
    let batch = RawBatch::new(synthetic_pixels(0, 3), vec![1, 2, 3]).unwrap();

    assert_eq!(batch.len(), 3);
    assert_eq!(batch.data.dim(), (3, PIXELS_PER_IMAGE));
    assert_eq!(batch.data.row(1).to_vec(), synthetic_pixels(1, 1));
}

#[test]
fn test_raw_batch_label_count_mismatch() {
    match RawBatch::new(synthetic_pixels(0, 2), vec![1]) {
        Err(DataError::ShapeMismatch { expected, got }) => {
            assert_eq!(expected, vec![2]);
            assert_eq!(got, vec![1]);
        }
        other => panic!("应为 ShapeMismatch，实际 {:?}", other),
    }
}

#[test]
fn test_raw_batch_partial_image() {
    let result = RawBatch::new(vec![0; PIXELS_PER_IMAGE + 1], vec![0]);
    assert!(matches!(result, Err(DataError::FormatError(_))));
}

#[test]
fn test_read_py2_pickle_shard() {
    let dir = TestDir::new("shard_py2");
    let pixels = synthetic_pixels(0, 2);
    let path = dir.write("data_batch_1", &py2_cifar_pickle(&pixels, &[3, 7]));

    let batch = RawBatch::read(&path, ShardFormat::Pickle, "labels").unwrap();

    assert_eq!(batch.labels, vec![3, 7]);
    assert_eq!(batch.data.as_slice().unwrap(), pixels.as_slice());
}

#[test]
fn test_read_py3_pickle_shard() {
    let dir = TestDir::new("shard_py3");
    let pixels = synthetic_pixels(4, 3);
    let path = dir.write("test_batch", &py3_bytes_pickle(&pixels, &[0, 5, 9]));

    let batch = RawBatch::read(&path, ShardFormat::Pickle, "labels").unwrap();

    assert_eq!(batch.len(), 3);
    assert_eq!(batch.labels, vec![0, 5, 9]);
}

#[test]
fn test_read_custom_label_key() {
    let dir = TestDir::new("shard_fine");
    let path = dir.write(
        "train",
        &pickle_with_label_key(&synthetic_pixels(0, 2), "fine_labels", &[42, 99]),
    );

    let batch = RawBatch::read(&path, ShardFormat::Pickle, "fine_labels").unwrap();
    assert_eq!(batch.labels, vec![42, 99]);

    let missing = RawBatch::read(&path, ShardFormat::Pickle, "labels");
    assert!(matches!(missing, Err(DataError::FormatError(_))));
}

#[test]
fn test_read_binary_shard() {
    let dir = TestDir::new("shard_bin");
    let pixels = synthetic_pixels(0, 3);
    let path = dir.write("data_batch_1.bin", &binary_shard(&pixels, &[6, 1, 8]));

    let batch = RawBatch::read(&path, ShardFormat::Binary, "labels").unwrap();

    assert_eq!(batch.labels, vec![6, 1, 8]);
    assert_eq!(batch.data.as_slice().unwrap(), pixels.as_slice());
}

#[test]
fn test_binary_truncated_record() {
    let mut bytes = binary_shard(&synthetic_pixels(0, 2), &[1, 2]);
    bytes.pop();
    assert_eq!(bytes.len(), 2 * BINARY_RECORD_LEN - 1);

    let result = RawBatch::from_binary(bytes.as_slice());
    assert!(matches!(result, Err(DataError::FormatError(_))));
}

#[test]
fn test_read_missing_file() {
    let result = RawBatch::read(
        Path::new("./nonexistent_path/data_batch_1"),
        ShardFormat::Pickle,
        "labels",
    );
    assert!(matches!(result, Err(DataError::FileNotFound(_))));
}

#[test]
fn test_read_garbage_file() {
    let dir = TestDir::new("shard_garbage");
    let path = dir.write("data_batch_1", b"not a pickle at all");

    let result = RawBatch::read(&path, ShardFormat::Pickle, "labels");
    assert!(matches!(result, Err(DataError::Pickle { .. })));
}

#[test]
fn test_top_level_not_dict() {
    let bytes = PickleWriter::new(2).op(EMPTY_LIST).finish();
    let dir = TestDir::new("shard_list");
    let path = dir.write("data_batch_1", &bytes);

    let result = RawBatch::read(&path, ShardFormat::Pickle, "labels");
    assert!(matches!(result, Err(DataError::FormatError(_))));
}

#[test]
fn test_data_with_wrong_columns() {
    // 形状 [2, 1536] 的数组：总字节数合法，但列数不是 3072
    let pixels = synthetic_pixels(0, 1);
    let mut w = PickleWriter::new(2);
    w.op(EMPTY_DICT).op(MARK);
    w.short_binstring(b"data").ndarray("u1", &[2, PIXELS_PER_IMAGE / 2], false, &pixels);
    w.short_binstring(b"labels").int_list(&[0]);
    w.op(SETITEMS);
    let dir = TestDir::new("shard_cols");
    let path = dir.write("data_batch_1", &w.finish());

    let result = RawBatch::read(&path, ShardFormat::Pickle, "labels");
    assert!(matches!(result, Err(DataError::ShapeMismatch { .. })));
}

#[test]
fn test_labels_not_int() {
    let mut w = PickleWriter::new(2);
    w.op(EMPTY_DICT).op(MARK);
    w.short_binstring(b"data").binstring(&synthetic_pixels(0, 1));
    w.short_binstring(b"labels").op(MARK).short_binstring(b"cat").op(LIST);
    w.op(SETITEMS);
    let dir = TestDir::new("shard_str_label");
    let path = dir.write("data_batch_1", &w.finish());

    let result = RawBatch::read(&path, ShardFormat::Pickle, "labels");
    assert!(matches!(result, Err(DataError::FormatError(_))));
}

#[test]
fn test_file_name_by_format() {
    assert_eq!(ShardFormat::Pickle.file_name("test_batch"), "test_batch");
    assert_eq!(ShardFormat::Binary.file_name("test_batch"), "test_batch.bin");
}

#[test]
fn test_read_label_names_pickle() {
    let dir = TestDir::new("meta_pickle");
    let path = dir.write("batches.meta", &meta_pickle(&["airplane", "automobile", "bird"]));

    let names = read_label_names(&path, ShardFormat::Pickle).unwrap();
    assert_eq!(names, vec!["airplane", "automobile", "bird"]);
}

#[test]
fn test_read_label_names_text() {
    let dir = TestDir::new("meta_text");
    let path = dir.write("batches.meta.txt", b"airplane\nautomobile\n\nbird\n");

    let names = read_label_names(&path, ShardFormat::Binary).unwrap();
    assert_eq!(names, vec!["airplane", "automobile", "bird"]);
}
