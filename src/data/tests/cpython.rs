//! 解码 CPython 实际写出的 pickle 字节流
//!
//! 每个常量上方注释给出生成它的 Python 命令。

use crate::data::pickle::{Value, from_slice, latin1_encode};

fn data_bytes(value: &Value) -> Vec<u8> {
    match value.get("data") {
        Some(Value::Str(text)) => latin1_encode(text).unwrap(),
        Some(Value::Bytes(bytes)) => bytes.to_vec(),
        other => panic!("`data` 应为 str 或 bytes，实际 {:?}", other),
    }
}

fn int_list(value: Option<&Value>) -> Vec<i64> {
    let Some(Value::List(items)) = value else {
        panic!("应为 list，实际 {:?}", value);
    };
    items.iter().map(|v| v.as_int().unwrap()).collect()
}

// Python 2.7.18:
// cPickle.dumps({'batch_label': 'testing batch 1 of 1', 'labels': [3, 7], 'data': '\x00\x7f\x80\xff'}, 2)
const PY2_P2_BATCH: &[u8] = b"\
    \x80\x02\x7d\x71\x01\x28\x55\x04\x64\x61\x74\x61\x71\x02\x55\x04\x00\x7f\x80\xff\
    \x71\x03\x55\x06\x6c\x61\x62\x65\x6c\x73\x71\x04\x5d\x71\x05\x28\x4b\x03\x4b\x07\
    \x65\x55\x0b\x62\x61\x74\x63\x68\x5f\x6c\x61\x62\x65\x6c\x71\x06\x55\x14\x74\x65\
    \x73\x74\x69\x6e\x67\x20\x62\x61\x74\x63\x68\x20\x31\x20\x6f\x66\x20\x31\x71\x07\
    \x75\x2e";

// Python 2.7.18: 同上，协议 0
const PY2_P0_BATCH: &[u8] = b"\
    \x28\x64\x70\x31\x0a\x53\x27\x64\x61\x74\x61\x27\x0a\x70\x32\x0a\x53\x27\x5c\x78\
    \x30\x30\x5c\x78\x37\x66\x5c\x78\x38\x30\x5c\x78\x66\x66\x27\x0a\x70\x33\x0a\x73\
    \x53\x27\x6c\x61\x62\x65\x6c\x73\x27\x0a\x70\x34\x0a\x28\x6c\x70\x35\x0a\x49\x33\
    \x0a\x61\x49\x37\x0a\x61\x73\x53\x27\x62\x61\x74\x63\x68\x5f\x6c\x61\x62\x65\x6c\
    \x27\x0a\x70\x36\x0a\x53\x27\x74\x65\x73\x74\x69\x6e\x67\x20\x62\x61\x74\x63\x68\
    \x20\x31\x20\x6f\x66\x20\x31\x27\x0a\x70\x37\x0a\x73\x2e";

// Python 2.7.18: cPickle.dumps(["it's", 'tab\there', '\x01\n'], 0)
const PY2_P0_QUOTES: &[u8] = b"\
    \x28\x6c\x70\x31\x0a\x53\x22\x69\x74\x27\x73\x22\x0a\x70\x32\x0a\x61\x53\x27\x74\
    \x61\x62\x5c\x74\x68\x65\x72\x65\x27\x0a\x70\x33\x0a\x61\x53\x27\x5c\x78\x30\x31\
    \x5c\x6e\x27\x0a\x70\x34\x0a\x61\x2e";

// Python 2.7.18:
// cPickle.dumps({'label_names': ['airplane', 'automobile'], 'num_vis': 3072}, 2)
const PY2_META: &[u8] = b"\
    \x80\x02\x7d\x71\x01\x28\x55\x0b\x6c\x61\x62\x65\x6c\x5f\x6e\x61\x6d\x65\x73\x71\
    \x02\x5d\x71\x03\x28\x55\x08\x61\x69\x72\x70\x6c\x61\x6e\x65\x71\x04\x55\x0a\x61\
    \x75\x74\x6f\x6d\x6f\x62\x69\x6c\x65\x71\x05\x65\x55\x07\x6e\x75\x6d\x5f\x76\x69\
    \x73\x71\x06\x4d\x00\x0c\x75\x2e";

// Python 3.11.7: pickle.dumps({'data': bytes([0, 127, 128, 255]), 'labels': [3, 7]}, protocol=0)
const PY3_P0_BATCH: &[u8] = b"\
    \x28\x64\x70\x30\x0a\x56\x64\x61\x74\x61\x0a\x70\x31\x0a\x63\x5f\x63\x6f\x64\x65\
    \x63\x73\x0a\x65\x6e\x63\x6f\x64\x65\x0a\x70\x32\x0a\x28\x56\x5c\x75\x30\x30\x30\
    \x30\x7f\x80\xff\x0a\x70\x33\x0a\x56\x6c\x61\x74\x69\x6e\x31\x0a\x70\x34\x0a\x74\
    \x70\x35\x0a\x52\x70\x36\x0a\x73\x56\x6c\x61\x62\x65\x6c\x73\x0a\x70\x37\x0a\x28\
    \x6c\x70\x38\x0a\x49\x33\x0a\x61\x49\x37\x0a\x61\x73\x2e";

// Python 3.11.7: 同上，protocol=2（bytes 以 _codecs.encode 写出）
const PY3_P2_BATCH: &[u8] = b"\
    \x80\x02\x7d\x71\x00\x28\x58\x04\x00\x00\x00\x64\x61\x74\x61\x71\x01\x63\x5f\x63\
    \x6f\x64\x65\x63\x73\x0a\x65\x6e\x63\x6f\x64\x65\x0a\x71\x02\x58\x06\x00\x00\x00\
    \x00\x7f\xc2\x80\xc3\xbf\x71\x03\x58\x06\x00\x00\x00\x6c\x61\x74\x69\x6e\x31\x71\
    \x04\x86\x71\x05\x52\x71\x06\x58\x06\x00\x00\x00\x6c\x61\x62\x65\x6c\x73\x71\x07\
    \x5d\x71\x08\x28\x4b\x03\x4b\x07\x65\x75\x2e";

// Python 3.11.7: 同上，protocol=4
const PY3_P4_BATCH: &[u8] = b"\
    \x80\x04\x95\x24\x00\x00\x00\x00\x00\x00\x00\x7d\x94\x28\x8c\x04\x64\x61\x74\x61\
    \x94\x43\x04\x00\x7f\x80\xff\x94\x8c\x06\x6c\x61\x62\x65\x6c\x73\x94\x5d\x94\x28\
    \x4b\x03\x4b\x07\x65\x75\x2e";

// Python 3.11.7: pickle.dumps(['café \\ 中'], protocol=0)
const PY3_P0_UNICODE: &[u8] = b"\
    \x28\x6c\x70\x30\x0a\x56\x63\x61\x66\xe9\x20\x5c\x75\x30\x30\x35\x63\x20\x5c\x75\
    \x34\x65\x32\x64\x0a\x70\x31\x0a\x61\x2e";

// Python 3.11.7，按 numpy 2.x 的 ndarray.__reduce_ex__(5) 返回值
// (_frombuffer, (PickleBuffer(bytearray), dtype, shape, b'C'|b'F')) 序列化，等价于：
// pickle.dumps({'data': np.array([[0, 1, 2], [127, 128, 255]], np.uint8),
//               'labels': np.array([3, 7], '<i8')}, protocol=5)
const NUMPY_P5_BATCH: &[u8] = b"\
    \x80\x05\x95\xdd\x00\x00\x00\x00\x00\x00\x00\x7d\x94\x28\x8c\x04\x64\x61\x74\x61\
    \x94\x8c\x13\x6e\x75\x6d\x70\x79\x2e\x5f\x63\x6f\x72\x65\x2e\x6e\x75\x6d\x65\x72\
    \x69\x63\x94\x8c\x0b\x5f\x66\x72\x6f\x6d\x62\x75\x66\x66\x65\x72\x94\x93\x94\x28\
    \x96\x06\x00\x00\x00\x00\x00\x00\x00\x00\x01\x02\x7f\x80\xff\x94\x8c\x05\x6e\x75\
    \x6d\x70\x79\x94\x8c\x05\x64\x74\x79\x70\x65\x94\x93\x94\x8c\x02\x75\x31\x94\x89\
    \x88\x87\x94\x52\x94\x28\x4b\x03\x8c\x01\x7c\x94\x4e\x4e\x4e\x4a\xff\xff\xff\xff\
    \x4a\xff\xff\xff\xff\x4b\x00\x74\x94\x62\x4b\x02\x4b\x03\x86\x94\x43\x01\x43\x94\
    \x74\x94\x52\x94\x8c\x06\x6c\x61\x62\x65\x6c\x73\x94\x68\x04\x28\x96\x10\x00\x00\
    \x00\x00\x00\x00\x00\x03\x00\x00\x00\x00\x00\x00\x00\x07\x00\x00\x00\x00\x00\x00\
    \x00\x94\x68\x08\x8c\x02\x69\x38\x94\x89\x88\x87\x94\x52\x94\x28\x4b\x03\x8c\x01\
    \x3c\x94\x4e\x4e\x4e\x4a\xff\xff\xff\xff\x4a\xff\xff\xff\xff\x4b\x00\x74\x94\x62\
    \x4b\x02\x85\x94\x68\x0f\x74\x94\x52\x94\x75\x2e";

// 同上，等价于 pickle.dumps(np.asfortranarray([[0, 1, 2], [3, 4, 5]], np.uint8), protocol=5)
const NUMPY_P5_FORTRAN: &[u8] = b"\
    \x80\x05\x95\x7c\x00\x00\x00\x00\x00\x00\x00\x8c\x13\x6e\x75\x6d\x70\x79\x2e\x5f\
    \x63\x6f\x72\x65\x2e\x6e\x75\x6d\x65\x72\x69\x63\x94\x8c\x0b\x5f\x66\x72\x6f\x6d\
    \x62\x75\x66\x66\x65\x72\x94\x93\x94\x28\x96\x06\x00\x00\x00\x00\x00\x00\x00\x00\
    \x03\x01\x04\x02\x05\x94\x8c\x05\x6e\x75\x6d\x70\x79\x94\x8c\x05\x64\x74\x79\x70\
    \x65\x94\x93\x94\x8c\x02\x75\x31\x94\x89\x88\x87\x94\x52\x94\x28\x4b\x03\x8c\x01\
    \x7c\x94\x4e\x4e\x4e\x4a\xff\xff\xff\xff\x4a\xff\xff\xff\xff\x4b\x00\x74\x94\x62\
    \x4b\x02\x4b\x03\x86\x94\x43\x01\x46\x94\x74\x94\x52\x94\x2e";

#[test]
fn test_py2_protocol2_batch() {
    let value = from_slice(PY2_P2_BATCH).unwrap();

    assert_eq!(data_bytes(&value), vec![0x00, 0x7f, 0x80, 0xff]);
    assert_eq!(int_list(value.get("labels")), vec![3, 7]);
    assert_eq!(
        value.get("batch_label").and_then(Value::as_str),
        Some("testing batch 1 of 1")
    );
}

#[test]
fn test_py2_protocol0_batch() {
    let value = from_slice(PY2_P0_BATCH).unwrap();

    assert_eq!(data_bytes(&value), vec![0x00, 0x7f, 0x80, 0xff]);
    assert_eq!(int_list(value.get("labels")), vec![3, 7]);
    assert_eq!(value, from_slice(PY2_P2_BATCH).unwrap());
}

#[test]
fn test_py2_protocol0_escapes() {
    let value = from_slice(PY2_P0_QUOTES).unwrap();

    assert_eq!(
        value,
        Value::List(vec![
            Value::Str("it's".into()),
            Value::Str("tab\there".into()),
            Value::Str("\u{1}\n".into()),
        ])
    );
}

#[test]
fn test_py2_meta_label_names() {
    let value = from_slice(PY2_META).unwrap();

    let Some(Value::List(names)) = value.get("label_names") else {
        panic!("缺少 label_names");
    };
    let names: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
    assert_eq!(names, vec!["airplane", "automobile"]);
    assert_eq!(value.get("num_vis"), Some(&Value::Int(3072)));
}

#[test]
fn test_py3_batches_all_protocols() {
    for bytes in [PY3_P0_BATCH, PY3_P2_BATCH, PY3_P4_BATCH] {
        let value = from_slice(bytes).unwrap();

        assert!(matches!(value.get("data"), Some(Value::Bytes(_))));
        assert_eq!(data_bytes(&value), vec![0x00, 0x7f, 0x80, 0xff]);
        assert_eq!(int_list(value.get("labels")), vec![3, 7]);
    }
}

#[test]
fn test_py3_protocol0_unicode() {
    let value = from_slice(PY3_P0_UNICODE).unwrap();
    assert_eq!(value, Value::List(vec![Value::Str("café \\ 中".into())]));
}

#[test]
fn test_numpy_protocol5_batch() {
    let value = from_slice(NUMPY_P5_BATCH).unwrap();

    let Some(Value::Array(data)) = value.get("data") else {
        panic!("`data` 应为 ndarray");
    };
    assert_eq!(data.shape, vec![2, 3]);
    assert!(data.dtype.is_u8());
    assert_eq!(data.to_u8_vec().unwrap(), vec![0, 1, 2, 127, 128, 255]);

    let Some(Value::Array(labels)) = value.get("labels") else {
        panic!("`labels` 应为 ndarray");
    };
    assert_eq!(labels.shape, vec![2]);
    assert_eq!(labels.to_i64_vec().unwrap(), vec![3, 7]);
}

#[test]
fn test_numpy_protocol5_fortran_order() {
    let Value::Array(array) = from_slice(NUMPY_P5_FORTRAN).unwrap() else {
        panic!("应为 ndarray");
    };
    assert_eq!(array.shape, vec![2, 3]);
    assert_eq!(array.data, vec![0, 1, 2, 3, 4, 5]);
}
