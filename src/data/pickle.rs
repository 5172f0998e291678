//! Python pickle 流的精简解码器
//!
//! 只覆盖 CIFAR 分片实际会用到的构造：
//! - 协议 0-5 中的基本类型、容器与 memo 相关 opcode
//! - numpy 的 `ndarray` / `dtype` 重建：协议 2-4 走 `_reconstruct` + `BUILD`，
//!   协议 5 走 `_frombuffer(buffer, dtype, shape, order)`
//! - Python 3 以协议 0-2 写出 bytes 时使用的 `_codecs.encode(s, 'latin1')`
//!
//! Python 2 的 `str`（STRING / BINSTRING / SHORT_BINSTRING）一律按 latin-1 解码，
//! 每个字节映射为同值码位，因此 numpy 原始数据可以无损还原为字节。
//!
//! memo 中保存的是写入时刻的快照；之后对同一容器的修改不会反映到 memo 里。
//! 字符串与字节串的内容以 `Rc` 共享，快照不会复制整块像素数据。

use std::collections::HashMap;
use std::io::{BufRead, Read};
use std::rc::Rc;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use thiserror::Error;

pub(crate) mod opcodes {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';

    // 协议 2
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    // 协议 3
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';

    // 协议 4
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;

    // 协议 5
    pub const BYTEARRAY8: u8 = 0x96;
}

/// 支持的最高协议版本
const HIGHEST_PROTOCOL: u8 = 5;

/// pickle 解码错误
#[derive(Debug, Error)]
pub enum PickleError {
    #[error("数据提前结束")]
    UnexpectedEof,

    #[error("读取失败: {0}")]
    Io(std::io::Error),

    #[error("不支持的 opcode: 0x{0:02x}")]
    UnsupportedOpcode(u8),

    #[error("不支持的协议版本: {0}")]
    UnsupportedProtocol(u8),

    #[error("栈为空")]
    StackUnderflow,

    #[error("找不到 MARK")]
    MissingMark,

    #[error("memo 中不存在键 {0}")]
    MissingMemo(u64),

    #[error("不支持的全局对象: {module}.{name}")]
    UnsupportedGlobal { module: String, name: String },

    #[error("不支持的调用: {0}")]
    UnsupportedReduce(String),

    #[error("不支持的 dtype: {0}")]
    UnsupportedDtype(String),

    #[error("类型不符: 期望 {expected}, 实际 {got}")]
    TypeMismatch { expected: &'static str, got: String },

    #[error("数组字节数不符: 期望 {expected}, 实际 {got}")]
    ArrayLength { expected: usize, got: usize },

    #[error("整数溢出")]
    IntegerOverflow,

    #[error("非法 UTF-8 字符串")]
    InvalidUtf8,

    #[error("非法文本参数: {0:?}")]
    InvalidText(String),
}

impl From<std::io::Error> for PickleError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(e)
        }
    }
}

/// 解码器认识的全局对象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownGlobal {
    /// `numpy.core.multiarray._reconstruct`
    Reconstruct,
    /// `numpy.core.numeric._frombuffer`（协议 5）
    FromBuffer,
    /// `numpy.ndarray`
    NdArray,
    /// `numpy.dtype`
    Dtype,
    /// `_codecs.encode`
    Encode,
}

impl KnownGlobal {
    fn resolve(module: &str, name: &str) -> Result<Self, PickleError> {
        match (module, name) {
            ("numpy.core.multiarray" | "numpy._core.multiarray", "_reconstruct") => {
                Ok(Self::Reconstruct)
            }
            ("numpy.core.numeric" | "numpy._core.numeric", "_frombuffer") => Ok(Self::FromBuffer),
            ("numpy", "ndarray") => Ok(Self::NdArray),
            ("numpy", "dtype") => Ok(Self::Dtype),
            ("_codecs", "encode") => Ok(Self::Encode),
            _ => Err(PickleError::UnsupportedGlobal {
                module: module.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

/// numpy 元素类型（只支持定长数值类型）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtype {
    /// 'u' / 'i' / 'b' / 'f'
    pub kind: char,
    /// 单个元素的字节数
    pub size: usize,
    pub little_endian: bool,
}

impl Dtype {
    /// 解析 `"u1"`、`"<i8"`、`"f4"` 这类描述符
    pub fn parse(descr: &str) -> Result<Self, PickleError> {
        let unsupported = || PickleError::UnsupportedDtype(descr.to_string());

        let (little_endian, body) = match descr.chars().next() {
            Some('<') | Some('|') => (true, &descr[1..]),
            Some('>') => (false, &descr[1..]),
            Some('=') => (cfg!(target_endian = "little"), &descr[1..]),
            _ => (cfg!(target_endian = "little"), descr),
        };
        let mut chars = body.chars();
        let kind = chars.next().ok_or_else(unsupported)?;
        if !matches!(kind, 'u' | 'i' | 'b' | 'f') {
            return Err(unsupported());
        }
        let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(unsupported());
        }

        Ok(Self {
            kind,
            size,
            little_endian,
        })
    }

    /// `uint8`
    pub fn is_u8(&self) -> bool {
        self.kind == 'u' && self.size == 1
    }
}

/// 重建后的 numpy 数组，数据统一为 C 顺序
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub dtype: Dtype,
    pub data: Vec<u8>,
}

impl NdArray {
    fn placeholder() -> Self {
        Self {
            shape: vec![0],
            dtype: Dtype {
                kind: 'u',
                size: 1,
                little_endian: true,
            },
            data: Vec::new(),
        }
    }

    /// 校验字节数并统一为 C 顺序后构造
    fn from_parts(
        shape: Vec<usize>,
        dtype: Dtype,
        fortran_order: bool,
        data: Vec<u8>,
    ) -> Result<Self, PickleError> {
        let count = element_count(&shape)?;
        let expected = count
            .checked_mul(dtype.size)
            .ok_or(PickleError::IntegerOverflow)?;
        if data.len() != expected {
            return Err(PickleError::ArrayLength {
                expected,
                got: data.len(),
            });
        }

        let data = if fortran_order && shape.len() > 1 {
            to_c_order(&shape, dtype.size, &data)?
        } else {
            data
        };
        Ok(Self { shape, dtype, data })
    }

    /// 元素个数（由实际持有的字节数推出）
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size.max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 以字节形式取出 `uint8` 数组的全部元素
    pub fn to_u8_vec(&self) -> Result<Vec<u8>, PickleError> {
        if !self.dtype.is_u8() {
            return Err(PickleError::TypeMismatch {
                expected: "uint8 数组",
                got: format!("{}{}", self.dtype.kind, self.dtype.size),
            });
        }
        Ok(self.data.clone())
    }

    /// 将整数数组的全部元素转换为 i64
    pub fn to_i64_vec(&self) -> Result<Vec<i64>, PickleError> {
        let Dtype {
            kind,
            size,
            little_endian,
        } = self.dtype;
        if !matches!(kind, 'u' | 'i') {
            return Err(PickleError::TypeMismatch {
                expected: "整数数组",
                got: format!("{kind}{size}"),
            });
        }

        self.data
            .chunks_exact(size)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                if little_endian {
                    raw[..size].copy_from_slice(chunk);
                } else {
                    for (dst, src) in raw[..size].iter_mut().zip(chunk.iter().rev()) {
                        *dst = *src;
                    }
                }
                // 有符号类型需要符号扩展
                if kind == 'i' && size < 8 && raw[size - 1] & 0x80 != 0 {
                    raw[size..].fill(0xff);
                }
                let value = i64::from_le_bytes(raw);
                if kind == 'u' && size == 8 && value < 0 {
                    Err(PickleError::IntegerOverflow)
                } else {
                    Ok(value)
                }
            })
            .collect()
    }
}

/// 解码得到的值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// 保持插入顺序的键值对
    Dict(Vec<(Value, Value)>),
    Global(KnownGlobal),
    Dtype(Dtype),
    Array(NdArray),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Global(_) => "global",
            Value::Dtype(_) => "dtype",
            Value::Array(_) => "ndarray",
        }
    }

    /// 按字符串键查找字典项，`str` 与 `bytes` 键都可匹配
    pub fn get(&self, key: &str) -> Option<&Value> {
        let Value::Dict(items) = self else {
            return None;
        };
        items.iter().find_map(|(k, v)| match k {
            Value::Str(s) if &**s == key => Some(v),
            Value::Bytes(b) if &**b == key.as_bytes() => Some(v),
            _ => None,
        })
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(&**s),
            _ => None,
        }
    }

    fn mismatch(&self, expected: &'static str) -> PickleError {
        PickleError::TypeMismatch {
            expected,
            got: self.type_name().to_string(),
        }
    }
}

/// 从任意 `BufRead` 解码一个 pickle 对象
pub fn from_reader<R: BufRead>(reader: R) -> Result<Value, PickleError> {
    Machine::new(reader).run()
}

/// 从内存中的字节解码一个 pickle 对象
pub fn from_slice(bytes: &[u8]) -> Result<Value, PickleError> {
    from_reader(bytes)
}

/// latin-1 解码：每个字节即一个码位
pub fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// latin-1 编码；码位超过 0xFF 时失败
pub fn latin1_encode(s: &str) -> Result<Vec<u8>, PickleError> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| PickleError::InvalidText(s.to_string())))
        .collect()
}

struct Machine<R> {
    reader: R,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u64, Value>,
}

impl<R: BufRead> Machine<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value, PickleError> {
        use opcodes::*;

        loop {
            let op = self.reader.read_u8()?;
            match op {
                PROTO => {
                    let version = self.reader.read_u8()?;
                    if version > HIGHEST_PROTOCOL {
                        return Err(PickleError::UnsupportedProtocol(version));
                    }
                }
                FRAME => {
                    // 帧只是读取提示，内容照常顺序解码
                    self.reader.read_u64::<LittleEndian>()?;
                }
                STOP => return self.pop(),

                MARK => self.marks.push(self.stack.len()),
                POP => {
                    self.pop()?;
                }
                POP_MARK => {
                    self.pop_mark()?;
                }
                DUP => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }

                NONE => self.stack.push(Value::None),
                NEWTRUE => self.stack.push(Value::Bool(true)),
                NEWFALSE => self.stack.push(Value::Bool(false)),

                INT => {
                    let line = self.read_line()?;
                    let value = match line.as_str() {
                        "01" => Value::Bool(true),
                        "00" => Value::Bool(false),
                        _ => Value::Int(parse_text(&line)?),
                    };
                    self.stack.push(value);
                }
                LONG => {
                    let line = self.read_line()?;
                    let digits = line.strip_suffix('L').unwrap_or(&line);
                    self.stack.push(Value::Int(parse_text(digits)?));
                }
                BININT => {
                    let v = self.reader.read_i32::<LittleEndian>()?;
                    self.stack.push(Value::Int(i64::from(v)));
                }
                BININT1 => {
                    let v = self.reader.read_u8()?;
                    self.stack.push(Value::Int(i64::from(v)));
                }
                BININT2 => {
                    let v = self.reader.read_u16::<LittleEndian>()?;
                    self.stack.push(Value::Int(i64::from(v)));
                }
                LONG1 => {
                    let n = usize::from(self.reader.read_u8()?);
                    let v = self.read_long(n)?;
                    self.stack.push(Value::Int(v));
                }
                LONG4 => {
                    let n = self.read_len_i32()?;
                    let v = self.read_long(n)?;
                    self.stack.push(Value::Int(v));
                }
                FLOAT => {
                    let line = self.read_line()?;
                    self.stack.push(Value::Float(parse_text(&line)?));
                }
                BINFLOAT => {
                    let v = self.reader.read_f64::<BigEndian>()?;
                    self.stack.push(Value::Float(v));
                }

                STRING => {
                    let line = self.read_line_bytes()?;
                    let bytes = unquote_string(&line)?;
                    self.stack.push(Value::Str(latin1_decode(&bytes).into()));
                }
                BINSTRING => {
                    let n = self.read_len_i32()?;
                    let bytes = self.read_bytes(n)?;
                    self.stack.push(Value::Str(latin1_decode(&bytes).into()));
                }
                SHORT_BINSTRING => {
                    let n = usize::from(self.reader.read_u8()?);
                    let bytes = self.read_bytes(n)?;
                    self.stack.push(Value::Str(latin1_decode(&bytes).into()));
                }
                UNICODE => {
                    let line = self.read_line_bytes()?;
                    self.stack.push(Value::Str(raw_unicode_unescape(&line)?.into()));
                }
                BINUNICODE => {
                    let n = self.reader.read_u32::<LittleEndian>()? as usize;
                    let s = self.read_utf8(n)?;
                    self.stack.push(Value::Str(s.into()));
                }
                SHORT_BINUNICODE => {
                    let n = usize::from(self.reader.read_u8()?);
                    let s = self.read_utf8(n)?;
                    self.stack.push(Value::Str(s.into()));
                }
                BINUNICODE8 => {
                    let n = self.read_len_u64()?;
                    let s = self.read_utf8(n)?;
                    self.stack.push(Value::Str(s.into()));
                }
                BINBYTES => {
                    let n = self.reader.read_u32::<LittleEndian>()? as usize;
                    let bytes = self.read_bytes(n)?;
                    self.stack.push(Value::Bytes(bytes.into()));
                }
                SHORT_BINBYTES => {
                    let n = usize::from(self.reader.read_u8()?);
                    let bytes = self.read_bytes(n)?;
                    self.stack.push(Value::Bytes(bytes.into()));
                }
                // 协议 5 中可写的 PickleBuffer 以 bytearray 形式内联
                BINBYTES8 | BYTEARRAY8 => {
                    let n = self.read_len_u64()?;
                    let bytes = self.read_bytes(n)?;
                    self.stack.push(Value::Bytes(bytes.into()));
                }

                EMPTY_LIST => self.stack.push(Value::List(Vec::new())),
                EMPTY_TUPLE => self.stack.push(Value::Tuple(Vec::new())),
                EMPTY_DICT => self.stack.push(Value::Dict(Vec::new())),
                LIST => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(items));
                }
                TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                TUPLE1 | TUPLE2 | TUPLE3 => {
                    let n = usize::from(op - TUPLE1 + 1);
                    if self.stack.len() < n {
                        return Err(PickleError::StackUnderflow);
                    }
                    let items = self.stack.split_off(self.stack.len() - n);
                    self.stack.push(Value::Tuple(items));
                }
                DICT => {
                    let items = self.pop_mark()?;
                    let pairs = pairs_from(items)?;
                    self.stack.push(Value::Dict(pairs));
                }

                APPEND => {
                    let item = self.pop()?;
                    self.list_mut()?.push(item);
                }
                APPENDS => {
                    let items = self.pop_mark()?;
                    self.list_mut()?.extend(items);
                }
                SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.dict_mut()?.push((key, value));
                }
                SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = pairs_from(items)?;
                    self.dict_mut()?.extend(pairs);
                }

                PUT => {
                    let line = self.read_line()?;
                    self.memoize(parse_text(&line)?)?;
                }
                BINPUT => {
                    let key = self.reader.read_u8()?;
                    self.memoize(u64::from(key))?;
                }
                LONG_BINPUT => {
                    let key = self.reader.read_u32::<LittleEndian>()?;
                    self.memoize(u64::from(key))?;
                }
                MEMOIZE => {
                    let key = self.memo.len() as u64;
                    self.memoize(key)?;
                }
                GET => {
                    let line = self.read_line()?;
                    self.recall(parse_text(&line)?)?;
                }
                BINGET => {
                    let key = self.reader.read_u8()?;
                    self.recall(u64::from(key))?;
                }
                LONG_BINGET => {
                    let key = self.reader.read_u32::<LittleEndian>()?;
                    self.recall(u64::from(key))?;
                }

                GLOBAL => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    let global = KnownGlobal::resolve(&module, &name)?;
                    self.stack.push(Value::Global(global));
                }
                STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let (Some(module), Some(name)) = (module.as_str(), name.as_str()) else {
                        return Err(PickleError::TypeMismatch {
                            expected: "str",
                            got: format!("{}/{}", module.type_name(), name.type_name()),
                        });
                    };
                    let global = KnownGlobal::resolve(module, name)?;
                    self.stack.push(Value::Global(global));
                }
                REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let value = reduce(callable, args)?;
                    self.stack.push(value);
                }
                BUILD => {
                    let state = self.pop()?;
                    let target = self.stack.last_mut().ok_or(PickleError::StackUnderflow)?;
                    build(target, state)?;
                }

                other => return Err(PickleError::UnsupportedOpcode(other)),
            }
        }
    }

    fn pop(&mut self) -> Result<Value, PickleError> {
        self.stack.pop().ok_or(PickleError::StackUnderflow)
    }

    fn top(&self) -> Result<&Value, PickleError> {
        self.stack.last().ok_or(PickleError::StackUnderflow)
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>, PickleError> {
        let mark = self.marks.pop().ok_or(PickleError::MissingMark)?;
        if mark > self.stack.len() {
            return Err(PickleError::StackUnderflow);
        }
        Ok(self.stack.split_off(mark))
    }

    fn list_mut(&mut self) -> Result<&mut Vec<Value>, PickleError> {
        match self.stack.last_mut() {
            Some(Value::List(items)) => Ok(items),
            Some(other) => Err(other.mismatch("list")),
            None => Err(PickleError::StackUnderflow),
        }
    }

    fn dict_mut(&mut self) -> Result<&mut Vec<(Value, Value)>, PickleError> {
        match self.stack.last_mut() {
            Some(Value::Dict(items)) => Ok(items),
            Some(other) => Err(other.mismatch("dict")),
            None => Err(PickleError::StackUnderflow),
        }
    }

    fn memoize(&mut self, key: u64) -> Result<(), PickleError> {
        let top = self.top()?.clone();
        self.memo.insert(key, top);
        Ok(())
    }

    fn recall(&mut self, key: u64) -> Result<(), PickleError> {
        let value = self
            .memo
            .get(&key)
            .cloned()
            .ok_or(PickleError::MissingMemo(key))?;
        self.stack.push(value);
        Ok(())
    }

    /// 读取一行文本参数（不含换行符）
    fn read_line(&mut self) -> Result<String, PickleError> {
        let buf = self.read_line_bytes()?;
        String::from_utf8(buf).map_err(|_| PickleError::InvalidUtf8)
    }

    /// UNICODE 参数中可能含有 0x80-0xff 的原始字节，按字节读取
    fn read_line_bytes(&mut self) -> Result<Vec<u8>, PickleError> {
        let mut buf = Vec::new();
        self.reader.read_until(b'\n', &mut buf)?;
        if buf.pop() != Some(b'\n') {
            return Err(PickleError::UnexpectedEof);
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(buf)
    }

    /// 读取恰好 n 个字节；按实际读到的数据增长缓冲区，损坏的长度字段不会导致巨量分配
    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, PickleError> {
        let mut buf = Vec::new();
        (&mut self.reader).take(n as u64).read_to_end(&mut buf)?;
        if buf.len() != n {
            return Err(PickleError::UnexpectedEof);
        }
        Ok(buf)
    }

    fn read_utf8(&mut self, n: usize) -> Result<String, PickleError> {
        let bytes = self.read_bytes(n)?;
        String::from_utf8(bytes).map_err(|_| PickleError::InvalidUtf8)
    }

    fn read_len_i32(&mut self) -> Result<usize, PickleError> {
        let n = self.reader.read_i32::<LittleEndian>()?;
        usize::try_from(n).map_err(|_| PickleError::InvalidText(format!("长度 {n}")))
    }

    fn read_len_u64(&mut self) -> Result<usize, PickleError> {
        let n = self.reader.read_u64::<LittleEndian>()?;
        usize::try_from(n).map_err(|_| PickleError::IntegerOverflow)
    }

    /// 小端补码表示的任意长度整数，超过 8 字节视为溢出
    fn read_long(&mut self, n: usize) -> Result<i64, PickleError> {
        let bytes = self.read_bytes(n)?;
        if n == 0 {
            return Ok(0);
        }
        if n > 8 {
            return Err(PickleError::IntegerOverflow);
        }
        let negative = bytes[n - 1] & 0x80 != 0;
        let mut raw = if negative { [0xff; 8] } else { [0; 8] };
        raw[..n].copy_from_slice(&bytes);
        Ok(i64::from_le_bytes(raw))
    }
}

fn parse_text<T: std::str::FromStr>(text: &str) -> Result<T, PickleError> {
    text.trim()
        .parse()
        .map_err(|_| PickleError::InvalidText(text.to_string()))
}

fn pairs_from(items: Vec<Value>) -> Result<Vec<(Value, Value)>, PickleError> {
    if items.len() % 2 != 0 {
        return Err(PickleError::StackUnderflow);
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((k, v));
    }
    Ok(pairs)
}

/// 执行 `callable(*args)`
fn reduce(callable: Value, args: Value) -> Result<Value, PickleError> {
    let Value::Global(global) = callable else {
        return Err(callable.mismatch("global"));
    };
    let Value::Tuple(args) = args else {
        return Err(args.mismatch("tuple"));
    };

    match global {
        // _reconstruct(ndarray, (0,), b'b')：先占位，真正的数据由 BUILD 填入
        KnownGlobal::Reconstruct => Ok(Value::Array(NdArray::placeholder())),
        KnownGlobal::FromBuffer => {
            let [Value::Bytes(buffer), Value::Dtype(dtype), Value::Tuple(dims), order] =
                args.as_slice()
            else {
                return Err(PickleError::UnsupportedReduce(
                    "_frombuffer 参数不符".to_string(),
                ));
            };
            // numpy 以单字节 bytes 写出 order，也兼容 str
            let fortran_order = match order {
                Value::Bytes(b) if &**b == b"C" => false,
                Value::Bytes(b) if &**b == b"F" => true,
                Value::Str(s) if &**s == "C" => false,
                Value::Str(s) if &**s == "F" => true,
                other => {
                    return Err(PickleError::UnsupportedReduce(format!(
                        "_frombuffer order: {other:?}"
                    )));
                }
            };
            let shape = shape_from(dims)?;
            let array = NdArray::from_parts(shape, *dtype, fortran_order, buffer.to_vec())?;
            Ok(Value::Array(array))
        }
        KnownGlobal::Dtype => {
            let descr = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| PickleError::UnsupportedReduce("dtype 缺少描述符".to_string()))?;
            Ok(Value::Dtype(Dtype::parse(descr)?))
        }
        KnownGlobal::Encode => match args.as_slice() {
            [Value::Str(text), Value::Str(encoding)]
                if matches!(&**encoding, "latin1" | "latin-1") =>
            {
                Ok(Value::Bytes(latin1_encode(text)?.into()))
            }
            [Value::Str(_), Value::Str(encoding)] => {
                Err(PickleError::UnsupportedReduce(format!("_codecs.encode({encoding})")))
            }
            _ => Err(PickleError::UnsupportedReduce("_codecs.encode 参数不符".to_string())),
        },
        KnownGlobal::NdArray => Err(PickleError::UnsupportedReduce("numpy.ndarray".to_string())),
    }
}

/// 执行 `target.__setstate__(state)`
fn build(target: &mut Value, state: Value) -> Result<(), PickleError> {
    match target {
        Value::Dtype(dtype) => {
            // (version, byteorder, subdescr, names, fields, elsize, alignment, flags)
            if let Value::Tuple(items) = &state {
                match items.get(1).and_then(Value::as_str) {
                    Some("<") => dtype.little_endian = true,
                    Some(">") => dtype.little_endian = false,
                    _ => {}
                }
            }
            Ok(())
        }
        Value::Array(array) => {
            let Value::Tuple(items) = state else {
                return Err(state.mismatch("tuple"));
            };
            // 新版 numpy 带版本号 (version, shape, dtype, is_fortran, rawdata)
            let fields = match items.len() {
                5 => &items[1..],
                4 => &items[..],
                n => {
                    return Err(PickleError::UnsupportedReduce(format!(
                        "ndarray 状态元组长度 {n}"
                    )));
                }
            };

            let Value::Tuple(dims) = &fields[0] else {
                return Err(fields[0].mismatch("tuple"));
            };
            let Value::Dtype(dtype) = &fields[1] else {
                return Err(fields[1].mismatch("dtype"));
            };
            let fortran_order = fields[2].as_int().unwrap_or(0) != 0;
            let data = match &fields[3] {
                Value::Bytes(bytes) => bytes.to_vec(),
                Value::Str(text) => latin1_encode(text)?,
                other => return Err(other.mismatch("bytes")),
            };

            *array = NdArray::from_parts(shape_from(dims)?, *dtype, fortran_order, data)?;
            Ok(())
        }
        other => Err(PickleError::UnsupportedReduce(format!(
            "对 {} 调用 BUILD",
            other.type_name()
        ))),
    }
}

fn shape_from(dims: &[Value]) -> Result<Vec<usize>, PickleError> {
    dims.iter()
        .map(|d| {
            d.as_int()
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| d.mismatch("非负 int"))
        })
        .collect()
}

/// 各维长度之积；溢出时报错而不是回绕
fn element_count(shape: &[usize]) -> Result<usize, PickleError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or(PickleError::IntegerOverflow)
}

/// 把列主序（Fortran）的元素字节重排为行主序
fn to_c_order(shape: &[usize], elem_size: usize, data: &[u8]) -> Result<Vec<u8>, PickleError> {
    let count = element_count(shape)?;
    // 元素在 Fortran 内存中的位置，按逻辑（C）顺序遍历
    let positions = ArrayD::from_shape_vec(IxDyn(shape).f(), (0..count).collect::<Vec<_>>())
        .map_err(|_| PickleError::ArrayLength {
            expected: count.saturating_mul(elem_size),
            got: data.len(),
        })?;

    let mut out = Vec::with_capacity(data.len());
    for &pos in positions.iter() {
        out.extend_from_slice(&data[pos * elem_size..(pos + 1) * elem_size]);
    }
    Ok(out)
}

/// 协议 0 的 STRING 参数：带引号的 Python 字面量，转义规则同 `codecs.escape_decode`
fn unquote_string(line: &[u8]) -> Result<Vec<u8>, PickleError> {
    let invalid = || PickleError::InvalidText(latin1_decode(line));
    let body = match line {
        [open @ (b'\'' | b'"'), body @ .., close] if open == close => body,
        _ => return Err(invalid()),
    };

    let mut out = Vec::with_capacity(body.len());
    let mut iter = body.iter().copied().peekable();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next().ok_or_else(invalid)? {
            b'\n' => {}
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'x' => {
                let hi = iter.next().and_then(hex_value);
                let lo = iter.next().and_then(hex_value);
                let (Some(hi), Some(lo)) = (hi, lo) else {
                    return Err(invalid());
                };
                out.push(hi << 4 | lo);
            }
            d @ b'0'..=b'7' => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match iter.peek() {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            iter.next();
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xff) as u8);
            }
            c @ (b'\\' | b'\'' | b'"') => out.push(c),
            // 未知转义原样保留
            c => out.extend_from_slice(&[b'\\', c]),
        }
    }
    Ok(out)
}

/// 协议 0 的 UNICODE 参数：raw-unicode-escape，只有 `\uXXXX` 与 `\UXXXXXXXX` 是转义
fn raw_unicode_unescape(line: &[u8]) -> Result<String, PickleError> {
    let invalid = || PickleError::InvalidText(latin1_decode(line));

    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let width = match (line[i], line.get(i + 1)) {
            (b'\\', Some(b'u')) => 4,
            (b'\\', Some(b'U')) => 8,
            _ => 0,
        };
        if width == 0 {
            out.push(char::from(line[i]));
            i += 1;
            continue;
        }

        let digits = line.get(i + 2..i + 2 + width).ok_or_else(invalid)?;
        let code = digits
            .iter()
            .try_fold(0u32, |acc, &b| Some(acc << 4 | u32::from(hex_value(b)?)))
            .and_then(char::from_u32)
            .ok_or_else(invalid)?;
        out.push(code);
        i += 2 + width;
    }
    Ok(out)
}

fn hex_value(b: u8) -> Option<u8> {
    char::from(b).to_digit(16).map(|d| d as u8)
}
