use std::{backtrace::Backtrace, num::NonZeroU32, panic::Location};

use crate::BoxType;

/// このライブラリ用の Result 型
pub type Result<T> = std::result::Result<T, Error>;

/// エラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// ボックス構造が不正、あるいは途中で切れている
    ///
    /// 必須のボックスが存在しない場合もこの種類となる
    Parse,

    /// ボックスは存在するが、要求されたものとは異なる種類のペイロードを保持している
    TypeMismatch,

    /// テーブルや SPS / PPS のリストの範囲外のインデックスが指定された
    IndexOutOfRange,

    /// トラック内のサンプル数以上のサンプルインデックスが指定された
    SampleIndexOutOfRange,

    /// fragmented MP4 などの未対応の構造が含まれている
    UnsupportedFeature,

    /// 元ファイルのシークや読み込みに失敗した
    Io,

    /// ADTS のフレーム長が 13 ビットに収まらない
    FrameTooLarge,
}

/// エラー型
pub struct Error {
    /// 発生したエラーの種類
    pub kind: ErrorKind,

    /// エラーが発生した理由
    pub reason: String,

    /// エラーが作成されたソースコードの場所
    pub location: &'static Location<'static>,

    /// エラーが発生した MP4 ボックスの種類
    pub box_type: Option<BoxType>,

    /// 元となった I/O エラー
    pub io_error: Option<std::io::Error>,

    /// エラー発生箇所を示すバックトレース
    ///
    /// バックトレースは `RUST_BACKTRACE` 環境変数が設定されていない場合には取得されない
    pub backtrace: Backtrace,
}

impl Error {
    /// [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self::with_reason(kind, String::new())
    }

    /// エラー理由つきで [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn with_reason<T: Into<String>>(kind: ErrorKind, reason: T) -> Self {
        Self {
            kind,
            reason: reason.into(),
            location: Location::caller(),
            box_type: None,
            io_error: None,
            backtrace: Backtrace::capture(),
        }
    }

    /// エラーにボックス種別を紐付ける（既に設定済みの場合は上書きしない）
    pub fn with_box_type(mut self, box_type: BoxType) -> Self {
        if self.box_type.is_none() {
            self.box_type = Some(box_type);
        }
        self
    }

    #[track_caller]
    pub(crate) fn parse<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::Parse, reason)
    }

    #[track_caller]
    pub(crate) fn type_mismatch(expected: BoxType, actual: BoxType) -> Self {
        Self::with_reason(
            ErrorKind::TypeMismatch,
            format!("Expected '{expected}' payload, but box '{actual}' holds another kind"),
        )
        .with_box_type(actual)
    }

    #[track_caller]
    pub(crate) fn index_out_of_range(what: &str, index: usize, len: usize) -> Self {
        Self::with_reason(
            ErrorKind::IndexOutOfRange,
            format!("{what} index {index} is out of range (len={len})"),
        )
    }

    #[track_caller]
    pub(crate) fn sample_index_out_of_range(index: u32, sample_count: u32) -> Self {
        Self::with_reason(
            ErrorKind::SampleIndexOutOfRange,
            format!("Sample index {index} is out of range (sample_count={sample_count})"),
        )
    }

    #[track_caller]
    pub(crate) fn unsupported<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::UnsupportedFeature, reason)
    }

    #[track_caller]
    pub(crate) fn frame_too_large(frame_length: usize, max: usize) -> Self {
        Self::with_reason(
            ErrorKind::FrameTooLarge,
            format!("Frame length {frame_length} exceeds the maximum ({max})"),
        )
    }

    #[track_caller]
    pub(crate) fn insufficient_buffer(required: usize, actual: usize) -> Self {
        Self::parse(format!(
            "Unexpected end of data: required={required} bytes, available={actual} bytes"
        ))
    }

    #[track_caller]
    pub(crate) fn check_buffer_size(required_size: usize, buf: &[u8]) -> Result<()> {
        if buf.len() < required_size {
            Err(Self::insufficient_buffer(required_size, buf.len()))
        } else {
            Ok(())
        }
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(value: std::io::Error) -> Self {
        let mut error = Self::with_reason(ErrorKind::Io, value.to_string());
        error.io_error = Some(value);
        error
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ty) = self.box_type {
            write!(f, "[{ty}] ")?;
        }

        write!(f, "{:?}: {}", self.kind, self.reason)?;
        write!(f, " (at {}:{})", self.location.file(), self.location.line())?;
        if self.backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            write!(f, "\n\nBacktrace:\n{}", self.backtrace)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.io_error
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// バイト列に変換可能な型を表現するためのトレイト
pub trait Encode {
    /// `self` をバイト列に変換して `buf` に書きこむ
    ///
    /// 返り値は、変換後のバイト列のサイズ
    fn encode(&self, buf: &mut [u8]) -> Result<usize>;

    /// `self` をバイト列に変換して、変換後のバイト列を返す
    fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0; 64];
        loop {
            match self.encode(&mut buf) {
                Ok(size) => {
                    buf.truncate(size);
                    return Ok(buf);
                }
                Err(e) if e.kind == ErrorKind::Parse && buf.len() < 1 << 20 => {
                    buf.resize(buf.len() * 2, 0);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Encode for u16 {
    #[track_caller]
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        Error::check_buffer_size(2, buf)?;
        buf[..2].copy_from_slice(&self.to_be_bytes());
        Ok(2)
    }
}

/// バイト列から `Self` に変換するためのトレイト
pub trait Decode: Sized {
    /// バイト列からこの型の値をデコードする
    ///
    /// 成功時には、デコードされた値とデコードに消費されたバイト数のタプルが、
    /// 失敗時には [`Error`] が返される
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;

    /// オフセット位置からバイト列をデコードし、オフセットを自動で進める
    fn decode_at(buf: &[u8], offset: &mut usize) -> Result<Self> {
        let rest = buf
            .get(*offset..)
            .ok_or_else(|| Error::insufficient_buffer(*offset, buf.len()))?;
        let (decoded, size) = Self::decode(rest)?;
        *offset += size;
        Ok(decoded)
    }
}

impl Decode for u8 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(1, buf)?;
        Ok((buf[0], 1))
    }
}

impl Decode for u16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(2, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1]]), 2))
    }
}

impl Decode for u32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(4, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]), 4))
    }
}

impl Decode for u64 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(8, buf)?;
        let bytes = [
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ];
        Ok((Self::from_be_bytes(bytes), 8))
    }
}

impl Decode for NonZeroU32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u32::decode(buf)?;
        NonZeroU32::new(v)
            .map(|nz| (nz, size))
            .ok_or_else(|| Error::parse("Expected a non-zero integer, but got 0"))
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(N, buf)?;
        let mut items = [0; N];
        items.copy_from_slice(&buf[..N]);
        Ok((items, N))
    }
}

/// デコード中に発生したエラーにボックス種別を紐付ける
pub(crate) fn with_box_type<T, F>(box_type: BoxType, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    f().map_err(|e| e.with_box_type(box_type))
}
