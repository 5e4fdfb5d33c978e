use std::ops::{BitAnd, Shl, Shr, Sub};

use crate::{Decode, Error, Result};

/// ボックスに共通のヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxHeader {
    /// ボックスの種別
    pub box_type: BoxType,

    /// ボックスのサイズ
    pub box_size: BoxSize,
}

impl BoxHeader {
    /// ヘッダーの最大バイト数
    pub const MAX_SIZE: usize = (4 + 8) + (4 + 16);

    /// ヘッダーをエンコードした際のバイト数を返す
    pub fn external_size(self) -> usize {
        self.box_type.external_size() + self.box_size.external_size()
    }

    /// ヘッダーを除いたペイロード部分のサイズを返す
    ///
    /// サイズが 0 （ファイル末尾まで続く）の場合には [`None`] が返される
    pub fn payload_size(self) -> Option<u64> {
        if self.box_size.get() == 0 {
            None
        } else {
            Some(self.box_size.get() - self.external_size() as u64)
        }
    }

    /// ヘッダーをデコードして、ヘッダーとペイロード部分のバイト列を返す
    ///
    /// サイズが 0 のボックスは `buf` の末尾までをペイロードとして扱う
    pub fn decode_header_and_payload(buf: &[u8]) -> Result<(Self, &[u8])> {
        let (header, header_size) = Self::decode(buf)?;
        let payload = match header.payload_size() {
            None => &buf[header_size..],
            Some(size) => {
                let end = usize::try_from(size)
                    .ok()
                    .and_then(|size| header_size.checked_add(size))
                    .filter(|&end| end <= buf.len())
                    .ok_or_else(|| {
                        Error::parse(format!(
                            "Box size exceeds the available data: box_size={}, available={}",
                            header.box_size.get(),
                            buf.len()
                        ))
                        .with_box_type(header.box_type)
                    })?;
                &buf[header_size..end]
            }
        };
        Ok((header, payload))
    }
}

impl Decode for BoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let box_size = u32::decode_at(buf, &mut offset)?;

        let box_type = <[u8; 4]>::decode_at(buf, &mut offset)?;

        // largesize は usertype よりも前に置かれる
        let box_size = if box_size == 1 {
            BoxSize::U64(u64::decode_at(buf, &mut offset)?)
        } else {
            BoxSize::U32(box_size)
        };

        let box_type = if box_type == *b"uuid" {
            BoxType::Uuid(<[u8; 16]>::decode_at(buf, &mut offset)?)
        } else {
            BoxType::Normal(box_type)
        };
        if box_size.get() != 0
            && box_size.get() < (box_size.external_size() + box_type.external_size()) as u64
        {
            return Err(Error::parse(format!(
                "Too small box size: actual={}, expected={} or more",
                box_size.get(),
                box_size.external_size() + box_type.external_size()
            ))
            .with_box_type(box_type));
        };

        Ok((Self { box_type, box_size }, offset))
    }
}

/// フルボックスに共通のヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxHeader {
    /// バージョン
    pub version: u8,

    /// フラグ（下位 24 ビットのみが有効）
    pub flags: u32,
}

impl Decode for FullBoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u32::decode(buf)?;
        Ok((
            Self {
                version: (v >> 24) as u8,
                flags: v & 0x00FF_FFFF,
            },
            size,
        ))
    }
}

/// ボックスのサイズ
///
/// ボックスのサイズは原則として、ヘッダー部分とペイロード部分のサイズを足した値となる。
/// ただし、MP4 ファイルの末尾にあるボックスについてはサイズを 0 とすることで、ペイロードが可変長（追記可能）なボックスとして扱うことが可能となっている。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum BoxSize {
    U32(u32),
    U64(u64),
}

impl BoxSize {
    /// ボックスのサイズの値を取得する
    pub const fn get(self) -> u64 {
        match self {
            BoxSize::U32(v) => v as u64,
            BoxSize::U64(v) => v,
        }
    }

    /// [`BoxHeader`] 内のサイズフィールドをエンコードする際に必要となるバイト数を返す
    pub const fn external_size(self) -> usize {
        match self {
            BoxSize::U32(_) => 4,
            BoxSize::U64(_) => 4 + 8,
        }
    }
}

/// ボックスの種別
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoxType {
    /// 四文字で表現される通常のボックス種別
    Normal([u8; 4]),

    /// UUID 形式のボックス種別
    Uuid([u8; 16]),
}

impl BoxType {
    /// 種別を表すバイト列を返す
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BoxType::Normal(ty) => &ty[..],
            BoxType::Uuid(ty) => &ty[..],
        }
    }

    /// [`BoxHeader`] 内のボックス種別フィールドをエンコードする際に必要となるバイト数を返す
    pub const fn external_size(self) -> usize {
        if matches!(self, Self::Normal(_)) {
            4
        } else {
            4 + 16
        }
    }

    /// 自分が `expected` と同じ種別であるかをチェックする
    pub fn expect(self, expected: Self) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(Error::parse(format!(
                "Expected box type `{expected}`, but got `{self}`"
            )))
        }
    }
}

impl From<[u8; 4]> for BoxType {
    fn from(ty: [u8; 4]) -> Self {
        Self::Normal(ty)
    }
}

impl From<&[u8; 4]> for BoxType {
    fn from(ty: &[u8; 4]) -> Self {
        Self::Normal(*ty)
    }
}

impl std::fmt::Debug for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoxType::Normal(ty) => {
                if let Ok(ty) = std::str::from_utf8(ty) {
                    f.debug_tuple("BoxType").field(&ty).finish()
                } else {
                    f.debug_tuple("BoxType").field(ty).finish()
                }
            }
            BoxType::Uuid(ty) => f.debug_tuple("BoxType").field(ty).finish(),
        }
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let BoxType::Normal(ty) = self
            && let Ok(ty) = std::str::from_utf8(&ty[..])
        {
            return write!(f, "{ty}");
        }
        write!(f, "{:?}", self.as_bytes())
    }
}

/// 任意のビット数の非負の整数を表現するための型
///
/// - `T`: 数値の内部的な型。 最低限 `BITS` 分の数値を表現可能な型である必要がある。
/// - `BITS`: 数値のビット数
/// - `OFFSET`: 一つの `T` に複数の [`Uint`] 値がパックされる場合の、この数値のオフセット位置（ビット数）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uint<T, const BITS: u32, const OFFSET: u32 = 0>(T);

impl<T, const BITS: u32, const OFFSET: u32> Uint<T, BITS, OFFSET>
where
    T: Shr<u32, Output = T>
        + Shl<u32, Output = T>
        + BitAnd<Output = T>
        + Sub<Output = T>
        + From<u8>
        + Copy,
{
    /// 指定された数値を受け取ってインスタンスを作成する
    ///
    /// `BITS` を超える上位ビットは切り捨てられる
    pub fn new(v: T) -> Self {
        Self(v & Self::mask())
    }

    /// このインスタンスが表現する整数値を返す
    pub fn get(self) -> T {
        self.0
    }

    /// `T` が保持するビット列の `OFFSET` 位置から `BITS` 分のビット列に対応する整数値を返す
    pub fn from_bits(v: T) -> Self {
        Self((v >> OFFSET) & Self::mask())
    }

    /// このインスタンスに対応する `T` 内のビット列を返す
    pub fn to_bits(self) -> T {
        self.0 << OFFSET
    }

    fn mask() -> T {
        (T::from(1) << BITS) - T::from(1)
    }
}
