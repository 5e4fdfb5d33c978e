//! ボックスのペイロード型と、その型付きビュー
//!
//! ボックスツリーの各ノードは [`BoxPayload`] を保持しており、
//! [`BoxRef::view()`](crate::tree::BoxRef::view) を使うことで、ここで定義されている型として参照できる
use std::num::NonZeroU32;

use crate::{
    BoxHeader, BoxType, Decode, Error, FullBoxHeader, Result, Uint, codec::with_box_type,
    descriptors::{DecoderConfigDescriptor, EsDescriptor},
};

/// ボックスが保持するペイロード
///
/// 型付きで扱う必要のないボックスは [`BoxPayload::Container`] か [`BoxPayload::Raw`] となる
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BoxPayload {
    /// ツリーの根（ファイル全体）
    Root,

    /// 子ボックスのみを保持するボックス（moov, trak など）
    Container,

    Stsd(StsdBox),
    Stco(StcoBox),
    Co64(Co64Box),
    Stsc(StscBox),
    Stsz(StszBox),
    Stts(SttsBox),
    Mdhd(MdhdBox),
    Avc1(Avc1Box),
    Avcc(AvccBox),
    Mp4a(Mp4aBox),
    Esds(EsdsBox),

    /// メディアデータ本体
    ///
    /// サイズが大きいのでメモリには読み込まず、ファイル内の位置のみを保持する
    Mdat { data_offset: u64, data_size: u64 },

    /// 未知、あるいは型付きで扱わないボックスのペイロード
    Raw(Vec<u8>),
}

/// `mdat` ボックスの種別
pub const MDAT_TYPE: BoxType = BoxType::Normal(*b"mdat");

/// [`BoxPayload`] の特定のバリアントを型付きで参照するためのトレイト
pub trait BoxView: Sized {
    /// このビューに対応するボックス種別
    const TYPE: BoxType;

    /// ペイロードが対応するバリアントであれば、その中身を返す
    fn from_payload(payload: &BoxPayload) -> Option<&Self>;
}

macro_rules! impl_box_view {
    ($ty:ty, $variant:ident) => {
        impl BoxView for $ty {
            const TYPE: BoxType = <$ty>::TYPE;

            fn from_payload(payload: &BoxPayload) -> Option<&Self> {
                if let BoxPayload::$variant(b) = payload {
                    Some(b)
                } else {
                    None
                }
            }
        }
    };
}

impl_box_view!(StsdBox, Stsd);
impl_box_view!(StcoBox, Stco);
impl_box_view!(Co64Box, Co64);
impl_box_view!(StscBox, Stsc);
impl_box_view!(StszBox, Stsz);
impl_box_view!(SttsBox, Stts);
impl_box_view!(MdhdBox, Mdhd);
impl_box_view!(Avc1Box, Avc1);
impl_box_view!(AvccBox, Avcc);
impl_box_view!(Mp4aBox, Mp4a);
impl_box_view!(EsdsBox, Esds);

/// 必須ボックスが存在しない場合のエラーを生成する
#[track_caller]
pub(crate) fn check_mandatory_box<T>(maybe_box: Option<T>, expected: &str, parent: &str) -> Result<T> {
    maybe_box.ok_or_else(|| {
        Error::parse(format!(
            "Missing mandatory '{expected}' box in '{parent}' box"
        ))
    })
}

// エントリー数から必要なバイト数を計算して、ペイロードに収まるかをチェックする
fn check_entries_fit(count: u32, entry_size: usize, payload: &[u8], offset: usize) -> Result<()> {
    let required = (count as usize)
        .checked_mul(entry_size)
        .and_then(|n| n.checked_add(offset))
        .ok_or_else(|| Error::parse(format!("Too many entries: {count}")))?;
    Error::check_buffer_size(required, payload)
}

/// [ISO/IEC 14496-12] SampleDescriptionBox class
///
/// エントリー（サンプルエントリー）自体は子ボックスとしてツリーに格納される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StsdBox {
    /// ヘッダーに記載されたエントリー数
    pub entry_count: u32,
}

impl StsdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsd");
}

impl Decode for StsdBox {
    // 返り値のサイズは、子ボックスの手前までのバイト数
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let entry_count = u32::decode_at(payload, &mut offset)?;

            Ok((Self { entry_count }, header.external_size() + offset))
        })
    }
}

/// [ISO/IEC 14496-12] ChunkOffsetBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StcoBox {
    pub chunk_offsets: Vec<u32>,
}

impl StcoBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stco");

    /// チャンクの数を返す
    pub fn entry_count(&self) -> u32 {
        self.chunk_offsets.len() as u32
    }

    /// 指定されたチャンク（0 始まり）のファイル先頭からのバイト位置を返す
    pub fn chunk_offset(&self, chunk_index: u32) -> Result<u64> {
        self.chunk_offsets
            .get(chunk_index as usize)
            .map(|&v| v as u64)
            .ok_or_else(|| {
                Error::index_out_of_range("Chunk", chunk_index as usize, self.chunk_offsets.len())
                    .with_box_type(Self::TYPE)
            })
    }
}

impl Decode for StcoBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            check_entries_fit(count, 4, payload, offset)?;

            let mut chunk_offsets = Vec::with_capacity(count as usize);
            for _ in 0..count {
                chunk_offsets.push(u32::decode_at(payload, &mut offset)?);
            }

            Ok((
                Self { chunk_offsets },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [ISO/IEC 14496-12] ChunkLargeOffsetBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Co64Box {
    pub chunk_offsets: Vec<u64>,
}

impl Co64Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"co64");

    /// チャンクの数を返す
    pub fn entry_count(&self) -> u32 {
        self.chunk_offsets.len() as u32
    }

    /// 指定されたチャンク（0 始まり）のファイル先頭からのバイト位置を返す
    pub fn chunk_offset(&self, chunk_index: u32) -> Result<u64> {
        self.chunk_offsets
            .get(chunk_index as usize)
            .copied()
            .ok_or_else(|| {
                Error::index_out_of_range("Chunk", chunk_index as usize, self.chunk_offsets.len())
                    .with_box_type(Self::TYPE)
            })
    }
}

impl Decode for Co64Box {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            check_entries_fit(count, 8, payload, offset)?;

            let mut chunk_offsets = Vec::with_capacity(count as usize);
            for _ in 0..count {
                chunk_offsets.push(u64::decode_at(payload, &mut offset)?);
            }

            Ok((
                Self { chunk_offsets },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [`StscBox`] が保持するエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscEntry {
    pub first_chunk: NonZeroU32,
    pub samples_per_chunk: u32,
    pub sample_description_index: NonZeroU32,
}

/// [ISO/IEC 14496-12] SampleToChunkBox class
///
/// チャンクごとのサンプル数は、同じ値が続く範囲ごとにまとめられた形（ランレングス）で格納されている
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscBox {
    pub entries: Vec<StscEntry>,
}

impl StscBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsc");

    /// 指定されたチャンク（0 始まり）に含まれるサンプルの数を返す
    ///
    /// `first_chunk` が `chunk_index + 1` 以下のエントリーのうち最後のものが対象となる。
    /// 該当するエントリーがない場合には 0 を返す。
    pub fn samples_for_chunk(&self, chunk_index: u32) -> u32 {
        let chunk_number = chunk_index.saturating_add(1);
        let i = self
            .entries
            .partition_point(|e| e.first_chunk.get() <= chunk_number);
        i.checked_sub(1)
            .map(|i| self.entries[i].samples_per_chunk)
            .unwrap_or(0)
    }
}

impl Decode for StscBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            check_entries_fit(count, 12, payload, offset)?;

            let mut entries = Vec::<StscEntry>::with_capacity(count as usize);
            for _ in 0..count {
                let entry = StscEntry {
                    first_chunk: NonZeroU32::decode_at(payload, &mut offset)?,
                    samples_per_chunk: u32::decode_at(payload, &mut offset)?,
                    sample_description_index: NonZeroU32::decode_at(payload, &mut offset)?,
                };
                if let Some(last) = entries.last()
                    && last.first_chunk >= entry.first_chunk
                {
                    return Err(Error::parse(format!(
                        "'first_chunk' must be strictly increasing: {} -> {}",
                        last.first_chunk, entry.first_chunk
                    )));
                }
                entries.push(entry);
            }

            Ok((Self { entries }, header.external_size() + payload.len()))
        })
    }
}

/// [ISO/IEC 14496-12] SampleSizeBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StszBox {
    Fixed {
        sample_size: NonZeroU32,
        sample_count: u32,
    },
    Variable {
        entry_sizes: Vec<u32>,
    },
}

impl StszBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsz");

    /// トラック内のサンプルの数を返す
    pub fn sample_count(&self) -> u32 {
        match self {
            Self::Fixed { sample_count, .. } => *sample_count,
            Self::Variable { entry_sizes } => entry_sizes.len() as u32,
        }
    }

    /// 指定されたサンプル（0 始まり）のバイト数を返す
    pub fn sample_size(&self, sample_index: u32) -> Result<u32> {
        let sample_count = self.sample_count();
        if sample_index >= sample_count {
            return Err(
                Error::index_out_of_range("Sample", sample_index as usize, sample_count as usize)
                    .with_box_type(Self::TYPE),
            );
        }
        match self {
            Self::Fixed { sample_size, .. } => Ok(sample_size.get()),
            Self::Variable { entry_sizes } => Ok(entry_sizes[sample_index as usize]),
        }
    }
}

impl Decode for StszBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let sample_size = u32::decode_at(payload, &mut offset)?;
            let sample_count = u32::decode_at(payload, &mut offset)?;

            let stsz_box = if let Some(sample_size) = NonZeroU32::new(sample_size) {
                Self::Fixed {
                    sample_size,
                    sample_count,
                }
            } else {
                check_entries_fit(sample_count, 4, payload, offset)?;
                let mut entry_sizes = Vec::with_capacity(sample_count as usize);
                for _ in 0..sample_count {
                    entry_sizes.push(u32::decode_at(payload, &mut offset)?);
                }
                Self::Variable { entry_sizes }
            };

            Ok((stsz_box, header.external_size() + payload.len()))
        })
    }
}

/// [`SttsBox`] が保持するエントリー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// [ISO/IEC 14496-12] TimeToSampleBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsBox {
    pub entries: Vec<SttsEntry>,
}

impl SttsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stts");

    /// テーブルが表すサンプルの総数を返す
    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|e| e.sample_count as u64).sum()
    }

    /// 指定されたサンプル（0 始まり）の尺（タイムスケール単位）を返す
    pub fn sample_delta(&self, sample_index: u32) -> Result<u32> {
        let mut rest = sample_index as u64;
        for entry in &self.entries {
            if rest < entry.sample_count as u64 {
                return Ok(entry.sample_delta);
            }
            rest -= entry.sample_count as u64;
        }
        Err(Error::index_out_of_range(
            "Sample",
            sample_index as usize,
            self.sample_count() as usize,
        )
        .with_box_type(Self::TYPE))
    }
}

impl Decode for SttsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            check_entries_fit(count, 8, payload, offset)?;

            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                entries.push(SttsEntry {
                    sample_count: u32::decode_at(payload, &mut offset)?,
                    sample_delta: u32::decode_at(payload, &mut offset)?,
                });
            }

            Ok((Self { entries }, header.external_size() + payload.len()))
        })
    }
}

/// [ISO/IEC 14496-12] MediaHeaderBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdhdBox {
    pub timescale: u32,
    pub duration: u64,
}

impl MdhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdhd");
}

impl Decode for MdhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let (timescale, duration) = if full_header.version == 1 {
                let _creation_time = u64::decode_at(payload, &mut offset)?;
                let _modification_time = u64::decode_at(payload, &mut offset)?;
                let timescale = u32::decode_at(payload, &mut offset)?;
                (timescale, u64::decode_at(payload, &mut offset)?)
            } else {
                let _creation_time = u32::decode_at(payload, &mut offset)?;
                let _modification_time = u32::decode_at(payload, &mut offset)?;
                let timescale = u32::decode_at(payload, &mut offset)?;
                (timescale, u32::decode_at(payload, &mut offset)? as u64)
            };

            // 言語コードなどの後続フィールドは使わない
            Ok((
                Self {
                    timescale,
                    duration,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [ISO/IEC 14496-15] AVCSampleEntry class
///
/// `avcC` などの子ボックスはツリーに格納される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Avc1Box {
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub depth: u16,
}

impl Avc1Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"avc1");
}

impl Decode for Avc1Box {
    // 返り値のサイズは、子ボックスの手前までのバイト数
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _ = <[u8; 6]>::decode_at(payload, &mut offset)?;
            let data_reference_index = u16::decode_at(payload, &mut offset)?;
            let _ = <[u8; 2 + 2 + 4 * 3]>::decode_at(payload, &mut offset)?;
            let width = u16::decode_at(payload, &mut offset)?;
            let height = u16::decode_at(payload, &mut offset)?;
            // horizresolution, vertresolution, reserved, frame_count, compressorname
            let _ = <[u8; 4 + 4 + 4 + 2 + 32]>::decode_at(payload, &mut offset)?;
            let depth = u16::decode_at(payload, &mut offset)?;
            let _pre_defined = u16::decode_at(payload, &mut offset)?;

            Ok((
                Self {
                    data_reference_index,
                    width,
                    height,
                    depth,
                },
                header.external_size() + offset,
            ))
        })
    }
}

/// [ISO/IEC 14496-15] AVCConfigurationBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AvccBox {
    pub avc_profile_indication: u8,
    pub profile_compatibility: u8,
    pub avc_level_indication: u8,
    pub length_size_minus_one: Uint<u8, 2>,
    pub sps_list: Vec<Vec<u8>>,
    pub pps_list: Vec<Vec<u8>>,
}

impl AvccBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"avcC");

    const CONFIGURATION_VERSION: u8 = 1;

    /// 指定されたインデックスの SPS (Sequence Parameter Set) を返す
    ///
    /// スタートコードは含まれない
    pub fn sequence_parameter_set(&self, index: usize) -> Result<&[u8]> {
        self.sps_list.get(index).map(|v| &v[..]).ok_or_else(|| {
            Error::index_out_of_range("SPS", index, self.sps_list.len()).with_box_type(Self::TYPE)
        })
    }

    /// 指定されたインデックスの PPS (Picture Parameter Set) を返す
    ///
    /// スタートコードは含まれない
    pub fn picture_parameter_set(&self, index: usize) -> Result<&[u8]> {
        self.pps_list.get(index).map(|v| &v[..]).ok_or_else(|| {
            Error::index_out_of_range("PPS", index, self.pps_list.len()).with_box_type(Self::TYPE)
        })
    }

    /// サンプル内の各 NAL ユニットの前に置かれる長さフィールドのバイト数 (1, 2, 4)
    pub fn nal_length_size(&self) -> usize {
        self.length_size_minus_one.get() as usize + 1
    }
}

impl Decode for AvccBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let configuration_version = u8::decode_at(payload, &mut offset)?;
            if configuration_version != Self::CONFIGURATION_VERSION {
                return Err(Error::parse(format!(
                    "Unsupported avcC configuration version: {configuration_version}"
                )));
            }

            let avc_profile_indication = u8::decode_at(payload, &mut offset)?;
            let profile_compatibility = u8::decode_at(payload, &mut offset)?;
            let avc_level_indication = u8::decode_at(payload, &mut offset)?;
            let length_size_minus_one = Uint::from_bits(u8::decode_at(payload, &mut offset)?);
            if length_size_minus_one.get() == 2 {
                return Err(Error::parse("NAL unit length size of 3 bytes is not allowed"));
            }

            let sps_count =
                Uint::<u8, 5>::from_bits(u8::decode_at(payload, &mut offset)?).get() as usize;
            let mut sps_list = Vec::new();
            for _ in 0..sps_count {
                sps_list.push(decode_parameter_set(payload, &mut offset, "SPS")?);
            }

            let pps_count = u8::decode_at(payload, &mut offset)? as usize;
            let mut pps_list = Vec::new();
            for _ in 0..pps_count {
                pps_list.push(decode_parameter_set(payload, &mut offset, "PPS")?);
            }

            // High プロファイル以降の拡張フィールドはサンプル抽出には使わないので読み飛ばす
            Ok((
                Self {
                    avc_profile_indication,
                    profile_compatibility,
                    avc_level_indication,
                    length_size_minus_one,
                    sps_list,
                    pps_list,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

fn decode_parameter_set(payload: &[u8], offset: &mut usize, name: &str) -> Result<Vec<u8>> {
    let size = u16::decode_at(payload, offset)? as usize;
    if *offset + size > payload.len() {
        return Err(Error::parse(format!(
            "{name} data exceeds payload boundary"
        )));
    }
    let set = payload[*offset..*offset + size].to_vec();
    *offset += size;
    Ok(set)
}

/// [ISO/IEC 14496-14] MP4AudioSampleEntry class
///
/// `esds` などの子ボックスはツリーに格納される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Mp4aBox {
    pub data_reference_index: u16,
    pub version: u16,
    pub channel_count: u16,
    pub sample_size: u16,
    pub sample_rate: u16,
}

impl Mp4aBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mp4a");

    /// 子ボックスの位置が分かるバージョン（QuickTime の SoundDescription V0 / V1 / V2）の最大値
    pub const MAX_SUPPORTED_VERSION: u16 = 2;

    /// 子ボックスを読める形式かどうか
    pub fn is_supported(&self) -> bool {
        self.version <= Self::MAX_SUPPORTED_VERSION
    }
}

impl Decode for Mp4aBox {
    // 返り値のサイズは、子ボックスの手前までのバイト数
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _ = <[u8; 6]>::decode_at(payload, &mut offset)?;
            let data_reference_index = u16::decode_at(payload, &mut offset)?;
            let version = u16::decode_at(payload, &mut offset)?;
            let _ = <[u8; 2 + 4]>::decode_at(payload, &mut offset)?;
            let channel_count = u16::decode_at(payload, &mut offset)?;
            let sample_size = u16::decode_at(payload, &mut offset)?;
            let _ = <[u8; 2 + 2]>::decode_at(payload, &mut offset)?;
            let sample_rate = u16::decode_at(payload, &mut offset)?;
            let _sample_rate_fraction = u16::decode_at(payload, &mut offset)?;

            // QuickTime の拡張フィールドを読み飛ばす
            match version {
                0 => {}
                1 => {
                    let _ = <[u8; 16]>::decode_at(payload, &mut offset)?;
                }
                2 => {
                    let _ = <[u8; 36]>::decode_at(payload, &mut offset)?;
                }
                _ => {
                    // 子ボックスの位置が分からないので、ツリーには何も追加しない
                    tracing::warn!(version, "Unknown sound sample entry version");
                    offset = payload.len();
                }
            }

            Ok((
                Self {
                    data_reference_index,
                    version,
                    channel_count,
                    sample_size,
                    sample_rate,
                },
                header.external_size() + offset,
            ))
        })
    }
}

/// [ISO/IEC 14496-14] ESDBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct EsdsBox {
    pub es: EsDescriptor,
}

impl EsdsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"esds");

    /// ディスクリプターチェインの末端にある DecoderConfigDescriptor を返す
    pub fn decoder_config_descriptor(&self) -> &DecoderConfigDescriptor {
        &self.es.dec_config_descr
    }
}

impl Decode for EsdsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let es = EsDescriptor::decode_at(payload, &mut offset)?;

            Ok((Self { es }, header.external_size() + payload.len()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_box(ty: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut buf = ((8 + 4 + body.len()) as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(ty);
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(body);
        buf
    }

    fn stsc(entries: &[(u32, u32)]) -> StscBox {
        StscBox {
            entries: entries
                .iter()
                .map(|&(first_chunk, samples_per_chunk)| StscEntry {
                    first_chunk: NonZeroU32::new(first_chunk).unwrap(),
                    samples_per_chunk,
                    sample_description_index: NonZeroU32::MIN,
                })
                .collect(),
        }
    }

    #[test]
    fn samples_for_chunk_resolves_runs() {
        let stsc = stsc(&[(1, 3), (3, 2), (6, 5)]);
        let counts = (0..8).map(|c| stsc.samples_for_chunk(c)).collect::<Vec<_>>();
        assert_eq!(counts, [3, 3, 2, 2, 2, 5, 5, 5]);
    }

    #[test]
    fn samples_for_chunk_without_entries() {
        assert_eq!(stsc(&[]).samples_for_chunk(0), 0);
        assert_eq!(stsc(&[(2, 4)]).samples_for_chunk(0), 0);
        assert_eq!(stsc(&[(2, 4)]).samples_for_chunk(1), 4);
    }

    #[test]
    fn decode_stsc_rejects_unordered_entries() {
        let mut body = 2u32.to_be_bytes().to_vec();
        for (first, n) in [(3u32, 1u32), (2, 1)] {
            body.extend_from_slice(&first.to_be_bytes());
            body.extend_from_slice(&n.to_be_bytes());
            body.extend_from_slice(&1u32.to_be_bytes());
        }
        let e = StscBox::decode(&full_box(b"stsc", &body)).unwrap_err();
        assert_eq!(e.kind, crate::ErrorKind::Parse);
        assert_eq!(e.box_type, Some(StscBox::TYPE));
    }

    #[test]
    fn stsz_sample_size() {
        let fixed = StszBox::Fixed {
            sample_size: NonZeroU32::new(128).unwrap(),
            sample_count: 3,
        };
        assert_eq!(fixed.sample_size(2).unwrap(), 128);
        assert_eq!(
            fixed.sample_size(3).unwrap_err().kind,
            crate::ErrorKind::IndexOutOfRange
        );

        let mut body = 0u32.to_be_bytes().to_vec();
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&7u32.to_be_bytes());
        body.extend_from_slice(&9u32.to_be_bytes());
        let (variable, _) = StszBox::decode(&full_box(b"stsz", &body)).unwrap();
        assert_eq!(variable.sample_count(), 2);
        assert_eq!(variable.sample_size(1).unwrap(), 9);
    }

    #[test]
    fn decode_stco_with_too_many_entries() {
        let body = 1000u32.to_be_bytes();
        let e = StcoBox::decode(&full_box(b"stco", &body)).unwrap_err();
        assert_eq!(e.kind, crate::ErrorKind::Parse);
    }

    #[test]
    fn avcc_parameter_sets() {
        let payload = [
            0x01, 0x64, 0x00, 0x1F, 0xFF, // version, profile, compat, level, length size
            0xE1, 0x00, 0x03, 0x67, 0x64, 0x1F, // 1 SPS
            0x01, 0x00, 0x02, 0x68, 0xEB, // 1 PPS
        ];
        let mut buf = ((8 + payload.len()) as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(b"avcC");
        buf.extend_from_slice(&payload);

        let (avcc, size) = AvccBox::decode(&buf).unwrap();
        assert_eq!(size, buf.len());
        assert_eq!(avcc.nal_length_size(), 4);
        assert_eq!(avcc.sequence_parameter_set(0).unwrap(), [0x67, 0x64, 0x1F]);
        assert_eq!(avcc.picture_parameter_set(0).unwrap(), [0x68, 0xEB]);
        assert_eq!(
            avcc.picture_parameter_set(1).unwrap_err().kind,
            crate::ErrorKind::IndexOutOfRange
        );
    }
}
