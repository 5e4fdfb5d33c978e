//! 抽出したサンプルを、デコーダーがそのまま扱える形式に変換する処理
//!
//! - H.264: Annex-B 形式（スタートコード区切り）
//! - AAC: ADTS ヘッダー付きのフレーム
use crate::{Encode, Error, Result};

/// Annex-B 形式のスタートコード
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL ユニットの先頭にスタートコードを付与する
///
/// エミュレーション防止バイトの挿入や除去は行わない
pub fn annexb_nalu(nalu: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(START_CODE.len() + nalu.len());
    buf.extend_from_slice(&START_CODE);
    buf.extend_from_slice(nalu);
    buf
}

/// 長さフィールド区切りの AVC サンプル（アクセスユニット）を Annex-B 形式に変換する
///
/// `nal_length_size` は 1, 2, 4 のいずれかである必要がある
pub fn annexb_from_length_prefixed(sample: &[u8], nal_length_size: usize) -> Result<Vec<u8>> {
    if !matches!(nal_length_size, 1 | 2 | 4) {
        return Err(Error::unsupported(format!(
            "Unsupported NAL unit length size: {nal_length_size}"
        )));
    }

    let mut buf = Vec::with_capacity(sample.len() + START_CODE.len());
    let mut rest = sample;
    while !rest.is_empty() {
        let (len_bytes, tail) = rest.split_at_checked(nal_length_size).ok_or_else(|| {
            Error::parse(format!(
                "Truncated NAL unit length field: {} bytes left",
                rest.len()
            ))
        })?;
        let len = len_bytes
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        let (nalu, tail) = tail.split_at_checked(len).ok_or_else(|| {
            Error::parse(format!(
                "NAL unit exceeds the sample boundary: length={len}, available={}",
                tail.len()
            ))
        })?;
        buf.extend_from_slice(&START_CODE);
        buf.extend_from_slice(nalu);
        rest = tail;
    }
    Ok(buf)
}

/// [ISO/IEC 13818-7] ADTS の固定ヘッダーと可変ヘッダー（CRC なし、7 バイト）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdtsHeader {
    /// ヘッダーを除いたフレームのバイト数
    pub payload_size: usize,

    /// MPEG-4 Audio Object Type (1..=4)
    pub object_type: u8,

    /// サンプリング周波数のインデックス
    pub frequency_index: u8,

    /// チャンネル構成 (0..=7)
    pub channel_configuration: u8,

    /// フレーム内の raw data block の数 (1..=4)
    pub num_raw_data_blocks: u8,
}

impl AdtsHeader {
    /// ヘッダーのバイト数
    pub const SIZE: usize = 7;

    /// 13 ビットのフレーム長フィールドで表現可能な最大値
    pub const MAX_FRAME_LENGTH: usize = 0x1FFF;

    /// raw data block が一つのフレーム用のヘッダーを生成する
    pub fn new(
        payload_size: usize,
        channel_configuration: u8,
        frequency_index: u8,
        object_type: u8,
    ) -> Self {
        Self {
            payload_size,
            object_type,
            frequency_index,
            channel_configuration,
            num_raw_data_blocks: 1,
        }
    }

    /// ヘッダーを含めたフレーム全体のバイト数を返す
    pub fn frame_length(&self) -> usize {
        self.payload_size.saturating_add(Self::SIZE)
    }

    /// ヘッダーのバイト列を生成する
    pub fn to_bytes(&self) -> Result<[u8; Self::SIZE]> {
        let mut buf = [0; Self::SIZE];
        self.encode(&mut buf)?;
        Ok(buf)
    }

    fn validate(&self) -> Result<()> {
        if self.frame_length() > Self::MAX_FRAME_LENGTH {
            return Err(Error::frame_too_large(
                self.frame_length(),
                Self::MAX_FRAME_LENGTH,
            ));
        }
        if !(1..=4).contains(&self.object_type) {
            return Err(Error::unsupported(format!(
                "ADTS cannot carry audio object type {}",
                self.object_type
            )));
        }
        if self.frequency_index >= 15 {
            return Err(Error::unsupported(format!(
                "ADTS cannot carry sampling frequency index {}",
                self.frequency_index
            )));
        }
        if self.channel_configuration > 7 {
            return Err(Error::unsupported(format!(
                "ADTS cannot carry channel configuration {}",
                self.channel_configuration
            )));
        }
        if !(1..=4).contains(&self.num_raw_data_blocks) {
            return Err(Error::unsupported(format!(
                "ADTS cannot carry {} raw data blocks",
                self.num_raw_data_blocks
            )));
        }
        Ok(())
    }
}

impl Encode for AdtsHeader {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.validate()?;
        Error::check_buffer_size(Self::SIZE, buf)?;

        let frame_length = self.frame_length();
        let profile = self.object_type - 1;
        let ch = self.channel_configuration;

        // syncword (12), ID = MPEG-4, layer = 0, protection_absent = 1
        buf[0] = 0xFF;
        buf[1] = 0xF1;
        buf[2] = ((profile & 0x03) << 6) | (self.frequency_index << 2) | ((ch & 0x04) >> 2);
        buf[3] = ((ch & 0x03) << 6) | ((frame_length & 0x1800) >> 11) as u8;
        buf[4] = ((frame_length & 0x07F8) >> 3) as u8;
        // buffer fullness は全て 1 (VBR)
        buf[5] = (((frame_length & 0x07) << 5) as u8) | 0x1F;
        buf[6] = 0xB0 | ((self.num_raw_data_blocks - 1) & 0x03);
        Ok(Self::SIZE)
    }
}

/// ADTS ヘッダーのバイト列を生成する
pub fn synthesize_adts(
    payload_size: usize,
    channel_configuration: u8,
    frequency_index: u8,
    object_type: u8,
) -> Result<[u8; AdtsHeader::SIZE]> {
    AdtsHeader::new(payload_size, channel_configuration, frequency_index, object_type).to_bytes()
}

/// 生の AAC フレームの先頭に ADTS ヘッダーを付与する
///
/// 出力はヘッダーと `payload` をそのまま連結したものとなる
pub fn frame_aac(
    payload: &[u8],
    channel_configuration: u8,
    frequency_index: u8,
    object_type: u8,
) -> Result<Vec<u8>> {
    let header = synthesize_adts(
        payload.len(),
        channel_configuration,
        frequency_index,
        object_type,
    )?;
    let mut buf = Vec::with_capacity(header.len() + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    Ok(buf)
}
