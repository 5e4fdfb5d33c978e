//! ISO_IEC_14496-1 で定義されているディスクリプター群と、AAC の AudioSpecificConfig
use crate::{Decode, Encode, Error, Result, Uint};

/// [ISO_IEC_14496-1] ES_Descriptor class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct EsDescriptor {
    pub es_id: u16,
    pub stream_priority: Uint<u8, 5>,
    pub depends_on_es_id: Option<u16>,
    pub url_string: Option<String>,
    pub ocr_es_id: Option<u16>,
    pub dec_config_descr: DecoderConfigDescriptor,
}

impl EsDescriptor {
    const TAG: u8 = 3; // ES_DescrTag
}

impl Decode for EsDescriptor {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = decode_descriptor_payload(buf, Self::TAG)?;

        let mut offset = 0;
        let es_id = u16::decode_at(payload, &mut offset)?;

        let b = u8::decode_at(payload, &mut offset)?;
        let stream_dependence_flag: Uint<u8, 1, 7> = Uint::from_bits(b);
        let url_flag: Uint<u8, 1, 6> = Uint::from_bits(b);
        let ocr_stream_flag: Uint<u8, 1, 5> = Uint::from_bits(b);
        let stream_priority = Uint::from_bits(b);

        let depends_on_es_id = if stream_dependence_flag.get() == 1 {
            Some(u16::decode_at(payload, &mut offset)?)
        } else {
            None
        };

        let url_string = if url_flag.get() == 1 {
            let len = u8::decode_at(payload, &mut offset)? as usize;
            Error::check_buffer_size(offset + len, payload)?;
            let s = String::from_utf8(payload[offset..offset + len].to_vec())
                .map_err(|_| Error::parse("Invalid UTF-8 in URL string"))?;
            offset += len;
            Some(s)
        } else {
            None
        };

        let ocr_es_id = if ocr_stream_flag.get() == 1 {
            Some(u16::decode_at(payload, &mut offset)?)
        } else {
            None
        };

        // 後続の SLConfigDescriptor などはサンプル抽出には不要なので読み飛ばす
        let dec_config_descr = DecoderConfigDescriptor::decode_at(payload, &mut offset)?;

        Ok((
            Self {
                es_id,
                stream_priority,
                depends_on_es_id,
                url_string,
                ocr_es_id,
                dec_config_descr,
            },
            consumed,
        ))
    }
}

/// [ISO_IEC_14496-1] DecoderConfigDescriptor class
///
/// MPEG-4 Audio の場合には DecoderSpecificInfo の中身（AudioSpecificConfig）もデコード済みの状態で保持する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DecoderConfigDescriptor {
    pub object_type_indication: u8,
    pub stream_type: Uint<u8, 6, 2>,
    pub up_stream: Uint<u8, 1, 1>,
    pub buffer_size_db: Uint<u32, 24>,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    pub dec_specific_info: Option<DecoderSpecificInfo>,
    pub audio_specific_config: Option<AudioSpecificConfig>,
}

impl DecoderConfigDescriptor {
    const TAG: u8 = 4; // DecoderConfigDescrTag

    /// AAC 用の [`DecoderConfigDescriptor::object_type_indication`] の値
    pub const OBJECT_TYPE_INDICATION_AUDIO_ISO_IEC_14496_3: u8 = 0x40;

    /// MPEG-2 AAC (Main, LC, SSR) 用の [`DecoderConfigDescriptor::object_type_indication`] の値
    pub const OBJECT_TYPE_INDICATIONS_AUDIO_ISO_IEC_13818_7: [u8; 3] = [0x66, 0x67, 0x68];

    /// AAC のデコーダー設定を返す
    ///
    /// AudioSpecificConfig を保持していない場合には [`ErrorKind::Parse`](crate::ErrorKind::Parse) エラーが返される
    pub fn audio_specific_config(&self) -> Result<&AudioSpecificConfig> {
        self.audio_specific_config.as_ref().ok_or_else(|| {
            Error::parse(format!(
                "DecoderConfigDescriptor (object_type_indication=0x{:02x}) has no AudioSpecificConfig",
                self.object_type_indication
            ))
        })
    }

    /// MPEG-4 Audio Object Type
    pub fn mpeg_audio_object_type(&self) -> Result<u8> {
        Ok(self.audio_specific_config()?.audio_object_type)
    }

    /// サンプリング周波数のインデックス
    pub fn frequency_index(&self) -> Result<u8> {
        Ok(self.audio_specific_config()?.frequency_index)
    }

    /// チャンネル構成
    pub fn channel_configuration(&self) -> Result<u8> {
        Ok(self.audio_specific_config()?.channel_configuration)
    }

    fn is_aac(&self) -> bool {
        self.object_type_indication == Self::OBJECT_TYPE_INDICATION_AUDIO_ISO_IEC_14496_3
            || Self::OBJECT_TYPE_INDICATIONS_AUDIO_ISO_IEC_13818_7
                .contains(&self.object_type_indication)
    }
}

impl Decode for DecoderConfigDescriptor {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = decode_descriptor_payload(buf, Self::TAG)?;

        let mut offset = 0;
        let object_type_indication = u8::decode_at(payload, &mut offset)?;

        let b = u8::decode_at(payload, &mut offset)?;
        let stream_type = Uint::from_bits(b);
        let up_stream = Uint::from_bits(b);

        let mut temp = [0; 4];
        temp[1..].copy_from_slice(&<[u8; 3]>::decode_at(payload, &mut offset)?);
        let buffer_size_db = Uint::from_bits(u32::from_be_bytes(temp));

        let max_bitrate = u32::decode_at(payload, &mut offset)?;
        let avg_bitrate = u32::decode_at(payload, &mut offset)?;

        let dec_specific_info = if offset < payload.len()
            && payload[offset] == DecoderSpecificInfo::TAG
        {
            Some(DecoderSpecificInfo::decode_at(payload, &mut offset)?)
        } else {
            None
        };

        let mut this = Self {
            object_type_indication,
            stream_type,
            up_stream,
            buffer_size_db,
            max_bitrate,
            avg_bitrate,
            dec_specific_info,
            audio_specific_config: None,
        };
        if this.is_aac()
            && let Some(info) = &this.dec_specific_info
        {
            this.audio_specific_config = Some(AudioSpecificConfig::decode(&info.payload)?.0);
        }

        Ok((this, consumed))
    }
}

/// [ISO_IEC_14496-1] DecoderSpecificInfo class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DecoderSpecificInfo {
    pub payload: Vec<u8>,
}

impl DecoderSpecificInfo {
    const TAG: u8 = 5; // DecSpecificInfoTag
}

impl Decode for DecoderSpecificInfo {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = decode_descriptor_payload(buf, Self::TAG)?;
        Ok((
            Self {
                payload: payload.to_vec(),
            },
            consumed,
        ))
    }
}

/// [ISO_IEC_14496-3] AudioSpecificConfig のうち、ADTS ヘッダーの生成とデコーダーの初期化に必要な部分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioSpecificConfig {
    /// Audio Object Type (2 = AAC LC)
    pub audio_object_type: u8,

    /// サンプリング周波数のインデックス
    pub frequency_index: u8,

    /// `frequency_index` が 0xF の場合に明示的に指定されるサンプリング周波数
    pub explicit_sampling_frequency: Option<u32>,

    /// チャンネル構成
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    /// サンプリング周波数 (Hz) を返す
    pub fn sampling_frequency(&self) -> Option<u32> {
        self.explicit_sampling_frequency
            .or_else(|| sampling_frequency(self.frequency_index))
    }
}

impl Decode for AudioSpecificConfig {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut reader = BitReader::new(buf);

        let mut audio_object_type = reader.read(5)? as u8;
        if audio_object_type == 31 {
            audio_object_type = 32 + reader.read(6)? as u8;
        }

        let frequency_index = reader.read(4)? as u8;
        let explicit_sampling_frequency = if frequency_index == 0xF {
            Some(reader.read(24)?)
        } else {
            None
        };

        let channel_configuration = reader.read(4)? as u8;

        // 以降の GASpecificConfig などは不要なので、全体を消費したものとして扱う
        Ok((
            Self {
                audio_object_type,
                frequency_index,
                explicit_sampling_frequency,
                channel_configuration,
            },
            buf.len(),
        ))
    }
}

// Android の MediaCodec などが "csd-0" として受け取る 2 バイト形式
impl Encode for AudioSpecificConfig {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if !(1..31).contains(&self.audio_object_type) || self.frequency_index >= 0xF {
            return Err(Error::unsupported(format!(
                "Cannot encode a two-byte AudioSpecificConfig: object_type={}, frequency_index={}",
                self.audio_object_type, self.frequency_index
            )));
        }

        let v = (Uint::<u16, 5, 11>::new(self.audio_object_type as u16).to_bits())
            | Uint::<u16, 4, 7>::new(self.frequency_index as u16).to_bits()
            | Uint::<u16, 4, 3>::new(self.channel_configuration as u16).to_bits();
        v.encode(buf)
    }
}

/// [ISO_IEC_14496-3] sampling_frequency_index に対応するサンプリング周波数 (Hz) を返す
///
/// 予約値やエスケープ値（0xF）の場合には [`None`] が返される
pub fn sampling_frequency(frequency_index: u8) -> Option<u32> {
    const TABLE: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];
    TABLE.get(frequency_index as usize).copied()
}

fn decode_tag_and_size(buf: &[u8]) -> Result<(u8, usize, usize)> {
    let mut offset = 0;
    let tag = u8::decode_at(buf, &mut offset)?;

    let mut size = 0;
    let mut has_next_byte = true;
    let mut size_bytes = 0;
    while has_next_byte {
        if size_bytes == 4 {
            return Err(Error::parse("Too long descriptor size field"));
        }
        let b = u8::decode_at(buf, &mut offset)?;
        has_next_byte = Uint::<u8, 1, 7>::from_bits(b).get() == 1;
        size = (size << 7) | Uint::<u8, 7>::from_bits(b).get() as usize;
        size_bytes += 1;
    }

    Ok((tag, size, offset))
}

// タグを検証して、ディスクリプターのペイロード部分と消費バイト数を返す
fn decode_descriptor_payload(buf: &[u8], expected_tag: u8) -> Result<(&[u8], usize)> {
    let (tag, size, header_size) = decode_tag_and_size(buf)?;
    if tag != expected_tag {
        return Err(Error::parse(format!(
            "Unexpected descriptor tag: expected={expected_tag}, actual={tag}"
        )));
    }
    Error::check_buffer_size(header_size + size, buf)?;
    Ok((&buf[header_size..header_size + size], header_size + size))
}

struct BitReader<'a> {
    buf: &'a [u8],
    bit_offset: usize,
}

impl<'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, bit_offset: 0 }
    }

    fn read(&mut self, bits: usize) -> Result<u32> {
        debug_assert!(bits <= 32);
        if self.bit_offset + bits > self.buf.len() * 8 {
            return Err(Error::parse(format!(
                "AudioSpecificConfig is truncated: need {bits} more bits at bit offset {}",
                self.bit_offset
            )));
        }

        let mut v = 0u32;
        for _ in 0..bits {
            let byte = self.buf[self.bit_offset / 8];
            let bit = (byte >> (7 - self.bit_offset % 8)) & 1;
            v = (v << 1) | bit as u32;
            self.bit_offset += 1;
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // AAC LC / 44100 Hz / 2ch
    const ESDS_PAYLOAD: &[u8] = &[
        0x03, 0x19, 0x00, 0x01, 0x00, // ES_Descriptor
        0x04, 0x11, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x01, 0xF4, 0x00, 0x00, 0x01, 0xF4,
        0x00, // DecoderConfigDescriptor
        0x05, 0x02, 0x12, 0x10, // DecoderSpecificInfo
        0x06, 0x01, 0x02, // SLConfigDescriptor
    ];

    #[test]
    fn decode_es_descriptor_chain() {
        let (es, size) = EsDescriptor::decode(ESDS_PAYLOAD).unwrap();
        assert_eq!(size, ESDS_PAYLOAD.len());
        assert_eq!(es.es_id, 1);

        let dc = &es.dec_config_descr;
        assert_eq!(dc.object_type_indication, 0x40);
        assert_eq!(dc.stream_type.get(), 0x05);
        assert_eq!(dc.max_bitrate, 0x1F400);
        assert_eq!(dc.mpeg_audio_object_type().unwrap(), 2);
        assert_eq!(dc.frequency_index().unwrap(), 4);
        assert_eq!(dc.channel_configuration().unwrap(), 2);
        assert_eq!(
            dc.audio_specific_config().unwrap().sampling_frequency(),
            Some(44100)
        );
    }

    #[test]
    fn audio_specific_config_with_escaped_fields() {
        // object_type = 31 + 6bit(1) => 33, frequency_index = 0xF + 24bit(48000), channel = 1
        // 11111 000001 1111 000000001011101110000000 0001 + padding
        let bits = "1111100000111110000000010111011100000000001";
        let mut buf = vec![0u8; bits.len().div_ceil(8)];
        for (i, c) in bits.chars().enumerate() {
            if c == '1' {
                buf[i / 8] |= 0x80 >> (i % 8);
            }
        }
        let (asc, _) = AudioSpecificConfig::decode(&buf).unwrap();
        assert_eq!(asc.audio_object_type, 33);
        assert_eq!(asc.frequency_index, 0xF);
        assert_eq!(asc.explicit_sampling_frequency, Some(48000));
        assert_eq!(asc.sampling_frequency(), Some(48000));
        assert_eq!(asc.channel_configuration, 1);
    }

    #[test]
    fn encode_two_byte_audio_specific_config() {
        let asc = AudioSpecificConfig {
            audio_object_type: 2,
            frequency_index: 4,
            explicit_sampling_frequency: None,
            channel_configuration: 2,
        };
        assert_eq!(asc.encode_to_vec().unwrap(), [0x12, 0x10]);
    }

    #[test]
    fn missing_decoder_specific_info() {
        let payload = [
            0x04, 0x0D, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x01, 0xF4, 0x00, 0x00, 0x01, 0xF4,
            0x00,
        ];
        let (dc, _) = DecoderConfigDescriptor::decode(&payload).unwrap();
        assert!(dc.dec_specific_info.is_none());
        let e = dc.frequency_index().unwrap_err();
        assert_eq!(e.kind, crate::ErrorKind::Parse);
    }

    #[test]
    fn unexpected_tag() {
        let e = EsDescriptor::decode(&[0x04, 0x00]).unwrap_err();
        assert_eq!(e.kind, crate::ErrorKind::Parse);
    }
}
