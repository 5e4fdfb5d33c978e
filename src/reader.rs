//! バイトストリームを読み込んで [`BoxTree`] を構築する処理
//!
//! `moov` などのメタデータ用のボックスはメモリに読み込んでから型付きのペイロードにデコードする。
//! `mdat` ボックスの中身はサイズが大きいので読み込まず、ファイル内の位置のみを記録する。
use std::io::{Read, Seek, SeekFrom};

use crate::{
    BoxHeader, BoxType, Decode, Error, Result,
    boxes::{
        Avc1Box, AvccBox, BoxPayload, Co64Box, EsdsBox, MDAT_TYPE, MdhdBox, Mp4aBox, StcoBox,
        StscBox, StsdBox, StszBox, SttsBox,
    },
    tree::{BoxId, BoxTree, BoxTreeBuilder},
};

/// 子ボックスのみをペイロードに持つボックスの種別
pub const CONTAINER_BOX_TYPES: [BoxType; 11] = [
    BoxType::Normal(*b"moov"),
    BoxType::Normal(*b"trak"),
    BoxType::Normal(*b"mdia"),
    BoxType::Normal(*b"minf"),
    BoxType::Normal(*b"stbl"),
    BoxType::Normal(*b"dinf"),
    BoxType::Normal(*b"edts"),
    BoxType::Normal(*b"mvex"),
    BoxType::Normal(*b"moof"),
    BoxType::Normal(*b"traf"),
    BoxType::Normal(*b"mfra"),
];

// ネストが深すぎる不正なファイルでスタックを使い切らないようにするための上限
const MAX_DEPTH: usize = 32;

impl BoxTree {
    /// メモリ上の MP4 ファイルのバイト列からツリーを構築する
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        read_tree(std::io::Cursor::new(bytes))
    }
}

/// `reader` から MP4 ファイルを読み込んでツリーを構築する
///
/// ボックス構造が不正、あるいは途中で切れている場合は [`ErrorKind::Parse`](crate::ErrorKind::Parse) エラーとなる
pub fn read_tree<R: Read + Seek>(mut reader: R) -> Result<BoxTree> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut builder = BoxTreeBuilder::new();
    let mut offset = 0;
    while offset < file_size {
        let mut header_buf = Vec::with_capacity(BoxHeader::MAX_SIZE);
        reader
            .by_ref()
            .take(BoxHeader::MAX_SIZE as u64)
            .read_to_end(&mut header_buf)?;
        if is_zero_padding(&header_buf) {
            tracing::debug!(offset, size = header_buf.len(), "Skip trailing zero padding");
            break;
        }
        let (header, header_size) = BoxHeader::decode(&header_buf)?;

        let rest = file_size - offset;
        let box_size = match header.box_size.get() {
            0 => rest,
            n if n > rest => {
                return Err(Error::parse(format!(
                    "Box exceeds the end of file: offset={offset}, box_size={n}, file_size={file_size}"
                ))
                .with_box_type(header.box_type));
            }
            n => n,
        };
        let payload_offset = offset + header_size as u64;
        let payload_size = box_size - header_size as u64;

        if header.box_type == MDAT_TYPE {
            builder.push(
                BoxId::ROOT,
                MDAT_TYPE,
                BoxPayload::Mdat {
                    data_offset: payload_offset,
                    data_size: payload_size,
                },
            )?;
        } else {
            let box_len = usize::try_from(box_size).map_err(|_| {
                Error::parse(format!("Too large box: {box_size} bytes"))
                    .with_box_type(header.box_type)
            })?;
            let mut box_buf = vec![0; box_len];
            reader.seek(SeekFrom::Start(offset))?;
            reader.read_exact(&mut box_buf)?;
            read_box(&mut builder, BoxId::ROOT, &box_buf, offset, 0)?;
        }

        tracing::debug!(box_type = %header.box_type, offset, box_size, "Read top-level box");
        offset += box_size;
        reader.seek(SeekFrom::Start(offset))?;
    }

    Ok(builder.build())
}

// `buf` に連続して格納されているボックス群を `parent` の子として追加する
//
// `base_offset` は `buf` の先頭のファイル内での位置
fn read_boxes(
    builder: &mut BoxTreeBuilder,
    parent: BoxId,
    mut buf: &[u8],
    mut base_offset: u64,
    depth: usize,
) -> Result<()> {
    while !buf.is_empty() {
        // サンプルエントリーの末尾には 0 埋めが入っていることがある
        if is_zero_padding(buf) {
            break;
        }

        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        let box_size = header.external_size() + payload.len();
        read_box(builder, parent, &buf[..box_size], base_offset, depth)?;

        buf = &buf[box_size..];
        base_offset += box_size as u64;
    }
    Ok(())
}

// ボックスヘッダーにも満たない 0 埋めの末尾
fn is_zero_padding(buf: &[u8]) -> bool {
    buf.len() < 8 && buf.iter().all(|&b| b == 0)
}

fn read_box(
    builder: &mut BoxTreeBuilder,
    parent: BoxId,
    buf: &[u8],
    offset: u64,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::parse(format!(
            "Box nesting is too deep (max={MAX_DEPTH})"
        )));
    }

    let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
    let box_type = header.box_type;
    let buf = &buf[..header.external_size() + payload.len()];

    // 子ボックスの手前までのサイズ（子を持たないボックスの場合は None）
    let (box_payload, children_start) = match box_type {
        ty if CONTAINER_BOX_TYPES.contains(&ty) => {
            (BoxPayload::Container, Some(header.external_size()))
        }
        StsdBox::TYPE => {
            let (b, size) = StsdBox::decode(buf)?;
            (BoxPayload::Stsd(b), Some(size))
        }
        Avc1Box::TYPE => {
            let (b, size) = Avc1Box::decode(buf)?;
            (BoxPayload::Avc1(b), Some(size))
        }
        Mp4aBox::TYPE => {
            let (b, size) = Mp4aBox::decode(buf)?;
            (BoxPayload::Mp4a(b), Some(size))
        }
        StcoBox::TYPE => (BoxPayload::Stco(StcoBox::decode(buf)?.0), None),
        Co64Box::TYPE => (BoxPayload::Co64(Co64Box::decode(buf)?.0), None),
        StscBox::TYPE => (BoxPayload::Stsc(StscBox::decode(buf)?.0), None),
        StszBox::TYPE => (BoxPayload::Stsz(StszBox::decode(buf)?.0), None),
        SttsBox::TYPE => (BoxPayload::Stts(SttsBox::decode(buf)?.0), None),
        MdhdBox::TYPE => (BoxPayload::Mdhd(MdhdBox::decode(buf)?.0), None),
        AvccBox::TYPE => (BoxPayload::Avcc(AvccBox::decode(buf)?.0), None),
        EsdsBox::TYPE => (BoxPayload::Esds(EsdsBox::decode(buf)?.0), None),
        MDAT_TYPE => (
            BoxPayload::Mdat {
                data_offset: offset + header.external_size() as u64,
                data_size: payload.len() as u64,
            },
            None,
        ),
        _ => (BoxPayload::Raw(payload.to_vec()), None),
    };

    tracing::debug!(%box_type, offset, box_size = buf.len(), depth, "Read box");
    let id = builder.push(parent, box_type, box_payload)?;

    if let Some(start) = children_start {
        read_boxes(
            builder,
            id,
            &buf[start..],
            offset + start as u64,
            depth + 1,
        )
        .map_err(|e| e.with_box_type(box_type))?;
    }
    Ok(())
}
