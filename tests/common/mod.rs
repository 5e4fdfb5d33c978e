//! テスト用の MP4 ファイルを組み立てるためのヘルパー
#![allow(dead_code)]

use std::path::PathBuf;

pub fn bx(ty: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut buf = ((8 + payload.len()) as u32).to_be_bytes().to_vec();
    buf.extend_from_slice(ty);
    buf.extend_from_slice(payload);
    buf
}

pub fn full_bx(ty: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = (((version as u32) << 24) | (flags & 0x00FF_FFFF))
        .to_be_bytes()
        .to_vec();
    body.extend_from_slice(payload);
    bx(ty, &body)
}

/// NAL ユニット群を 4 バイトの長さフィールド区切りのサンプルにする
pub fn length_prefixed(nalus: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::new();
    for nalu in nalus {
        buf.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
        buf.extend_from_slice(nalu);
    }
    buf
}

#[derive(Debug, Clone)]
pub struct VideoTrack {
    pub width: u16,
    pub height: u16,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    pub timescale: u32,
    pub sample_delta: u32,
    /// チャンクごとのサンプル（長さフィールド区切り）
    pub chunks: Vec<Vec<Vec<u8>>>,
}

#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub object_type: u8,
    pub frequency_index: u8,
    pub channel_configuration: u8,
    pub sample_rate: u16,
    pub sample_delta: u32,
    /// QuickTime の SoundDescription のバージョン（0 なら ISO の AudioSampleEntry と同じ）
    pub sound_version: u16,
    /// チャンクごとの生の AAC フレーム
    pub chunks: Vec<Vec<Vec<u8>>>,
}

#[derive(Debug, Clone, Default)]
pub struct Mp4Layout {
    pub video: Option<VideoTrack>,
    pub audio: Option<AudioTrack>,
    pub fragmented: bool,
}

impl Mp4Layout {
    /// `ftyp`, `mdat`, `moov` の順に並んだ MP4 ファイルを組み立てる
    pub fn build(&self) -> Vec<u8> {
        let ftyp = bx(b"ftyp", b"isom\0\0\x02\0isomiso2avc1mp41");

        let mut mdat_payload = Vec::new();
        let data_start = (ftyp.len() + 8) as u32;
        let mut place = |chunks: &[Vec<Vec<u8>>]| -> Vec<u32> {
            chunks
                .iter()
                .map(|chunk| {
                    let offset = data_start + mdat_payload.len() as u32;
                    for sample in chunk {
                        mdat_payload.extend_from_slice(sample);
                    }
                    offset
                })
                .collect()
        };
        let video_offsets = self.video.as_ref().map(|v| place(&v.chunks));
        let audio_offsets = self.audio.as_ref().map(|a| place(&a.chunks));

        let mut moov_payload = full_bx(b"mvhd", 0, 0, &[0; 96]);
        if let (Some(v), Some(offsets)) = (&self.video, &video_offsets) {
            moov_payload.extend(video_trak(v, offsets));
        }
        if let (Some(a), Some(offsets)) = (&self.audio, &audio_offsets) {
            moov_payload.extend(audio_trak(a, offsets));
        }
        if self.fragmented {
            moov_payload.extend(bx(b"mvex", &full_bx(b"trex", 0, 0, &[0; 20])));
        }

        let mut file = ftyp;
        file.extend(bx(b"mdat", &mdat_payload));
        file.extend(bx(b"moov", &moov_payload));
        file
    }
}

fn trak(handler: &[u8; 4], timescale: u32, entry: Vec<u8>, chunks: &[Vec<Vec<u8>>], offsets: &[u32], delta: u32) -> Vec<u8> {
    let sizes = chunks
        .iter()
        .flatten()
        .map(|s| s.len() as u32)
        .collect::<Vec<_>>();

    let mut stsd = 1u32.to_be_bytes().to_vec();
    stsd.extend(entry);

    let mut stts = 1u32.to_be_bytes().to_vec();
    stts.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    stts.extend_from_slice(&delta.to_be_bytes());

    let mut stsc = (chunks.len() as u32).to_be_bytes().to_vec();
    for (i, chunk) in chunks.iter().enumerate() {
        stsc.extend_from_slice(&(i as u32 + 1).to_be_bytes());
        stsc.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        stsc.extend_from_slice(&1u32.to_be_bytes());
    }

    let mut stsz = 0u32.to_be_bytes().to_vec();
    stsz.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    for size in &sizes {
        stsz.extend_from_slice(&size.to_be_bytes());
    }

    let mut stco = (offsets.len() as u32).to_be_bytes().to_vec();
    for offset in offsets {
        stco.extend_from_slice(&offset.to_be_bytes());
    }

    let mut stbl = full_bx(b"stsd", 0, 0, &stsd);
    stbl.extend(full_bx(b"stts", 0, 0, &stts));
    stbl.extend(full_bx(b"stsc", 0, 0, &stsc));
    stbl.extend(full_bx(b"stsz", 0, 0, &stsz));
    stbl.extend(full_bx(b"stco", 0, 0, &stco));

    let mut mdhd = vec![0; 8];
    mdhd.extend_from_slice(&timescale.to_be_bytes());
    mdhd.extend_from_slice(&(sizes.len() as u32 * delta).to_be_bytes());
    mdhd.extend_from_slice(&[0x55, 0xC4, 0, 0]);

    let mut hdlr = vec![0; 4];
    hdlr.extend_from_slice(handler);
    hdlr.extend_from_slice(&[0; 13]);

    let mut minf = bx(b"dinf", &full_bx(b"dref", 0, 0, &0u32.to_be_bytes()));
    minf.extend(bx(b"stbl", &stbl));

    let mut mdia = full_bx(b"mdhd", 0, 0, &mdhd);
    mdia.extend(full_bx(b"hdlr", 0, 0, &hdlr));
    mdia.extend(bx(b"minf", &minf));

    let mut trak = full_bx(b"tkhd", 0, 3, &[0; 80]);
    trak.extend(bx(b"mdia", &mdia));
    bx(b"trak", &trak)
}

fn video_trak(v: &VideoTrack, offsets: &[u32]) -> Vec<u8> {
    let mut avcc = vec![1, 0x42, 0x00, 0x1E, 0xFF, 0xE1];
    avcc.extend_from_slice(&(v.sps.len() as u16).to_be_bytes());
    avcc.extend_from_slice(&v.sps);
    avcc.push(1);
    avcc.extend_from_slice(&(v.pps.len() as u16).to_be_bytes());
    avcc.extend_from_slice(&v.pps);

    let mut avc1 = vec![0; 6];
    avc1.extend_from_slice(&1u16.to_be_bytes());
    avc1.extend_from_slice(&[0; 16]);
    avc1.extend_from_slice(&v.width.to_be_bytes());
    avc1.extend_from_slice(&v.height.to_be_bytes());
    avc1.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    avc1.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    avc1.extend_from_slice(&[0; 4]);
    avc1.extend_from_slice(&1u16.to_be_bytes());
    avc1.extend_from_slice(&[0; 32]);
    avc1.extend_from_slice(&0x0018u16.to_be_bytes());
    avc1.extend_from_slice(&0xFFFFu16.to_be_bytes());
    avc1.extend(bx(b"avcC", &avcc));

    trak(b"vide", v.timescale, bx(b"avc1", &avc1), &v.chunks, offsets, v.sample_delta)
}

fn audio_trak(a: &AudioTrack, offsets: &[u32]) -> Vec<u8> {
    let asc = ((a.object_type as u16) << 11)
        | ((a.frequency_index as u16) << 7)
        | ((a.channel_configuration as u16) << 3);
    let mut dcd = vec![0x40, 0x15, 0, 0, 0, 0, 0x01, 0xF4, 0x00, 0x00, 0x01, 0xF4, 0x00];
    dcd.extend_from_slice(&[0x05, 0x02]);
    dcd.extend_from_slice(&asc.to_be_bytes());

    let mut es = vec![0x00, 0x01, 0x00];
    es.push(0x04);
    es.push(dcd.len() as u8);
    es.extend(dcd);
    es.extend_from_slice(&[0x06, 0x01, 0x02]);

    let mut esds = vec![0x03, es.len() as u8];
    esds.extend(es);

    let mut mp4a = vec![0; 6];
    mp4a.extend_from_slice(&1u16.to_be_bytes());
    mp4a.extend_from_slice(&a.sound_version.to_be_bytes());
    mp4a.extend_from_slice(&[0; 6]);
    mp4a.extend_from_slice(&(a.channel_configuration as u16).to_be_bytes());
    mp4a.extend_from_slice(&16u16.to_be_bytes());
    mp4a.extend_from_slice(&[0; 4]);
    mp4a.extend_from_slice(&a.sample_rate.to_be_bytes());
    mp4a.extend_from_slice(&[0; 2]);
    match a.sound_version {
        1 => mp4a.extend_from_slice(&[0, 0, 4, 0, 0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0, 2]),
        2 => mp4a.extend_from_slice(&[0x5A; 36]),
        _ => {}
    }
    mp4a.extend(full_bx(b"esds", 0, 0, &esds));

    trak(
        b"soun",
        a.sample_rate as u32,
        bx(b"mp4a", &mp4a),
        &a.chunks,
        offsets,
        a.sample_delta,
    )
}

pub fn sample_video() -> VideoTrack {
    VideoTrack {
        width: 640,
        height: 360,
        sps: vec![0x67, 0x42, 0xC0, 0x1E, 0xD9, 0x00],
        pps: vec![0x68, 0xCB, 0x83, 0xCB, 0x20],
        timescale: 30000,
        sample_delta: 1001,
        chunks: vec![
            vec![
                length_prefixed(&[&[0x65, 0x88, 0x84, 0x00, 0x33]]),
                length_prefixed(&[&[0x41, 0x9A, 0x02]]),
            ],
            vec![
                length_prefixed(&[&[0x06, 0x05, 0x01], &[0x41, 0x9A, 0x04, 0x05]]),
                length_prefixed(&[&[0x41, 0x9A, 0x06]]),
                length_prefixed(&[&[0x41, 0x9A, 0x08, 0x09, 0x0A, 0x0B]]),
            ],
        ],
    }
}

pub fn sample_audio() -> AudioTrack {
    AudioTrack {
        object_type: 2,
        frequency_index: 3,
        channel_configuration: 2,
        sample_rate: 48000,
        sample_delta: 1024,
        sound_version: 0,
        chunks: vec![
            vec![vec![0x21, 0x1B, 0x94], vec![0x21, 0x1B, 0x95, 0x00]],
            vec![vec![0x21; 10]],
        ],
    }
}

/// テストごとに異なる一時ファイルにバイト列を書き出す
pub fn write_temp_file(name: &str, bytes: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "mp4_sample_extractor_{}_{name}.mp4",
        std::process::id()
    ));
    std::fs::write(&path, bytes).expect("write temp file");
    path
}
