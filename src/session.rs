//! MP4 ファイルから H.264 / AAC のサンプルを取り出すためのセッション
//!
//! [`Session::initialize()`] でファイルを読み込んでボックスツリーを構築し、
//! 以降はそのツリーを参照しながら、必要なサンプルだけを元ファイルから読み出す。
//!
//! トラックの選択は単純で、最初に見つかった `avc1` サンプルエントリーを持つトラックを映像、
//! 最初に見つかった `mp4a` サンプルエントリーを持つトラックを音声として扱う。
//! そのため、同種のトラックを複数含むファイルでは、二つ目以降のトラックは参照されない。
//!
//! # Examples
//!
//! ```no_run
//! use mp4_sample_extractor::session::Session;
//!
//! # fn main() -> mp4_sample_extractor::Result<()> {
//! let session = Session::initialize("input.mp4")?;
//! let sps = session.video_sps(0)?;
//! let pps = session.video_pps(0)?;
//! for i in 0..session.video_sample_count()? {
//!     let nalu = session.video_sample(i)?;
//!     // sps / pps / nalu を H.264 デコーダーに渡す
//! #   let _ = (&sps, &pps, nalu);
//! }
//! # Ok(())
//! # }
//! ```
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use crate::{
    BoxType, Decode, Encode, Error, Result,
    boxes::{Avc1Box, AvccBox, EsdsBox, MdhdBox, Mp4aBox, check_mandatory_box},
    descriptors::{AudioSpecificConfig, DecoderConfigDescriptor},
    locator::{SampleLocation, SampleLocator},
    packager::{annexb_from_length_prefixed, annexb_nalu, frame_aac},
    reader::read_tree,
    tree::{BoxRef, BoxTree},
};

const TRAK_TYPE: BoxType = BoxType::Normal(*b"trak");
const MVEX_TYPE: BoxType = BoxType::Normal(*b"mvex");
const MOOF_TYPE: BoxType = BoxType::Normal(*b"moof");

/// 指定位置から指定バイト数を読み出すための抽象
///
/// 呼び出しごとに独立して読み出せる必要があり、呼び出し間で読み込み位置を共有してはいけない
pub trait ReadAt {
    /// `offset` の位置から `length` バイトを読み出す
    ///
    /// 要求されたバイト数を読み出せなかった場合は [`ErrorKind::Io`](crate::ErrorKind::Io) エラーとなる
    fn read_at(&self, offset: u64, length: u32) -> Result<Vec<u8>>;
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        (**self).read_at(offset, length)
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(length as usize)?))
            .and_then(|range| self.get(range))
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| {
                Error::from(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "Cannot read {length} bytes at offset {offset} (size={})",
                        self.len()
                    ),
                ))
            })
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        self.as_slice().read_at(offset, length)
    }
}

/// ファイルパスを保持し、読み出しのたびにファイルを開き直す [`ReadAt`] の実装
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// インスタンスを生成する
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 読み出し対象のファイルパスを返す
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReadAt for FileSource {
    fn read_at(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// [`Session`] 用のオプション
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionOptions {
    /// 一つのサンプルとして読み出しを許容する最大バイト数
    ///
    /// 映像サンプルの長さフィールドなど、ファイルから読み出したサイズがこの値を超える場合は
    /// メモリを確保せずに [`ErrorKind::Parse`](crate::ErrorKind::Parse) エラーとなる
    ///
    /// デフォルト値は 16 MiB
    pub max_sample_size: u32,
}

impl SessionOptions {
    /// [`SessionOptions::max_sample_size`] のデフォルト値
    pub const DEFAULT_MAX_SAMPLE_SIZE: u32 = 16 * 1024 * 1024;
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_sample_size: Self::DEFAULT_MAX_SAMPLE_SIZE,
        }
    }
}

/// 読み込み済みの MP4 ファイルと、そのサンプルの読み出し元を保持するセッション
///
/// ボックスツリーは構築後に変更されないので、複数のスレッドから同時に参照できる
#[derive(Debug)]
pub struct Session<S = FileSource> {
    tree: BoxTree,
    source: S,
    options: SessionOptions,
}

impl Session<FileSource> {
    /// 指定されたファイルを読み込んでセッションを開始する
    pub fn initialize<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::initialize_with_options(path, SessionOptions::default())
    }

    /// オプションを指定してセッションを開始する
    pub fn initialize_with_options<P: AsRef<Path>>(
        path: P,
        options: SessionOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let tree = read_tree(BufReader::new(file))?;

        tracing::info!(path = %path.display(), boxes = tree.len(), "Opened MP4 file");
        Ok(Self::with_options(tree, FileSource::new(path), options))
    }
}

impl<S: ReadAt> Session<S> {
    /// 構築済みのツリーと読み出し元からセッションを生成する
    pub fn from_parts(tree: BoxTree, source: S) -> Self {
        Self::with_options(tree, source, SessionOptions::default())
    }

    /// オプションを指定して、構築済みのツリーと読み出し元からセッションを生成する
    pub fn with_options(tree: BoxTree, source: S, options: SessionOptions) -> Self {
        for ty in [Avc1Box::TYPE, Mp4aBox::TYPE] {
            let count = tree.iter().filter(|b| b.box_type() == ty).count();
            if count > 1 {
                tracing::warn!(
                    sample_entry = %ty,
                    count,
                    "Multiple sample entries found; only the first one is used"
                );
            }
        }
        Self {
            tree,
            source,
            options,
        }
    }

    /// ボックスツリーを返す
    pub fn tree(&self) -> &BoxTree {
        &self.tree
    }

    /// サンプルの読み出し元を返す
    pub fn source(&self) -> &S {
        &self.source
    }

    /// オプションを返す
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// 映像トラックが存在するかどうかを返す
    pub fn has_video(&self) -> bool {
        self.tree.root().get_child(Avc1Box::TYPE).is_some()
    }

    /// 音声トラックが存在するかどうかを返す
    pub fn has_audio(&self) -> bool {
        self.tree.root().get_child(Mp4aBox::TYPE).is_some()
    }

    /// 指定されたインデックスの SPS をスタートコード付きで返す
    pub fn video_sps(&self, index: usize) -> Result<Vec<u8>> {
        let avcc = self.avcc()?;
        Ok(annexb_nalu(avcc.sequence_parameter_set(index)?))
    }

    /// 指定されたインデックスの PPS をスタートコード付きで返す
    pub fn video_pps(&self, index: usize) -> Result<Vec<u8>> {
        let avcc = self.avcc()?;
        Ok(annexb_nalu(avcc.picture_parameter_set(index)?))
    }

    /// 映像の幅（ピクセル単位）を返す
    pub fn video_width(&self) -> Result<u16> {
        Ok(self.video_entry()?.view::<Avc1Box>()?.width)
    }

    /// 映像の高さ（ピクセル単位）を返す
    pub fn video_height(&self) -> Result<u16> {
        Ok(self.video_entry()?.view::<Avc1Box>()?.height)
    }

    /// 映像トラックのサンプル数を返す
    pub fn video_sample_count(&self) -> Result<u32> {
        Ok(SampleLocator::new(self.video_track()?)?.sample_count())
    }

    /// 映像トラックのタイムスケール（一秒あたりの単位数）を返す
    pub fn video_timescale(&self) -> Result<u32> {
        timescale(self.video_track()?)
    }

    /// 指定された映像サンプルの尺（タイムスケール単位）を返す
    pub fn video_time_to_sample(&self, index: u32) -> Result<u32> {
        SampleLocator::new(self.video_track()?)?.sample_delta(index)
    }

    /// 指定された映像サンプルを読み出して、スタートコード付きの NAL ユニットとして返す
    ///
    /// サンプルの位置にある 4 バイトの長さフィールドを読み、
    /// その直後から長さ分のバイト列を一つの NAL ユニットとして扱う
    pub fn video_sample(&self, index: u32) -> Result<Vec<u8>> {
        let location = self.locate_video(index)?;

        let (len, _) = u32::decode(&self.source.read_at(location.offset, 4)?)?;
        self.check_sample_size(len)?;
        let nalu_offset = location
            .offset
            .checked_add(4)
            .ok_or_else(|| Error::parse("Sample offset overflow"))?;
        let nalu = self.source.read_at(nalu_offset, len)?;

        tracing::debug!(index, offset = location.offset, len, "Read video sample");
        Ok(annexb_nalu(&nalu))
    }

    /// 指定された映像サンプル全体を読み出して、Annex-B 形式に変換して返す
    ///
    /// サンプルに含まれる全ての NAL ユニットが対象となる
    pub fn video_access_unit(&self, index: u32) -> Result<Vec<u8>> {
        let location = self.locate_video(index)?;
        let nal_length_size = self.avcc()?.nal_length_size();

        self.check_sample_size(location.size)?;
        let sample = self.source.read_at(location.offset, location.size)?;
        annexb_from_length_prefixed(&sample, nal_length_size)
    }

    /// サンプリング周波数のインデックスを返す
    pub fn audio_sample_rate(&self) -> Result<u8> {
        self.decoder_config()?.frequency_index()
    }

    /// チャンネル構成を返す
    pub fn audio_channel_count(&self) -> Result<u8> {
        self.decoder_config()?.channel_configuration()
    }

    /// MPEG-4 Audio Object Type を返す（2 なら AAC LC）
    pub fn audio_codec_profile_level(&self) -> Result<u8> {
        self.decoder_config()?.mpeg_audio_object_type()
    }

    /// サンプリング周波数（Hz 単位）を返す
    pub fn audio_sampling_frequency(&self) -> Result<u32> {
        let asc = self.audio_specific_config_fields()?;
        asc.sampling_frequency().ok_or_else(|| {
            Error::unsupported(format!(
                "Reserved sampling frequency index: {}",
                asc.frequency_index
            ))
        })
    }

    /// デコーダーの初期化に使う 2 バイトの AudioSpecificConfig を返す
    pub fn audio_specific_config(&self) -> Result<Vec<u8>> {
        self.audio_specific_config_fields()?.encode_to_vec()
    }

    /// 音声トラックのサンプル数を返す
    pub fn audio_sample_count(&self) -> Result<u32> {
        Ok(SampleLocator::new(self.audio_track()?)?.sample_count())
    }

    /// 音声トラックのタイムスケール（一秒あたりの単位数）を返す
    pub fn audio_timescale(&self) -> Result<u32> {
        timescale(self.audio_track()?)
    }

    /// 指定された音声サンプルの尺（タイムスケール単位）を返す
    pub fn audio_time_to_sample(&self, index: u32) -> Result<u32> {
        SampleLocator::new(self.audio_track()?)?.sample_delta(index)
    }

    /// 指定された音声サンプルを読み出して、ADTS ヘッダー付きのフレームとして返す
    pub fn audio_sample(&self, index: u32) -> Result<Vec<u8>> {
        self.check_not_fragmented()?;
        let location = SampleLocator::new(self.audio_track()?)?.locate(index)?;
        let dc = self.decoder_config()?;

        self.check_sample_size(location.size)?;
        let payload = self.source.read_at(location.offset, location.size)?;

        tracing::debug!(index, offset = location.offset, size = location.size, "Read audio sample");
        frame_aac(
            &payload,
            dc.channel_configuration()?,
            dc.frequency_index()?,
            dc.mpeg_audio_object_type()?,
        )
    }

    fn locate_video(&self, index: u32) -> Result<SampleLocation> {
        self.check_not_fragmented()?;
        SampleLocator::new(self.video_track()?)?.locate(index)
    }

    fn check_not_fragmented(&self) -> Result<()> {
        for ty in [MVEX_TYPE, MOOF_TYPE] {
            if self.tree.root().get_child(ty).is_some() {
                return Err(
                    Error::unsupported("Fragmented MP4 is not supported").with_box_type(ty)
                );
            }
        }
        Ok(())
    }

    fn check_sample_size(&self, size: u32) -> Result<()> {
        if size > self.options.max_sample_size {
            return Err(Error::parse(format!(
                "Sample size {size} exceeds the limit ({})",
                self.options.max_sample_size
            )));
        }
        Ok(())
    }

    fn video_entry(&self) -> Result<BoxRef<'_>> {
        sample_entry(&self.tree, Avc1Box::TYPE)
    }

    fn audio_entry(&self) -> Result<BoxRef<'_>> {
        let entry = sample_entry(&self.tree, Mp4aBox::TYPE)?;
        let mp4a = entry.view::<Mp4aBox>()?;
        if !mp4a.is_supported() {
            return Err(Error::unsupported(format!(
                "Unsupported sound sample entry version: {}",
                mp4a.version
            )));
        }
        Ok(entry)
    }

    fn video_track(&self) -> Result<BoxRef<'_>> {
        enclosing_track(self.video_entry()?)
    }

    fn audio_track(&self) -> Result<BoxRef<'_>> {
        enclosing_track(self.audio_entry()?)
    }

    fn avcc(&self) -> Result<&AvccBox> {
        self.video_entry()?.expect_child(AvccBox::TYPE)?.view()
    }

    fn decoder_config(&self) -> Result<&DecoderConfigDescriptor> {
        let esds = self.audio_entry()?.expect_child(EsdsBox::TYPE)?.view::<EsdsBox>()?;
        Ok(esds.decoder_config_descriptor())
    }

    fn audio_specific_config_fields(&self) -> Result<&AudioSpecificConfig> {
        self.decoder_config()?.audio_specific_config()
    }
}

fn sample_entry(tree: &BoxTree, box_type: BoxType) -> Result<BoxRef<'_>> {
    tree.root()
        .get_child(box_type)
        .ok_or_else(|| Error::parse(format!("No '{box_type}' sample entry found")))
}

fn enclosing_track(entry: BoxRef<'_>) -> Result<BoxRef<'_>> {
    check_mandatory_box(
        entry.get_parent(TRAK_TYPE),
        "trak",
        &entry.box_type().to_string(),
    )
}

fn timescale(trak: BoxRef<'_>) -> Result<u32> {
    Ok(trak.expect_child(MdhdBox::TYPE)?.view::<MdhdBox>()?.timescale)
}
