//! トラック内のサンプルのファイル内での位置を求める処理
use crate::{
    BoxType, Error, Result,
    boxes::{Co64Box, StcoBox, StscBox, StszBox, SttsBox, check_mandatory_box},
    tree::BoxRef,
};

const STBL_TYPE: BoxType = BoxType::Normal(*b"stbl");

/// サンプルのファイル内での位置とサイズ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleLocation {
    /// ファイル先頭からのバイト位置
    pub offset: u64,

    /// `stsz` ボックスに記載されたバイト数
    pub size: u32,
}

#[derive(Debug, Clone, Copy)]
enum ChunkOffsets<'a> {
    Stco(&'a StcoBox),
    Co64(&'a Co64Box),
}

/// トラックのサンプルテーブル（`stco` / `co64`, `stsc`, `stsz`, `stts`）を参照して、
/// サンプルの位置や尺を求めるための構造体
///
/// I/O は一切行わない
#[derive(Debug, Clone)]
pub struct SampleLocator<'a> {
    chunk_offsets: ChunkOffsets<'a>,
    stsc_box: &'a StscBox,
    stsz_box: &'a StszBox,
    stts_table: Option<Vec<(u64, u32)>>, // (累計サンプル数、尺）
    stts_sample_count: u64,
}

impl<'a> SampleLocator<'a> {
    /// `trak` ボックス配下のサンプルテーブル用のインスタンスを生成する
    ///
    /// `stco` と `co64` の両方が存在する場合は `stco` が優先される
    pub fn new(trak: BoxRef<'a>) -> Result<Self> {
        let stbl = trak.expect_child(STBL_TYPE)?;

        let chunk_offsets = if let Some(b) = stbl.get_child(StcoBox::TYPE) {
            ChunkOffsets::Stco(b.view()?)
        } else {
            let b = check_mandatory_box(stbl.get_child(Co64Box::TYPE), "stco' or 'co64", "stbl")?;
            ChunkOffsets::Co64(b.view()?)
        };
        let stsc_box = stbl.expect_child(StscBox::TYPE)?.view()?;
        let stsz_box = stbl.expect_child(StszBox::TYPE)?.view()?;

        let mut stts_table = None;
        let mut stts_sample_count = 0;
        if let Some(b) = stbl.get_child(SttsBox::TYPE) {
            let stts_box = b.view::<SttsBox>()?;
            let mut table = Vec::with_capacity(stts_box.entries.len());
            for entry in &stts_box.entries {
                if entry.sample_count == 0 {
                    continue;
                }
                table.push((stts_sample_count, entry.sample_delta));
                stts_sample_count += entry.sample_count as u64;
            }
            stts_table = Some(table);
        }

        Ok(Self {
            chunk_offsets,
            stsc_box,
            stsz_box,
            stts_table,
            stts_sample_count,
        })
    }

    /// トラック内のサンプルの数を返す
    pub fn sample_count(&self) -> u32 {
        self.stsz_box.sample_count()
    }

    /// トラック内のチャンクの数を返す
    pub fn chunk_count(&self) -> u32 {
        match self.chunk_offsets {
            ChunkOffsets::Stco(b) => b.entry_count(),
            ChunkOffsets::Co64(b) => b.entry_count(),
        }
    }

    /// 指定されたチャンク（0 始まり）のファイル内でのバイト位置を返す
    pub fn chunk_offset(&self, chunk_index: u32) -> Result<u64> {
        match self.chunk_offsets {
            ChunkOffsets::Stco(b) => b.chunk_offset(chunk_index),
            ChunkOffsets::Co64(b) => b.chunk_offset(chunk_index),
        }
    }

    /// 指定されたサンプル（0 始まり）の位置とサイズを求める
    ///
    /// チャンクを先頭から順に辿り、対象サンプルを含むチャンクが見つかったら、
    /// そのチャンク内で対象サンプルより前にあるサンプルのサイズを足し合わせて位置を求める。
    ///
    /// 全てのチャンクを辿っても見つからない場合は
    /// [`ErrorKind::SampleIndexOutOfRange`](crate::ErrorKind::SampleIndexOutOfRange) エラーとなる
    pub fn locate(&self, sample_index: u32) -> Result<SampleLocation> {
        let target = sample_index as u64;
        let mut found_samples = 0u64;
        for chunk_index in 0..self.chunk_count() {
            let n = self.stsc_box.samples_for_chunk(chunk_index) as u64;
            if found_samples + n <= target {
                found_samples += n;
                continue;
            }

            let mut offset = self.chunk_offset(chunk_index)?;
            for _ in 0..n {
                if found_samples == target {
                    let size = self.stsz_box.sample_size(sample_index)?;
                    tracing::debug!(sample_index, chunk_index, offset, size, "Located sample");
                    return Ok(SampleLocation { offset, size });
                }
                let size = self.stsz_box.sample_size(found_samples as u32)?;
                offset = offset.checked_add(size as u64).ok_or_else(|| {
                    Error::parse(format!("Sample offset overflow in chunk {chunk_index}"))
                })?;
                found_samples += 1;
            }
        }

        Err(Error::sample_index_out_of_range(
            sample_index,
            found_samples.min(u32::MAX as u64) as u32,
        ))
    }

    /// 指定されたサンプル（0 始まり）の尺（タイムスケール単位）を返す
    ///
    /// `stts` ボックスが存在しない場合は [`ErrorKind::Parse`](crate::ErrorKind::Parse) エラーとなる
    pub fn sample_delta(&self, sample_index: u32) -> Result<u32> {
        let table = check_mandatory_box(self.stts_table.as_ref(), "stts", "stbl")?;
        let i = table.partition_point(|&(start, _)| start <= sample_index as u64);
        let total = self.stts_sample_count;
        if i == 0 || sample_index as u64 >= total {
            return Err(Error::sample_index_out_of_range(
                sample_index,
                total.min(u32::MAX as u64) as u32,
            ));
        }
        Ok(table[i - 1].1)
    }
}
