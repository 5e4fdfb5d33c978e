//! SampleLocator の Property-Based Testing
//!
//! ランダムなチャンク構成のサンプルテーブルに対して、
//! 位置の計算結果がサイズの積み上げと一致することを確認する

use std::num::NonZeroU32;

use mp4_sample_extractor::{
    BoxId, BoxTree, BoxTreeBuilder, BoxType, ErrorKind, SampleLocator,
    boxes::{BoxPayload, StcoBox, StscBox, StscEntry, StszBox},
};
use proptest::prelude::*;

/// チャンクごとのサンプルサイズと、チャンク間の隙間
fn arb_chunks() -> impl Strategy<Value = Vec<(u32, Vec<u32>)>> {
    prop::collection::vec(
        (0u32..64, prop::collection::vec(1u32..2000, 0..6)),
        1..12,
    )
}

/// 連続する同じサンプル数のチャンクを一つのエントリーにまとめる
fn stsc_entries(chunks: &[(u32, Vec<u32>)]) -> Vec<StscEntry> {
    let mut entries: Vec<StscEntry> = Vec::new();
    for (i, (_, sizes)) in chunks.iter().enumerate() {
        let n = sizes.len() as u32;
        if entries.last().is_some_and(|e| e.samples_per_chunk == n) {
            continue;
        }
        entries.push(StscEntry {
            first_chunk: NonZeroU32::new(i as u32 + 1).unwrap(),
            samples_per_chunk: n,
            sample_description_index: NonZeroU32::MIN,
        });
    }
    entries
}

/// ツリーと、各サンプルの (位置, サイズ, チャンク番号) を返す
fn build(chunks: &[(u32, Vec<u32>)]) -> (BoxTree, Vec<(u64, u32, usize)>) {
    let mut expected = Vec::new();
    let mut chunk_offsets = Vec::new();
    let mut offset = 48u32;
    for (chunk_index, (gap, sizes)) in chunks.iter().enumerate() {
        offset += gap;
        chunk_offsets.push(offset);
        for &size in sizes {
            expected.push((offset as u64, size, chunk_index));
            offset += size;
        }
    }

    let mut b = BoxTreeBuilder::new();
    let trak = b
        .push(BoxId::ROOT, BoxType::Normal(*b"trak"), BoxPayload::Container)
        .unwrap();
    let stbl = b
        .push(trak, BoxType::Normal(*b"stbl"), BoxPayload::Container)
        .unwrap();
    b.push(stbl, StcoBox::TYPE, BoxPayload::Stco(StcoBox { chunk_offsets }))
        .unwrap();
    b.push(
        stbl,
        StscBox::TYPE,
        BoxPayload::Stsc(StscBox {
            entries: stsc_entries(chunks),
        }),
    )
    .unwrap();
    b.push(
        stbl,
        StszBox::TYPE,
        BoxPayload::Stsz(StszBox::Variable {
            entry_sizes: expected.iter().map(|x| x.1).collect(),
        }),
    )
    .unwrap();
    (b.build(), expected)
}

fn locator(tree: &BoxTree) -> SampleLocator<'_> {
    let trak = tree.root().get_child(BoxType::Normal(*b"trak")).unwrap();
    SampleLocator::new(trak).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // 全てのサンプルの位置とサイズが手計算と一致する
    #[test]
    fn locate_matches_manual_computation(chunks in arb_chunks()) {
        let (tree, expected) = build(&chunks);
        let locator = locator(&tree);

        prop_assert_eq!(locator.sample_count() as usize, expected.len());
        for (i, &(offset, size, _)) in expected.iter().enumerate() {
            let location = locator.locate(i as u32).unwrap();
            prop_assert_eq!(location.offset, offset, "sample {}", i);
            prop_assert_eq!(location.size, size, "sample {}", i);
        }
    }

    // サンプル数以上のインデックスは SampleIndexOutOfRange になる
    #[test]
    fn locate_out_of_range(chunks in arb_chunks(), extra in 0u32..100) {
        let (tree, expected) = build(&chunks);
        let locator = locator(&tree);

        let e = locator.locate(expected.len() as u32 + extra).unwrap_err();
        prop_assert_eq!(e.kind, ErrorKind::SampleIndexOutOfRange);
    }

    // 同じチャンク内では、インデックスが大きいサンプルほど後ろに位置する
    #[test]
    fn offsets_increase_within_chunk(chunks in arb_chunks()) {
        let (tree, expected) = build(&chunks);
        let locator = locator(&tree);

        for i in 1..expected.len() {
            if expected[i - 1].2 != expected[i].2 {
                continue;
            }
            let prev = locator.locate(i as u32 - 1).unwrap();
            let next = locator.locate(i as u32).unwrap();
            prop_assert!(prev.offset < next.offset);
            prop_assert_eq!(prev.offset + prev.size as u64, next.offset);
        }
    }

    // チャンクごとのサンプル数は、ランレングス形式から正しく復元される
    #[test]
    fn samples_for_chunk_expands_runs(chunks in arb_chunks()) {
        let stsc = StscBox { entries: stsc_entries(&chunks) };
        for (i, (_, sizes)) in chunks.iter().enumerate() {
            prop_assert_eq!(stsc.samples_for_chunk(i as u32), sizes.len() as u32);
        }
    }
}
