#![no_main]

use libfuzzer_sys::fuzz_target;
use mp4_sample_extractor::{
    Decode,
    boxes::{Co64Box, StcoBox, StscBox, StszBox, SttsBox},
};

fuzz_target!(|data: &[u8]| {
    let _ = StcoBox::decode(data);
    let _ = Co64Box::decode(data);
    let _ = StszBox::decode(data);
    let _ = SttsBox::decode(data);
    if let Ok((stsc, _)) = StscBox::decode(data) {
        for chunk_index in 0..16 {
            let _ = stsc.samples_for_chunk(chunk_index);
        }
    }
});
