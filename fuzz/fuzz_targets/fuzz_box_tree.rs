#![no_main]

use libfuzzer_sys::fuzz_target;
use mp4_sample_extractor::BoxTree;

fuzz_target!(|data: &[u8]| {
    if let Ok(tree) = BoxTree::parse(data) {
        for b in tree.iter() {
            let _ = b.get_parent(BoxTree::ROOT_TYPE);
        }
    }
});
