#![no_main]

use libfuzzer_sys::fuzz_target;
use mp4_sample_extractor::{BoxTree, Session, SessionOptions};

fuzz_target!(|data: &[u8]| {
    let Ok(tree) = BoxTree::parse(data) else {
        return;
    };
    let options = SessionOptions {
        max_sample_size: 1024 * 1024,
    };
    let session = Session::with_options(tree, data, options);
    let _ = session.video_sps(0);
    let _ = session.video_pps(0);
    let _ = session.audio_specific_config();
    for i in 0..8 {
        let _ = session.video_sample(i);
        let _ = session.video_access_unit(i);
        let _ = session.audio_sample(i);
    }
});
