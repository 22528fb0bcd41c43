#![no_main]

use libfuzzer_sys::fuzz_target;
use tc_io::{LogReadOptions, read_log_str};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let _ = read_log_str(text, &LogReadOptions::default());
    let forced = LogReadOptions {
        force: true,
        ..LogReadOptions::default()
    };
    let _ = read_log_str(text, &forced);
});
