#![no_main]

use libfuzzer_sys::fuzz_target;
use tc_io::{TabReadOptions, TabWriteOptions, read_str, read_tab_str, write_tab_string};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let _ = read_str(text);
    if let Ok(table) = read_tab_str(text, &TabReadOptions::default()) {
        let _ = write_tab_string(&table, &TabWriteOptions::default());
    }
});
