#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let script = lx_expr::transpile_embedded(text);
    if !text.contains("||") {
        assert_eq!(script, text);
    }
});
