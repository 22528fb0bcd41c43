#![no_main]

use libfuzzer_sys::fuzz_target;
use tc_expr::parse_expr;

// Parsing never panics, and anything that parses re-parses from its
// canonical form to the same tree.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(expr) = parse_expr(text) {
        let canonical = expr.to_string();
        let reparsed = parse_expr(&canonical).expect("canonical form parses");
        assert_eq!(reparsed, expr);
    }
});
