#![no_main]

use libfuzzer_sys::fuzz_target;
use lx_runtime::{ConversionLedger, FallbackKind};

fuzz_target!(|data: &[u8]| {
    let Ok(expression) = std::str::from_utf8(data) else {
        return;
    };
    let mut ledger = ConversionLedger::new();
    let script = lx_expr::transpile_expression_with_ledger(expression, &mut ledger);
    if lx_expr::try_transpile_expression(expression).is_err() {
        assert_eq!(script, expression);
        assert!(
            ledger
                .records()
                .iter()
                .any(|record| record.issue.kind == FallbackKind::OriginalKept)
        );
    }
});
