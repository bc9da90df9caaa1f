#![forbid(unsafe_code)]

//! Legacy formula to inline-script conversion.
//!
//! ```
//! use legacy_script::{transpile_embedded, transpile_expression};
//!
//! assert_eq!(
//!     transpile_expression("skill_level(Broadsword) > 12"),
//!     "entity.skillLevel(\"Broadsword\") > 12"
//! );
//! assert_eq!(
//!     transpile_embedded("Deals ||1+2|| damage"),
//!     "Deals <script>1 + 2</script> damage"
//! );
//! ```
//!
//! Malformed expressions are returned unchanged. Use the `*_with_ledger`
//! variants to collect a [`ConversionLedger`] of every such fallback, or
//! [`try_transpile_expression`] to get the [`TranspileError`] directly.

pub use lx_expr::{
    ExpressionTree, Node, Operand, ParsedFunction, TranspileError, contains_embedded_expression,
    contains_script, emit_tokens, next_operator, parse_expression, split_arguments,
    transpile_embedded, transpile_embedded_with_ledger, transpile_expression,
    transpile_expression_with_ledger, try_transpile_expression,
};
pub use lx_migrate::{
    ConversionKind, MigrateError, MigrationPlan, MigrationReport, MigrationSummary,
    migrate_document, migrate_file, migrate_value, write_ledger,
};
pub use lx_runtime::{
    ConversionIssue, ConversionLedger, ConversionRecord, FallbackKind, LedgerSummary, RuntimeError,
};
pub use lx_types::{FUNCTIONS, OPERATORS, Operator, script_function};

#[cfg(test)]
mod tests {
    use super::{ConversionLedger, MigrationPlan, migrate_document, transpile_expression_with_ledger};

    #[test]
    fn facade_exposes_transpiler_and_migration() {
        let mut ledger = ConversionLedger::new();
        assert_eq!(
            transpile_expression_with_ledger("round($st/2)", &mut ledger),
            "Math.round($st / 2)"
        );
        assert!(ledger.is_empty());

        let (document, summary) = migrate_document(
            r#"{"features": [{"expr": "dice(1,6)"}, {"expr": "bogus(1)"}]}"#,
            &MigrationPlan::legacy_defaults(),
            &mut ledger,
        )
        .expect("migrate");
        let value: serde_json::Value = serde_json::from_str(&document).expect("json");
        assert_eq!(value["features"][0]["expr"], "dice.from(1, 6)");
        assert_eq!(value["features"][1]["expr"], "bogus(1)");
        assert_eq!(summary.converted, 1);
        assert_eq!(summary.fallbacks.originals_kept, 1);
    }
}
