#![forbid(unsafe_code)]

use serde::Serialize;

/// Opening delimiter of an inline script in the destination dialect.
pub const SCRIPT_START: &str = "<script>";
/// Closing delimiter of an inline script in the destination dialect.
pub const SCRIPT_END: &str = "</script>";
/// Token emitted in place of a function argument that failed to transpile.
pub const ERROR_PLACEHOLDER: &str = "<error>";
/// Prefix shared by every dice call in the destination dialect.
pub const DICE_NAMESPACE: &str = "dice.";
/// Destination call that builds dice from numeric parameters.
pub const DICE_FROM: &str = "dice.from";
/// Destination call that rolls a dice specification.
pub const DICE_ROLL: &str = "dice.roll";
/// Sigil marking a variable reference in both dialects.
pub const VARIABLE_SIGIL: char = '$';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Operator {
    pub symbol: &'static str,
    /// Text emitted instead of `symbol`; empty when the symbol carries over.
    pub replacement: &'static str,
    pub precedence: u8,
    pub unary: bool,
}

impl Operator {
    const fn grouping(symbol: &'static str) -> Self {
        Self {
            symbol,
            replacement: "",
            precedence: 0,
            unary: false,
        }
    }

    const fn binary(symbol: &'static str, precedence: u8) -> Self {
        Self {
            symbol,
            replacement: "",
            precedence,
            unary: false,
        }
    }

    /// Text written to the destination dialect for this operator.
    #[must_use]
    pub fn token(&self) -> &'static str {
        if self.replacement.is_empty() {
            self.symbol
        } else {
            self.replacement
        }
    }

    #[must_use]
    pub fn is_open_paren(&self) -> bool {
        self.symbol == "("
    }

    #[must_use]
    pub fn is_close_paren(&self) -> bool {
        self.symbol == ")"
    }

    /// Whether the symbol occurs verbatim at byte offset `start`.
    ///
    /// A `-` directly after an `e` that itself follows a digit is the sign of
    /// a floating point exponent (`1.2e-2`) and never matches.
    #[must_use]
    pub fn matches_at(&self, expression: &str, start: usize) -> bool {
        let bytes = expression.as_bytes();
        let Some(candidate) = bytes.get(start..start + self.symbol.len()) else {
            return false;
        };
        if candidate != self.symbol.as_bytes() {
            return false;
        }
        if self.symbol == "-" && start > 1 && bytes[start - 1] == b'e' {
            return !bytes[start - 2].is_ascii_digit();
        }
        true
    }
}

/// Recognized operators in match priority order.
///
/// Entries that are textual prefixes of other entries come after them, since
/// the scanner takes the first entry that matches at a position.
pub static OPERATORS: [Operator; 17] = [
    Operator::grouping("("),
    Operator::grouping(")"),
    Operator::binary("||", 1),
    Operator::binary("&&", 2),
    Operator::binary("!=", 3),
    Operator {
        symbol: "!",
        replacement: "",
        precedence: 0,
        unary: true,
    },
    Operator::binary("==", 3),
    Operator::binary(">=", 4),
    Operator::binary(">", 4),
    Operator::binary("<=", 4),
    Operator::binary("<", 4),
    Operator {
        symbol: "+",
        replacement: "",
        precedence: 5,
        unary: true,
    },
    Operator {
        symbol: "-",
        replacement: "",
        precedence: 5,
        unary: true,
    },
    Operator::binary("*", 6),
    Operator::binary("/", 6),
    Operator::binary("%", 6),
    Operator {
        symbol: "^",
        replacement: "**",
        precedence: 7,
        unary: false,
    },
];

/// Legacy bare function names and the destination calls they map to.
pub static FUNCTIONS: &[(&str, &str)] = &[
    ("if", "iff"),
    ("signed", "signedValue"),
    ("advantage_level", "entity.traitLevel"),
    ("enc", "entity.currentEncumbrance"),
    ("has_trait", "entity.hasTrait"),
    ("random_height", "entity.randomHeightInInches"),
    ("random_weight", "entity.randomWeightInPounds"),
    ("skill_level", "entity.skillLevel"),
    ("trait_level", "entity.traitLevel"),
    ("weapon_damage", "entity.weaponDamage"),
    ("add_dice", "dice.add"),
    ("dice_count", "dice.count"),
    ("dice_modifier", "dice.modifier"),
    ("dice_multiplier", "dice.multiplier"),
    ("dice_sides", "dice.sides"),
    ("dice", "dice.from"),
    ("roll", "dice.roll"),
    ("subtract_dice", "dice.subtract"),
    ("abs", "Math.abs"),
    ("cbrt", "Math.cbrt"),
    ("ceil", "Math.ceil"),
    ("exp", "Math.exp"),
    ("exp2", "Math.exp2"),
    ("floor", "Math.floor"),
    ("log", "Math.log"),
    ("log10", "Math.log10"),
    ("log1p", "Math.log1p"),
    ("max", "Math.max"),
    ("min", "Math.min"),
    ("round", "Math.round"),
    ("sqrt", "Math.sqrt"),
    ("ssrt_to_yards", "measure.modifierToYards"),
    ("ssrt", "measure.modifier"),
];

#[must_use]
pub fn script_function(legacy_name: &str) -> Option<&'static str> {
    FUNCTIONS
        .iter()
        .find(|(legacy, _)| *legacy == legacy_name)
        .map(|(_, call)| *call)
}

/// Dice calls other than [`DICE_FROM`] take dice specification strings.
#[must_use]
pub fn takes_dice_literals(call: &str) -> bool {
    call.starts_with(DICE_NAMESPACE) && call != DICE_FROM
}
