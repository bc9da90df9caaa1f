#![forbid(unsafe_code)]

use std::sync::LazyLock;

use lx_runtime::{ConversionLedger, FallbackKind};
use lx_types::{
    DICE_ROLL, ERROR_PLACEHOLDER, OPERATORS, Operator, SCRIPT_END, SCRIPT_START, VARIABLE_SIGIL,
    script_function, takes_dice_literals,
};
use regex::{Captures, Regex};
use serde::Serialize;
use thiserror::Error;

static EMBEDDED_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\|\|[^|]+\|\|").expect("embedded span pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranspileError {
    #[error("expression is invalid at index {index}: empty operand")]
    EmptyOperand { index: usize },
    #[error("consecutive unary operators are not allowed at index {index}")]
    ConsecutiveUnaryOperators { index: usize },
    #[error("unmatched ')' at index {index}")]
    UnmatchedCloseParen { index: usize },
    #[error("function not closed at index {index}")]
    FunctionNotClosed { index: usize },
    #[error("function not defined: {name}")]
    UndefinedFunction { name: String },
    #[error("unexpected stack state at index {index}")]
    UnexpectedStackState { index: usize },
}

/// A raw leaf value: literal, bare word, or `$variable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operand {
    pub value: String,
    pub unary_op: Option<&'static Operator>,
}

/// A recognized `name(...)` call. Arguments stay unparsed until emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedFunction {
    pub call: &'static str,
    pub args: String,
    pub unary_op: Option<&'static Operator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpressionTree {
    pub left: Option<Box<Node>>,
    pub right: Option<Box<Node>>,
    pub op: Option<&'static Operator>,
    /// Only set on the left-only node wrapping a parenthesized group.
    pub unary_op: Option<&'static Operator>,
    /// The user wrote explicit parentheses around this sub-expression.
    pub has_parens: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Operand(Operand),
    Function(ParsedFunction),
    Tree(ExpressionTree),
}

#[derive(Debug, Clone, Copy)]
struct OperatorFrame {
    op: &'static Operator,
    unary_op: Option<&'static Operator>,
}

/// Earliest operator occurrence at or after byte offset `start`.
///
/// Ties at one position go to the first entry of [`OPERATORS`].
#[must_use]
pub fn next_operator(expression: &str, start: usize) -> Option<(usize, &'static Operator)> {
    (start..expression.len()).find_map(|index| {
        OPERATORS
            .iter()
            .find(|op| op.matches_at(expression, index))
            .map(|op| (index, op))
    })
}

/// Parse a legacy expression into its single reduced tree.
///
/// Operators are reduced shunting-yard style: before an operator is pushed,
/// every stacked operator of greater or equal precedence is folded into a
/// tree node, so equal precedence associates to the left. A unary operator
/// is only recognized at byte 0 of `expression`.
pub fn parse_expression(expression: &str) -> Result<Node, TranspileError> {
    ExpressionParser::new(expression).run()
}

struct ExpressionParser<'a> {
    expression: &'a str,
    operands: Vec<Node>,
    operators: Vec<OperatorFrame>,
}

impl<'a> ExpressionParser<'a> {
    fn new(expression: &'a str) -> Self {
        Self {
            expression,
            operands: Vec::new(),
            operators: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Node, TranspileError> {
        let bytes = self.expression.as_bytes();
        let mut unary_op: Option<&'static Operator> = None;
        let mut have_operand = false;
        let mut index = 0;
        while index < bytes.len() {
            if matches!(bytes[index], b' ' | b'\t' | b'\n' | b'\r') {
                index += 1;
                continue;
            }
            let next = next_operator(self.expression, index);
            if next.is_none_or(|(at, _)| at > index) {
                index = self.push_operand(index, next.map(|(at, _)| at), unary_op.take())?;
                have_operand = true;
            }
            let Some((at, op)) = next else {
                continue;
            };
            if at != index {
                continue;
            }
            if op.unary && unary_op.is_some() {
                return Err(TranspileError::ConsecutiveUnaryOperators { index });
            }
            if op.unary && index == 0 {
                unary_op = Some(op);
                index += op.symbol.len();
            } else {
                index = self.process_operator(index, op, have_operand, unary_op.take())?;
            }
            if !op.is_close_paren() {
                have_operand = false;
            }
        }
        self.finish(index)
    }

    fn push_operand(
        &mut self,
        start: usize,
        end: Option<usize>,
        unary_op: Option<&'static Operator>,
    ) -> Result<usize, TranspileError> {
        let end = end.unwrap_or(self.expression.len());
        let value = self.expression[start..end].trim();
        if value.is_empty() {
            return Err(TranspileError::EmptyOperand { index: start });
        }
        self.operands.push(Node::Operand(Operand {
            value: value.to_owned(),
            unary_op,
        }));
        Ok(end)
    }

    fn process_operator(
        &mut self,
        index: usize,
        op: &'static Operator,
        have_operand: bool,
        unary_op: Option<&'static Operator>,
    ) -> Result<usize, TranspileError> {
        if have_operand && op.is_open_paren() {
            return self.push_function(index);
        }
        if op.is_open_paren() {
            self.operators.push(OperatorFrame { op, unary_op });
        } else if op.is_close_paren() {
            self.close_group(index)?;
        } else {
            while self
                .operators
                .last()
                .is_some_and(|frame| frame.op.precedence >= op.precedence)
            {
                self.reduce(index)?;
            }
            self.operators.push(OperatorFrame { op, unary_op });
        }
        Ok(index + op.symbol.len())
    }

    fn close_group(&mut self, index: usize) -> Result<(), TranspileError> {
        while self
            .operators
            .last()
            .is_some_and(|frame| !frame.op.is_open_paren())
        {
            self.reduce(index)?;
        }
        let Some(frame) = self.operators.pop() else {
            return Err(TranspileError::UnmatchedCloseParen { index });
        };
        if let Some(unary_op) = frame.unary_op {
            let inner = self
                .operands
                .pop()
                .ok_or(TranspileError::UnexpectedStackState { index })?;
            self.operands.push(Node::Tree(ExpressionTree {
                left: Some(Box::new(inner)),
                right: None,
                op: None,
                unary_op: Some(unary_op),
                has_parens: false,
            }));
        }
        Ok(())
    }

    /// Turns the operand just pushed into a call whose arguments run from
    /// the `(` at `open` to its matching `)`. Returns the index past the `)`.
    fn push_function(&mut self, open: usize) -> Result<usize, TranspileError> {
        let mut depth = 1_usize;
        let mut close = open;
        while depth > 0 {
            let Some((at, op)) = next_operator(self.expression, close + 1) else {
                return Err(TranspileError::FunctionNotClosed { index: open });
            };
            if op.is_open_paren() {
                depth += 1;
            } else if op.is_close_paren() {
                depth -= 1;
            }
            close = at;
        }
        let Some(Node::Operand(name)) = self.operands.pop() else {
            return Err(TranspileError::UnexpectedStackState { index: close });
        };
        let call = script_function(&name.value)
            .ok_or_else(|| TranspileError::UndefinedFunction { name: name.value.clone() })?;
        self.operands.push(Node::Function(ParsedFunction {
            call,
            args: self.expression[open + 1..close].to_owned(),
            unary_op: name.unary_op,
        }));
        Ok(close + 1)
    }

    fn reduce(&mut self, index: usize) -> Result<(), TranspileError> {
        let right = self
            .operands
            .pop()
            .ok_or(TranspileError::UnexpectedStackState { index })?;
        let left = self.operands.pop();
        let frame = self
            .operators
            .pop()
            .ok_or(TranspileError::UnexpectedStackState { index })?;
        let has_parens = self
            .operators
            .last()
            .is_some_and(|below| below.op.is_open_paren());
        self.operands.push(Node::Tree(ExpressionTree {
            left: left.map(Box::new),
            right: Some(Box::new(right)),
            op: Some(frame.op),
            unary_op: None,
            has_parens,
        }));
        Ok(())
    }

    fn finish(mut self, index: usize) -> Result<Node, TranspileError> {
        while !self.operators.is_empty() {
            self.reduce(index)?;
        }
        let root = self
            .operands
            .pop()
            .ok_or(TranspileError::UnexpectedStackState { index })?;
        if !self.operands.is_empty() {
            return Err(TranspileError::UnexpectedStackState { index });
        }
        Ok(root)
    }
}

/// Walk a reduced tree depth-first into destination-dialect tokens.
///
/// Arguments of function calls are transpiled here, recursively; one that
/// fails becomes [`ERROR_PLACEHOLDER`] and is recorded in `ledger`.
pub fn emit_tokens(node: &Node, ledger: &mut ConversionLedger) -> Vec<String> {
    let mut parts = Vec::new();
    emit_into(&mut parts, node, ledger);
    parts
}

fn emit_into(parts: &mut Vec<String>, node: &Node, ledger: &mut ConversionLedger) {
    match node {
        Node::Operand(operand) => parts.push(emit_operand(operand)),
        Node::Function(function) => parts.push(emit_function(function, ledger)),
        Node::Tree(tree) => emit_tree(parts, tree, ledger),
    }
}

fn emit_tree(parts: &mut Vec<String>, tree: &ExpressionTree, ledger: &mut ConversionLedger) {
    let first = parts.len();
    if let Some(left) = &tree.left {
        emit_into(parts, left, ledger);
    }
    let binary = tree.left.is_some() && tree.right.is_some();
    if let (true, Some(op)) = (binary, tree.op) {
        parts.push(op.token().to_owned());
    }
    if let Some(right) = &tree.right {
        emit_into(parts, right, ledger);
    }
    if let (false, Some(unary_op)) = (binary, tree.unary_op) {
        if let Some(token) = parts.get_mut(first) {
            token.insert_str(0, unary_op.token());
        }
    }
    if tree.has_parens && parts.len() > first {
        parts[first].insert(0, '(');
        if let Some(last) = parts.last_mut() {
            last.push(')');
        }
    }
}

fn emit_operand(operand: &Operand) -> String {
    let mut value = if is_script_literal(&operand.value) {
        operand.value.clone()
    } else {
        format!("\"{}\"", operand.value)
    };
    if let Some(unary_op) = operand.unary_op {
        value.insert_str(0, unary_op.token());
    }
    value
}

fn emit_function(function: &ParsedFunction, ledger: &mut ConversionLedger) -> String {
    let dice_literals = takes_dice_literals(function.call);
    let arguments = split_arguments(&function.args);
    let mut parts = Vec::new();
    for (position, argument) in arguments.iter().enumerate() {
        let handled = if dice_literals {
            (position == 0 || function.call != DICE_ROLL) && push_dice_literal(&mut parts, argument)
        } else if is_quoted(argument) {
            parts.push((*argument).to_owned());
            true
        } else {
            false
        };
        if !handled {
            push_sub_expression(&mut parts, argument, ledger);
        }
        if position + 1 < arguments.len() {
            if let Some(last) = parts.last_mut() {
                last.push(',');
            }
        }
    }
    let prefix = function.unary_op.map_or("", |op| op.token());
    format!("{prefix}{}({})", function.call, parts.join(" "))
}

fn push_dice_literal(parts: &mut Vec<String>, argument: &str) -> bool {
    if argument.contains('(') {
        return false;
    }
    let argument = argument.trim();
    if argument.starts_with(VARIABLE_SIGIL) || is_quoted(argument) {
        parts.push(argument.to_owned());
    } else {
        parts.push(format!("\"{argument}\""));
    }
    true
}

fn push_sub_expression(parts: &mut Vec<String>, argument: &str, ledger: &mut ConversionLedger) {
    match parse_expression(argument) {
        Ok(node) => emit_into(parts, &node, ledger),
        Err(err) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(argument, error = %err, "function argument replaced by placeholder");
            ledger.record(FallbackKind::ArgumentPlaceholder, argument.trim(), err.to_string());
            parts.push(ERROR_PLACEHOLDER.to_owned());
        }
    }
}

fn is_quoted(value: &str) -> bool {
    value.starts_with('"') && value.ends_with('"')
}

fn is_script_literal(value: &str) -> bool {
    value == "true"
        || value == "false"
        || value.parse::<f64>().is_ok()
        || value.starts_with(VARIABLE_SIGIL)
        || is_quoted(value)
}

/// Split raw call arguments on commas outside nested parentheses.
///
/// Splitting stops at the first empty argument, so `f(1,,2)` keeps only `1`.
#[must_use]
pub fn split_arguments(args: &str) -> Vec<&str> {
    let mut arguments = Vec::new();
    let mut depth = 0_i32;
    let mut start = 0;
    for (index, byte) in args.bytes().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                arguments.push(&args[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    arguments.push(&args[start..]);
    if let Some(end) = arguments.iter().position(|argument| argument.is_empty()) {
        arguments.truncate(end);
    }
    arguments
}

/// Transpile one bare expression, surfacing the parse error.
pub fn try_transpile_expression(expression: &str) -> Result<String, TranspileError> {
    let mut ledger = ConversionLedger::new();
    transpile_into(expression, &mut ledger)
}

fn transpile_into(
    expression: &str,
    ledger: &mut ConversionLedger,
) -> Result<String, TranspileError> {
    let root = parse_expression(expression)?;
    Ok(emit_tokens(&root, ledger).join(" "))
}

/// Transpile one bare expression. Malformed input comes back unchanged.
#[must_use]
pub fn transpile_expression(expression: &str) -> String {
    transpile_expression_with_ledger(expression, &mut ConversionLedger::new())
}

pub fn transpile_expression_with_ledger(expression: &str, ledger: &mut ConversionLedger) -> String {
    match transpile_into(expression, ledger) {
        Ok(script) => script,
        Err(err) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(expression, error = %err, "legacy expression kept verbatim");
            ledger.record(FallbackKind::OriginalKept, expression, err.to_string());
            expression.to_owned()
        }
    }
}

/// Replace every `||expr||` span of free text with an inline script holding
/// the transpiled expression. Text outside the spans is untouched.
#[must_use]
pub fn transpile_embedded(text: &str) -> String {
    transpile_embedded_with_ledger(text, &mut ConversionLedger::new())
}

pub fn transpile_embedded_with_ledger(text: &str, ledger: &mut ConversionLedger) -> String {
    EMBEDDED_SPAN
        .replace_all(text, |caps: &Captures<'_>| {
            let span = &caps[0];
            let inner = &span[2..span.len() - 2];
            format!(
                "{SCRIPT_START}{}{SCRIPT_END}",
                transpile_expression_with_ledger(inner, ledger)
            )
        })
        .into_owned()
}

#[must_use]
pub fn contains_embedded_expression(text: &str) -> bool {
    EMBEDDED_SPAN.is_match(text)
}

#[must_use]
pub fn contains_script(text: &str) -> bool {
    text.contains(SCRIPT_START)
}
