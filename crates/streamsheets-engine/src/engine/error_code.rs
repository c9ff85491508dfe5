//! Tagged error values stored in cells.
//!
//! Evaluation never aborts a pass. A failing formula resolves to an
//! [`ErrorCode`] which becomes the cell's value, and the pass moves on.

use rhai::{Dynamic, EvalAltResult, Position};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Re-entrant or otherwise impossible calculation (e.g. a sheet executing itself).
    Calc,
    /// The per-pass evaluation budget or the per-formula operation limit was exceeded.
    Limit,
    /// Unknown function or variable, or a formula that does not parse.
    Name,
    /// No value available (e.g. no current message).
    NotAvailable,
    /// Reference to a streamsheet or cell that does not exist.
    Ref,
    /// Wrong argument type or value.
    Value,
    /// A call into another streamsheet has not returned yet.
    Waiting,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Calc => "#CALC",
            ErrorCode::Limit => "#LIMIT",
            ErrorCode::Name => "#NAME",
            ErrorCode::NotAvailable => "#NA",
            ErrorCode::Ref => "#REF",
            ErrorCode::Value => "#VALUE",
            ErrorCode::Waiting => "#WAITING",
        }
    }

    pub fn into_dynamic(self) -> Dynamic {
        Dynamic::from(self)
    }

    /// Extract an error code from a cell value, if it holds one.
    pub fn from_dynamic(value: &Dynamic) -> Option<ErrorCode> {
        value.clone().try_cast::<ErrorCode>()
    }

    /// Build a Rhai runtime error carrying this code, for use inside builtins.
    pub fn raise(self) -> Box<EvalAltResult> {
        EvalAltResult::ErrorRuntime(Dynamic::from(self), Position::NONE).into()
    }

    /// Map a Rhai evaluation failure to the error value shown in the cell.
    pub fn from_eval_error(err: &EvalAltResult) -> ErrorCode {
        match err {
            EvalAltResult::ErrorRuntime(value, _) => {
                ErrorCode::from_dynamic(value).unwrap_or(ErrorCode::Value)
            }
            EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => ErrorCode::from_eval_error(inner),
            EvalAltResult::ErrorTooManyOperations(_)
            | EvalAltResult::ErrorStackOverflow(_)
            | EvalAltResult::ErrorDataTooLarge(_, _) => ErrorCode::Limit,
            EvalAltResult::ErrorFunctionNotFound(_, _)
            | EvalAltResult::ErrorVariableNotFound(_, _)
            | EvalAltResult::ErrorParsing(_, _) => ErrorCode::Name,
            _ => ErrorCode::Value,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_round_trip() {
        let value = ErrorCode::Waiting.into_dynamic();
        assert_eq!(ErrorCode::from_dynamic(&value), Some(ErrorCode::Waiting));
        assert_eq!(ErrorCode::from_dynamic(&Dynamic::from(1_i64)), None);
    }

    #[test]
    fn test_raised_code_survives_eval_error_mapping() {
        let err = ErrorCode::Ref.raise();
        assert_eq!(ErrorCode::from_eval_error(&err), ErrorCode::Ref);

        let plain: Box<EvalAltResult> =
            EvalAltResult::ErrorRuntime("boom".into(), Position::NONE).into();
        assert_eq!(ErrorCode::from_eval_error(&plain), ErrorCode::Value);
    }
}
