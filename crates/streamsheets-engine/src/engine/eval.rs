use rhai::Engine;

use super::{AST, CellRef, Dynamic, ErrorCode, Grid, SheetContext, ValueCache};
use super::preprocess::preprocess_script_with_context;

/// Upper bound on Rhai operations for a single formula evaluation.
pub const MAX_OPERATIONS: u64 = 100_000;

/// Create a Rhai engine with built-ins bound to one sheet's grid, values and context.
pub fn create_engine(grid: Grid, value_cache: ValueCache, context: SheetContext) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);
    crate::builtins::register_builtins(&mut engine, grid, value_cache, context);
    engine
}

/// Create a Rhai engine with built-ins registered.
/// Optionally compiles custom functions from the provided script.
/// Returns the engine, compiled AST (if any), and any error message.
pub fn create_engine_with_functions(
    grid: Grid,
    value_cache: ValueCache,
    context: SheetContext,
    custom_script: Option<&str>,
) -> (Engine, Option<AST>, Option<String>) {
    let engine = create_engine(grid, value_cache, context);

    let (ast, error) = if let Some(script) = custom_script {
        match engine.compile(script) {
            Ok(ast) => (Some(ast), None),
            Err(e) => (None, Some(format!("Error in custom functions: {}", e))),
        }
    } else {
        (None, None)
    };

    (engine, ast, error)
}

/// Preprocess and compile the formula stored at `at`.
///
/// Custom functions are merged in once here so each pass only runs the AST.
/// A formula that does not parse compiles to `#NAME`.
pub fn compile_formula(
    engine: &Engine,
    formula: &str,
    at: &CellRef,
    custom_ast: Option<&AST>,
) -> Result<AST, ErrorCode> {
    let processed = preprocess_script_with_context(formula, Some(at));
    let formula_ast = engine.compile(&processed).map_err(|_| ErrorCode::Name)?;
    Ok(match custom_ast {
        Some(custom) => custom.merge(&formula_ast),
        None => formula_ast,
    })
}

/// Run a compiled formula. Failures become error values, never panics or aborts.
pub fn eval_compiled(engine: &Engine, ast: &AST) -> Dynamic {
    match engine.eval_ast::<Dynamic>(ast) {
        Ok(value) => value,
        Err(err) => ErrorCode::from_eval_error(&err).into_dynamic(),
    }
}
