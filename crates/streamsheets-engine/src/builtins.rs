//! Built-in formula functions (Rust) and their metadata.
//!
//! Conventions:
//! - Formula-facing built-in names are ALL CAPS (e.g. `SUM`, `EXECUTE`).
//! - Range built-ins rewrite to ALLCAPS Rhai function names (e.g. `SUM_RANGE`).
//! - Reference built-ins take a cell address, not its value; they rewrite
//!   `CONTINUE(B3)` to `CONTINUE_AT(1, 2)`.
//! - If you add a new range or reference function, update the tables below
//!   and register its implementation in `register_builtins`.
//!
//! Control-flow built-ins never touch the scheduler. They record a
//! [`Directive`] in the [`SheetContext`] and the stepping loop acts on it
//! once the cell has been evaluated.

use crate::engine::{
    CellRef, CellType, Directive, ErrorCode, ExecuteRequest, Grid, SheetContext, ValueCache,
    dynamic_to_json, json_to_dynamic, resolve_path,
};
use rand::Rng;
use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult};
use std::sync::OnceLock;

pub struct RangeBuiltin {
    pub sheet_name: &'static str,
    pub rhai_name: &'static str,
    #[allow(dead_code)]
    pub description: &'static str,
}

pub const RANGE_BUILTINS: &[RangeBuiltin] = &[
    RangeBuiltin {
        sheet_name: "SUM",
        rhai_name: "SUM_RANGE",
        description: "Sum of numeric values in a cell range",
    },
    RangeBuiltin {
        sheet_name: "AVG",
        rhai_name: "AVG_RANGE",
        description: "Average of numeric values in a cell range",
    },
    RangeBuiltin {
        sheet_name: "COUNT",
        rhai_name: "COUNT_RANGE",
        description: "Count of non-empty cells in a cell range",
    },
    RangeBuiltin {
        sheet_name: "MIN",
        rhai_name: "MIN_RANGE",
        description: "Minimum numeric value in a cell range",
    },
    RangeBuiltin {
        sheet_name: "MAX",
        rhai_name: "MAX_RANGE",
        description: "Maximum numeric value in a cell range",
    },
];

pub struct RefBuiltin {
    pub sheet_name: &'static str,
    pub rhai_name: &'static str,
    #[allow(dead_code)]
    pub description: &'static str,
}

pub const REF_BUILTINS: &[RefBuiltin] = &[RefBuiltin {
    sheet_name: "CONTINUE",
    rhai_name: "CONTINUE_AT",
    description: "Continue the calculation pass at the given cell",
}];

/// Regex that matches built-in range calls like `SUM(A1:B5)`.
///
/// Captures:
/// - group 1: function name (e.g. `SUM`)
/// - group 2: start cell ref (e.g. `A1`)
/// - group 3: end cell ref (e.g. `B5`)
pub fn range_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = RANGE_BUILTINS
            .iter()
            .map(|b| b.sheet_name)
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(
            r"\b({})\(\s*([A-Za-z]+[0-9]+):([A-Za-z]+[0-9]+)\s*\)",
            names
        ))
        .expect("built-in range regex must compile")
    })
}

/// Regex that matches reference calls like `CONTINUE(B3)`.
pub fn ref_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = REF_BUILTINS
            .iter()
            .map(|b| b.sheet_name)
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"\b({})\(\s*([A-Za-z]+[0-9]+)\s*\)", names))
            .expect("built-in reference regex must compile")
    })
}

pub fn range_rhai_name(sheet_name: &str) -> Option<&'static str> {
    RANGE_BUILTINS
        .iter()
        .find(|b| b.sheet_name == sheet_name)
        .map(|b| b.rhai_name)
}

pub fn ref_rhai_name(sheet_name: &str) -> Option<&'static str> {
    REF_BUILTINS
        .iter()
        .find(|b| b.sheet_name == sheet_name)
        .map(|b| b.rhai_name)
}

fn to_index(value: i64) -> Result<usize, Box<EvalAltResult>> {
    usize::try_from(value).map_err(|_| ErrorCode::Ref.raise())
}

fn to_repetitions(value: &Dynamic) -> Result<u32, Box<EvalAltResult>> {
    let n = if let Ok(n) = value.as_int() {
        n
    } else if let Ok(f) = value.as_float() {
        f.trunc() as i64
    } else {
        return Err(ErrorCode::Value.raise());
    };
    if n < 1 {
        return Err(ErrorCode::Value.raise());
    }
    u32::try_from(n).map_err(|_| ErrorCode::Value.raise())
}

/// Numeric value of a cell as seen by formulas.
///
/// Formula cells are read from the value cache; a formula that has not been
/// evaluated yet reads as 0 so self-referencing counters start from zero.
fn cell_number(grid: &Grid, value_cache: &ValueCache, col: usize, row: usize) -> Option<f64> {
    let cell_ref = CellRef::new(col, row);

    if let Some(cached) = value_cache.get(&cell_ref) {
        if let Ok(n) = cached.as_float() {
            return Some(n);
        }
        if let Ok(n) = cached.as_int() {
            return Some(n as f64);
        }
        if cached.is_unit() {
            return Some(0.0);
        }
        return None;
    }

    match grid.get(&cell_ref).map(|entry| entry.contents.clone()) {
        Some(CellType::Number(n)) => Some(n),
        Some(CellType::Text(_)) => None,
        _ => Some(0.0),
    }
}

fn cell_is_filled(grid: &Grid, value_cache: &ValueCache, col: usize, row: usize) -> bool {
    let cell_ref = CellRef::new(col, row);
    if let Some(cached) = value_cache.get(&cell_ref) {
        return !cached.is_unit();
    }
    grid.get(&cell_ref)
        .is_some_and(|entry| !matches!(entry.contents, CellType::Empty))
}

fn range_numbers(
    grid: &Grid,
    value_cache: &ValueCache,
    c1: i64,
    r1: i64,
    c2: i64,
    r2: i64,
) -> Vec<f64> {
    let (min_col, max_col) = (c1.min(c2).max(0) as usize, c1.max(c2).max(0) as usize);
    let (min_row, max_row) = (r1.min(r2).max(0) as usize, r1.max(r2).max(0) as usize);
    let mut values = Vec::new();
    for row in min_row..=max_row {
        for col in min_col..=max_col {
            if let Some(n) = cell_number(grid, value_cache, col, row) {
                values.push(n);
            }
        }
    }
    values
}

/// Register all built-in functions into the Rhai engine.
pub fn register_builtins(
    engine: &mut Engine,
    grid: Grid,
    value_cache: ValueCache,
    context: SheetContext,
) {
    engine.register_type_with_name::<ErrorCode>("ErrorCode");
    engine.register_fn("to_string", |code: &mut ErrorCode| code.to_string());

    register_grid_readers(engine, grid, value_cache);
    register_control_flow(engine, context.clone());
    register_message_readers(engine, context);

    engine.register_fn("POW", |base: f64, exp: f64| -> f64 { base.powf(exp) });
    engine.register_fn("POW", |base: i64, exp: i64| -> f64 {
        (base as f64).powf(exp as f64)
    });
    engine.register_fn("SQRT", |x: f64| -> f64 { x.sqrt() });
    engine.register_fn("SQRT", |x: i64| -> f64 { (x as f64).sqrt() });

    // RAND(): random float in [0.0, 1.0)
    engine.register_fn("RAND", || -> f64 { rand::thread_rng().r#gen() });

    // RANDINT(min, max): random integer in [min, max] inclusive
    engine.register_fn(
        "RANDINT",
        |min: i64, max: i64| -> Result<i64, Box<EvalAltResult>> {
            if min > max {
                return Err(ErrorCode::Value.raise());
            }
            Ok(rand::thread_rng().r#gen_range(min..=max))
        },
    );

    // NOW(): current UTC time as RFC 3339
    engine.register_fn("NOW", || -> String { chrono::Utc::now().to_rfc3339() });
}

fn register_grid_readers(engine: &mut Engine, grid: Grid, value_cache: ValueCache) {
    // CELL(col, row): numeric value at cell (text -> NaN)
    let grid_cell = grid.clone();
    let cache_cell = value_cache.clone();
    engine.register_fn("CELL", move |col: i64, row: i64| -> Result<f64, Box<EvalAltResult>> {
        let (col, row) = (to_index(col)?, to_index(row)?);
        Ok(cell_number(&grid_cell, &cache_cell, col, row).unwrap_or(f64::NAN))
    });

    // VALUE(col, row): typed value at cell as Dynamic.
    // Empty cells and formulas that have not run yet read as "".
    let grid_value = grid.clone();
    let cache_value = value_cache.clone();
    engine.register_fn(
        "VALUE",
        move |col: i64, row: i64| -> Result<Dynamic, Box<EvalAltResult>> {
            let cell_ref = CellRef::new(to_index(col)?, to_index(row)?);
            if let Some(cached) = cache_value.get(&cell_ref) {
                return Ok(cached.clone());
            }
            let contents = grid_value.get(&cell_ref).map(|entry| entry.contents.clone());
            Ok(match contents {
                Some(CellType::Number(n)) => Dynamic::from(n),
                Some(CellType::Text(s)) => Dynamic::from(s),
                _ => Dynamic::from(String::new()),
            })
        },
    );

    let (g, c) = (grid.clone(), value_cache.clone());
    engine.register_fn("SUM_RANGE", move |c1: i64, r1: i64, c2: i64, r2: i64| -> f64 {
        range_numbers(&g, &c, c1, r1, c2, r2).iter().sum()
    });

    let (g, c) = (grid.clone(), value_cache.clone());
    engine.register_fn("AVG_RANGE", move |c1: i64, r1: i64, c2: i64, r2: i64| -> f64 {
        let values = range_numbers(&g, &c, c1, r1, c2, r2);
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    });

    let (g, c) = (grid.clone(), value_cache.clone());
    engine.register_fn("COUNT_RANGE", move |c1: i64, r1: i64, c2: i64, r2: i64| -> f64 {
        let (min_col, max_col) = (c1.min(c2).max(0) as usize, c1.max(c2).max(0) as usize);
        let (min_row, max_row) = (r1.min(r2).max(0) as usize, r1.max(r2).max(0) as usize);
        let mut count = 0usize;
        for row in min_row..=max_row {
            for col in min_col..=max_col {
                if cell_is_filled(&g, &c, col, row) {
                    count += 1;
                }
            }
        }
        count as f64
    });

    let (g, c) = (grid.clone(), value_cache.clone());
    engine.register_fn("MIN_RANGE", move |c1: i64, r1: i64, c2: i64, r2: i64| -> f64 {
        range_numbers(&g, &c, c1, r1, c2, r2)
            .into_iter()
            .reduce(f64::min)
            .unwrap_or(0.0)
    });

    let (g, c) = (grid, value_cache);
    engine.register_fn("MAX_RANGE", move |c1: i64, r1: i64, c2: i64, r2: i64| -> f64 {
        range_numbers(&g, &c, c1, r1, c2, r2)
            .into_iter()
            .reduce(f64::max)
            .unwrap_or(0.0)
    });
}

fn register_control_flow(engine: &mut Engine, context: SheetContext) {
    // CONTINUE_AT(col, row) / CONTINUE("B3"): redirect the calculation pointer
    let ctx = context.clone();
    engine.register_fn(
        "CONTINUE_AT",
        move |col: i64, row: i64| -> Result<bool, Box<EvalAltResult>> {
            let target = CellRef::new(to_index(col)?, to_index(row)?);
            ctx.push(Directive::Continue(target));
            Ok(true)
        },
    );
    let ctx = context.clone();
    engine.register_fn(
        "CONTINUE",
        move |target: &str| -> Result<bool, Box<EvalAltResult>> {
            let target = CellRef::from_str(target).ok_or_else(|| ErrorCode::Ref.raise())?;
            ctx.push(Directive::Continue(target));
            Ok(true)
        },
    );

    // RETURN([value]): finish the current repeat run and answer a pending EXECUTE
    let ctx = context.clone();
    engine.register_fn("RETURN", move || -> bool {
        ctx.push(Directive::Return(Dynamic::from(true)));
        true
    });
    let ctx = context.clone();
    engine.register_fn("RETURN", move |value: Dynamic| -> bool {
        ctx.push(Directive::Return(value));
        true
    });

    // STOP(): end the pass here
    let ctx = context.clone();
    engine.register_fn("STOP", move || -> bool {
        ctx.push(Directive::Stop);
        true
    });

    // EXECUTE(sheet [, repetitions [, args [, async]]])
    // The stepping loop replaces the returned placeholder with the call status.
    let ctx = context.clone();
    engine.register_fn("EXECUTE", move |sheet: &str| -> Dynamic {
        ctx.push(Directive::Execute(ExecuteRequest {
            sheet: sheet.to_string(),
            repetitions: 1,
            args: None,
            asynchronous: false,
        }));
        ErrorCode::Waiting.into_dynamic()
    });
    let ctx = context.clone();
    engine.register_fn(
        "EXECUTE",
        move |sheet: &str, reps: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            ctx.push(Directive::Execute(ExecuteRequest {
                sheet: sheet.to_string(),
                repetitions: to_repetitions(&reps)?,
                args: None,
                asynchronous: false,
            }));
            Ok(ErrorCode::Waiting.into_dynamic())
        },
    );
    let ctx = context.clone();
    engine.register_fn(
        "EXECUTE",
        move |sheet: &str, reps: Dynamic, args: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            ctx.push(Directive::Execute(ExecuteRequest {
                sheet: sheet.to_string(),
                repetitions: to_repetitions(&reps)?,
                args: Some(dynamic_to_json(&args)),
                asynchronous: false,
            }));
            Ok(ErrorCode::Waiting.into_dynamic())
        },
    );
    let ctx = context.clone();
    engine.register_fn(
        "EXECUTE",
        move |sheet: &str,
              reps: Dynamic,
              args: Dynamic,
              asynchronous: bool|
              -> Result<Dynamic, Box<EvalAltResult>> {
            let args = if args.is_unit() {
                None
            } else {
                Some(dynamic_to_json(&args))
            };
            ctx.push(Directive::Execute(ExecuteRequest {
                sheet: sheet.to_string(),
                repetitions: to_repetitions(&reps)?,
                args,
                asynchronous,
            }));
            Ok(ErrorCode::Waiting.into_dynamic())
        },
    );

    // OUTBOX(payload): publish a message to the machine outbox
    let ctx = context;
    engine.register_fn("OUTBOX", move |payload: Dynamic| -> bool {
        ctx.push(Directive::Outbox(dynamic_to_json(&payload)));
        true
    });
}

fn register_message_readers(engine: &mut Engine, context: SheetContext) {
    fn read(value: Option<serde_json::Value>, path: &str) -> Result<Dynamic, Box<EvalAltResult>> {
        let value = value.ok_or_else(|| ErrorCode::NotAvailable.raise())?;
        resolve_path(&value, path)
            .map(json_to_dynamic)
            .ok_or_else(|| ErrorCode::NotAvailable.raise())
    }

    let ctx = context.clone();
    engine.register_fn("INBOXDATA", move || read(ctx.info().message, ""));
    let ctx = context.clone();
    engine.register_fn("INBOXDATA", move |path: &str| read(ctx.info().message, path));

    let ctx = context.clone();
    engine.register_fn("LOOPDATA", move || read(ctx.info().loop_element, ""));
    let ctx = context.clone();
    engine.register_fn("LOOPDATA", move |path: &str| read(ctx.info().loop_element, path));

    let ctx = context.clone();
    engine.register_fn("LOOPINDEX", move || -> i64 { ctx.info().loop_index as i64 });
    let ctx = context.clone();
    engine.register_fn("STEPS", move || -> i64 { ctx.info().steps as i64 });
    let ctx = context.clone();
    engine.register_fn("REPEATSTEPS", move || -> i64 { ctx.info().repeatsteps as i64 });
    let ctx = context;
    engine.register_fn("CYCLE", move || -> i64 { ctx.info().cycle as i64 });
}
