//! streamsheets_engine - Formula evaluation for streamsheets (Rhai integration).

pub mod builtins;
pub mod engine;

#[cfg(test)]
mod tests {
    use crate::engine::*;
    use dashmap::DashMap;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Grid, ValueCache, SheetContext, Engine) {
        let grid: Grid = Arc::new(DashMap::new());
        let cache = ValueCache::default();
        let context = SheetContext::new();
        let engine = create_engine(grid.clone(), cache.clone(), context.clone());
        (grid, cache, context, engine)
    }

    fn eval_at(engine: &Engine, formula: &str, at: &CellRef) -> Dynamic {
        let ast = compile_formula(engine, formula, at, None).unwrap();
        eval_compiled(engine, &ast)
    }

    #[test]
    fn test_self_reference_reads_previous_value() {
        let (_grid, cache, _ctx, engine) = setup();
        let a1 = CellRef::new(0, 0);

        let first = eval_at(&engine, "A1 + 1", &a1);
        assert_eq!(first.as_float().unwrap(), 1.0);
        cache.insert(a1.clone(), first);

        let second = eval_at(&engine, "A1 + 1", &a1);
        assert_eq!(second.as_float().unwrap(), 2.0);
    }

    #[test]
    fn test_range_functions_read_constants_and_cache() {
        let (grid, cache, _ctx, engine) = setup();
        grid.insert(CellRef::new(0, 0), Cell::number(10.0));
        grid.insert(CellRef::new(0, 1), Cell::number(20.0));
        grid.insert(CellRef::new(0, 2), Cell::formula("A1 + A2"));
        cache.insert(CellRef::new(0, 2), Dynamic::from(30.0_f64));

        let at = CellRef::new(1, 0);
        assert_eq!(eval_at(&engine, "SUM(A1:A3)", &at).as_float().unwrap(), 60.0);
        assert_eq!(eval_at(&engine, "AVG(A1:A3)", &at).as_float().unwrap(), 20.0);
        assert_eq!(eval_at(&engine, "MAX(A1:A3)", &at).as_float().unwrap(), 30.0);
        assert_eq!(eval_at(&engine, "MIN(A1:A3)", &at).as_float().unwrap(), 10.0);
        assert_eq!(eval_at(&engine, "COUNT(A1:A5)", &at).as_float().unwrap(), 3.0);
    }

    #[test]
    fn test_continue_records_target_address() {
        let (_grid, _cache, ctx, engine) = setup();
        let value = eval_at(&engine, "CONTINUE(C4)", &CellRef::new(0, 0));
        assert!(value.as_bool().unwrap());

        let directives = ctx.take_directives();
        assert!(matches!(
            directives.as_slice(),
            [Directive::Continue(target)] if *target == CellRef::new(2, 3)
        ));
    }

    #[test]
    fn test_continue_to_invalid_string_is_ref_error() {
        let (_grid, _cache, ctx, engine) = setup();
        let value = eval_at(&engine, "CONTINUE(\"nowhere\")", &CellRef::new(0, 0));
        assert_eq!(ErrorCode::from_dynamic(&value), Some(ErrorCode::Ref));
        assert!(ctx.take_directives().is_empty());
    }

    #[test]
    fn test_execute_records_request() {
        let (_grid, _cache, ctx, engine) = setup();
        let value = eval_at(&engine, "EXECUTE(\"Worker\", 3.0, #{ n: 1 }, true)", &CellRef::new(0, 0));
        assert_eq!(ErrorCode::from_dynamic(&value), Some(ErrorCode::Waiting));

        let directives = ctx.take_directives();
        let [Directive::Execute(request)] = directives.as_slice() else {
            panic!("expected a single execute directive");
        };
        assert_eq!(request.sheet, "Worker");
        assert_eq!(request.repetitions, 3);
        assert_eq!(request.args, Some(json!({ "n": 1 })));
        assert!(request.asynchronous);
    }

    #[test]
    fn test_execute_rejects_zero_repetitions() {
        let (_grid, _cache, ctx, engine) = setup();
        let value = eval_at(&engine, "EXECUTE(\"Worker\", 0)", &CellRef::new(0, 0));
        assert_eq!(ErrorCode::from_dynamic(&value), Some(ErrorCode::Value));
        assert!(ctx.take_directives().is_empty());
    }

    #[test]
    fn test_return_and_stop_directives() {
        let (_grid, _cache, ctx, engine) = setup();
        eval_at(&engine, "RETURN(42)", &CellRef::new(0, 0));
        eval_at(&engine, "STOP()", &CellRef::new(0, 1));
        let directives = ctx.take_directives();
        assert!(matches!(&directives[0], Directive::Return(v) if v.as_int().unwrap() == 42));
        assert!(matches!(directives[1], Directive::Stop));
    }

    #[test]
    fn test_message_readers() {
        let (_grid, _cache, ctx, engine) = setup();
        let at = CellRef::new(0, 0);

        let missing = eval_at(&engine, "INBOXDATA(\"v\")", &at);
        assert_eq!(ErrorCode::from_dynamic(&missing), Some(ErrorCode::NotAvailable));

        ctx.begin_pass(PassInfo {
            message: Some(json!({ "v": 7, "items": [{ "x": 1 }, { "x": 2 }] })),
            loop_element: Some(json!({ "x": 2 })),
            loop_index: 2,
            steps: 5,
            repeatsteps: 1,
            cycle: 9,
        });
        assert_eq!(eval_at(&engine, "INBOXDATA(\"v\")", &at).as_int().unwrap(), 7);
        assert_eq!(eval_at(&engine, "INBOXDATA(\"items.0.x\")", &at).as_int().unwrap(), 1);
        assert_eq!(eval_at(&engine, "LOOPDATA(\"x\")", &at).as_int().unwrap(), 2);
        assert_eq!(eval_at(&engine, "LOOPINDEX()", &at).as_int().unwrap(), 2);
        assert_eq!(eval_at(&engine, "STEPS() + REPEATSTEPS()", &at).as_int().unwrap(), 6);
        assert_eq!(eval_at(&engine, "CYCLE()", &at).as_int().unwrap(), 9);
    }

    #[test]
    fn test_outbox_records_json_payload() {
        let (_grid, _cache, ctx, engine) = setup();
        eval_at(&engine, "OUTBOX(#{ id: \"a\", n: 2 })", &CellRef::new(0, 0));
        let directives = ctx.take_directives();
        assert!(matches!(
            &directives[0],
            Directive::Outbox(payload) if *payload == json!({ "id": "a", "n": 2 })
        ));
    }

    #[test]
    fn test_errors_become_values() {
        let (_grid, _cache, _ctx, engine) = setup();
        let at = CellRef::new(0, 0);
        assert_eq!(
            compile_formula(&engine, "1 +", &at, None).err(),
            Some(ErrorCode::Name)
        );
        let unknown = eval_at(&engine, "NO_SUCH_FN(1)", &at);
        assert_eq!(ErrorCode::from_dynamic(&unknown), Some(ErrorCode::Name));
        let runaway = eval_at(&engine, "loop { }", &at);
        assert_eq!(ErrorCode::from_dynamic(&runaway), Some(ErrorCode::Limit));
    }

    #[test]
    fn test_custom_functions() {
        let grid: Grid = Arc::new(DashMap::new());
        let custom_script = r#"
            fn double(x) { x * 2.0 }
        "#;
        let (engine, custom_ast, error) = create_engine_with_functions(
            grid,
            ValueCache::default(),
            SheetContext::new(),
            Some(custom_script),
        );
        assert!(error.is_none());

        let ast = compile_formula(&engine, "double(5.0)", &CellRef::new(0, 0), custom_ast.as_ref())
            .unwrap();
        assert_eq!(eval_compiled(&engine, &ast).as_float().unwrap(), 10.0);

        // Formulas without custom functions compile from the plain formula.
        let plain = compile_formula(&engine, "1.5 * 2.0", &CellRef::new(0, 1), None).unwrap();
        assert_eq!(eval_compiled(&engine, &plain).as_float().unwrap(), 3.0);
    }

    #[test]
    fn test_custom_functions_with_syntax_error() {
        let grid: Grid = Arc::new(DashMap::new());
        let (_engine, _ast, error) = create_engine_with_functions(
            grid,
            ValueCache::default(),
            SheetContext::new(),
            Some("fn broken( { }"),
        );
        assert!(error.unwrap().contains("Error"));
    }
}
