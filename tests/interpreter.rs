#[cfg(test)]
mod interpreter_tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::fs;
    use std::io::{self, Write};
    use std::path::PathBuf;
    use std::rc::Rc;
    use std::thread;

    use zen::config::Config;
    use zen::error::{Result, ZenError};
    use zen::interpreter::*;
    use zen::module::{FsModuleLoader, ModuleLoader};
    use zen::parser::{Parser, Program};
    use zen::scope::Scope;
    use zen::stdlib::Builtins;
    use zen::store::JsonStore;
    use zen::value::Value;

    /// Collects everything a script prints.
    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Serves modules from memory and counts how often each is read.
    struct MemoryLoader {
        modules: HashMap<String, String>,
        loads: Rc<Cell<usize>>,
    }

    impl ModuleLoader for MemoryLoader {
        fn load(&self, path: &str) -> Result<String> {
            self.loads.set(self.loads.get() + 1);
            self.modules
                .get(path)
                .cloned()
                .ok_or_else(|| ZenError::module(path, "not found"))
        }
    }

    fn interpreter(config: Config) -> (Interpreter, Capture) {
        let capture: Capture = Capture::default();
        let interpreter: Interpreter =
            Interpreter::new(config).with_output(Box::new(capture.clone()));

        (interpreter, capture)
    }

    fn eval(source: &str) -> Value {
        let (mut interpreter, _) = interpreter(Config::default());
        interpreter
            .run(source)
            .unwrap_or_else(|e| panic!("{:?} failed: {}", source, e))
    }

    fn eval_err(config: Config, source: &str) -> String {
        let (mut interpreter, _) = interpreter(config);
        match interpreter.run(source) {
            Ok(value) => panic!("{:?} should fail, got {}", source, value),
            Err(e) => e.to_string(),
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir: PathBuf =
            std::env::temp_dir().join(format!("zen-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    // ───────────────────────── basics ─────────────────────────────

    #[test]
    fn test_interpreter_01_arithmetic_and_strings() {
        assert_eq!(eval("10 / 4").as_number(), Some(2.5));
        assert_eq!(eval("\"n=\" + 3").to_string(), "n=3");
        assert_eq!(eval("(1 + 2) * 3").as_number(), Some(9.0));
        assert_eq!(eval("7 % 4").as_number(), Some(3.0));
    }

    #[test]
    fn test_interpreter_02_null_aware_logic() {
        assert!(eval("null and true").is_null());
        assert!(eval("true or null").is_truthy());
        assert_eq!(eval("false or 5").as_number(), Some(5.0));
    }

    #[test]
    fn test_interpreter_03_print_is_captured() {
        let (mut interpreter, capture) = interpreter(Config::default());
        interpreter.run("print \"a\" 1 true\nprint [1, 2]").unwrap();

        assert_eq!(capture.text(), "a 1 true\n[1, 2]\n");
    }

    #[test]
    fn test_interpreter_04_ternary() {
        assert_eq!(eval("set x 5\nx > 3 ? \"big\" : \"small\"").to_string(), "big");
    }

    // ───────────────────────── loops ──────────────────────────────

    #[test]
    fn test_interpreter_05_while_counts_up() {
        let value = eval("set counter 0\nwhile counter < 5\n    set counter counter + 1\ncounter");
        assert_eq!(value.as_number(), Some(5.0));
    }

    #[test]
    fn test_interpreter_06_until_is_negated_while() {
        assert_eq!(eval("set n 0\nuntil n >= 3\n    set n n + 1\nn").as_number(), Some(3.0));
    }

    #[test]
    fn test_interpreter_07_break_and_continue() {
        let seen = eval(
            "set seen 0\nfor x in [1, 2, 3, 4]\n    if x = 3\n        break\n    set seen seen + 1\nseen",
        );
        assert_eq!(seen.as_number(), Some(2.0));

        let odd = eval(
            "set total 0\nfor i in 1..5\n    if i % 2 = 0\n        continue\n    set total total + i\ntotal",
        );
        assert_eq!(odd.as_number(), Some(9.0));
    }

    #[test]
    fn test_interpreter_08_for_over_strings_and_objects() {
        assert_eq!(
            eval("set out \"\"\nfor c in \"abc\"\n    set out c + out\nout").to_string(),
            "cba"
        );
        assert_eq!(
            eval("set p name \"x\", age 3\nset ks \"\"\nfor k in p\n    set ks ks + k\nks").to_string(),
            "nameage"
        );
    }

    #[test]
    fn test_interpreter_09_loop_limit() {
        let config = Config {
            max_loop_iterations: Some(10),
            ..Config::default()
        };

        let message: String = eval_err(config, "while true\n    set x 1\n");
        assert!(message.contains("Loop iteration limit"), "{}", message);
    }

    // ───────────────────────── functions ──────────────────────────

    #[test]
    fn test_interpreter_10_recursion() {
        let value = eval(
            "function fact n\n    if n <= 1\n        return 1\n    return n * fact (n - 1)\nfact 5",
        );
        assert_eq!(value.as_number(), Some(120.0));
    }

    #[test]
    fn test_interpreter_11_implicit_result_and_outer_scope() {
        let value = eval("set base 10\nfunction add_base x\n    x + base\nadd_base 5");
        assert_eq!(value.as_number(), Some(15.0));
    }

    #[test]
    fn test_interpreter_12_rest_parameters() {
        assert_eq!(
            eval("function tally first ...rest\n    len rest\ntally 1 2 3").as_number(),
            Some(2.0)
        );
    }

    #[test]
    fn test_interpreter_13_argument_count_mismatch() {
        let message: String = eval_err(Config::default(), "function f a\n    a\nf 1 2");
        assert!(message.contains("Argument count mismatch"), "{}", message);
    }

    #[test]
    fn test_interpreter_14_stack_overflow_is_a_runtime_error() {
        let config = Config {
            max_call_depth: 50,
            ..Config::default()
        };
        let (mut interpreter, _) = interpreter(config);

        let err = interpreter
            .run("function down n\n    return down n + 1\ndown 0")
            .unwrap_err();

        assert!(
            err.to_string()
                .contains("Stack overflow: maximum call depth 50 exceeded in 'down'"),
            "{}",
            err
        );

        let exception = interpreter.exception().expect("exception recorded");
        assert_eq!(exception.trace.len(), 50);
        assert_eq!(interpreter.call_depth(), 0);
    }

    #[test]
    fn test_interpreter_14b_default_depth_on_a_default_thread() {
        let message: String = thread::spawn(|| {
            let mut interpreter: Interpreter = Interpreter::new(Config::default())
                .with_output(Box::new(Capture::default()));

            let err = interpreter
                .run("function down n\n    return down n + 1\ndown 0")
                .unwrap_err();
            assert_eq!(interpreter.exception().map(|e| e.trace.len()), Some(2000));

            // deep but bounded recursion completes
            let sum = interpreter
                .run("function sum n\n    if n = 0\n        return 0\n    return n + (sum n - 1)\nsum 1500")
                .unwrap();
            assert_eq!(sum.as_number(), Some(1125750.0));

            err.to_string()
        })
        .join()
        .unwrap();

        assert!(message.contains("maximum call depth 2000"), "{}", message);
    }

    #[test]
    fn test_interpreter_15b_tail_call_arity_error_is_catchable() {
        let config = Config {
            tail_calls: true,
            ..Config::default()
        };
        let (mut interpreter, _) = interpreter(config);

        let value = interpreter
            .run("function f a\n    try\n        return f 1 2\n    catch e\n        return \"caught\"\nf 0")
            .unwrap();

        assert_eq!(value.to_string(), "caught");
        assert!(interpreter.exception().is_none());
    }

    #[test]
    fn test_interpreter_15_tail_calls_run_in_constant_depth() {
        let config = Config {
            tail_calls: true,
            max_call_depth: 10,
            ..Config::default()
        };
        let (mut interpreter, _) = interpreter(config);

        let value = interpreter
            .run("function countdown n acc\n    if n = 0\n        return acc\n    return countdown n - 1, acc + 1\ncountdown 100 0")
            .unwrap();

        assert_eq!(value.as_number(), Some(100.0));
        assert_eq!(interpreter.profile().tail_calls, 100);
    }

    #[test]
    fn test_interpreter_16_hot_functions() {
        let config = Config {
            hot_threshold: 3,
            ..Config::default()
        };
        let (mut interpreter, _) = interpreter(config);
        interpreter.run("function f\n    1\nf\nf\nf\nf").unwrap();

        assert_eq!(interpreter.profile().functions["f"].calls, 4);
        assert_eq!(interpreter.profile().hot_functions(), vec!["f"]);
    }

    #[test]
    fn test_interpreter_17_definitions_persist_between_runs() {
        let (mut interpreter, _) = interpreter(Config::default());
        interpreter.run("function twice x\n    x * 2\n").unwrap();

        assert_eq!(interpreter.run("twice 4").unwrap().as_number(), Some(8.0));
    }

    #[test]
    fn test_interpreter_17b_custom_builtins() {
        let mut builtins: Builtins = Builtins::new();
        builtins.register("shout", |args, _| {
            Value::string(format!("{}!", args.first().cloned().unwrap_or_default()))
        });

        let (interpreter, _) = interpreter(Config::default());
        let mut interpreter: Interpreter = interpreter.with_stdlib(Box::new(builtins));

        assert_eq!(interpreter.run("shout \"hey\"").unwrap().to_string(), "hey!");
    }

    // ───────────────────────── errors ─────────────────────────────

    #[test]
    fn test_interpreter_18_try_catch_binds_thrown_value() {
        let (mut interpreter, _) = interpreter(Config::default());
        let value = interpreter
            .run("set msg \"\"\ntry\n    throw \"boom\"\ncatch e\n    set msg e\nmsg")
            .unwrap();

        assert_eq!(value.to_string(), "boom");
        assert!(interpreter.exception().is_none());
    }

    #[test]
    fn test_interpreter_19_runtime_errors_are_catchable() {
        let value = eval("try\n    missing_fn 1\ncatch e\n    set msg e.message\nmsg");
        assert!(
            value.to_string().contains("Undefined function or variable: missing_fn"),
            "{}",
            value
        );
    }

    #[test]
    fn test_interpreter_20_uncaught_error_sets_the_exception_slot() {
        let (mut interpreter, _) = interpreter(Config::default());
        let err = interpreter.run("nope 1").unwrap_err();

        assert!(matches!(err, ZenError::Runtime { .. }));
        assert!(err
            .to_string()
            .contains("Undefined function or variable: nope"));
        assert!(interpreter.exception().is_some());

        interpreter.clear_exception();
        assert!(interpreter.exception().is_none());
    }

    #[test]
    fn test_interpreter_21_builtin_misuse_returns_an_error_value() {
        assert!(matches!(eval("upper 1"), Value::Error(_)));
    }

    #[test]
    fn test_interpreter_22_property_of_null() {
        let message: String = eval_err(Config::default(), "set o null\no.name");
        assert!(message.contains("Cannot read property 'name' of null"), "{}", message);
    }

    #[test]
    fn test_interpreter_23_parse_errors_stop_before_evaluation() {
        let (mut interpreter, capture) = interpreter(Config::default());
        let err = interpreter.run("print 1\nset + oops").unwrap_err();

        assert!(matches!(err, ZenError::Parse { .. }));
        assert_eq!(capture.text(), "");
    }

    // ───────────────────────── values ─────────────────────────────

    #[test]
    fn test_interpreter_24_arrays_are_shared_by_reference() {
        let (mut interpreter, _) = interpreter(Config::default());
        interpreter.run("set a [1, 2, 3]\nset b a").unwrap();

        // `a`, `b` and the copy returned here
        let a: Value = interpreter.get_variable("a").unwrap();
        assert_eq!(a.ref_count(), Some(3));
        drop(a);

        interpreter.run("b.push 4").unwrap();
        assert_eq!(interpreter.get_variable("a").unwrap().to_string(), "[1, 2, 3, 4]");
    }

    #[test]
    fn test_interpreter_24b_dropping_a_container_releases_its_elements() {
        let (mut interpreter, _) = interpreter(Config::default());
        interpreter.run("set inner [1]\nset outer [inner]").unwrap();

        let inner: Value = interpreter.get_variable("inner").unwrap();
        assert_eq!(inner.ref_count(), Some(3));
        drop(inner);

        interpreter.run("set outer null").unwrap();
        assert_eq!(interpreter.get_variable("inner").unwrap().ref_count(), Some(2));

        // parameters and locals go away with the call scope
        interpreter
            .run("function hold xs\n    set kept xs\n    len kept\nhold inner")
            .unwrap();
        assert_eq!(interpreter.get_variable("inner").unwrap().ref_count(), Some(2));
    }

    #[test]
    fn test_interpreter_24c_containers_never_hold_themselves() {
        let (mut interpreter, capture) = interpreter(Config::default());
        interpreter.run("set a [1]\nset a[0] a\nprint a").unwrap();
        assert_eq!(capture.text(), "[[1]]\n");

        assert_eq!(eval("set l [1]\nl.push l\nl").to_string(), "[1, [1]]");
        assert_eq!(
            eval("set o name \"x\"\nset o.me o\no.me.name").to_string(),
            "x"
        );
        assert!(eval("set o name \"x\"\nset o.me o\no.me.me").is_null());
    }

    #[test]
    fn test_interpreter_24d_bad_index_assignment_raises() {
        let huge: String = eval_err(Config::default(), "set a []\nset a[1e19] 1");
        assert!(huge.contains("too large"), "{}", huge);

        let negative: String = eval_err(Config::default(), "set a [1]\nset a[-1] 2");
        assert!(negative.contains("Invalid array index -1"), "{}", negative);

        let caught = eval("set a []\ntry\n    set a[1e19] 1\ncatch e\n    set m e.message\nm");
        assert!(caught.to_string().contains("too large"), "{}", caught);
    }

    #[test]
    fn test_interpreter_25_indexing() {
        assert_eq!(eval("set items [10, 20, 30]\nitems[-1]").as_number(), Some(30.0));
        assert!(eval("set items [10, 20, 30]\nitems[5]").is_null());
        assert_eq!(eval("set items [10, 20, 30]\nitems.0").as_number(), Some(10.0));
        assert_eq!(
            eval("set items [1]\nset items[2] 3\nitems").to_string(),
            "[1, null, 3]"
        );
    }

    #[test]
    fn test_interpreter_26_spread_in_arrays() {
        assert_eq!(eval("set a [1, 2]\nset b [0, ...a, 3]\nlen b").as_number(), Some(4.0));
    }

    #[test]
    fn test_interpreter_27_objects() {
        let value = eval("set user name \"Ada\", age 36\nset user.age 37\nuser.age");
        assert_eq!(value.as_number(), Some(37.0));
    }

    // ───────────────────────── classes ────────────────────────────

    #[test]
    fn test_interpreter_28_constructor_and_methods() {
        let source: &str = "class Counter\n    method constructor start\n        set self.count start\n    method increment\n        set self.count self.count + 1\n        return self.count\nset c new Counter 5\nc.increment\nc.increment";

        assert_eq!(eval(source).as_number(), Some(7.0));
    }

    #[test]
    fn test_interpreter_29_inherited_methods() {
        let source: &str = "class Animal\n    method constructor name\n        set self.name name\n    method speak\n        return self.name + \" makes a sound\"\nclass Dog extends Animal\n    method bark\n        return \"woof\"\nset d new Dog \"Rex\"\nd.speak";

        assert_eq!(eval(source).to_string(), "Rex makes a sound");
    }

    #[test]
    fn test_interpreter_30_unknown_class() {
        let message: String = eval_err(Config::default(), "set x new Ghost");
        assert!(message.contains("Undefined class: Ghost"), "{}", message);
    }

    // ───────────────────────── optimisations ──────────────────────

    #[test]
    fn test_interpreter_31_constant_folding_caches_literal_expressions() {
        let config = Config {
            constant_folding: true,
            ..Config::default()
        };
        let (mut interpreter, _) = interpreter(config);

        let value = interpreter
            .run("set total 0\nfor i in [1, 2, 3]\n    set total total + 2 * 3\ntotal")
            .unwrap();

        assert_eq!(value.as_number(), Some(18.0));
        assert_eq!(interpreter.profile().fold_misses, 1);
        assert_eq!(interpreter.profile().fold_hits, 2);
    }

    #[test]
    fn test_interpreter_31b_folding_never_shares_containers() {
        let source: &str = "set out []\nfor i in [1, 2]\n    set a 1..3\n    push out a[0]\n    set a[0] 99\nout";

        let plain: String = eval(source).to_string();
        assert_eq!(plain, "[1, 1]");

        let config = Config {
            constant_folding: true,
            ..Config::default()
        };
        let (mut interpreter, _) = interpreter(config);

        assert_eq!(interpreter.run(source).unwrap().to_string(), plain);
        assert_eq!(interpreter.profile().fold_hits, 0);
    }

    #[test]
    fn test_interpreter_32_dead_code_after_return_is_skipped() {
        let config = Config {
            dead_code_elimination: true,
            ..Config::default()
        };
        let (mut interpreter, capture) = interpreter(config);

        let value = interpreter
            .run("function f\n    return 1\n    print \"never\"\nf")
            .unwrap();

        assert_eq!(value.as_number(), Some(1.0));
        assert!(interpreter.profile().eliminated >= 1);
        assert_eq!(capture.text(), "");
    }

    #[test]
    fn test_interpreter_33_programs_can_be_evaluated_repeatedly() {
        let builtins: Builtins = Builtins::new();
        let program: Program =
            Parser::new("function sq x\n    x * x\nsq 7", Scope::new_ref(), &builtins).parse();
        assert!(!program.has_errors());

        let (mut first, _) = interpreter(Config::default());
        let (mut second, _) = interpreter(Config::default());

        assert_eq!(first.interpret(&program).unwrap().as_number(), Some(49.0));
        assert_eq!(first.interpret(&program).unwrap().as_number(), Some(49.0));
        assert_eq!(second.interpret(&program).unwrap().as_number(), Some(49.0));
    }

    // ───────────────────────── modules ────────────────────────────

    fn with_modules(modules: &[(&str, &str)]) -> (Interpreter, Rc<Cell<usize>>) {
        let loads: Rc<Cell<usize>> = Rc::new(Cell::new(0));
        let loader = MemoryLoader {
            modules: modules
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            loads: Rc::clone(&loads),
        };

        let (interpreter, _) = interpreter(Config::default());
        (interpreter.with_loader(Box::new(loader)), loads)
    }

    const MATH: &str = "export function add a b\n    return a + b\nset _hidden 1\n";

    #[test]
    fn test_interpreter_34_named_imports() {
        let (mut interpreter, loads) = with_modules(&[("math", MATH)]);

        let value = interpreter
            .run("import add from \"math\"\nimport add as plus from \"math\"\nadd 2 3")
            .unwrap();
        assert_eq!(value.as_number(), Some(5.0));
        assert_eq!(interpreter.run("plus 1 1").unwrap().as_number(), Some(2.0));

        // the second import is served from the cache
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn test_interpreter_35_explicit_exports_hide_everything_else() {
        let (mut interpreter, _) = with_modules(&[("math", MATH)]);

        let err = interpreter.run("import _hidden from \"math\"").unwrap_err();
        assert!(err.to_string().contains("has no export '_hidden'"), "{}", err);
    }

    #[test]
    fn test_interpreter_36_whole_module_import() {
        let util: &str = "function double x\n    x * 2\nset _secret 1\nset version 3\n";
        let (mut interpreter, _) = with_modules(&[("util", util)]);

        let value = interpreter.run("import \"util\"\ndouble version").unwrap();
        assert_eq!(value.as_number(), Some(6.0));
        assert!(interpreter.get_variable("_secret").is_none());
    }

    #[test]
    fn test_interpreter_37_missing_module() {
        let (mut interpreter, _) = with_modules(&[]);

        let err = interpreter.run("import x from \"nowhere\"").unwrap_err();
        assert!(err.to_string().contains("nowhere"), "{}", err);
    }

    #[test]
    fn test_interpreter_37b_circular_imports_raise() {
        let dir: PathBuf = temp_dir("cycle");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.zen"), "import \"b\"\nset x 1\n").unwrap();
        fs::write(dir.join("b.zen"), "import \"a\"\nset y 2\n").unwrap();

        let (interpreter, _) = interpreter(Config::default());
        let mut interpreter: Interpreter =
            interpreter.with_loader(Box::new(FsModuleLoader::new(dir.clone())));

        let err = interpreter.run("import \"a\"").unwrap_err();
        assert!(err.to_string().contains("Circular import: a -> b -> a"), "{}", err);

        assert_eq!(interpreter.run("1 + 1").unwrap().as_number(), Some(2.0));
        let _ = fs::remove_dir_all(&dir);
    }

    // ───────────────────────── key-path files ─────────────────────

    #[test]
    fn test_interpreter_38_put_then_get() {
        let dir: PathBuf = temp_dir("store");
        let (interpreter, _) = interpreter(Config::default());
        let mut interpreter: Interpreter =
            interpreter.with_store(Box::new(JsonStore::new(dir.clone())));

        let value = interpreter
            .run("put \"settings\" .db.host \"localhost\"\nget \"settings\" .db.host")
            .unwrap();
        assert_eq!(value.to_string(), "localhost");

        assert!(interpreter.run("get \"settings\" .db.port").unwrap().is_null());

        let copied = interpreter
            .run("put \"copy\" .h \"@ settings db.host\"\nget \"copy\" .h")
            .unwrap();
        assert_eq!(copied.to_string(), "localhost");

        assert!(dir.join("settings.json").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_interpreter_39_get_from_missing_file() {
        let dir: PathBuf = temp_dir("missing");
        let (interpreter, _) = interpreter(Config::default());
        let mut interpreter: Interpreter = interpreter.with_store(Box::new(JsonStore::new(dir)));

        let err = interpreter.run("get \"absent\" .a").unwrap_err();
        assert!(err.to_string().contains("file not found"), "{}", err);
    }
}
