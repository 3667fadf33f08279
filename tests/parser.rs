#[cfg(test)]
mod parser_tests {
    use std::rc::Rc;

    use zen::ast::*;
    use zen::ast_printer::AstPrinter;
    use zen::parser::*;
    use zen::scope::{Scope, ScopeRef};
    use zen::stdlib::Builtins;

    fn parse(source: &str) -> Program {
        let builtins: Builtins = Builtins::new();
        Parser::new(source, Scope::new_ref(), &builtins).parse()
    }

    /// Parses without errors and renders the tree in prefix form.
    fn tree(source: &str) -> String {
        let program: Program = parse(source);
        assert!(
            !program.has_errors(),
            "unexpected errors for {:?}: {:?}",
            source,
            program.errors
        );

        AstPrinter::print(&program.body)
    }

    #[test]
    fn test_parser_01_builtin_call_with_string() {
        let program: Program = parse("print \"hello\"");

        match program.statements() {
            [Ast::FunctionCall { name, args, .. }] => {
                assert_eq!(name, "print");
                assert_eq!(args, &vec![Ast::Str("hello".into())]);
            }
            other => panic!("expected a single call, got {:?}", other),
        }
    }

    #[test]
    fn test_parser_02_binary_value() {
        assert_eq!(tree("set z x + y"), "(set z (+ x y))");
    }

    #[test]
    fn test_parser_03_precedence() {
        assert_eq!(tree("set r 1 + 2 * 3 - 4"), "(set r (- (+ 1 (* 2 3)) 4))");
        assert_eq!(tree("set ok a < b and not c"), "(set ok (and (< a b) (not c)))");
    }

    #[test]
    fn test_parser_04_implicit_object() {
        assert_eq!(
            tree("set person name \"Alice\", age 30"),
            "(set person (object (name \"Alice\") (age 30)))"
        );

        let program: Program = parse("set person name \"Alice\", age 30");
        let [Ast::VariableDefinition { value, .. }] = program.statements() else {
            panic!("expected one definition");
        };
        let Ast::Object(pairs) = &**value else {
            panic!("expected an object, got {:?}", value);
        };
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["name", "age"]);
    }

    #[test]
    fn test_parser_05_identifier_list_is_shorthand_object() {
        assert_eq!(tree("set point x, y"), "(set point (object (x x) (y y)))");
    }

    #[test]
    fn test_parser_06_boolean_starts_object() {
        assert_eq!(
            tree("set config debug true, level 3"),
            "(set config (object (debug true) (level 3)))"
        );
    }

    #[test]
    fn test_parser_07_array_with_nested_call() {
        assert_eq!(
            tree("set a [1, 2, len \"abc\"]"),
            "(set a (array 1 2 (call len \"abc\")))"
        );
    }

    #[test]
    fn test_parser_08_ternary() {
        assert_eq!(
            tree("set a x > 1 ? \"big\" : \"small\""),
            "(set a (? (> x 1) \"big\" \"small\"))"
        );
    }

    #[test]
    fn test_parser_09_error_recovery_keeps_valid_statements() {
        let program: Program =
            parse("set valid_var 42\nset + invalid_syntax\nset another_valid_var 13");

        let definitions: usize = program
            .statements()
            .iter()
            .filter(|s| matches!(s, Ast::VariableDefinition { .. }))
            .count();

        assert_eq!(definitions, 2);
        assert!(program.error_count() >= 1);
    }

    #[test]
    fn test_parser_10_functions_are_registered_while_parsing() {
        let scope: ScopeRef = Scope::new_ref();
        let builtins: Builtins = Builtins::new();
        let program: Program = Parser::new(
            "function add a b\n    return a + b\nadd 1 2\n",
            Rc::clone(&scope),
            &builtins,
        )
        .parse();

        assert!(!program.has_errors());
        assert!(scope.borrow().has_function("add"));
        assert_eq!(
            AstPrinter::print(&program.body),
            "(function add (a b) {(return (+ a b))})\n(call add 1 2)"
        );
    }

    #[test]
    fn test_parser_11_dropping_the_tree_releases_functions() {
        let scope: ScopeRef = Scope::new_ref();
        let builtins: Builtins = Builtins::new();
        let program: Program =
            Parser::new("function f\n    return 1\n", Rc::clone(&scope), &builtins).parse();

        let def: Rc<FunctionDef> = scope.borrow().local_function("f").expect("registered");
        let weak = Rc::downgrade(&def);
        drop(def);

        assert!(weak.upgrade().is_some());

        drop(program);
        drop(scope);

        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_parser_12_rest_parameters() {
        assert_eq!(
            tree("function total first ...rest\n    len rest\n"),
            "(function total (first ...rest) {(call len rest)})"
        );
    }

    #[test]
    fn test_parser_13_if_elif_else() {
        assert_eq!(
            tree("if x > 1\n    print 1\nelif x > 0\n    print 2\nelse\n    print 3\n"),
            "(if ((> x 1) {(call print 1)}) ((> x 0) {(call print 2)}) (else {(call print 3)}))"
        );
    }

    #[test]
    fn test_parser_14_natural_language_conditionals() {
        assert_eq!(
            tree("unless x > 3\n    print x\n"),
            "(if ((not (> x 3)) {(call print x)}))"
        );
        assert_eq!(
            tree("until n >= 10\n    set n n + 1\n"),
            "(while (not (>= n 10)) {(set n (+ n 1))})"
        );
        assert_eq!(
            tree("when x > 0 then print 1"),
            "(if ((> x 0) {(call print 1)}))"
        );
    }

    #[test]
    fn test_parser_15_for_and_loop_control() {
        assert_eq!(
            tree("for i in 1..3\n    if i = 2\n        continue\n    print i\n"),
            "(for i (.. 1 3) {(if ((= i 2) {(continue)})); (call print i)})"
        );
    }

    #[test]
    fn test_parser_16_classes() {
        let source: &str = "class Dog extends Animal\n    method speak\n        return \"woof\"\n    function legs\n        return 4\n";
        let scope: ScopeRef = Scope::new_ref();
        let builtins: Builtins = Builtins::new();
        let program: Program = Parser::new(source, Rc::clone(&scope), &builtins).parse();

        assert!(!program.has_errors(), "{:?}", program.errors);

        let [Ast::ClassDefinition(class)] = program.statements() else {
            panic!("expected a class, got {:?}", program.statements());
        };
        assert_eq!(class.name, "Dog");
        assert_eq!(class.parent.as_deref(), Some("Animal"));

        let names: Vec<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["speak", "legs"]);

        // methods stay out of the global function table
        assert!(!scope.borrow().has_function("speak"));
    }

    #[test]
    fn test_parser_17_object_creation_and_methods() {
        assert_eq!(tree("set c new Counter 5"), "(set c (new Counter 5))");
        assert_eq!(tree("list.push 4"), "(call list.push 4)");
        assert_eq!(tree("c.increment"), "(call c.increment)");
        assert_eq!(tree("set n c.count"), "(set n (. c count))");
    }

    #[test]
    fn test_parser_18_member_and_index_access() {
        assert_eq!(tree("set first items.0"), "(set first (index items 0))");
        assert_eq!(tree("set last items[2]"), "(set last (index items 2))");
        assert_eq!(tree("set user.name \"Bo\""), "(set (. user name) \"Bo\")");
    }

    #[test]
    fn test_parser_19_imports_and_exports() {
        assert_eq!(
            tree("import add, sub as minus from \"math\""),
            "(import \"math\" add sub:minus)"
        );
        assert_eq!(tree("import \"utils\""), "(import \"utils\")");
        assert_eq!(tree("export helper as util"), "(export helper util)");
        assert_eq!(
            tree("export function f\n    return 1\n"),
            "(export (function f () {(return 1)}))"
        );
    }

    #[test]
    fn test_parser_20_try_catch_throw() {
        assert_eq!(
            tree("try\n    throw \"boom\"\ncatch e\n    print e\n"),
            "(try {(throw \"boom\")} (catch e {(call print e)}))"
        );
        assert_eq!(
            tree("try\n    risky 1\n"),
            "(try {(call risky 1)} (catch {}))"
        );
    }

    #[test]
    fn test_parser_21_key_path_files() {
        assert_eq!(
            tree("set host get \"config\" .db.host"),
            "(set host (get \"config\".db.host))"
        );

        let program: Program = parse("put \"out\" .user.name \"@ people admin.name\"");
        let [Ast::FilePut { path, value, .. }] = program.statements() else {
            panic!("expected a put, got {:?}", program.statements());
        };

        assert_eq!(path, &vec!["user".to_string(), "name".to_string()]);
        assert_eq!(
            **value,
            Ast::FileReference {
                file: "people".into(),
                path: vec!["admin".into(), "name".into()],
            }
        );
    }

    #[test]
    fn test_parser_22_statement_level_name_is_a_call() {
        assert_eq!(
            tree("function greet\n    print \"hi\"\ngreet"),
            "(function greet () {(call print \"hi\")})\n(call greet)"
        );
    }

    #[test]
    fn test_parser_23_semicolons_separate_statements() {
        assert_eq!(tree("set a 1; set b 2"), "(set a 1)\n(set b 2)");
    }

    #[test]
    fn test_parser_24_recursive_call_takes_whole_expressions() {
        assert_eq!(
            tree("function down n\n    return down n - 1\n"),
            "(function down (n) {(return (call down (- n 1)))})"
        );
    }

    #[test]
    fn test_parser_24b_full_arguments_extend_to_the_end() {
        assert_eq!(
            tree("function fib n\n    return fib n - 1 + fib n - 2\n"),
            "(function fib (n) {(return (call fib (+ (- n 1) (call fib (- n 2)))))})"
        );
        assert_eq!(
            tree("function fib n\n    return (fib n - 1) + (fib n - 2)\n"),
            "(function fib (n) {(return (+ (call fib (- n 1)) (call fib (- n 2))))})"
        );
    }

    #[test]
    fn test_parser_25_classification() {
        let builtins: Builtins = Builtins::new();

        let parser = Parser::new("", Scope::new_ref(), &builtins);
        // at end of input a bare statement-level name is a zero-argument call
        assert_eq!(parser.classify_identifier("anything"), IdentifierForm::ZeroArgCall);
    }
}
