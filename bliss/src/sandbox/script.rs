use rhai::{Dynamic, Engine, EvalAltResult, Map, ParseError, Scope, AST};
use thiserror::Error;

/// the slot a library script assigns its public surface to
pub static EXPORTS: &str = "exports";

/// A failure raised while compiling or running tenant code.  `trace` lists the call chain from
/// the outermost function call inward.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("{message}")]
pub struct ScriptErr {
    pub message: String,
    pub trace: Vec<String>,
}

impl ScriptErr {
    pub fn new<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self {
            message: message.to_string(),
            trace: vec![],
        }
    }

    /// message followed by one trace line per frame, suitable for a plain text response
    pub fn diagnostic(&self) -> String {
        let mut rtn = self.message.clone();
        for line in &self.trace {
            rtn.push_str("\n    ");
            rtn.push_str(line.as_str());
        }
        rtn
    }
}

fn unwind(err: &EvalAltResult, trace: &mut Vec<String>) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(name, source, inner, pos) => {
            if source.is_empty() {
                trace.push(format!("in call to function '{}' @ {}", name, pos));
            } else {
                trace.push(format!("in call to function '{}' ({}) @ {}", name, source, pos));
            }
            unwind(inner, trace)
        }
        EvalAltResult::ErrorInModule(name, inner, pos) => {
            trace.push(format!("in module '{}' @ {}", name, pos));
            unwind(inner, trace)
        }
        EvalAltResult::ErrorRuntime(value, pos) => {
            trace.push(format!("thrown @ {}", pos));
            value.to_string()
        }
        other => {
            trace.push(format!("@ {}", other.position()));
            other.to_string()
        }
    }
}

impl From<Box<EvalAltResult>> for ScriptErr {
    fn from(err: Box<EvalAltResult>) -> Self {
        let mut trace = vec![];
        let message = unwind(&err, &mut trace);
        Self { message, trace }
    }
}

impl From<ParseError> for ScriptErr {
    fn from(err: ParseError) -> Self {
        Self {
            message: err.to_string(),
            trace: vec![format!("@ {}", err.position())],
        }
    }
}

impl From<&str> for ScriptErr {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

pub fn compile(engine: &Engine, source: &str) -> Result<AST, ScriptErr> {
    Ok(engine.compile(source)?)
}

/// true when `ast` defines a script function `name` of `arity` parameters
pub fn defines(ast: &AST, name: &str, arity: usize) -> bool {
    ast.iter_functions()
        .any(|f| f.name == name && f.params.len() == arity)
}

/// Runs `source` with each binding in scope plus an empty `exports` map and returns whatever
/// the script left in `exports`, along with the script's function definitions so closures
/// stored in the exports remain callable from later scripts.
pub fn execute(
    engine: &Engine,
    source: &str,
    bindings: Vec<(String, Dynamic)>,
) -> Result<(Dynamic, AST), ScriptErr> {
    let ast = compile(engine, source)?;
    let mut scope = Scope::new();
    for (name, value) in bindings {
        scope.push_dynamic(name, value);
    }
    scope.push(EXPORTS, Map::new());

    engine.run_ast_with_scope(&mut scope, &ast)?;

    let exports = scope.get_value::<Dynamic>(EXPORTS).unwrap_or(Dynamic::UNIT);
    Ok((exports, ast.clone_functions_only()))
}

#[cfg(test)]
pub mod test {
    use crate::sandbox::script::{defines, execute, ScriptErr};
    use rhai::{Dynamic, Engine, Map};

    #[test]
    pub fn test_exports() {
        let engine = Engine::new();
        let (exports, _) = execute(
            &engine,
            r#"exports.greeting = "hello " + name;"#,
            vec![("name".to_string(), Dynamic::from("bob".to_string()))],
        )
        .unwrap();
        let exports = exports.cast::<Map>();
        assert_eq!(
            exports.get("greeting").unwrap().clone().into_string().unwrap(),
            "hello bob"
        );
    }

    #[test]
    pub fn test_thrown_error_has_trace() {
        let engine = Engine::new();
        let err: ScriptErr = execute(
            &engine,
            r#"
            fn explode() { throw "kaboom"; }
            explode();
            "#,
            vec![],
        )
        .unwrap_err();
        assert_eq!(err.message, "kaboom");
        assert!(err.trace.iter().any(|line| line.contains("explode")));
        assert!(err.diagnostic().starts_with("kaboom\n"));
    }

    #[test]
    pub fn test_parse_error() {
        let engine = Engine::new();
        let err = execute(&engine, "let = ;", vec![]).unwrap_err();
        assert!(!err.message.is_empty());
        assert_eq!(err.trace.len(), 1);
    }

    #[test]
    pub fn test_defines() {
        let engine = Engine::new();
        let ast = engine.compile("fn on_message(socket, message) { }").unwrap();
        assert!(defines(&ast, "on_message", 2));
        assert!(!defines(&ast, "on_message", 1));
        assert!(!defines(&ast, "handle", 2));
    }
}
