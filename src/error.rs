//! Centralised error hierarchy for the **Zen interpreter**.
//!
//! Every subsystem (lexer, parser, evaluator, module loader, key-path store,
//! CLI) converts its internal failure modes into one of the variants defined
//! here.  This gives a uniform `Result<T>` alias across the crate and
//! ergonomic inter-operation with `anyhow` in the binary.
//!
//! Syntax errors are *recorded* by the parser rather than returned: parsing
//! always completes and hands back the collected errors next to the AST.
//! Runtime failures travel through the evaluator as raised exceptions and are
//! only turned into a [`ZenError::Runtime`] at the top of an evaluation.
//!
//! The module **does not** print diagnostics itself.

use std::io;
use thiserror::Error;

use log::info;

/// Canonical error type used throughout the interpreter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ZenError {
    /// Syntactic (parser) error recovered in panic mode.
    #[error("[line {line}:{column}] Parse error: {message}")]
    Parse {
        /// Human-readable description.
        message: String,

        /// 1-based line where the unexpected token started.
        line: usize,

        /// 1-based column of the unexpected token.
        column: usize,
    },

    /// Runtime evaluation error that no `try/catch` observed.
    #[error("Runtime error: {message}")]
    Runtime { message: String, line: usize },

    /// Module could not be located, read or evaluated.
    #[error("Module error ({path}): {message}")]
    Module { path: String, message: String },

    /// Rejected interpreter settings (config file or environment).
    #[error("Config error: {message}")]
    Config { message: String },

    /// Key-path store failure (missing file, bad path, non-object parent).
    #[error("Store error ({file}): {message}")]
    Store { file: String, message: String },

    /// Wrapper around `std::io::Error` (transparent).  Enables `?` on I/O ops.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// JSON (de)serialisation failure in the store or config loader.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// UTF-8 decoding failure when reading module sources.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl ZenError {
    /// Helper constructor for the **parser**.
    pub fn parse<S: Into<String>>(line: usize, column: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!(
            "Creating Parse error: line={}, column={}, msg={}",
            line, column, message
        );

        ZenError::Parse {
            message,
            line,
            column,
        }
    }

    /// Helper constructor for the **evaluator**.
    pub fn runtime<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Runtime error: line={}, msg={}", line, message);

        ZenError::Runtime { message, line }
    }

    /// Helper constructor for the **module loader**.
    pub fn module<P: Into<String>, S: Into<String>>(path: P, msg: S) -> Self {
        let path: String = path.into();
        let message: String = msg.into();

        info!("Creating Module error: path={}, msg={}", path, message);

        ZenError::Module { path, message }
    }

    /// Helper constructor for **settings** validation.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Config error: msg={}", message);

        ZenError::Config { message }
    }

    /// Helper constructor for the **key-path store**.
    pub fn store<F: Into<String>, S: Into<String>>(file: F, msg: S) -> Self {
        let file: String = file.into();
        let message: String = msg.into();

        info!("Creating Store error: file={}, msg={}", file, message);

        ZenError::Store { file, message }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, ZenError>;
