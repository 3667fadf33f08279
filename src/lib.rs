pub mod ast;
pub mod ast_printer;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod module;
pub mod parser;
pub mod scope;
pub mod stack;
pub mod stdlib;
pub mod store;
pub mod token;
pub mod value;
