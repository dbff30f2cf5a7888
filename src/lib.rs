//! Load-time JVM bytecode rewriting for running legacy OpenGL code on a replacement renderer.
//!
//! A [`Transformer`] redirects calls to LWJGL's OpenGL bindings onto render sandbox classes,
//! stubs the calls no sandbox implements, and patches the few host methods that set up a GL
//! context. The pieces it is built from (instruction predicates, the pattern matcher, and the
//! span editor) are public for writing further patch rules.

mod assembler;
mod bytecode;
mod bytes;
pub mod classfile;
pub mod config;
pub mod constant_pool;
pub mod descriptor;
pub mod editor;
pub mod filter;
mod frames;
pub mod ir;
pub mod matcher;
pub mod opcodes;
pub mod predicate;
pub mod redirect;
pub mod report;
pub mod rules;
pub mod scan;
mod stack;
#[cfg(test)]
mod test_support;
pub mod transformer;

pub use config::TransformerConfig;
pub use redirect::RedirectTable;
pub use transformer::{TransformOutcome, Transformer};
