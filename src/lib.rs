//! llamaman is a terminal chat client for Llama-family models that can call
//! local tools in a multi-step loop.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation, the prompt format, function-call
//!   parsing, argument coercion, configuration, and the orchestrator that
//!   drives the tool-calling loop.
//! - [`clients`] turns a conversation into a stream of cumulative response
//!   text for each backend: Ollama NDJSON, the Bedrock event stream, and
//!   Anthropic server-sent events.
//! - [`tools`] defines the tool registry and the built-in arithmetic and
//!   workspace file tools.
//! - [`cli`] parses arguments and runs the interactive chat and one-shot
//!   commands.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod cli;
pub mod clients;
pub mod core;
pub mod tools;
pub mod utils;
