//! Natural-language prompts to parametric CAD geometry.
//!
//! Prompts reach a [`command::CommandBatch`] either through the keyword
//! parser in [`dispatcher::PromptParser`] or through a language model via
//! [`agents::Agent`]. The [`dispatcher::Dispatcher`] turns the batch into
//! objects of an in-memory [`document::Document`], optionally bound to a
//! parameter spreadsheet by [`parametric::ParametricManager`]. Model-written
//! scripts run through [`executor::GuardedExecutor`].

pub mod agents;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod document;
pub mod error_handling;
pub mod executor;
pub mod extractor;
pub mod history;
pub mod logging;
pub mod normalizer;
pub mod parametric;
pub mod providers;
pub mod shapes;
