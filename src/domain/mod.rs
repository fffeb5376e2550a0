//! Core domain types and logic.

pub mod backtest;
pub mod bars;
pub mod config_validation;
pub mod contract;
pub mod error;
pub mod execution;
pub mod indicator;
pub mod metrics;
pub mod position;
pub mod sandbox;
pub mod script_ast;
pub mod script_eval;
pub mod script_parser;
pub mod security;
pub mod sequential;
pub mod strategy;
pub mod sweep;
pub mod value;
