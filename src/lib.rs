//! Purpose: Library crate behind the `envsplit` CLI and its tests.
//! Exports: `core` (ids, directives, errors), `plugin` (contract, wrapper, splitter, composer),
//! `engine` (reference graph driver), `manifest`, `config`, `notice`.
//! Role: Splits one extension pipeline into server and client graphs at directive boundaries.
//! Invariants: Every module id crossing the engine boundary is environment-namespaced.
//! Invariants: Extensions only ever observe ids of their own environment.
pub mod config;
pub mod core;
pub mod engine;
pub mod manifest;
pub mod notice;
pub mod plugin;
