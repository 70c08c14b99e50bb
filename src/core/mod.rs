// Core modules implementing id namespacing, directive scanning, and error modeling.
pub mod directives;
pub mod error;
pub mod module_id;
