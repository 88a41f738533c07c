//! Mapping-template engine.
//!
//! Implements the subset of the Velocity template language used by API
//! gateway mapping templates: references (`$a.b`, `${a}`, `$!a`), method
//! calls, `#set`, `#if`/`#elseif`/`#else`, `#foreach`, comments, and the
//! gateway variables `$input`, `$util`, `$context` and `$stageVariables`.
//!
//! ```
//! use std::collections::BTreeMap;
//! use mirage_template::{Input, Params, RenderContext, Template};
//!
//! let payload = serde_json::json!({ "name": "mirage" });
//! let params = Params::default();
//! let stage_variables = BTreeMap::new();
//! let ctx = RenderContext {
//!     context: &serde_json::Value::Null,
//!     input: Input { params: &params, payload: &payload, body: "" },
//!     stage_variables: &stage_variables,
//! };
//! let template = Template::compile("hello $input.path('$.name')").unwrap();
//! assert_eq!(template.render(&ctx).unwrap(), "hello mirage");
//! ```

mod ast;
pub mod cache;
pub mod context;
pub mod error;
mod eval;
pub mod jsonpath;
mod lexer;
mod parser;
pub mod template;
pub mod util;

pub use cache::TemplateCache;
pub use context::{Input, Params, RenderContext};
pub use error::TemplateError;
pub use eval::to_text;
pub use template::Template;
