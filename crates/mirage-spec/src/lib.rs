//! Resolved API specification model.
//!
//! Reads an already-resolved swagger 2.0 document (no `$ref`s, no
//! environment placeholders) and extracts routes, parameter declarations,
//! `x-amazon-apigateway-integration` descriptors and custom token
//! authorizers into closed, typed structures. Every structural problem is
//! reported here, before the gateway starts listening.

pub mod backend;
pub mod error;
pub mod model;
pub mod parser;

pub use backend::parse_backend_name;
pub use error::SpecError;
pub use model::{
    ApiSpec, BodyProperty, BodySchema, HeaderValue, Integration, MethodKey, MethodSpec,
    ParameterDeclaration, ParameterLocation, PrimitiveType, ResponseDef, ResponseMap, Route,
    SecurityScheme,
};
pub use parser::{parse_spec, parse_spec_value};
