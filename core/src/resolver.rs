use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use crate::codec;
use crate::registry::SchemaRegistry;
use crate::shape::{OutputShape, PrimitiveKind, ShapeError};

/// What to do with a `response_format` that cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShapePolicy {
    /// Degrade to a plain string result and keep serving the request.
    #[default]
    Lenient,
    /// Reject the request before anything is invoked.
    Strict,
}

impl FromStr for ShapePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown shape policy '{other}' (expected 'lenient' or 'strict')")),
        }
    }
}

/// Turns a request's `response_format` token into the shape handed to the invoker.
#[derive(Debug, Clone, Default)]
pub struct ShapeResolver {
    registry: Arc<SchemaRegistry>,
    policy: ShapePolicy,
}

impl ShapeResolver {
    pub fn new(registry: Arc<SchemaRegistry>, policy: ShapePolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> ShapePolicy {
        self.policy
    }

    pub fn resolve(&self, token: &str) -> Result<OutputShape, ShapeError> {
        // Keywords never decode to a descriptor, so check them first.
        if let Some(kind) = PrimitiveKind::from_keyword(token) {
            return Ok(OutputShape::Primitive(kind));
        }

        let resolved = codec::decode_descriptor(token)
            .map_err(|err| ShapeError::Undecodable(err.to_string()))
            .and_then(|descriptor| descriptor.shape.into_shape(&self.registry));

        match (resolved, self.policy) {
            (Ok(shape), _) => Ok(shape),
            (Err(err), ShapePolicy::Strict) => Err(err),
            (Err(err), ShapePolicy::Lenient) => {
                let fallback = codec::primitive_fallback(token);
                warn!("response_format degraded to {}: {}", fallback, err);
                Ok(OutputShape::Primitive(fallback))
            }
        }
    }
}
