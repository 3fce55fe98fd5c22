//! Mutation patterns

use std::fmt;

use crate::context::Context;
use crate::value::Value;
use crate::watch::MutationKind;

use super::Pattern;

/// Accepts mutations of a kind whose main payload matches `data`.
#[derive(Clone, PartialEq)]
pub struct MutationPattern {
    /// Kind of the accepted mutations
    pub kind: MutationKind,
    /// Pattern of the payload (`None` accepts any payload)
    pub data: Option<Pattern>,
}

impl MutationPattern {
    pub(super) fn test(&self, ctx: &Context, value: &Value) -> bool {
        let Value::Mutation(m) = value else {
            return false;
        };
        m.kind == self.kind && self.data.as_ref().map_or(true, |p| p.test(ctx, &m.data0))
    }
}

impl fmt::Debug for MutationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "%mutation({}, {:?})", self.kind.name(), data),
            None => write!(f, "%mutation({})", self.kind.name()),
        }
    }
}
