//! Outlet descriptors derived from a fragment signature.

use super::signature::Signature;
use super::types::{Direction, GlslType, OutletCategory};

/// Connection point description, before it is seeded into a Node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutletSpec {
    pub name: String,
    pub ty: GlslType,
    pub direction: Direction,
    pub required: bool,
    pub hint: String,
    pub category: OutletCategory,
    /// Default value, uniforms only.
    pub value: Option<String>,
}

/// Build the outlet set for a signature: parameters first, then uniforms.
pub fn make_outlets(signature: &Signature) -> Vec<OutletSpec> {
    let parameters = signature.parameters.iter().map(|p| OutletSpec {
        name: p.name.clone(),
        ty: p.ty,
        direction: p.direction,
        required: true,
        hint: hint_for(&p.name),
        category: OutletCategory::Parameter,
        value: None,
    });

    // A uniform is only ever consumed by its own fragment.
    let uniforms = signature.uniforms.iter().map(|u| OutletSpec {
        name: u.name.clone(),
        ty: u.ty,
        direction: Direction::In,
        required: false,
        hint: hint_for(&u.name),
        category: OutletCategory::Uniform,
        value: u.value.clone(),
    });

    parameters.chain(uniforms).collect()
}

/// Outlet name without its trailing `In`/`Out` suffix.
pub fn hint_for(name: &str) -> String {
    name.strip_suffix("In")
        .or_else(|| name.strip_suffix("Out"))
        .filter(|stem| !stem.is_empty())
        .unwrap_or(name)
        .to_string()
}
