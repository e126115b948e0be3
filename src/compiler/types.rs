//! Core type definitions shared by the compiler modules.

use std::fmt;

use serde::{Serialize, Serializer};

/// One of the two coupled compilation targets produced from a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Vertex,
    Fragment,
}

impl Phase {
    pub const ALL: [Phase; 2] = [Phase::Vertex, Phase::Fragment];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Vertex => "vertex",
            Phase::Fragment => "fragment",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutletCategory {
    Parameter,
    Uniform,
}

/// Shader value type tag. Two tags are compatible only when equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GlslType {
    Bool,
    Int,
    Uint,
    Float,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    BVec2,
    BVec3,
    BVec4,
    Mat2,
    Mat3,
    Mat4,
    Sampler2D,
    SamplerCube,
}

impl GlslType {
    /// Returns the GLSL spelling of this type.
    pub fn glsl(self) -> &'static str {
        match self {
            GlslType::Bool => "bool",
            GlslType::Int => "int",
            GlslType::Uint => "uint",
            GlslType::Float => "float",
            GlslType::Vec2 => "vec2",
            GlslType::Vec3 => "vec3",
            GlslType::Vec4 => "vec4",
            GlslType::IVec2 => "ivec2",
            GlslType::IVec3 => "ivec3",
            GlslType::IVec4 => "ivec4",
            GlslType::BVec2 => "bvec2",
            GlslType::BVec3 => "bvec3",
            GlslType::BVec4 => "bvec4",
            GlslType::Mat2 => "mat2",
            GlslType::Mat3 => "mat3",
            GlslType::Mat4 => "mat4",
            GlslType::Sampler2D => "sampler2D",
            GlslType::SamplerCube => "samplerCube",
        }
    }

    pub fn parse(s: &str) -> Option<GlslType> {
        Some(match s {
            "bool" => GlslType::Bool,
            "int" => GlslType::Int,
            "uint" => GlslType::Uint,
            "float" => GlslType::Float,
            "vec2" => GlslType::Vec2,
            "vec3" => GlslType::Vec3,
            "vec4" => GlslType::Vec4,
            "ivec2" => GlslType::IVec2,
            "ivec3" => GlslType::IVec3,
            "ivec4" => GlslType::IVec4,
            "bvec2" => GlslType::BVec2,
            "bvec3" => GlslType::BVec3,
            "bvec4" => GlslType::BVec4,
            "mat2" => GlslType::Mat2,
            "mat3" => GlslType::Mat3,
            "mat4" => GlslType::Mat4,
            "sampler2D" => GlslType::Sampler2D,
            "samplerCube" => GlslType::SamplerCube,
            _ => return None,
        })
    }
}

impl fmt::Display for GlslType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl())
    }
}

impl Serialize for GlslType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.glsl())
    }
}

/// Construction index of a block; doubles as the Node's owner handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BlockIndex(pub u32);

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glsl_spelling_parses_back() {
        for ty in [GlslType::Float, GlslType::IVec3, GlslType::Sampler2D, GlslType::Mat4] {
            assert_eq!(GlslType::parse(ty.glsl()), Some(ty));
        }
        assert_eq!(GlslType::parse("vec5"), None);
        assert_eq!(GlslType::parse("Vec3"), None);
    }

    #[test]
    fn serializes_as_glsl_names() {
        let v = serde_json::to_value([GlslType::Vec3, GlslType::SamplerCube]).unwrap();
        assert_eq!(v, serde_json::json!(["vec3", "samplerCube"]));
        assert_eq!(serde_json::to_value(Phase::Fragment).unwrap(), "fragment");
    }
}
