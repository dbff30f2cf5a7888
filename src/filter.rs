use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bytes::{read_u16_class, read_u32_class};
use crate::constant_pool::{Constant, ConstantPool};

/// Classes the call redirection pass never touches.
///
/// Names are compared in dotted form; slashed names are normalized first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassFilter {
    excluded_classes: Vec<String>,
    excluded_packages: Vec<String>,
}

impl ClassFilter {
    pub fn new(excluded_classes: Vec<String>, excluded_packages: Vec<String>) -> Self {
        Self {
            excluded_classes,
            excluded_packages,
        }
    }

    pub fn is_excluded(&self, class_name: &str) -> bool {
        let dotted = class_name.replace('/', ".");
        self.excluded_classes.iter().any(|name| *name == dotted)
            || self
                .excluded_packages
                .iter()
                .any(|prefix| dotted.starts_with(prefix.as_str()))
    }
}

/// Call target that is redirected even though its owner is outside the watched prefixes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpecialCall {
    pub owner: String,
    pub name: String,
}

/// Which call instructions the redirection pass considers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallFilter {
    watched_prefixes: Vec<String>,
    excluded_prefixes: Vec<String>,
    special_calls: Vec<SpecialCall>,
}

impl CallFilter {
    pub fn new(
        watched_prefixes: Vec<String>,
        excluded_prefixes: Vec<String>,
        special_calls: Vec<SpecialCall>,
    ) -> Self {
        Self {
            watched_prefixes,
            excluded_prefixes,
            special_calls,
        }
    }

    /// Excluded owner prefixes win over both watched prefixes and special calls.
    pub fn is_watched(&self, owner: &str, name: &str) -> bool {
        if self
            .excluded_prefixes
            .iter()
            .any(|prefix| owner.starts_with(prefix.as_str()))
        {
            return false;
        }
        self.special_calls
            .iter()
            .any(|call| call.owner == owner && call.name == name)
            || self
                .watched_prefixes
                .iter()
                .any(|prefix| owner.starts_with(prefix.as_str()))
    }

    pub fn watched_prefixes(&self) -> &[String] {
        &self.watched_prefixes
    }

    pub fn special_calls(&self) -> &[SpecialCall] {
        &self.special_calls
    }
}

/// Whether any UTF-8 constant of the class starts with one of `prefixes`.
///
/// Only the header and constant pool are read, so this is cheap enough to run on every class a
/// loader sees.
pub fn references_namespace(data: &[u8], prefixes: &[String]) -> Result<bool> {
    let mut offset = 0usize;
    let magic = read_u32_class(data, &mut offset)?;
    if magic != 0xCAFE_BABE {
        anyhow::bail!("invalid class file magic 0x{:08x}", magic);
    }
    read_u16_class(data, &mut offset)?;
    read_u16_class(data, &mut offset)?;
    let pool = ConstantPool::parse(data, &mut offset).context("parse constant pool")?;
    Ok(pool.entries().any(|entry| match entry {
        Constant::Utf8 { bytes } => prefixes
            .iter()
            .any(|prefix| bytes.starts_with(prefix.as_bytes())),
        _ => false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_STATIC, CallKind, Insn, Method, Node};
    use crate::opcodes;
    use crate::test_support::ClassBuilder;

    fn call_filter() -> CallFilter {
        CallFilter::new(
            vec!["org/lwjgl/opengl/GL".to_string()],
            vec!["org/lwjgl/opengl/GLContext".to_string()],
            vec![SpecialCall {
                owner: "org/lwjglx/opengl/Display".to_string(),
                name: "makeCurrent".to_string(),
            }],
        )
    }

    #[test]
    fn watched_prefixes_and_special_calls() {
        let filter = call_filter();

        assert!(filter.is_watched("org/lwjgl/opengl/GL11", "glEnable"));
        assert!(filter.is_watched("org/lwjglx/opengl/Display", "makeCurrent"));
        assert!(!filter.is_watched("org/lwjglx/opengl/Display", "update"));
        assert!(!filter.is_watched("org/lwjgl/glfw/GLFW", "glfwInit"));
    }

    #[test]
    fn exclusions_win_over_watched_prefixes() {
        let filter = call_filter();

        assert!(!filter.is_watched("org/lwjgl/opengl/GLContext", "getCapabilities"));
    }

    #[test]
    fn class_filter_matches_dotted_and_slashed_names() {
        let filter = ClassFilter::new(
            vec!["net.minecraft.client.Main".to_string()],
            vec!["org.lwjglx.".to_string(), "com.recursive_pineapple.mcvk".to_string()],
        );

        assert!(filter.is_excluded("org.lwjglx.opengl.Display"));
        assert!(filter.is_excluded("org/lwjglx/opengl/Display"));
        assert!(filter.is_excluded("com.recursive_pineapple.mcvk.rendering.RenderSandbox"));
        assert!(filter.is_excluded("net.minecraft.client.Main"));
        assert!(!filter.is_excluded("net.minecraft.client.Minecraft"));
    }

    #[test]
    fn namespace_scan_finds_referenced_owners() {
        let mut method = Method::new("draw", "()V", ACC_STATIC);
        method.instructions = vec![
            Node::Insn(Insn::Simple(opcodes::ICONST_0)),
            Node::Insn(Insn::invoke(
                CallKind::Static,
                "org/lwjgl/opengl/GL11",
                "glEnable",
                "(I)V",
            )),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
        ];
        let user = ClassBuilder::new("demo/Renderer").ir_method(&method).build();
        let plain = ClassBuilder::new("demo/Plain")
            .method("run", "()V", ACC_STATIC, &[opcodes::RETURN])
            .build();
        let prefixes = vec!["org/lwjgl/opengl/GL".to_string()];

        assert!(references_namespace(&user, &prefixes).expect("scan"));
        assert!(!references_namespace(&plain, &prefixes).expect("scan"));
        assert!(references_namespace(&[1, 2, 3], &prefixes).is_err());
    }
}
