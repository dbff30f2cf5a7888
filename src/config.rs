use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::filter::SpecialCall;
use crate::redirect::RedirectDeclaration;

/// Transformer settings, loaded from JSON.
///
/// Every field is optional in the file; missing fields take the values of [`Default`], which
/// target LWJGL's OpenGL bindings and the render sandbox classes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformerConfig {
    /// Call owners whose calls are redirected, matched as prefixes of the slashed name.
    pub watched_prefixes: Vec<String>,
    /// Call owners never redirected, even when a watched prefix matches.
    pub excluded_owner_prefixes: Vec<String>,
    /// Single calls redirected regardless of their owner.
    pub special_calls: Vec<SpecialCall>,
    /// Dotted class names the redirection pass skips.
    pub excluded_classes: Vec<String>,
    /// Dotted package prefixes the redirection pass skips.
    pub excluded_packages: Vec<String>,
    /// Seed the table with the declarations of the bundled sandbox classes.
    pub builtin_redirects: bool,
    /// Sandbox class files whose methods become redirect targets.
    pub sandbox_classes: Vec<PathBuf>,
    /// Extra mappings, applied last.
    pub redirects: Vec<RedirectDeclaration>,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            watched_prefixes: vec![
                "org/lwjgl/opengl/GL".to_string(),
                "org/lwjglx/opengl/GL".to_string(),
            ],
            excluded_owner_prefixes: Vec::new(),
            special_calls: vec![SpecialCall {
                owner: "org/lwjglx/opengl/Display".to_string(),
                name: "makeCurrent".to_string(),
            }],
            excluded_classes: Vec::new(),
            excluded_packages: vec![
                "org.lwjglx.".to_string(),
                "org.lwjgl.".to_string(),
                "com.recursive_pineapple.mcvk".to_string(),
            ],
            builtin_redirects: true,
            sandbox_classes: Vec::new(),
            redirects: Vec::new(),
        }
    }
}

impl TransformerConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: TransformerConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_fields_take_defaults() {
        let config: TransformerConfig =
            serde_json::from_str(r#"{"excluded_classes": ["net.minecraft.client.Main"]}"#)
                .expect("parse");

        assert_eq!(config.excluded_classes, vec!["net.minecraft.client.Main"]);
        assert_eq!(
            config.watched_prefixes,
            TransformerConfig::default().watched_prefixes
        );
        assert!(config.builtin_redirects);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<TransformerConfig>(r#"{"watched": []}"#);

        assert!(result.is_err());
    }

    #[test]
    fn loads_redirects_from_file() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "builtin_redirects": false,
                "redirects": [
                    {"name": "glGetError", "descriptor": "()I", "owner": "demo/Sandbox"}
                ]
            }"#,
        )
        .expect("write config");

        let config = TransformerConfig::from_path(&path).expect("load");

        assert!(!config.builtin_redirects);
        assert_eq!(
            config.redirects,
            vec![RedirectDeclaration::new("glGetError", "()I", "demo/Sandbox")]
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().expect("temp dir");

        assert!(TransformerConfig::from_path(&dir.path().join("absent.json")).is_err());
    }
}
