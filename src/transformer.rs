use std::fs;

use anyhow::{Context, Result};
use log::debug;

use crate::classfile::{ClassFile, DroppedAttributes};
use crate::config::TransformerConfig;
use crate::filter::{CallFilter, ClassFilter, references_namespace};
use crate::ir::Class;
use crate::redirect::{RedirectTable, StubbedCall, redirect_calls};
use crate::rules::{self, PatchRule};

/// Result of transforming one class.
#[derive(Clone, Debug, Default)]
pub struct TransformOutcome {
    /// Output class bytes; identical to the input when nothing changed.
    pub bytes: Vec<u8>,
    pub modified: bool,
    pub redirected: usize,
    pub stubbed: Vec<StubbedCall>,
    pub rules_applied: Vec<&'static str>,
    /// Methods whose frame tables must be recomputed by the host.
    pub dropped: Vec<DroppedAttributes>,
}

/// Load-time class transformer.
///
/// Holds the redirect table, membership filters, and patch rules; all are read-only after
/// construction, so one instance can serve every loader thread.
pub struct Transformer {
    table: RedirectTable,
    class_filter: ClassFilter,
    call_filter: CallFilter,
    rules: Vec<PatchRule>,
    namespaces: Vec<String>,
}

impl Transformer {
    pub fn new(
        table: RedirectTable,
        class_filter: ClassFilter,
        call_filter: CallFilter,
        rules: Vec<PatchRule>,
    ) -> Result<Self> {
        rules::validate(&rules)?;
        let mut namespaces = call_filter.watched_prefixes().to_vec();
        for call in call_filter.special_calls() {
            if !namespaces.contains(&call.owner) {
                namespaces.push(call.owner.clone());
            }
        }
        Ok(Self {
            table,
            class_filter,
            call_filter,
            rules,
            namespaces,
        })
    }

    pub fn from_config(config: &TransformerConfig) -> Result<Self> {
        let mut table = if config.builtin_redirects {
            RedirectTable::builtin()?
        } else {
            RedirectTable::new()
        };
        for path in &config.sandbox_classes {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let sandbox = RedirectTable::from_sandbox_class(&data)
                .with_context(|| format!("failed to load sandbox {}", path.display()))?;
            table.merge(sandbox);
        }
        table.merge(RedirectTable::from_declarations(config.redirects.clone())?);
        debug!("redirect table has {} entries", table.len());

        Self::new(
            table,
            ClassFilter::new(
                config.excluded_classes.clone(),
                config.excluded_packages.clone(),
            ),
            CallFilter::new(
                config.watched_prefixes.clone(),
                config.excluded_owner_prefixes.clone(),
                config.special_calls.clone(),
            ),
            rules::builtin_rules(),
        )
    }

    pub fn table(&self) -> &RedirectTable {
        &self.table
    }

    /// Cheap pre-check: patch targets, and non-excluded classes referencing a watched namespace.
    pub fn should_transform(&self, class_name: &str, data: &[u8]) -> bool {
        if self.rules.iter().any(|rule| rule.applies_to(class_name)) {
            return true;
        }
        if self.class_filter.is_excluded(class_name) {
            return false;
        }
        match references_namespace(data, &self.namespaces) {
            Ok(found) => found,
            Err(err) => {
                debug!("skipping unreadable class {class_name}: {err:#}");
                false
            }
        }
    }

    /// Rewritten class bytes. Attributes dropped along the way are logged as warnings; use
    /// [`Transformer::transform_class`] to inspect them.
    pub fn transform(&self, class_name: &str, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.transform_class(class_name, data)?.bytes)
    }

    /// Apply the patch rules targeting this class, then redirect its graphics calls.
    pub fn transform_class(&self, class_name: &str, data: &[u8]) -> Result<TransformOutcome> {
        let mut class_file = ClassFile::parse(data)
            .with_context(|| format!("failed to parse class {class_name}"))?;
        let mut class = class_file
            .decode()
            .with_context(|| format!("failed to decode class {class_name}"))?;
        let mut outcome = TransformOutcome::default();

        for rule in self.rules.iter().filter(|rule| rule.applies_to(class_name)) {
            rule.apply(&mut class)
                .with_context(|| format!("failed to patch class {class_name}"))?;
            outcome.rules_applied.push(rule.metadata.id);
        }

        if !self.class_filter.is_excluded(class_name)
            && references_namespace(data, &self.namespaces)?
        {
            self.redirect(&mut class, &mut outcome)
                .with_context(|| format!("failed to redirect calls in {class_name}"))?;
        }

        if !class.methods.iter().any(|method| method.modified) {
            outcome.bytes = data.to_vec();
            return Ok(outcome);
        }
        outcome.dropped = class_file
            .apply(&class)
            .with_context(|| format!("failed to write class {class_name}"))?;
        outcome.bytes = class_file.to_bytes()?;
        outcome.modified = true;
        Ok(outcome)
    }

    fn redirect(&self, class: &mut Class, outcome: &mut TransformOutcome) -> Result<()> {
        let Class { name, methods, .. } = class;
        for method in methods.iter_mut().filter(|method| method.has_code()) {
            let summary = redirect_calls(name, method, &self.table, &self.call_filter)?;
            outcome.redirected += summary.redirected;
            outcome.stubbed.extend(summary.stubbed);
        }
        Ok(())
    }
}
