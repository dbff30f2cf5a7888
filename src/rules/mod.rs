use anyhow::Result;
use log::debug;

use crate::editor;
use crate::ir::{Class, Insn};
use crate::predicate::InsnPredicate;

pub(crate) mod display;
pub(crate) mod splash_progress;

/// Metadata describing a patch rule.
#[derive(Clone, Debug)]
pub struct RuleMetadata {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Instructions produced for one injection site.
pub type Generator = Box<dyn Fn() -> Vec<Insn> + Send + Sync>;

pub enum PatchAction {
    /// Splice the generated instructions after every match.
    Inject(Generator),
    /// Delete every match.
    Remove,
}

/// Named rewrite of one well-known method.
pub struct PatchRule {
    pub metadata: RuleMetadata,
    /// Dotted binary name of the target class.
    pub class_name: &'static str,
    /// Every method with this name is patched.
    pub method_name: &'static str,
    pub predicates: Vec<InsnPredicate>,
    pub action: PatchAction,
}

impl PatchRule {
    pub fn applies_to(&self, class_name: &str) -> bool {
        class_name.replace('/', ".") == self.class_name
    }

    /// Apply the rule to every method named `method_name`.
    ///
    /// Failing to match anywhere, including a missing target method, is an error: the host
    /// class changed shape and running it unpatched would break the renderer.
    pub fn apply(&self, class: &mut Class) -> Result<()> {
        let mut matched = false;
        for method in class
            .methods
            .iter_mut()
            .filter(|method| method.name == self.method_name)
        {
            let found = match &self.action {
                PatchAction::Inject(generator) => {
                    editor::inject(method, &self.predicates, || generator())
                }
                PatchAction::Remove => editor::remove(method, &self.predicates),
            };
            if found {
                debug!(
                    "applied patch rule {} to {}.{}{}",
                    self.metadata.id, class.name, method.name, method.descriptor
                );
            }
            matched |= found;
        }
        if !matched {
            anyhow::bail!(
                "patch rule {} ({}) found no match in {}.{}",
                self.metadata.id,
                self.metadata.name,
                self.class_name,
                self.method_name
            );
        }
        Ok(())
    }
}

/// Rules applied to classes of the host program, in application order.
pub fn builtin_rules() -> Vec<PatchRule> {
    let mut rules = display::rules();
    rules.extend(splash_progress::rules());
    rules
}

/// Reject rules that could never match.
pub(crate) fn validate(rules: &[PatchRule]) -> Result<()> {
    for rule in rules {
        if rule.predicates.is_empty() {
            anyhow::bail!("patch rule {} has no predicates", rule.metadata.id);
        }
    }
    Ok(())
}
