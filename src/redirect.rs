use std::collections::BTreeMap;

use anyhow::{Context, Result};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool as ParsedPool;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::classfile::ClassFile;
use crate::descriptor::Descriptor;
use crate::filter::CallFilter;
use crate::ir::{CallKind, CallSite, Insn, Method, Node};

pub const RENDER_SANDBOX: &str = "com/recursive_pineapple/mcvk/rendering/RenderSandbox";
pub const RENDER_SANDBOX_GEN: &str = "com/recursive_pineapple/mcvk/rendering/RenderSandboxGen";

/// One `(name, descriptor) -> owner` mapping.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectDeclaration {
    pub name: String,
    pub descriptor: String,
    pub owner: String,
}

impl RedirectDeclaration {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, owner: &str) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            owner: owner.to_string(),
        }
    }
}

/// Replacement owner for every implemented graphics entry point, keyed by name and descriptor.
///
/// Built once; later insertions for the same key replace earlier ones.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RedirectTable {
    entries: BTreeMap<(String, String), String>,
}

impl RedirectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of the methods the render sandbox classes declare.
    pub fn builtin() -> Result<Self> {
        Self::from_declarations(default_declarations())
    }

    pub fn from_declarations(
        declarations: impl IntoIterator<Item = RedirectDeclaration>,
    ) -> Result<Self> {
        let mut table = Self::new();
        for declaration in declarations {
            table.insert(declaration)?;
        }
        Ok(table)
    }

    /// Collect the methods a sandbox class declares, without running it.
    ///
    /// Constructors and static initializers are skipped.
    pub fn from_sandbox_class(data: &[u8]) -> Result<Self> {
        let (owner, methods) = match class_file::parse(data) {
            Ok(parsed) => {
                let pool = parsed.constant_pool();
                let owner = parsed_class_name(pool, parsed.this_class())?;
                let mut methods = Vec::new();
                for method in parsed.methods() {
                    methods.push((
                        parsed_utf8(pool, method.name_index()).context("resolve method name")?,
                        parsed_utf8(pool, method.descriptor_index())
                            .context("resolve method descriptor")?,
                    ));
                }
                (owner, methods)
            }
            Err(err) => {
                debug!("jclassfile rejected sandbox class ({err}); reading members directly");
                let parsed = ClassFile::parse(data).context("failed to parse sandbox class")?;
                let mut methods = Vec::new();
                for method in &parsed.methods {
                    methods.push((
                        parsed.constant_pool.utf8(method.name_index)?,
                        parsed.constant_pool.utf8(method.descriptor_index)?,
                    ));
                }
                (parsed.name()?, methods)
            }
        };
        Self::from_declarations(
            methods
                .into_iter()
                .filter(|(name, _)| name != "<init>" && name != "<clinit>")
                .map(|(name, descriptor)| RedirectDeclaration::new(name, descriptor, &owner)),
        )
    }

    pub fn insert(&mut self, declaration: RedirectDeclaration) -> Result<()> {
        Descriptor::parse(&declaration.descriptor).with_context(|| {
            format!(
                "invalid redirect {}{} -> {}",
                declaration.name, declaration.descriptor, declaration.owner
            )
        })?;
        self.entries.insert(
            (declaration.name, declaration.descriptor),
            declaration.owner,
        );
        Ok(())
    }

    /// Add every entry of `other`, replacing entries with the same key.
    pub fn merge(&mut self, other: RedirectTable) {
        self.entries.extend(other.entries);
    }

    pub fn lookup(&self, name: &str, descriptor: &str) -> Option<&str> {
        self.entries
            .get(&(name.to_string(), descriptor.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.entries
            .iter()
            .map(|((name, descriptor), owner)| (name.as_str(), descriptor.as_str(), owner.as_str()))
    }
}

fn parsed_class_name(pool: &[ParsedPool], index: u16) -> Result<String> {
    match pool.get(index as usize).context("missing class entry")? {
        ParsedPool::Class { name_index } => parsed_utf8(pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn parsed_utf8(pool: &[ParsedPool], index: u16) -> Result<String> {
    match pool.get(index as usize).context("missing utf8 entry")? {
        ParsedPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

/// Declarations matching the sandbox classes: the hand-written natives of `RenderSandbox`, then
/// the generated `RenderSandboxGen` members.
pub fn default_declarations() -> Vec<RedirectDeclaration> {
    let mut declarations: Vec<RedirectDeclaration> = [
        ("glMatrixMode", "(I)V"),
        ("glPushMatrix", "()V"),
        ("glPopMatrix", "()V"),
        ("glLoadIdentity", "()V"),
        ("glOrtho", "(DDDDDD)V"),
        ("glTranslatef", "(FFF)V"),
        ("glEnable", "(I)V"),
        ("glDisable", "(I)V"),
        ("glEnableClientState", "(I)V"),
        ("addPointerArray", "(IIIIJI)V"),
        ("glDrawArrays", "(III)V"),
    ]
    .into_iter()
    .map(|(name, descriptor)| RedirectDeclaration::new(name, descriptor, RENDER_SANDBOX))
    .collect();

    for buffer in ["Byte", "Short", "Int", "Float", "Double"] {
        for array in ["Color", "SecondaryColor", "Index", "Normal", "TexCoord", "Vertex"] {
            declarations.push(RedirectDeclaration::new(
                format!("gl{array}Pointer"),
                format!("(IILjava/nio/{buffer}Buffer;)V"),
                RENDER_SANDBOX_GEN,
            ));
        }
    }

    let suffixes = [('f', 'F'), ('d', 'D'), ('i', 'I'), ('s', 'S'), ('b', 'B'), ('l', 'J')];
    let immediate = [
        ("Vertex", 2..=4),
        ("TexCoord", 2..=4),
        ("Normal", 2..=4),
        ("Color", 3..=4),
    ];
    for (function, sizes) in immediate {
        for size in sizes {
            for (suffix, letter) in suffixes {
                let parameters: String = std::iter::repeat_n(letter, size).collect();
                declarations.push(RedirectDeclaration::new(
                    format!("gl{function}{size}{suffix}"),
                    format!("({parameters})V"),
                    RENDER_SANDBOX_GEN,
                ));
            }
        }
    }
    declarations
}

/// Call site that had no redirect target and was replaced by a stub.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StubbedCall {
    pub class_name: String,
    pub method_name: String,
    pub method_descriptor: String,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// What the redirection pass did to one method.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RedirectSummary {
    pub redirected: usize,
    pub stubbed: Vec<StubbedCall>,
}

/// Rewrite every watched call in `method`: retarget it when the table has an entry, otherwise
/// replace it with a stack-balancing stub.
///
/// Sandbox methods are static, so only `invokestatic` sites are retargeted. Instance calls to
/// watched owners are always stubbed.
pub fn redirect_calls(
    class_name: &str,
    method: &mut Method,
    table: &RedirectTable,
    filter: &CallFilter,
) -> Result<RedirectSummary> {
    let mut summary = RedirectSummary::default();
    let nodes = std::mem::take(&mut method.instructions);
    let mut rewritten = Vec::with_capacity(nodes.len());
    for node in nodes {
        let Node::Insn(Insn::Method(mut call)) = node else {
            rewritten.push(node);
            continue;
        };
        if !filter.is_watched(&call.owner, &call.name) {
            rewritten.push(Node::Insn(Insn::Method(call)));
            continue;
        }
        if call.name == "<init>" {
            debug!(
                "leaving constructor call {}.{}{} in method {}.{}{}",
                call.owner, call.name, call.descriptor, class_name, method.name, method.descriptor
            );
            rewritten.push(Node::Insn(Insn::Method(call)));
            continue;
        }
        let target = table
            .lookup(&call.name, &call.descriptor)
            .filter(|_| call.kind == CallKind::Static);
        if target.is_none() && call.kind != CallKind::Static {
            debug!(
                "instance call {}.{}{} in method {}.{}{} has no static redirect target",
                call.owner, call.name, call.descriptor, class_name, method.name, method.descriptor
            );
        }
        match target {
            Some(owner) => {
                trace!(
                    "Redirecting OpenGL call {}.{}{} in method {}.{}{} to {}",
                    call.owner,
                    call.name,
                    call.descriptor,
                    class_name,
                    method.name,
                    method.descriptor,
                    owner
                );
                if call.owner != owner || call.interface {
                    call.owner = owner.to_string();
                    call.interface = false;
                    method.modified = true;
                }
                summary.redirected += 1;
                rewritten.push(Node::Insn(Insn::Method(call)));
            }
            None => {
                warn!(
                    "Unimplemented OpenGL call {}.{}{} in method {}.{}{}: it will be removed",
                    call.owner, call.name, call.descriptor, class_name, method.name, method.descriptor
                );
                let stub = stub_for(&call).with_context(|| {
                    format!("stub {}.{}{}", call.owner, call.name, call.descriptor)
                })?;
                rewritten.extend(stub.into_iter().map(Node::Insn));
                method.modified = true;
                summary.stubbed.push(StubbedCall {
                    class_name: class_name.to_string(),
                    method_name: method.name.clone(),
                    method_descriptor: method.descriptor.clone(),
                    owner: call.owner,
                    name: call.name,
                    descriptor: call.descriptor,
                });
            }
        }
    }
    method.instructions = rewritten;
    Ok(summary)
}

/// Instructions with the same net stack effect as `call`: pop every argument, last argument
/// first, then the receiver of an instance call, then push the zero value of the return type.
pub fn stub_for(call: &CallSite) -> Result<Vec<Insn>> {
    let descriptor = Descriptor::parse(&call.descriptor)?;
    let mut stub: Vec<Insn> = descriptor
        .arguments()
        .iter()
        .rev()
        .filter_map(|argument| argument.pop_opcode())
        .map(Insn::Simple)
        .collect();
    if call.kind != CallKind::Static {
        stub.push(Insn::Simple(crate::opcodes::POP));
    }
    if let Some(zero) = descriptor.return_category().zero_opcode() {
        stub.push(Insn::Simple(zero));
    }
    Ok(stub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SpecialCall;
    use crate::ir::ACC_STATIC;
    use crate::opcodes;
    use crate::stack::stack_effect;
    use crate::test_support::ClassBuilder;

    const GL11: &str = "org/lwjgl/opengl/GL11";

    fn filter() -> CallFilter {
        CallFilter::new(
            vec!["org/lwjgl/opengl/GL".to_string()],
            Vec::new(),
            vec![SpecialCall {
                owner: "org/lwjglx/opengl/Display".to_string(),
                name: "makeCurrent".to_string(),
            }],
        )
    }

    fn method_calling(calls: Vec<Insn>) -> Method {
        let mut method = Method::new("render", "()V", ACC_STATIC);
        method.instructions = calls.into_iter().map(Node::Insn).collect();
        method
            .instructions
            .push(Node::Insn(Insn::Simple(opcodes::RETURN)));
        method
    }

    #[test]
    fn builtin_table_covers_sandbox_members() {
        let table = RedirectTable::builtin().expect("table");

        assert_eq!(table.len(), 11 + 30 + 66);
        assert_eq!(table.lookup("glEnable", "(I)V"), Some(RENDER_SANDBOX));
        assert_eq!(
            table.lookup("glVertexPointer", "(IILjava/nio/FloatBuffer;)V"),
            Some(RENDER_SANDBOX_GEN)
        );
        assert_eq!(table.lookup("glColor4l", "(JJJJ)V"), Some(RENDER_SANDBOX_GEN));
        assert_eq!(table.lookup("glColor2f", "(FF)V"), None);
        assert_eq!(table.lookup("glGetError", "()I"), None);
    }

    #[test]
    fn invalid_descriptors_fail_table_construction() {
        let result = RedirectTable::from_declarations([RedirectDeclaration::new(
            "glBroken",
            "(Q)V",
            RENDER_SANDBOX,
        )]);

        assert!(result.is_err());
    }

    #[test]
    fn later_declarations_win() {
        let table = RedirectTable::from_declarations([
            RedirectDeclaration::new("glEnable", "(I)V", RENDER_SANDBOX),
            RedirectDeclaration::new("glEnable", "(I)V", RENDER_SANDBOX_GEN),
        ])
        .expect("table");

        assert_eq!(table.lookup("glEnable", "(I)V"), Some(RENDER_SANDBOX_GEN));
    }

    #[test]
    fn sandbox_class_members_become_entries() {
        let bytes = ClassBuilder::new(RENDER_SANDBOX)
            .method("<init>", "()V", 0x0001, &[opcodes::RETURN])
            .abstract_method("glEnable", "(I)V")
            .method("glPushMatrix", "()V", ACC_STATIC, &[opcodes::RETURN])
            .build();

        let first = RedirectTable::from_sandbox_class(&bytes).expect("table");
        let second = RedirectTable::from_sandbox_class(&bytes).expect("table");

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.lookup("glEnable", "(I)V"), Some(RENDER_SANDBOX));
        assert_eq!(first.lookup("<init>", "()V"), None);
    }

    #[test]
    fn hit_rewrites_owner_only() {
        let table = RedirectTable::builtin().expect("table");
        let mut method = method_calling(vec![
            Insn::Simple(opcodes::ICONST_0),
            Insn::invoke(CallKind::Static, GL11, "glEnable", "(I)V"),
        ]);

        let summary = redirect_calls("demo/Renderer", &mut method, &table, &filter()).expect("pass");

        assert_eq!(summary.redirected, 1);
        assert!(summary.stubbed.is_empty());
        assert!(method.modified);
        assert_eq!(
            method.instructions[1],
            Node::Insn(Insn::invoke(CallKind::Static, RENDER_SANDBOX, "glEnable", "(I)V"))
        );
    }

    #[test]
    fn miss_with_void_return_pops_arguments() {
        let table = RedirectTable::new();
        let mut method = method_calling(vec![
            Insn::Simple(opcodes::ICONST_0),
            Insn::invoke(CallKind::Static, GL11, "glEnable", "(I)V"),
        ]);

        let summary = redirect_calls("demo/Renderer", &mut method, &table, &filter()).expect("pass");

        assert_eq!(summary.stubbed.len(), 1);
        assert_eq!(summary.stubbed[0].name, "glEnable");
        assert_eq!(
            method.instructions,
            vec![
                Node::Insn(Insn::Simple(opcodes::ICONST_0)),
                Node::Insn(Insn::Simple(opcodes::POP)),
                Node::Insn(Insn::Simple(opcodes::RETURN)),
            ]
        );
    }

    #[test]
    fn miss_with_int_return_pushes_zero() {
        let call = Insn::invoke(CallKind::Static, GL11, "glGetError", "()I");
        let Insn::Method(site) = &call else {
            unreachable!()
        };

        assert_eq!(
            stub_for(site).expect("stub"),
            vec![Insn::Simple(opcodes::ICONST_0)]
        );
    }

    #[test]
    fn stub_pops_match_argument_widths() {
        for (kind, descriptor) in [
            (CallKind::Static, "(DIJF)Ljava/nio/ByteBuffer;"),
            (CallKind::Virtual, "(JJ)D"),
            (CallKind::Interface, "()V"),
            (CallKind::Static, "(IIIIJI)V"),
        ] {
            let call = Insn::invoke(kind, GL11, "glAnything", descriptor);
            let Insn::Method(site) = &call else {
                unreachable!()
            };
            let stub = stub_for(site).expect("stub");
            let popped: i32 = stub
                .iter()
                .map(|insn| stack_effect(insn).expect("effect").0)
                .sum();
            let pushed: i32 = stub
                .iter()
                .map(|insn| stack_effect(insn).expect("effect").1)
                .sum();

            assert_eq!((popped, pushed), stack_effect(&call).expect("call effect"));
        }
    }

    #[test]
    fn stub_pops_last_argument_first() {
        let call = Insn::invoke(CallKind::Static, GL11, "glMixed", "(IJ)V");
        let Insn::Method(site) = &call else {
            unreachable!()
        };

        assert_eq!(
            stub_for(site).expect("stub"),
            vec![Insn::Simple(opcodes::POP2), Insn::Simple(opcodes::POP)]
        );
    }

    #[test]
    fn instance_hits_are_stubbed_not_retargeted() {
        let table = RedirectTable::builtin().expect("table");
        let mut method = method_calling(vec![
            Insn::Simple(opcodes::ACONST_NULL),
            Insn::Simple(opcodes::ICONST_0),
            Insn::invoke(CallKind::Virtual, GL11, "glEnable", "(I)V"),
            Insn::Simple(opcodes::ACONST_NULL),
            Insn::invoke(CallKind::Interface, GL11, "glPushMatrix", "()V"),
        ]);

        let summary = redirect_calls("demo/Renderer", &mut method, &table, &filter()).expect("pass");

        assert_eq!(summary.redirected, 0);
        assert_eq!(summary.stubbed.len(), 2);
        assert!(method.modified);
        assert!(
            method
                .instructions
                .iter()
                .all(|node| !matches!(node, Node::Insn(Insn::Method(_))))
        );
        assert_eq!(
            method.instructions,
            vec![
                Node::Insn(Insn::Simple(opcodes::ACONST_NULL)),
                Node::Insn(Insn::Simple(opcodes::ICONST_0)),
                Node::Insn(Insn::Simple(opcodes::POP)),
                Node::Insn(Insn::Simple(opcodes::POP)),
                Node::Insn(Insn::Simple(opcodes::ACONST_NULL)),
                Node::Insn(Insn::Simple(opcodes::POP)),
                Node::Insn(Insn::Simple(opcodes::RETURN)),
            ]
        );
    }

    #[test]
    fn static_interface_hit_targets_sandbox_class() {
        let table = RedirectTable::builtin().expect("table");
        let mut call = Insn::invoke(CallKind::Static, GL11, "glPushMatrix", "()V");
        if let Insn::Method(site) = &mut call {
            site.interface = true;
        }
        let mut method = method_calling(vec![call]);

        let summary = redirect_calls("demo/Renderer", &mut method, &table, &filter()).expect("pass");

        assert_eq!(summary.redirected, 1);
        assert_eq!(
            method.instructions[0],
            Node::Insn(Insn::invoke(CallKind::Static, RENDER_SANDBOX, "glPushMatrix", "()V"))
        );
    }

    #[test]
    fn sandbox_class_with_unknown_attributes_still_loads() {
        let bytes = ClassBuilder::new(RENDER_SANDBOX_GEN)
            .class_attribute("demo.Custom", &[0xCA, 0xFE])
            .abstract_method("glVertex2f", "(FF)V")
            .build();

        let table = RedirectTable::from_sandbox_class(&bytes).expect("table");

        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("glVertex2f", "(FF)V"), Some(RENDER_SANDBOX_GEN));
    }

    #[test]
    fn truncated_sandbox_class_is_an_error() {
        let bytes = ClassBuilder::new(RENDER_SANDBOX)
            .abstract_method("glEnable", "(I)V")
            .build();

        assert!(RedirectTable::from_sandbox_class(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn unwatched_calls_are_left_alone() {
        let table = RedirectTable::builtin().expect("table");
        let mut method = method_calling(vec![
            Insn::Simple(opcodes::ICONST_0),
            Insn::invoke(CallKind::Static, "org/lwjgl/glfw/GLFW", "glEnable", "(I)V"),
        ]);
        let before = method.instructions.clone();

        let summary = redirect_calls("demo/Renderer", &mut method, &table, &filter()).expect("pass");

        assert_eq!(summary, RedirectSummary::default());
        assert!(!method.modified);
        assert_eq!(method.instructions, before);
    }

    #[test]
    fn special_call_is_redirected() {
        let table = RedirectTable::from_declarations([RedirectDeclaration::new(
            "makeCurrent",
            "()V",
            RENDER_SANDBOX,
        )])
        .expect("table");
        let mut method = method_calling(vec![Insn::invoke(
            CallKind::Static,
            "org/lwjglx/opengl/Display",
            "makeCurrent",
            "()V",
        )]);

        let summary = redirect_calls("demo/Renderer", &mut method, &table, &filter()).expect("pass");

        assert_eq!(summary.redirected, 1);
    }
}
