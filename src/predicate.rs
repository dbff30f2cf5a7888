use crate::ir::{CallKind, Insn, LocalVariable, Method, Node};
use crate::opcodes;

/// Optional owner, name, and descriptor filters for field and call instructions.
///
/// An unset filter matches anything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemberFilter {
    owner: Option<String>,
    name: Option<String>,
    descriptor: Option<String>,
}

/// Start a member filter that matches every member.
pub fn member() -> MemberFilter {
    MemberFilter::default()
}

impl MemberFilter {
    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn descriptor(mut self, descriptor: &str) -> Self {
        self.descriptor = Some(descriptor.to_string());
        self
    }

    fn matches(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        accepts(&self.owner, owner) && accepts(&self.name, name) && accepts(&self.descriptor, descriptor)
    }
}

/// Optional name and descriptor filters for local variable accesses.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalFilter {
    name: Option<String>,
    descriptor: Option<String>,
}

/// Start a local variable filter that matches every named local.
pub fn local() -> LocalFilter {
    LocalFilter::default()
}

impl LocalFilter {
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn descriptor(mut self, descriptor: &str) -> Self {
        self.descriptor = Some(descriptor.to_string());
        self
    }

    fn matches(&self, record: &LocalVariable) -> bool {
        accepts(&self.name, &record.name) && accepts(&self.descriptor, &record.descriptor)
    }
}

fn accepts(filter: &Option<String>, value: &str) -> bool {
    filter.as_deref().is_none_or(|expected| expected == value)
}

/// Test over one instruction in the context of its method.
#[derive(Clone, Debug, PartialEq)]
pub enum InsnPredicate {
    /// Any instruction with this opcode (`dup`, `pop`, `goto`, `athrow`, ...).
    Opcode(u8),
    GetStatic(MemberFilter),
    PutStatic(MemberFilter),
    /// invokestatic through a Methodref.
    InvokeStatic(MemberFilter),
    /// invokeinterface through an InterfaceMethodref.
    InvokeInterface(MemberFilter),
    InvokeVirtual(MemberFilter),
    InvokeSpecial(MemberFilter),
    /// Any call instruction.
    Invoke(MemberFilter),
    /// `new`, optionally of one type.
    New(Option<String>),
    /// Constructor call: invokespecial of `<init>` through a Methodref.
    Init(MemberFilter),
    /// Local variable load resolved through the local variable table.
    LoadVar(LocalFilter),
    /// Local variable store resolved through the local variable table.
    StoreVar(LocalFilter),
}

pub fn opcode(opcode: u8) -> InsnPredicate {
    InsnPredicate::Opcode(opcode)
}

pub fn get_static(filter: MemberFilter) -> InsnPredicate {
    InsnPredicate::GetStatic(filter)
}

pub fn put_static(filter: MemberFilter) -> InsnPredicate {
    InsnPredicate::PutStatic(filter)
}

pub fn invoke_static(filter: MemberFilter) -> InsnPredicate {
    InsnPredicate::InvokeStatic(filter)
}

pub fn invoke_interface(filter: MemberFilter) -> InsnPredicate {
    InsnPredicate::InvokeInterface(filter)
}

pub fn invoke_virtual(filter: MemberFilter) -> InsnPredicate {
    InsnPredicate::InvokeVirtual(filter)
}

pub fn invoke_special(filter: MemberFilter) -> InsnPredicate {
    InsnPredicate::InvokeSpecial(filter)
}

pub fn invoke(filter: MemberFilter) -> InsnPredicate {
    InsnPredicate::Invoke(filter)
}

pub fn new_object(class_name: Option<&str>) -> InsnPredicate {
    InsnPredicate::New(class_name.map(str::to_string))
}

/// Constructor call; a name set on the filter is ignored.
pub fn init(filter: MemberFilter) -> InsnPredicate {
    InsnPredicate::Init(filter.name("<init>"))
}

pub fn load_var(filter: LocalFilter) -> InsnPredicate {
    InsnPredicate::LoadVar(filter)
}

pub fn store_var(filter: LocalFilter) -> InsnPredicate {
    InsnPredicate::StoreVar(filter)
}

impl InsnPredicate {
    /// Whether the node at `index` satisfies this predicate. Markers never do.
    pub fn test(&self, method: &Method, index: usize) -> bool {
        let Some(insn) = method.instructions.get(index).and_then(Node::insn) else {
            return false;
        };
        match self {
            InsnPredicate::Opcode(expected) => insn.opcode() == *expected,
            InsnPredicate::GetStatic(filter) => field_matches(insn, opcodes::GETSTATIC, filter),
            InsnPredicate::PutStatic(filter) => field_matches(insn, opcodes::PUTSTATIC, filter),
            InsnPredicate::InvokeStatic(filter) => {
                call_matches(insn, filter, |call| call.kind == CallKind::Static && !call.interface)
            }
            InsnPredicate::InvokeInterface(filter) => {
                call_matches(insn, filter, |call| call.kind == CallKind::Interface && call.interface)
            }
            InsnPredicate::InvokeVirtual(filter) => {
                call_matches(insn, filter, |call| call.kind == CallKind::Virtual)
            }
            InsnPredicate::InvokeSpecial(filter) => {
                call_matches(insn, filter, |call| call.kind == CallKind::Special)
            }
            InsnPredicate::Invoke(filter) => call_matches(insn, filter, |_| true),
            InsnPredicate::Init(filter) => {
                call_matches(insn, filter, |call| call.kind == CallKind::Special && !call.interface)
            }
            InsnPredicate::New(class_name) => match insn {
                Insn::Type {
                    opcode: opcodes::NEW,
                    class_name: found,
                } => accepts(class_name, found),
                _ => false,
            },
            InsnPredicate::LoadVar(filter) => match insn {
                Insn::Var { opcode, slot } if is_load(*opcode) => {
                    active_local(method, index, *slot, false).is_some_and(|record| filter.matches(record))
                }
                _ => false,
            },
            InsnPredicate::StoreVar(filter) => match insn {
                Insn::Var { opcode, slot } if is_store(*opcode) => {
                    active_local(method, index, *slot, true).is_some_and(|record| filter.matches(record))
                }
                _ => false,
            },
        }
    }
}

fn field_matches(insn: &Insn, expected: u8, filter: &MemberFilter) -> bool {
    match insn {
        Insn::Field {
            opcode,
            owner,
            name,
            descriptor,
        } => *opcode == expected && filter.matches(owner, name, descriptor),
        _ => false,
    }
}

fn call_matches(
    insn: &Insn,
    filter: &MemberFilter,
    kind: impl Fn(&crate::ir::CallSite) -> bool,
) -> bool {
    match insn {
        Insn::Method(call) => kind(call) && filter.matches(&call.owner, &call.name, &call.descriptor),
        _ => false,
    }
}

fn is_load(opcode: u8) -> bool {
    (opcodes::ILOAD..=opcodes::ALOAD).contains(&opcode)
}

fn is_store(opcode: u8) -> bool {
    (opcodes::ISTORE..=opcodes::ASTORE).contains(&opcode)
}

/// Local variable record in scope for `slot` at `index`.
///
/// A store initializes a variable whose scope starts at the next instruction, so for stores the
/// record may also begin right after `index`.
fn active_local(method: &Method, index: usize, slot: u16, store: bool) -> Option<&LocalVariable> {
    let next_insn = method.instructions[index + 1..]
        .iter()
        .position(|node| !node.is_marker())
        .map_or(method.instructions.len(), |offset| index + 1 + offset);
    method.local_variables.iter().find(|record| {
        if record.slot != slot {
            return false;
        }
        let (Some(start), Some(end)) = (
            method.label_position(record.start),
            method.label_position(record.end),
        ) else {
            return false;
        };
        let in_scope = start <= index && index < end;
        let begins_after_store = store && start > index && start < next_insn;
        in_scope || begins_after_store
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ACC_STATIC;

    fn method_with(nodes: Vec<Node>) -> Method {
        let mut method = Method::new("f", "()V", ACC_STATIC);
        method.instructions = nodes;
        method
    }

    #[test]
    fn field_filters_are_wildcards_when_unset() {
        let method = method_with(vec![Node::Insn(Insn::field(
            opcodes::GETSTATIC,
            "org/lwjglx/opengl/Display$Window",
            "handle",
            "J",
        ))]);

        assert!(get_static(member()).test(&method, 0));
        assert!(get_static(member().owner("org/lwjglx/opengl/Display$Window").name("handle")).test(&method, 0));
        assert!(!get_static(member().name("drawable")).test(&method, 0));
        assert!(!put_static(member()).test(&method, 0));
    }

    #[test]
    fn call_predicates_respect_kind_and_interface_flag() {
        let mut interface_static = Insn::invoke(CallKind::Static, "demo/Api", "create", "()V");
        if let Insn::Method(call) = &mut interface_static {
            call.interface = true;
        }
        let method = method_with(vec![
            Node::Insn(Insn::invoke(CallKind::Static, "org/lwjgl/glfw/GLFW", "glfwDefaultWindowHints", "()V")),
            Node::Insn(interface_static),
            Node::Insn(Insn::invoke(CallKind::Interface, "demo/Api", "run", "()V")),
            Node::Insn(Insn::invoke(CallKind::Special, "java/lang/RuntimeException", "<init>", "(Ljava/lang/Throwable;)V")),
        ]);

        assert!(invoke_static(member().name("glfwDefaultWindowHints")).test(&method, 0));
        assert!(!invoke_static(member()).test(&method, 1));
        assert!(invoke(member().owner("demo/Api")).test(&method, 1));
        assert!(invoke_interface(member().name("run")).test(&method, 2));
        assert!(init(member().owner("java/lang/RuntimeException")).test(&method, 3));
        assert!(invoke_special(member()).test(&method, 3));
        assert!(!invoke_virtual(member()).test(&method, 3));
    }

    #[test]
    fn markers_never_match() {
        let method = method_with(vec![Node::Line(10), Node::Insn(Insn::Simple(opcodes::DUP))]);

        assert!(!opcode(opcodes::NOP).test(&method, 0));
        assert!(opcode(opcodes::DUP).test(&method, 1));
        assert!(!opcode(opcodes::DUP).test(&method, 5));
    }

    #[test]
    fn local_variable_names_resolve_through_the_debug_table() {
        let mut method = method_with(Vec::new());
        let start = method.new_label();
        let end = method.new_label();
        method.instructions = vec![
            Node::Insn(Insn::Var {
                opcode: opcodes::ASTORE,
                slot: 1,
            }),
            Node::Label(start),
            Node::Insn(Insn::Var {
                opcode: opcodes::ALOAD,
                slot: 1,
            }),
            Node::Label(end),
            Node::Insn(Insn::Var {
                opcode: opcodes::ALOAD,
                slot: 1,
            }),
        ];
        method.local_variables.push(LocalVariable {
            slot: 1,
            name: "e".to_string(),
            descriptor: "Ljava/lang/Exception;".to_string(),
            start,
            end,
        });

        assert!(store_var(local().name("e")).test(&method, 0));
        assert!(load_var(local().name("e").descriptor("Ljava/lang/Exception;")).test(&method, 2));
        assert!(!load_var(local().name("x")).test(&method, 2));
        assert!(!load_var(local().name("e")).test(&method, 4));
        assert!(!store_var(local().name("e")).test(&method, 2));
    }

    #[test]
    fn new_matches_type_filter() {
        let method = method_with(vec![Node::Insn(Insn::Type {
            opcode: opcodes::NEW,
            class_name: "org/lwjglx/opengl/DrawableGL".to_string(),
        })]);

        assert!(new_object(Some("org/lwjglx/opengl/DrawableGL")).test(&method, 0));
        assert!(new_object(None).test(&method, 0));
        assert!(!new_object(Some("java/lang/RuntimeException")).test(&method, 0));
    }
}
