use std::collections::HashMap;

/// Intermediate representation for a parsed JVM class.
#[derive(Clone, Debug)]
pub struct Class {
    pub name: String,
    pub super_name: Option<String>,
    pub methods: Vec<Method>,
}

impl Class {
    /// Dotted binary name, as presented by class loaders.
    pub fn binary_name(&self) -> String {
        self.name.replace('/', ".")
    }
}

/// Intermediate representation for a method and its instruction stream.
#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub descriptor: String,
    pub access_flags: u16,
    pub instructions: Vec<Node>,
    pub handlers: Vec<HandlerEntry>,
    pub local_variables: Vec<LocalVariable>,
    /// LocalVariableTypeTable records; `descriptor` holds the generic signature.
    pub local_variable_types: Vec<LocalVariable>,
    /// Set by every editing pass; unmodified methods are written back verbatim.
    pub modified: bool,
    pub(crate) code: Option<CodeInfo>,
    next_label: u32,
}

/// Bookkeeping carried from the original `Code` attribute to the assembler.
#[derive(Clone, Debug)]
pub(crate) struct CodeInfo {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) code_length: u32,
    pub(crate) label_offsets: HashMap<Label, u32>,
    /// Code attributes other than the line and local variable tables, in original order.
    pub(crate) passthrough: Vec<(String, Vec<u8>)>,
}

impl Method {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access_flags: u16) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
            instructions: Vec::new(),
            handlers: Vec::new(),
            local_variables: Vec::new(),
            local_variable_types: Vec::new(),
            modified: false,
            code: None,
            next_label: 0,
        }
    }

    pub(crate) fn with_code(mut self, code: CodeInfo, next_label: u32) -> Self {
        self.code = Some(code);
        self.next_label = next_label;
        self
    }

    /// Allocate a label id unique within this method.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    /// Whether the method carried a `Code` attribute or has gained instructions since.
    pub fn has_code(&self) -> bool {
        self.code.is_some() || !self.instructions.is_empty()
    }

    /// Position of a label marker in the instruction sequence.
    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.instructions
            .iter()
            .position(|node| matches!(node, Node::Label(found) if *found == label))
    }
}

pub const ACC_STATIC: u16 = 0x0008;

/// Marker identity. Labels are never reused within a method, so handler entries and jumps can
/// refer to them across insertions and deletions.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Label(pub(crate) u32);

/// One element of a method's linear code.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Label(Label),
    /// Source line for the instructions that follow.
    Line(u16),
    Insn(Insn),
}

impl Node {
    pub fn is_marker(&self) -> bool {
        !matches!(self, Node::Insn(_))
    }

    pub fn insn(&self) -> Option<&Insn> {
        match self {
            Node::Insn(insn) => Some(insn),
            _ => None,
        }
    }
}

/// Executable instruction with resolved operands.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    /// Operand-less instructions: constants, arithmetic, stack manipulation, returns.
    Simple(u8),
    /// bipush, sipush, and newarray (operand is the array type code).
    Int { opcode: u8, value: i32 },
    Ldc(LdcConstant),
    /// Loads, stores, and ret; short forms such as `aload_0` are normalized.
    Var { opcode: u8, slot: u16 },
    Iinc { slot: u16, delta: i16 },
    /// Conditional and unconditional branches; `goto_w`/`jsr_w` are normalized to the short form.
    Jump { opcode: u8, target: Label },
    TableSwitch {
        low: i32,
        high: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
    Field {
        opcode: u8,
        owner: String,
        name: String,
        descriptor: String,
    },
    Method(CallSite),
    InvokeDynamic {
        index: u16,
        name: String,
        descriptor: String,
    },
    /// new, anewarray, checkcast, instanceof.
    Type { opcode: u8, class_name: String },
    MultiANewArray { class_name: String, dimensions: u8 },
}

impl Insn {
    pub fn opcode(&self) -> u8 {
        match self {
            Insn::Simple(opcode) => *opcode,
            Insn::Int { opcode, .. }
            | Insn::Var { opcode, .. }
            | Insn::Jump { opcode, .. }
            | Insn::Field { opcode, .. }
            | Insn::Type { opcode, .. } => *opcode,
            Insn::Ldc(constant) => {
                if constant.is_wide() {
                    crate::opcodes::LDC2_W
                } else {
                    crate::opcodes::LDC
                }
            }
            Insn::Iinc { .. } => crate::opcodes::IINC,
            Insn::TableSwitch { .. } => crate::opcodes::TABLESWITCH,
            Insn::LookupSwitch { .. } => crate::opcodes::LOOKUPSWITCH,
            Insn::Method(call) => call.kind.opcode(),
            Insn::InvokeDynamic { .. } => crate::opcodes::INVOKEDYNAMIC,
            Insn::MultiANewArray { .. } => crate::opcodes::MULTIANEWARRAY,
        }
    }

    pub fn field(opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        Insn::Field {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    pub fn invoke(kind: CallKind, owner: &str, name: &str, descriptor: &str) -> Self {
        Insn::Method(CallSite {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            kind,
            interface: kind == CallKind::Interface,
        })
    }
}

/// Value loaded by ldc, ldc_w, or ldc2_w.
#[derive(Clone, Debug, PartialEq)]
pub enum LdcConstant {
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    String(String),
    Class(String),
    /// MethodType, MethodHandle, or dynamic constant kept as its pool index.
    Pooled { index: u16, wide: bool },
}

impl LdcConstant {
    pub fn is_wide(&self) -> bool {
        match self {
            LdcConstant::Long(_) | LdcConstant::Double(_) => true,
            LdcConstant::Pooled { wide, .. } => *wide,
            _ => false,
        }
    }
}

/// Call instruction operands.
#[derive(Clone, Debug, PartialEq)]
pub struct CallSite {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub kind: CallKind,
    /// Whether the owner is referenced through an InterfaceMethodref.
    pub interface: bool,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

impl CallKind {
    pub fn opcode(self) -> u8 {
        match self {
            CallKind::Virtual => crate::opcodes::INVOKEVIRTUAL,
            CallKind::Interface => crate::opcodes::INVOKEINTERFACE,
            CallKind::Special => crate::opcodes::INVOKESPECIAL,
            CallKind::Static => crate::opcodes::INVOKESTATIC,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            crate::opcodes::INVOKEVIRTUAL => Some(CallKind::Virtual),
            crate::opcodes::INVOKEINTERFACE => Some(CallKind::Interface),
            crate::opcodes::INVOKESPECIAL => Some(CallKind::Special),
            crate::opcodes::INVOKESTATIC => Some(CallKind::Static),
            _ => None,
        }
    }
}

/// Exception handler region addressed by labels in the owning method.
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerEntry {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub catch_type: Option<String>,
}

/// Local variable debug record valid between two labels.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalVariable {
    pub slot: u16,
    pub name: String,
    pub descriptor: String,
    pub start: Label,
    pub end: Label,
}
