use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::descriptor::{Descriptor, field_category};
use crate::ir::{CallKind, Insn, Label, Method, Node};
use crate::opcodes;

/// Maximum operand stack depth reached along any path through the method.
///
/// Depth is propagated over the node sequence from the entry point and from every handler
/// (which starts with the thrown exception on the stack). Each node is visited once; the first
/// depth seen wins, which is exact for verifiable code.
pub(crate) fn max_stack(method: &Method) -> Result<u16> {
    let nodes = &method.instructions;
    let positions: HashMap<Label, usize> = nodes
        .iter()
        .enumerate()
        .filter_map(|(index, node)| match node {
            Node::Label(label) => Some((*label, index)),
            _ => None,
        })
        .collect();
    let position = |label: &Label| -> Result<usize> {
        positions
            .get(label)
            .copied()
            .with_context(|| format!("dangling label {:?}", label))
    };

    let mut depths: Vec<Option<i32>> = vec![None; nodes.len()];
    let mut work = vec![(0usize, 0i32)];
    for handler in &method.handlers {
        work.push((position(&handler.handler)?, 1));
    }
    let mut max = 0i32;
    while let Some((index, depth)) = work.pop() {
        if index >= nodes.len() || depths[index].is_some() {
            continue;
        }
        depths[index] = Some(depth);
        max = max.max(depth);
        let insn = match &nodes[index] {
            Node::Insn(insn) => insn,
            _ => {
                work.push((index + 1, depth));
                continue;
            }
        };
        let (pop, push) = stack_effect(insn)?;
        let after = (depth - pop).max(0) + push;
        max = max.max(after);
        match insn {
            Insn::Jump { opcode, target } => {
                let target = position(target)?;
                match *opcode {
                    opcodes::GOTO => work.push((target, after)),
                    // the return address only exists inside the subroutine
                    opcodes::JSR => {
                        work.push((target, after));
                        work.push((index + 1, depth));
                    }
                    _ => {
                        work.push((target, after));
                        work.push((index + 1, after));
                    }
                }
            }
            Insn::TableSwitch {
                default, targets, ..
            } => {
                work.push((position(default)?, after));
                for target in targets {
                    work.push((position(target)?, after));
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                work.push((position(default)?, after));
                for (_, target) in pairs {
                    work.push((position(target)?, after));
                }
            }
            Insn::Var {
                opcode: opcodes::RET,
                ..
            } => {}
            Insn::Simple(opcode) if is_exit_opcode(*opcode) => {}
            _ => work.push((index + 1, after)),
        }
    }
    u16::try_from(max).context("operand stack too deep")
}

fn is_exit_opcode(opcode: u8) -> bool {
    matches!(opcode, opcodes::IRETURN..=opcodes::RETURN | opcodes::ATHROW)
}

/// Words popped and pushed by one instruction.
pub(crate) fn stack_effect(insn: &Insn) -> Result<(i32, i32)> {
    let effect = match insn {
        Insn::Simple(opcode) => simple_effect(*opcode)?,
        Insn::Int { opcode, .. } => {
            if *opcode == opcodes::NEWARRAY {
                (1, 1)
            } else {
                (0, 1)
            }
        }
        Insn::Ldc(constant) => (0, if constant.is_wide() { 2 } else { 1 }),
        Insn::Var { opcode, .. } => match *opcode {
            opcodes::ILOAD | opcodes::FLOAD | opcodes::ALOAD => (0, 1),
            opcodes::LLOAD | opcodes::DLOAD => (0, 2),
            opcodes::ISTORE | opcodes::FSTORE | opcodes::ASTORE => (1, 0),
            opcodes::LSTORE | opcodes::DSTORE => (2, 0),
            _ => (0, 0),
        },
        Insn::Iinc { .. } => (0, 0),
        Insn::Jump { opcode, .. } => match *opcode {
            opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => (1, 0),
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => (2, 0),
            opcodes::JSR => (0, 1),
            _ => (0, 0),
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => (1, 0),
        Insn::Field {
            opcode, descriptor, ..
        } => {
            let width = field_category(descriptor)?.width() as i32;
            match *opcode {
                opcodes::GETSTATIC => (0, width),
                opcodes::PUTSTATIC => (width, 0),
                opcodes::GETFIELD => (1, width),
                _ => (1 + width, 0),
            }
        }
        Insn::Method(call) => {
            let descriptor = Descriptor::parse(&call.descriptor)?;
            let receiver = if call.kind == CallKind::Static { 0 } else { 1 };
            (
                descriptor.argument_width() as i32 + receiver,
                descriptor.return_category().width() as i32,
            )
        }
        Insn::InvokeDynamic { descriptor, .. } => {
            let descriptor = Descriptor::parse(descriptor)?;
            (
                descriptor.argument_width() as i32,
                descriptor.return_category().width() as i32,
            )
        }
        Insn::Type { opcode, .. } => {
            if *opcode == opcodes::NEW {
                (0, 1)
            } else {
                (1, 1)
            }
        }
        Insn::MultiANewArray { dimensions, .. } => (*dimensions as i32, 1),
    };
    Ok(effect)
}

fn simple_effect(opcode: u8) -> Result<(i32, i32)> {
    let effect = match opcode {
        opcodes::NOP => (0, 0),
        opcodes::LCONST_0 | opcodes::LCONST_1 | opcodes::DCONST_0 | opcodes::DCONST_1 => (0, 2),
        opcodes::ACONST_NULL..=opcodes::DCONST_1 => (0, 1),
        opcodes::LALOAD | opcodes::DALOAD => (2, 2),
        opcodes::IALOAD..=opcodes::SALOAD => (2, 1),
        opcodes::LASTORE | opcodes::DASTORE => (4, 0),
        opcodes::IASTORE..=opcodes::SASTORE => (3, 0),
        opcodes::POP => (1, 0),
        opcodes::POP2 => (2, 0),
        opcodes::DUP => (1, 2),
        opcodes::DUP_X1 => (2, 3),
        opcodes::DUP_X2 => (3, 4),
        opcodes::DUP2 => (2, 4),
        opcodes::DUP2_X1 => (3, 5),
        opcodes::DUP2_X2 => (4, 6),
        opcodes::SWAP => (2, 2),
        // add, sub, mul, div, rem in int/long/float/double order
        0x60..=0x73 => {
            if (opcode - 0x60) % 2 == 1 {
                (4, 2)
            } else {
                (2, 1)
            }
        }
        0x74 | 0x76 => (1, 1),
        0x75 | 0x77 => (2, 2),
        // shifts take an int count
        0x78 | 0x7a | 0x7c => (2, 1),
        0x79 | 0x7b | 0x7d => (3, 2),
        0x7e | 0x80 | 0x82 => (2, 1),
        0x7f | 0x81 | 0x83 => (4, 2),
        0x85 | 0x87 | 0x8c | 0x8d => (1, 2),
        0x86 | 0x8b | 0x91..=0x93 => (1, 1),
        0x88 | 0x89 | 0x8e | 0x90 => (2, 1),
        0x8a | 0x8f => (2, 2),
        0x94 | 0x97 | 0x98 => (4, 1),
        0x95 | 0x96 => (2, 1),
        opcodes::LRETURN | opcodes::DRETURN => (2, 0),
        opcodes::IRETURN | opcodes::FRETURN | opcodes::ARETURN => (1, 0),
        opcodes::RETURN => (0, 0),
        opcodes::ARRAYLENGTH => (1, 1),
        opcodes::ATHROW | opcodes::MONITORENTER | opcodes::MONITOREXIT => (1, 0),
        _ => anyhow::bail!("opcode 0x{:02x} is not an operand-less instruction", opcode),
    };
    Ok(effect)
}
