use std::collections::HashMap;

use anyhow::{Context, Result};
use log::debug;

use crate::bytes::{padding, write_i2, write_i4, write_u1, write_u2, write_u4};
use crate::bytecode::{
    LINE_NUMBER_TABLE, LOCAL_VARIABLE_TABLE, LOCAL_VARIABLE_TYPE_TABLE, STACK_MAP_TABLE,
};
use crate::classfile::{RawAttribute, write_attributes};
use crate::constant_pool::ConstantPool;
use crate::descriptor::Descriptor;
use crate::frames;
use crate::ir::{CallKind, Insn, Label, LdcConstant, LocalVariable, Method, Node};
use crate::opcodes;
use crate::stack;

const MAX_CODE_LENGTH: u32 = 65535;

/// Encoded `Code` attribute body plus the names of code attributes that could not be kept.
pub(crate) struct Assembled {
    pub(crate) info: Vec<u8>,
    pub(crate) dropped: Vec<String>,
}

/// Encode a method's node sequence as a `Code` attribute body.
///
/// Jumps start in their short form and are widened until every displacement fits. Pass-through
/// attributes survive unchanged when every original label still sits at its original offset.
/// Otherwise the StackMapTable is re-encoded against the new label offsets and any other
/// pass-through attribute is dropped.
pub(crate) fn assemble(method: &Method, pool: &mut ConstantPool) -> Result<Assembled> {
    let nodes = &method.instructions;
    if !nodes.iter().any(|node| node.insn().is_some()) {
        anyhow::bail!("method has no instructions");
    }
    let positions = label_positions(nodes)?;
    check_references(method, &positions)?;

    let mut operands = Vec::with_capacity(nodes.len());
    for node in nodes {
        operands.push(match node {
            Node::Insn(insn) => intern_operand(insn, pool)?,
            _ => 0,
        });
    }

    let mut widened = vec![false; nodes.len()];
    let offsets = loop {
        let offsets = layout(nodes, &operands, &widened);
        let mut changed = false;
        for (index, node) in nodes.iter().enumerate() {
            if let Node::Insn(Insn::Jump { target, .. }) = node {
                if widened[index] {
                    continue;
                }
                let delta = offsets[positions[target]] as i64 - offsets[index] as i64;
                if i16::try_from(delta).is_err() {
                    widened[index] = true;
                    changed = true;
                }
            }
        }
        if !changed {
            break offsets;
        }
    };
    let code_length = offsets[nodes.len()];
    if code_length > MAX_CODE_LENGTH {
        anyhow::bail!("code length {} exceeds {}", code_length, MAX_CODE_LENGTH);
    }
    let label_offset = |label: &Label| offsets[positions[label]];

    let mut code = Vec::with_capacity(code_length as usize);
    for (index, node) in nodes.iter().enumerate() {
        if let Node::Insn(insn) = node {
            encode(
                insn,
                offsets[index],
                operands[index],
                widened[index],
                &label_offset,
                &mut code,
            )?;
        }
    }

    let mut handlers = Vec::new();
    for handler in &method.handlers {
        let start = label_offset(&handler.start);
        let end = label_offset(&handler.end);
        if start >= end {
            debug!(
                "dropping empty handler range in {}{}",
                method.name, method.descriptor
            );
            continue;
        }
        let catch_type = match &handler.catch_type {
            Some(name) => pool.intern_class(name)?,
            None => 0,
        };
        handlers.push((start, end, label_offset(&handler.handler), catch_type));
    }

    let mut attributes = Vec::new();
    let mut lines = Vec::new();
    for (index, node) in nodes.iter().enumerate() {
        if let Node::Line(line) = node {
            if offsets[index] < code_length {
                lines.push((offsets[index], *line));
            }
        }
    }
    if !lines.is_empty() {
        let mut body = Vec::new();
        write_u2(&mut body, lines.len() as u16);
        for (offset, line) in lines {
            write_u2(&mut body, offset as u16);
            write_u2(&mut body, line);
        }
        attributes.push(RawAttribute {
            name_index: pool.intern_utf8(LINE_NUMBER_TABLE)?,
            info: body,
        });
    }
    for (name, locals) in [
        (LOCAL_VARIABLE_TABLE, &method.local_variables),
        (LOCAL_VARIABLE_TYPE_TABLE, &method.local_variable_types),
    ] {
        if let Some(body) = encode_locals(locals, pool, &label_offset)? {
            attributes.push(RawAttribute {
                name_index: pool.intern_utf8(name)?,
                info: body,
            });
        }
    }

    let preserved = match &method.code {
        Some(info) => {
            code_length == info.code_length
                && info.label_offsets.iter().all(|(label, offset)| {
                    positions.get(label).map(|position| offsets[*position]) == Some(*offset)
                })
        }
        None => true,
    };
    let mut dropped = Vec::new();
    if let Some(info) = &method.code {
        let original_labels: HashMap<u32, Label> = info
            .label_offsets
            .iter()
            .map(|(label, offset)| (*offset, *label))
            .collect();
        let new_offset = |original: u32| {
            original_labels
                .get(&original)
                .and_then(|label| positions.get(label))
                .map(|position| offsets[*position])
                .filter(|offset| *offset < code_length)
        };
        for (name, body) in &info.passthrough {
            let body = if preserved {
                body.clone()
            } else if name == STACK_MAP_TABLE {
                match frames::remap(body, &new_offset) {
                    Ok(body) => body,
                    Err(err) => {
                        debug!(
                            "cannot remap frames of {}{}: {:#}",
                            method.name, method.descriptor, err
                        );
                        dropped.push(name.clone());
                        continue;
                    }
                }
            } else {
                dropped.push(name.clone());
                continue;
            };
            attributes.push(RawAttribute {
                name_index: pool.intern_utf8(name)?,
                info: body,
            });
        }
    }

    let computed_stack = stack::max_stack(method)?;
    let computed_locals = required_locals(method)?;
    let (max_stack, max_locals) = match &method.code {
        Some(info) => (
            info.max_stack.max(computed_stack),
            info.max_locals.max(computed_locals),
        ),
        None => (computed_stack, computed_locals),
    };

    let mut info = Vec::new();
    write_u2(&mut info, max_stack);
    write_u2(&mut info, max_locals);
    write_u4(&mut info, code_length);
    info.extend_from_slice(&code);
    write_u2(&mut info, handlers.len() as u16);
    for (start, end, handler, catch_type) in handlers {
        write_u2(&mut info, start as u16);
        write_u2(&mut info, end as u16);
        write_u2(&mut info, handler as u16);
        write_u2(&mut info, catch_type);
    }
    write_attributes(&mut info, &attributes)?;
    Ok(Assembled { info, dropped })
}

fn label_positions(nodes: &[Node]) -> Result<HashMap<Label, usize>> {
    let mut positions = HashMap::new();
    for (index, node) in nodes.iter().enumerate() {
        if let Node::Label(label) = node {
            if positions.insert(*label, index).is_some() {
                anyhow::bail!("label {:?} placed twice", label);
            }
        }
    }
    Ok(positions)
}

fn check_references(method: &Method, positions: &HashMap<Label, usize>) -> Result<()> {
    let check = |label: &Label| -> Result<()> {
        if positions.contains_key(label) {
            Ok(())
        } else {
            anyhow::bail!("dangling label {:?}", label)
        }
    };
    for node in &method.instructions {
        match node.insn() {
            Some(Insn::Jump { target, .. }) => check(target)?,
            Some(Insn::TableSwitch {
                default, targets, ..
            }) => {
                check(default)?;
                targets.iter().try_for_each(check)?;
            }
            Some(Insn::LookupSwitch { default, pairs }) => {
                check(default)?;
                pairs.iter().try_for_each(|(_, target)| check(target))?;
            }
            _ => {}
        }
    }
    for handler in &method.handlers {
        check(&handler.start)?;
        check(&handler.end)?;
        check(&handler.handler)?;
    }
    for local in method
        .local_variables
        .iter()
        .chain(method.local_variable_types.iter())
    {
        check(&local.start)?;
        check(&local.end)?;
    }
    Ok(())
}

fn intern_operand(insn: &Insn, pool: &mut ConstantPool) -> Result<u16> {
    let index = match insn {
        Insn::Ldc(constant) => match constant {
            LdcConstant::Integer(value) => pool.intern_integer(*value)?,
            LdcConstant::Float(bits) => pool.intern_float(*bits)?,
            LdcConstant::Long(value) => pool.intern_long(*value)?,
            LdcConstant::Double(bits) => pool.intern_double(*bits)?,
            LdcConstant::String(value) => pool.intern_string(value)?,
            LdcConstant::Class(name) => pool.intern_class(name)?,
            LdcConstant::Pooled { index, .. } => *index,
        },
        Insn::Field {
            owner,
            name,
            descriptor,
            ..
        } => pool.intern_field_ref(owner, name, descriptor)?,
        Insn::Method(call) => {
            pool.intern_method_ref(&call.owner, &call.name, &call.descriptor, call.interface)?
        }
        Insn::InvokeDynamic { index, .. } => *index,
        Insn::Type { class_name, .. } | Insn::MultiANewArray { class_name, .. } => {
            pool.intern_class(class_name)?
        }
        _ => 0,
    };
    Ok(index)
}

/// Offset of every node plus the total code length as the final element.
fn layout(nodes: &[Node], operands: &[u16], widened: &[bool]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(nodes.len() + 1);
    let mut offset = 0u32;
    for (index, node) in nodes.iter().enumerate() {
        offsets.push(offset);
        if let Node::Insn(insn) = node {
            offset += insn_size(insn, offset, operands[index], widened[index]);
        }
    }
    offsets.push(offset);
    offsets
}

fn insn_size(insn: &Insn, offset: u32, operand: u16, widened: bool) -> u32 {
    match insn {
        Insn::Simple(_) => 1,
        Insn::Int { opcode, .. } => {
            if *opcode == opcodes::SIPUSH {
                3
            } else {
                2
            }
        }
        Insn::Ldc(constant) => {
            if constant.is_wide() || operand > 255 {
                3
            } else {
                2
            }
        }
        Insn::Var { opcode, slot } => {
            if *slot > 255 {
                4
            } else if *slot <= 3 && *opcode != opcodes::RET {
                1
            } else {
                2
            }
        }
        Insn::Iinc { slot, delta } => {
            if *slot <= 255 && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Insn::Jump { opcode, .. } => match (widened, *opcode) {
            (false, _) => 3,
            (true, opcodes::GOTO | opcodes::JSR) => 5,
            (true, _) => 8,
        },
        Insn::TableSwitch { targets, .. } => {
            1 + padding(offset as usize) as u32 + 12 + 4 * targets.len() as u32
        }
        Insn::LookupSwitch { pairs, .. } => {
            1 + padding(offset as usize) as u32 + 8 + 8 * pairs.len() as u32
        }
        Insn::Field { .. } | Insn::Type { .. } => 3,
        Insn::Method(call) => {
            if call.kind == CallKind::Interface {
                5
            } else {
                3
            }
        }
        Insn::InvokeDynamic { .. } => 5,
        Insn::MultiANewArray { .. } => 4,
    }
}

fn encode(
    insn: &Insn,
    offset: u32,
    operand: u16,
    widened: bool,
    label_offset: &dyn Fn(&Label) -> u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    let relative = |label: &Label| label_offset(label) as i64 - offset as i64;
    match insn {
        Insn::Simple(opcode) => write_u1(out, *opcode),
        Insn::Int { opcode, value } => {
            write_u1(out, *opcode);
            match *opcode {
                opcodes::SIPUSH => write_i2(
                    out,
                    i16::try_from(*value).context("sipush operand out of range")?,
                ),
                opcodes::BIPUSH => write_u1(
                    out,
                    i8::try_from(*value).context("bipush operand out of range")? as u8,
                ),
                _ => write_u1(
                    out,
                    u8::try_from(*value).context("newarray type out of range")?,
                ),
            }
        }
        Insn::Ldc(constant) => {
            if constant.is_wide() {
                write_u1(out, opcodes::LDC2_W);
                write_u2(out, operand);
            } else if operand <= 255 {
                write_u1(out, opcodes::LDC);
                write_u1(out, operand as u8);
            } else {
                write_u1(out, opcodes::LDC_W);
                write_u2(out, operand);
            }
        }
        Insn::Var { opcode, slot } => {
            if *slot > 255 {
                write_u1(out, opcodes::WIDE);
                write_u1(out, *opcode);
                write_u2(out, *slot);
            } else if *slot <= 3 && *opcode != opcodes::RET {
                write_u1(out, short_form(*opcode, *slot as u8)?);
            } else {
                write_u1(out, *opcode);
                write_u1(out, *slot as u8);
            }
        }
        Insn::Iinc { slot, delta } => match (u8::try_from(*slot), i8::try_from(*delta)) {
            (Ok(slot), Ok(delta)) => {
                write_u1(out, opcodes::IINC);
                write_u1(out, slot);
                write_u1(out, delta as u8);
            }
            _ => {
                write_u1(out, opcodes::WIDE);
                write_u1(out, opcodes::IINC);
                write_u2(out, *slot);
                write_i2(out, *delta);
            }
        },
        Insn::Jump { opcode, target } => {
            let delta = relative(target);
            if !widened {
                write_u1(out, *opcode);
                write_i2(out, i16::try_from(delta).context("jump displacement")?);
            } else {
                match *opcode {
                    opcodes::GOTO | opcodes::JSR => {
                        let wide = if *opcode == opcodes::GOTO {
                            opcodes::GOTO_W
                        } else {
                            opcodes::JSR_W
                        };
                        write_u1(out, wide);
                        write_i4(out, i32::try_from(delta).context("jump displacement")?);
                    }
                    _ => {
                        write_u1(out, invert_condition(*opcode)?);
                        write_i2(out, 8);
                        write_u1(out, opcodes::GOTO_W);
                        write_i4(out, i32::try_from(delta - 3).context("jump displacement")?);
                    }
                }
            }
        }
        Insn::TableSwitch {
            low,
            high,
            default,
            targets,
        } => {
            let expected = *high as i64 - *low as i64 + 1;
            if expected != targets.len() as i64 {
                anyhow::bail!(
                    "tableswitch {}..={} has {} targets",
                    low,
                    high,
                    targets.len()
                );
            }
            write_u1(out, opcodes::TABLESWITCH);
            out.resize(out.len() + padding(offset as usize), 0);
            write_i4(out, relative(default) as i32);
            write_i4(out, *low);
            write_i4(out, *high);
            for target in targets {
                write_i4(out, relative(target) as i32);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            let mut sorted = pairs.clone();
            sorted.sort_by_key(|(key, _)| *key);
            write_u1(out, opcodes::LOOKUPSWITCH);
            out.resize(out.len() + padding(offset as usize), 0);
            write_i4(out, relative(default) as i32);
            write_i4(out, sorted.len() as i32);
            for (key, target) in &sorted {
                write_i4(out, *key);
                write_i4(out, relative(target) as i32);
            }
        }
        Insn::Field { opcode, .. } | Insn::Type { opcode, .. } => {
            write_u1(out, *opcode);
            write_u2(out, operand);
        }
        Insn::Method(call) => {
            write_u1(out, call.kind.opcode());
            write_u2(out, operand);
            if call.kind == CallKind::Interface {
                let count = Descriptor::parse(&call.descriptor)?.argument_width() + 1;
                write_u1(out, u8::try_from(count).context("too many interface arguments")?);
                write_u1(out, 0);
            }
        }
        Insn::InvokeDynamic { .. } => {
            write_u1(out, opcodes::INVOKEDYNAMIC);
            write_u2(out, operand);
            write_u2(out, 0);
        }
        Insn::MultiANewArray { dimensions, .. } => {
            write_u1(out, opcodes::MULTIANEWARRAY);
            write_u2(out, operand);
            write_u1(out, *dimensions);
        }
    }
    Ok(())
}

fn short_form(opcode: u8, slot: u8) -> Result<u8> {
    match opcode {
        opcodes::ILOAD..=opcodes::ALOAD => Ok(opcodes::ILOAD_0 + (opcode - opcodes::ILOAD) * 4 + slot),
        opcodes::ISTORE..=opcodes::ASTORE => {
            Ok(opcodes::ISTORE_0 + (opcode - opcodes::ISTORE) * 4 + slot)
        }
        _ => anyhow::bail!("opcode 0x{:02x} is not a local variable access", opcode),
    }
}

fn invert_condition(opcode: u8) -> Result<u8> {
    match opcode {
        opcodes::IFEQ..=opcodes::IF_ACMPNE => Ok(((opcode - opcodes::IFEQ) ^ 1) + opcodes::IFEQ),
        opcodes::IFNULL => Ok(opcodes::IFNONNULL),
        opcodes::IFNONNULL => Ok(opcodes::IFNULL),
        _ => anyhow::bail!("opcode 0x{:02x} is not a conditional branch", opcode),
    }
}

fn encode_locals(
    locals: &[LocalVariable],
    pool: &mut ConstantPool,
    label_offset: &dyn Fn(&Label) -> u32,
) -> Result<Option<Vec<u8>>> {
    let mut entries = Vec::new();
    for local in locals {
        let start = label_offset(&local.start);
        let end = label_offset(&local.end);
        if end < start {
            continue;
        }
        entries.push((
            start,
            end - start,
            pool.intern_utf8(&local.name)?,
            pool.intern_utf8(&local.descriptor)?,
            local.slot,
        ));
    }
    if entries.is_empty() {
        return Ok(None);
    }
    let mut body = Vec::new();
    write_u2(&mut body, entries.len() as u16);
    for (start, length, name, descriptor, slot) in entries {
        write_u2(&mut body, start as u16);
        write_u2(&mut body, length as u16);
        write_u2(&mut body, name);
        write_u2(&mut body, descriptor);
        write_u2(&mut body, slot);
    }
    Ok(Some(body))
}

/// Locals needed by the arguments, the receiver, and every slot the code touches.
fn required_locals(method: &Method) -> Result<u16> {
    let descriptor = Descriptor::parse(&method.descriptor)?;
    let receiver = if method.is_static() { 0 } else { 1 };
    let mut locals = descriptor.argument_width() as u32 + receiver;
    for node in &method.instructions {
        let (slot, width) = match node.insn() {
            Some(Insn::Var { opcode, slot }) => {
                let width = match *opcode {
                    opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE => 2,
                    _ => 1,
                };
                (*slot as u32, width)
            }
            Some(Insn::Iinc { slot, .. }) => (*slot as u32, 1),
            _ => continue,
        };
        locals = locals.max(slot + width);
    }
    u16::try_from(locals).context("too many locals")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::read_u16;
    use crate::ir::{ACC_STATIC, CodeInfo};

    fn code_of(info: &[u8]) -> &[u8] {
        let length = u32::from_be_bytes([info[4], info[5], info[6], info[7]]) as usize;
        &info[8..8 + length]
    }

    #[test]
    fn uses_short_and_wide_variable_forms() {
        let mut method = Method::new("f", "(Ljava/lang/Object;)V", 0);
        method.instructions = vec![
            Node::Insn(Insn::Var {
                opcode: opcodes::ALOAD,
                slot: 0,
            }),
            Node::Insn(Insn::Simple(opcodes::POP)),
            Node::Insn(Insn::Var {
                opcode: opcodes::ILOAD,
                slot: 300,
            }),
            Node::Insn(Insn::Simple(opcodes::POP)),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
        ];
        let mut pool = ConstantPool::new();

        let assembled = assemble(&method, &mut pool).expect("assemble");

        assert_eq!(
            code_of(&assembled.info),
            &[0x2a, 0x57, 0xc4, 0x15, 0x01, 0x2c, 0x57, 0xb1]
        );
        assert_eq!(read_u16(&assembled.info, 2).expect("max_locals"), 301);
    }

    #[test]
    fn widens_far_conditional_jumps() {
        let mut method = Method::new("f", "(I)V", ACC_STATIC);
        let end = method.new_label();
        method.instructions.push(Node::Insn(Insn::Var {
            opcode: opcodes::ILOAD,
            slot: 0,
        }));
        method.instructions.push(Node::Insn(Insn::Jump {
            opcode: opcodes::IFEQ,
            target: end,
        }));
        method
            .instructions
            .extend(std::iter::repeat_n(Node::Insn(Insn::Simple(opcodes::NOP)), 40000));
        method.instructions.push(Node::Label(end));
        method.instructions.push(Node::Insn(Insn::Simple(opcodes::RETURN)));
        let mut pool = ConstantPool::new();

        let assembled = assemble(&method, &mut pool).expect("assemble");
        let code = code_of(&assembled.info);

        assert_eq!(code[1], opcodes::IFNE);
        assert_eq!(&code[2..4], &[0x00, 0x08]);
        assert_eq!(code[4], opcodes::GOTO_W);
        let delta = i32::from_be_bytes([code[5], code[6], code[7], code[8]]);
        assert_eq!(4 + delta as usize, code.len() - 1);
    }

    #[test]
    fn computes_max_stack_for_new_code() {
        let mut method = Method::new("f", "()V", ACC_STATIC);
        method.instructions = vec![
            Node::Insn(Insn::Simple(opcodes::LCONST_0)),
            Node::Insn(Insn::Simple(opcodes::LCONST_0)),
            Node::Insn(Insn::Simple(opcodes::POP2)),
            Node::Insn(Insn::Simple(opcodes::POP2)),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
        ];
        let mut pool = ConstantPool::new();

        let assembled = assemble(&method, &mut pool).expect("assemble");

        assert_eq!(read_u16(&assembled.info, 0).expect("max_stack"), 4);
    }

    #[test]
    fn frames_follow_moved_labels() {
        let build = |extra: bool| {
            let mut method = Method::new("f", "()V", ACC_STATIC);
            let mut label_offsets = HashMap::new();
            label_offsets.insert(Label(0), 1);
            method = method.with_code(
                CodeInfo {
                    max_stack: 1,
                    max_locals: 0,
                    code_length: 2,
                    label_offsets,
                    passthrough: vec![("StackMapTable".to_string(), vec![0, 1, 1])],
                },
                1,
            );
            method.instructions.push(Node::Insn(Insn::Simple(opcodes::NOP)));
            if extra {
                method.instructions.push(Node::Insn(Insn::Simple(opcodes::NOP)));
            }
            method.instructions.push(Node::Label(Label(0)));
            method.instructions.push(Node::Insn(Insn::Simple(opcodes::RETURN)));
            method
        };
        let mut pool = ConstantPool::new();

        let same = assemble(&build(false), &mut pool).expect("assemble");
        let grown = assemble(&build(true), &mut pool).expect("assemble");

        assert!(same.dropped.is_empty());
        assert!(same.info.ends_with(&[0, 0, 0, 3, 0, 1, 1]));
        assert!(grown.dropped.is_empty());
        assert!(grown.info.ends_with(&[0, 0, 0, 3, 0, 1, 2]));
    }

    #[test]
    fn unmappable_frames_are_dropped() {
        let mut label_offsets = HashMap::new();
        label_offsets.insert(Label(0), 1);
        label_offsets.insert(Label(1), 2);
        let mut method = Method::new("f", "()V", ACC_STATIC).with_code(
            CodeInfo {
                max_stack: 0,
                max_locals: 0,
                code_length: 3,
                label_offsets,
                passthrough: vec![
                    // same_frame at 1 and at 2
                    ("StackMapTable".to_string(), vec![0, 2, 1, 0]),
                    ("RuntimeVisibleTypeAnnotations".to_string(), vec![0, 0]),
                ],
            },
            2,
        );
        method.instructions = vec![
            Node::Insn(Insn::Simple(opcodes::NOP)),
            Node::Label(Label(0)),
            Node::Label(Label(1)),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
        ];
        let mut pool = ConstantPool::new();

        let assembled = assemble(&method, &mut pool).expect("assemble");

        assert_eq!(
            assembled.dropped,
            vec![
                "StackMapTable".to_string(),
                "RuntimeVisibleTypeAnnotations".to_string()
            ]
        );
    }

    #[test]
    fn rejects_dangling_labels() {
        let mut method = Method::new("f", "()V", ACC_STATIC);
        let missing = method.new_label();
        method.instructions = vec![
            Node::Insn(Insn::Jump {
                opcode: opcodes::GOTO,
                target: missing,
            }),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
        ];
        let mut pool = ConstantPool::new();

        assert!(assemble(&method, &mut pool).is_err());
    }

    #[test]
    fn interface_calls_carry_argument_count() {
        let mut method = Method::new("f", "()V", ACC_STATIC);
        method.instructions = vec![
            Node::Insn(Insn::Simple(opcodes::ACONST_NULL)),
            Node::Insn(Insn::Simple(opcodes::LCONST_0)),
            Node::Insn(Insn::invoke(
                CallKind::Interface,
                "demo/Sink",
                "accept",
                "(J)V",
            )),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
        ];
        let mut pool = ConstantPool::new();

        let assembled = assemble(&method, &mut pool).expect("assemble");
        let code = code_of(&assembled.info);

        assert_eq!(code[2], opcodes::INVOKEINTERFACE);
        assert_eq!(code[5], 3);
        assert_eq!(code[6], 0);
    }
}
