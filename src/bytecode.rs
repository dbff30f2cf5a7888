use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{Context, Result};

use crate::bytes::{
    padding, read_bytes_class, read_i16, read_i32, read_u16, read_u16_class,
    read_u32_class,
};
use crate::constant_pool::{Constant, ConstantPool};
use crate::frames;
use crate::ir::{
    CallKind, CallSite, CodeInfo, HandlerEntry, Insn, Label, LdcConstant, LocalVariable, Method,
    Node,
};
use crate::opcodes;

pub(crate) const LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub(crate) const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub(crate) const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
pub(crate) const STACK_MAP_TABLE: &str = "StackMapTable";

struct RawHandler {
    start_pc: u32,
    end_pc: u32,
    handler_pc: u32,
    catch_type: u16,
}

struct RawLocal {
    start_pc: u32,
    end_pc: u32,
    name_index: u16,
    descriptor_index: u16,
    slot: u16,
}

/// Decode a `Code` attribute body into a method's node sequence.
///
/// Labels are created at every offset something refers to: branch and switch targets, handler
/// boundaries, local variable ranges, and StackMapTable frames. Their original offsets are kept
/// so the assembler can tell whether the layout survived editing.
pub(crate) fn decode_method(
    pool: &ConstantPool,
    name: String,
    descriptor: String,
    access_flags: u16,
    info: &[u8],
) -> Result<Method> {
    let mut offset = 0usize;
    let max_stack = read_u16_class(info, &mut offset)?;
    let max_locals = read_u16_class(info, &mut offset)?;
    let code_length = read_u32_class(info, &mut offset)? as usize;
    let code = read_bytes_class(info, &mut offset, code_length)?;

    let handler_count = read_u16_class(info, &mut offset)?;
    let mut raw_handlers = Vec::new();
    for _ in 0..handler_count {
        raw_handlers.push(RawHandler {
            start_pc: read_u16_class(info, &mut offset)? as u32,
            end_pc: read_u16_class(info, &mut offset)? as u32,
            handler_pc: read_u16_class(info, &mut offset)? as u32,
            catch_type: read_u16_class(info, &mut offset)?,
        });
    }

    let mut lines: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
    let mut raw_locals = Vec::new();
    let mut raw_local_types = Vec::new();
    let mut frame_offsets = Vec::new();
    let mut passthrough = Vec::new();
    let attribute_count = read_u16_class(info, &mut offset)?;
    for _ in 0..attribute_count {
        let name_index = read_u16_class(info, &mut offset)?;
        let len = read_u32_class(info, &mut offset)? as usize;
        let body = read_bytes_class(info, &mut offset, len)?;
        let attribute_name = pool.utf8(name_index).context("resolve code attribute name")?;
        match attribute_name.as_str() {
            LINE_NUMBER_TABLE => parse_line_numbers(body, &mut lines)?,
            LOCAL_VARIABLE_TABLE => raw_locals.extend(parse_local_variables(body)?),
            LOCAL_VARIABLE_TYPE_TABLE => raw_local_types.extend(parse_local_variables(body)?),
            _ => {
                if attribute_name == STACK_MAP_TABLE {
                    frame_offsets = frames::parse(body)
                        .map(|parsed| frames::referenced_offsets(&parsed))
                        .context("parse StackMapTable")?;
                }
                passthrough.push((attribute_name, body.to_vec()));
            }
        }
    }

    let mut boundaries = Vec::new();
    let mut targets = BTreeSet::new();
    let mut cursor = 0usize;
    while cursor < code.len() {
        let length = opcode_length(code, cursor)?;
        if length == 0 || cursor + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", cursor);
        }
        if let Some(branch) = branch_targets(code, cursor)? {
            targets.extend(branch);
        }
        boundaries.push(cursor as u32);
        cursor += length;
    }

    for handler in &raw_handlers {
        targets.insert(handler.start_pc);
        targets.insert(handler.end_pc);
        targets.insert(handler.handler_pc);
    }
    for local in raw_locals.iter().chain(raw_local_types.iter()) {
        targets.insert(local.start_pc);
        targets.insert(local.end_pc);
    }
    targets.extend(frame_offsets.iter().copied());

    let boundary_set: BTreeSet<u32> = boundaries.iter().copied().collect();
    let mut labels = BTreeMap::new();
    for (id, target) in targets.iter().enumerate() {
        if *target != code.len() as u32 && !boundary_set.contains(target) {
            anyhow::bail!("offset {} is not an instruction boundary", target);
        }
        labels.insert(*target, Label(id as u32));
    }

    let mut instructions = Vec::with_capacity(boundaries.len() + labels.len());
    for start in &boundaries {
        if let Some(label) = labels.get(start) {
            instructions.push(Node::Label(*label));
        }
        if let Some(numbers) = lines.get(start) {
            instructions.extend(numbers.iter().map(|line| Node::Line(*line)));
        }
        let insn = decode_insn(code, *start as usize, pool, &labels)
            .with_context(|| format!("decode instruction at offset {}", start))?;
        instructions.push(Node::Insn(insn));
    }
    if let Some(label) = labels.get(&(code.len() as u32)) {
        instructions.push(Node::Label(*label));
    }

    let mut handlers = Vec::new();
    for handler in raw_handlers {
        let catch_type = if handler.catch_type == 0 {
            None
        } else {
            Some(
                pool.class_name(handler.catch_type)
                    .context("resolve catch type")?,
            )
        };
        handlers.push(HandlerEntry {
            start: label_at(&labels, handler.start_pc)?,
            end: label_at(&labels, handler.end_pc)?,
            handler: label_at(&labels, handler.handler_pc)?,
            catch_type,
        });
    }

    let local_variables = resolve_locals(pool, &labels, raw_locals)?;
    let local_variable_types = resolve_locals(pool, &labels, raw_local_types)?;

    let next_label = labels.len() as u32;
    let code_info = CodeInfo {
        max_stack,
        max_locals,
        code_length: code.len() as u32,
        label_offsets: labels.iter().map(|(offset, label)| (*label, *offset)).collect::<HashMap<_, _>>(),
        passthrough,
    };

    let mut method = Method::new(name, descriptor, access_flags).with_code(code_info, next_label);
    method.instructions = instructions;
    method.handlers = handlers;
    method.local_variables = local_variables;
    method.local_variable_types = local_variable_types;
    Ok(method)
}

fn label_at(labels: &BTreeMap<u32, Label>, offset: u32) -> Result<Label> {
    labels
        .get(&offset)
        .copied()
        .with_context(|| format!("no label at offset {}", offset))
}

fn parse_line_numbers(body: &[u8], lines: &mut BTreeMap<u32, Vec<u16>>) -> Result<()> {
    let mut offset = 0usize;
    let count = read_u16_class(body, &mut offset)?;
    for _ in 0..count {
        let start_pc = read_u16_class(body, &mut offset)? as u32;
        let line = read_u16_class(body, &mut offset)?;
        lines.entry(start_pc).or_default().push(line);
    }
    Ok(())
}

fn parse_local_variables(body: &[u8]) -> Result<Vec<RawLocal>> {
    let mut offset = 0usize;
    let count = read_u16_class(body, &mut offset)?;
    let mut locals = Vec::new();
    for _ in 0..count {
        let start_pc = read_u16_class(body, &mut offset)? as u32;
        let length = read_u16_class(body, &mut offset)? as u32;
        locals.push(RawLocal {
            start_pc,
            end_pc: start_pc + length,
            name_index: read_u16_class(body, &mut offset)?,
            descriptor_index: read_u16_class(body, &mut offset)?,
            slot: read_u16_class(body, &mut offset)?,
        });
    }
    Ok(locals)
}

fn resolve_locals(
    pool: &ConstantPool,
    labels: &BTreeMap<u32, Label>,
    raw: Vec<RawLocal>,
) -> Result<Vec<LocalVariable>> {
    let mut locals = Vec::new();
    for local in raw {
        locals.push(LocalVariable {
            slot: local.slot,
            name: pool.utf8(local.name_index).context("resolve local name")?,
            descriptor: pool
                .utf8(local.descriptor_index)
                .context("resolve local descriptor")?,
            start: label_at(labels, local.start_pc)?,
            end: label_at(labels, local.end_pc)?,
        });
    }
    Ok(locals)
}

fn decode_insn(
    code: &[u8],
    offset: usize,
    pool: &ConstantPool,
    labels: &BTreeMap<u32, Label>,
) -> Result<Insn> {
    let opcode = code[offset];
    let jump = |delta: i32| -> Result<Label> {
        let target = offset as i64 + delta as i64;
        label_at(labels, target as u32)
    };
    let insn = match opcode {
        opcodes::NOP..=opcodes::DCONST_1 => Insn::Simple(opcode),
        opcodes::BIPUSH => Insn::Int {
            opcode,
            value: code[offset + 1] as i8 as i32,
        },
        opcodes::SIPUSH => Insn::Int {
            opcode,
            value: read_i16(code, offset + 1)? as i32,
        },
        opcodes::LDC => decode_ldc(pool, code[offset + 1] as u16, false)?,
        opcodes::LDC_W => decode_ldc(pool, read_u16(code, offset + 1)?, false)?,
        opcodes::LDC2_W => decode_ldc(pool, read_u16(code, offset + 1)?, true)?,
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Insn::Var {
                opcode,
                slot: code[offset + 1] as u16,
            }
        }
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let n = opcode - opcodes::ILOAD_0;
            Insn::Var {
                opcode: opcodes::ILOAD + n / 4,
                slot: (n % 4) as u16,
            }
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let n = opcode - opcodes::ISTORE_0;
            Insn::Var {
                opcode: opcodes::ISTORE + n / 4,
                slot: (n % 4) as u16,
            }
        }
        opcodes::IALOAD..=opcodes::SALOAD | opcodes::IASTORE..=0x83 => Insn::Simple(opcode),
        opcodes::IINC => Insn::Iinc {
            slot: code[offset + 1] as u16,
            delta: code[offset + 2] as i8 as i16,
        },
        0x85..=0x98 => Insn::Simple(opcode),
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => Insn::Jump {
            opcode,
            target: jump(read_i16(code, offset + 1)? as i32)?,
        },
        opcodes::GOTO_W => Insn::Jump {
            opcode: opcodes::GOTO,
            target: jump(read_i32(code, offset + 1)?)?,
        },
        opcodes::JSR_W => Insn::Jump {
            opcode: opcodes::JSR,
            target: jump(read_i32(code, offset + 1)?)?,
        },
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let default = jump(read_i32(code, base)?)?;
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = high
                .checked_sub(low)
                .and_then(|v| v.checked_add(1))
                .context("invalid tableswitch range")?;
            let mut targets = Vec::with_capacity(count.max(0) as usize);
            for index in 0..count.max(0) as usize {
                targets.push(jump(read_i32(code, base + 12 + index * 4)?)?);
            }
            Insn::TableSwitch {
                low,
                high,
                default,
                targets,
            }
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let default = jump(read_i32(code, base)?)?;
            let npairs = read_i32(code, base + 4)?;
            let mut pairs = Vec::with_capacity(npairs.max(0) as usize);
            for index in 0..npairs.max(0) as usize {
                let key = read_i32(code, base + 8 + index * 8)?;
                let target = jump(read_i32(code, base + 12 + index * 8)?)?;
                pairs.push((key, target));
            }
            Insn::LookupSwitch { default, pairs }
        }
        opcodes::IRETURN..=opcodes::RETURN => Insn::Simple(opcode),
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let member = pool
                .member_ref(read_u16(code, offset + 1)?)
                .context("resolve field ref")?;
            Insn::Field {
                opcode,
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
            }
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let member = pool
                .member_ref(read_u16(code, offset + 1)?)
                .context("resolve method ref")?;
            let kind = CallKind::from_opcode(opcode).context("call kind")?;
            Insn::Method(CallSite {
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
                kind,
                interface: member.interface,
            })
        }
        opcodes::INVOKEDYNAMIC => {
            let index = read_u16(code, offset + 1)?;
            let (name, descriptor) = match pool.get(index)? {
                Constant::InvokeDynamic {
                    name_and_type_index,
                    ..
                } => pool.name_and_type(*name_and_type_index)?,
                _ => anyhow::bail!("invokedynamic operand {} is not an InvokeDynamic", index),
            };
            Insn::InvokeDynamic {
                index,
                name,
                descriptor,
            }
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            Insn::Type {
                opcode,
                class_name: pool
                    .class_name(read_u16(code, offset + 1)?)
                    .context("resolve type operand")?,
            }
        }
        opcodes::NEWARRAY => Insn::Int {
            opcode,
            value: code[offset + 1] as i32,
        },
        opcodes::ARRAYLENGTH | opcodes::ATHROW | opcodes::MONITORENTER | opcodes::MONITOREXIT => {
            Insn::Simple(opcode)
        }
        opcodes::WIDE => {
            let inner = code[offset + 1];
            let slot = read_u16(code, offset + 2)?;
            if inner == opcodes::IINC {
                Insn::Iinc {
                    slot,
                    delta: read_i16(code, offset + 4)?,
                }
            } else {
                Insn::Var {
                    opcode: inner,
                    slot,
                }
            }
        }
        opcodes::MULTIANEWARRAY => Insn::MultiANewArray {
            class_name: pool
                .class_name(read_u16(code, offset + 1)?)
                .context("resolve array type")?,
            dimensions: code[offset + 3],
        },
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(insn)
}

fn decode_ldc(pool: &ConstantPool, index: u16, wide: bool) -> Result<Insn> {
    let constant = match pool.get(index)? {
        Constant::Integer { value } => LdcConstant::Integer(*value),
        Constant::Float { bits } => LdcConstant::Float(*bits),
        Constant::Long { value } => LdcConstant::Long(*value),
        Constant::Double { bits } => LdcConstant::Double(*bits),
        Constant::String { string_index } => LdcConstant::String(pool.utf8(*string_index)?),
        Constant::Class { name_index } => LdcConstant::Class(pool.utf8(*name_index)?),
        Constant::MethodType { .. } | Constant::MethodHandle { .. } | Constant::Dynamic { .. } => {
            LdcConstant::Pooled { index, wide }
        }
        other => anyhow::bail!("ldc operand {} is not loadable: {:?}", index, other),
    };
    Ok(Insn::Ldc(constant))
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x4e => 1,
        0x4f..=0x56 => 1,
        0x57..=0x5f => 1,
        0x60..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        0xa9 => 2,
        0xaa => tableswitch_length(code, offset)?,
        0xab => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc4 => wide_length(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .context("missing wide opcode")?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

fn branch_targets(code: &[u8], offset: usize) -> Result<Option<Vec<u32>>> {
    let opcode = code[offset];
    let relative = |delta: i32| -> Result<u32> {
        let target = offset as i64 + delta as i64;
        if target < 0 || target >= code.len() as i64 {
            anyhow::bail!("branch target {} out of range at offset {}", target, offset);
        }
        Ok(target as u32)
    };
    let targets = match opcode {
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            vec![relative(read_i16(code, offset + 1)? as i32)?]
        }
        opcodes::GOTO_W | opcodes::JSR_W => vec![relative(read_i32(code, offset + 1)?)?],
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let mut targets = vec![relative(read_i32(code, base)?)?];
            let mut idx = base + 12;
            for _ in low..=high {
                targets.push(relative(read_i32(code, idx)?)?);
                idx += 4;
            }
            targets
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let npairs = read_i32(code, base + 4)?;
            let mut targets = vec![relative(read_i32(code, base)?)?];
            let mut idx = base + 8;
            for _ in 0..npairs {
                targets.push(relative(read_i32(code, idx + 4)?)?);
                idx += 8;
            }
            targets
        }
        _ => return Ok(None),
    };
    Ok(Some(targets))
}
