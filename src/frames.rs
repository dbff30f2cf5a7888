//! StackMapTable decoding and re-encoding against a new code layout.

use anyhow::{Context, Result};

use crate::bytes::{read_u8_class, read_u16_class, write_u1, write_u2};

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),
    /// Value created by the `new` at this code offset.
    Uninitialized(u32),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum LocalsChange {
    Same,
    Chop(usize),
    Append(Vec<VerificationType>),
    Full(Vec<VerificationType>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Frame {
    pub(crate) offset: u32,
    pub(crate) locals: LocalsChange,
    pub(crate) stack: Vec<VerificationType>,
}

/// Locals accumulated across frames that no longer have a place in the code.
enum PendingLocals {
    Relative {
        chop: usize,
        append: Vec<VerificationType>,
    },
    Absolute(Vec<VerificationType>),
}

impl Default for PendingLocals {
    fn default() -> Self {
        PendingLocals::Relative {
            chop: 0,
            append: Vec::new(),
        }
    }
}

impl PendingLocals {
    fn apply(&mut self, change: &LocalsChange) {
        match (self, change) {
            (_, LocalsChange::Same) => {}
            (this, LocalsChange::Full(locals)) => *this = PendingLocals::Absolute(locals.clone()),
            (PendingLocals::Relative { append, .. }, LocalsChange::Append(types)) => {
                append.extend(types.iter().cloned())
            }
            (PendingLocals::Absolute(locals), LocalsChange::Append(types)) => {
                locals.extend(types.iter().cloned())
            }
            (PendingLocals::Relative { chop, append }, LocalsChange::Chop(count)) => {
                let from_append = (*count).min(append.len());
                append.truncate(append.len() - from_append);
                *chop += count - from_append;
            }
            (PendingLocals::Absolute(locals), LocalsChange::Chop(count)) => {
                locals.truncate(locals.len().saturating_sub(*count));
            }
        }
    }
}

pub(crate) fn parse(body: &[u8]) -> Result<Vec<Frame>> {
    let mut offset = 0usize;
    let count = read_u16_class(body, &mut offset)?;
    let mut frames = Vec::with_capacity(count as usize);
    let mut previous: Option<u32> = None;
    for _ in 0..count {
        let frame_type = read_u8_class(body, &mut offset)?;
        let (delta, locals, stack) = match frame_type {
            0..=63 => (frame_type as u32, LocalsChange::Same, Vec::new()),
            64..=127 => (
                (frame_type - 64) as u32,
                LocalsChange::Same,
                read_types(body, &mut offset, 1)?,
            ),
            247 => {
                let delta = read_u16_class(body, &mut offset)? as u32;
                (delta, LocalsChange::Same, read_types(body, &mut offset, 1)?)
            }
            248..=250 => {
                let delta = read_u16_class(body, &mut offset)? as u32;
                (delta, LocalsChange::Chop((251 - frame_type) as usize), Vec::new())
            }
            251 => {
                let delta = read_u16_class(body, &mut offset)? as u32;
                (delta, LocalsChange::Same, Vec::new())
            }
            252..=254 => {
                let delta = read_u16_class(body, &mut offset)? as u32;
                let appended = read_types(body, &mut offset, (frame_type - 251) as usize)?;
                (delta, LocalsChange::Append(appended), Vec::new())
            }
            255 => {
                let delta = read_u16_class(body, &mut offset)? as u32;
                let local_count = read_u16_class(body, &mut offset)? as usize;
                let locals = read_types(body, &mut offset, local_count)?;
                let stack_count = read_u16_class(body, &mut offset)? as usize;
                let stack = read_types(body, &mut offset, stack_count)?;
                (delta, LocalsChange::Full(locals), stack)
            }
            _ => anyhow::bail!("reserved stack map frame type {}", frame_type),
        };
        let frame_offset = match previous {
            None => delta,
            Some(previous) => previous + delta + 1,
        };
        frames.push(Frame {
            offset: frame_offset,
            locals,
            stack,
        });
        previous = Some(frame_offset);
    }
    Ok(frames)
}

/// Code offsets the frames refer to: frame positions and `Uninitialized` allocation sites.
pub(crate) fn referenced_offsets(frames: &[Frame]) -> Vec<u32> {
    let mut offsets = Vec::new();
    for frame in frames {
        offsets.push(frame.offset);
        let locals = match &frame.locals {
            LocalsChange::Append(types) | LocalsChange::Full(types) => types.as_slice(),
            LocalsChange::Same | LocalsChange::Chop(_) => &[],
        };
        for ty in locals.iter().chain(&frame.stack) {
            if let VerificationType::Uninitialized(site) = ty {
                offsets.push(*site);
            }
        }
    }
    offsets
}

/// Re-encode a StackMapTable for a new code layout.
///
/// `new_offset` maps an original code offset to its offset after rewriting, or `None` when that
/// position is gone. Frames at vanished positions are dropped and their locals changes carried
/// into the next surviving frame.
pub(crate) fn remap(body: &[u8], new_offset: impl Fn(u32) -> Option<u32>) -> Result<Vec<u8>> {
    let frames = parse(body)?;
    let mut encoded = Vec::new();
    let mut count: u16 = 0;
    let mut previous: Option<u32> = None;
    let mut pending = PendingLocals::default();
    for frame in &frames {
        pending.apply(&frame.locals);
        let Some(target) = new_offset(frame.offset) else {
            continue;
        };
        let delta = match previous {
            None => target,
            Some(previous) if target > previous => target - previous - 1,
            Some(previous) => anyhow::bail!(
                "frame at offset {} lands at {} after the frame at {}",
                frame.offset,
                target,
                previous
            ),
        };
        let delta = u16::try_from(delta).context("frame offset delta out of range")?;
        let stack = remap_types(&frame.stack, &new_offset)?;
        let locals = std::mem::take(&mut pending);
        write_frame(&mut encoded, delta, locals, &stack, &new_offset)?;
        previous = Some(target);
        count += 1;
    }
    let mut out = Vec::with_capacity(encoded.len() + 2);
    write_u2(&mut out, count);
    out.extend_from_slice(&encoded);
    Ok(out)
}

fn write_frame(
    out: &mut Vec<u8>,
    delta: u16,
    locals: PendingLocals,
    stack: &[VerificationType],
    new_offset: &impl Fn(u32) -> Option<u32>,
) -> Result<()> {
    match locals {
        PendingLocals::Relative { chop: 0, append } if append.is_empty() => match stack {
            [] if delta <= 63 => write_u1(out, delta as u8),
            [] => {
                write_u1(out, 251);
                write_u2(out, delta);
            }
            [item] if delta <= 63 => {
                write_u1(out, 64 + delta as u8);
                write_type(out, item);
            }
            [item] => {
                write_u1(out, 247);
                write_u2(out, delta);
                write_type(out, item);
            }
            _ => anyhow::bail!("frame with {} stack items has no compact form", stack.len()),
        },
        PendingLocals::Relative { chop: 0, append } if append.len() <= 3 && stack.is_empty() => {
            write_u1(out, 251 + append.len() as u8);
            write_u2(out, delta);
            for ty in remap_types(&append, new_offset)? {
                write_type(out, &ty);
            }
        }
        PendingLocals::Relative { chop, append }
            if append.is_empty() && chop <= 3 && stack.is_empty() =>
        {
            write_u1(out, 251 - chop as u8);
            write_u2(out, delta);
        }
        PendingLocals::Absolute(locals) => {
            write_u1(out, 255);
            write_u2(out, delta);
            write_u2(out, u16::try_from(locals.len()).context("too many frame locals")?);
            for ty in remap_types(&locals, new_offset)? {
                write_type(out, &ty);
            }
            write_u2(out, u16::try_from(stack.len()).context("too many frame stack items")?);
            for ty in stack {
                write_type(out, ty);
            }
        }
        PendingLocals::Relative { chop, append } => anyhow::bail!(
            "locals change (chop {}, append {}) of removed frames cannot be expressed",
            chop,
            append.len()
        ),
    }
    Ok(())
}

fn remap_types(
    types: &[VerificationType],
    new_offset: &impl Fn(u32) -> Option<u32>,
) -> Result<Vec<VerificationType>> {
    types
        .iter()
        .map(|ty| match ty {
            VerificationType::Uninitialized(site) => new_offset(*site)
                .map(VerificationType::Uninitialized)
                .with_context(|| format!("allocation site {} was removed", site)),
            other => Ok(other.clone()),
        })
        .collect()
}

fn read_types(body: &[u8], offset: &mut usize, count: usize) -> Result<Vec<VerificationType>> {
    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        types.push(match read_u8_class(body, offset)? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(read_u16_class(body, offset)?),
            8 => VerificationType::Uninitialized(read_u16_class(body, offset)? as u32),
            tag => anyhow::bail!("unknown verification type tag {}", tag),
        });
    }
    Ok(types)
}

fn write_type(out: &mut Vec<u8>, ty: &VerificationType) {
    match ty {
        VerificationType::Top => write_u1(out, 0),
        VerificationType::Integer => write_u1(out, 1),
        VerificationType::Float => write_u1(out, 2),
        VerificationType::Double => write_u1(out, 3),
        VerificationType::Long => write_u1(out, 4),
        VerificationType::Null => write_u1(out, 5),
        VerificationType::UninitializedThis => write_u1(out, 6),
        VerificationType::Object(index) => {
            write_u1(out, 7);
            write_u2(out, *index);
        }
        VerificationType::Uninitialized(site) => {
            write_u1(out, 8);
            write_u2(out, *site as u16);
        }
    }
}
