use anyhow::{Context, Result};
use log::warn;

use crate::assembler;
use crate::bytecode::{self, STACK_MAP_TABLE};
use crate::bytes::{read_bytes_class, read_u16_class, read_u32_class, write_u2, write_u4};
use crate::constant_pool::ConstantPool;
use crate::ir::{Class, Method};

const MAGIC: u32 = 0xCAFE_BABE;
const CODE: &str = "Code";
/// First class file version whose verifier requires a StackMapTable.
const FRAMES_REQUIRED_SINCE: u16 = 51;

/// Attribute kept as its name index and undecoded body.
#[derive(Clone, Debug, PartialEq)]
pub struct RawAttribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

/// Field or method entry.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<RawAttribute>,
}

/// Class file structure with undecoded attributes.
///
/// Everything outside the `Code` attributes of rewritten methods is written back exactly as read.
#[derive(Clone, Debug)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<RawAttribute>,
}

impl ClassFile {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut offset = 0usize;
        let magic = read_u32_class(data, &mut offset)?;
        if magic != MAGIC {
            anyhow::bail!("invalid class file magic 0x{:08x}", magic);
        }
        let minor_version = read_u16_class(data, &mut offset)?;
        let major_version = read_u16_class(data, &mut offset)?;
        let constant_pool =
            ConstantPool::parse(data, &mut offset).context("parse constant pool")?;
        let access_flags = read_u16_class(data, &mut offset)?;
        let this_class = read_u16_class(data, &mut offset)?;
        let super_class = read_u16_class(data, &mut offset)?;
        let interface_count = read_u16_class(data, &mut offset)?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(read_u16_class(data, &mut offset)?);
        }
        let fields = parse_members(data, &mut offset).context("parse fields")?;
        let methods = parse_members(data, &mut offset).context("parse methods")?;
        let attributes = parse_attributes(data, &mut offset).context("parse class attributes")?;
        if offset != data.len() {
            anyhow::bail!("{} trailing bytes after class file", data.len() - offset);
        }
        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_u4(&mut out, MAGIC);
        write_u2(&mut out, self.minor_version);
        write_u2(&mut out, self.major_version);
        self.constant_pool.write(&mut out);
        write_u2(&mut out, self.access_flags);
        write_u2(&mut out, self.this_class);
        write_u2(&mut out, self.super_class);
        write_u2(&mut out, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u2(&mut out, *interface);
        }
        write_members(&mut out, &self.fields)?;
        write_members(&mut out, &self.methods)?;
        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }

    pub fn name(&self) -> Result<String> {
        self.constant_pool
            .class_name(self.this_class)
            .context("resolve this_class")
    }

    pub fn super_name(&self) -> Result<Option<String>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool
            .class_name(self.super_class)
            .map(Some)
            .context("resolve super_class")
    }

    pub fn attribute_name(&self, attribute: &RawAttribute) -> Result<String> {
        self.constant_pool.utf8(attribute.name_index)
    }

    /// Build the editable view of this class: one `Method` per method entry, in order.
    pub fn decode(&self) -> Result<Class> {
        let name = self.name()?;
        let mut methods = Vec::with_capacity(self.methods.len());
        for member in &self.methods {
            let method_name = self.constant_pool.utf8(member.name_index)?;
            let descriptor = self.constant_pool.utf8(member.descriptor_index)?;
            let code = self.find_attribute(&member.attributes, CODE)?;
            let method = match code {
                Some(attribute) => bytecode::decode_method(
                    &self.constant_pool,
                    method_name.clone(),
                    descriptor.clone(),
                    member.access_flags,
                    &attribute.info,
                )
                .with_context(|| format!("decode {}.{}{}", name, method_name, descriptor))?,
                None => Method::new(method_name, descriptor, member.access_flags),
            };
            methods.push(method);
        }
        Ok(Class {
            name,
            super_name: self.super_name()?,
            methods,
        })
    }

    /// Write modified methods of `class` back into their `Code` attributes.
    ///
    /// Returns the methods whose offset-dependent code attributes had to be dropped. Losing a
    /// StackMapTable is an error for class versions whose verifier requires one.
    pub fn apply(&mut self, class: &Class) -> Result<Vec<DroppedAttributes>> {
        if class.methods.len() != self.methods.len() {
            anyhow::bail!(
                "method count changed from {} to {}",
                self.methods.len(),
                class.methods.len()
            );
        }
        let code_name = self.constant_pool.intern_utf8(CODE)?;
        let mut dropped = Vec::new();
        for (member, method) in self.methods.iter_mut().zip(&class.methods) {
            if !method.modified {
                continue;
            }
            let assembled = assembler::assemble(method, &mut self.constant_pool)
                .with_context(|| {
                    format!("assemble {}.{}{}", class.name, method.name, method.descriptor)
                })?;
            if self.major_version >= FRAMES_REQUIRED_SINCE
                && assembled.dropped.iter().any(|name| name == STACK_MAP_TABLE)
            {
                anyhow::bail!(
                    "cannot rewrite {}.{}{}: its StackMapTable no longer fits the code and \
                     class version {} requires one",
                    class.name,
                    method.name,
                    method.descriptor,
                    self.major_version
                );
            }
            if !assembled.dropped.is_empty() {
                warn!(
                    "dropped {} from {}.{}{}",
                    assembled.dropped.join(", "),
                    class.name,
                    method.name,
                    method.descriptor
                );
                dropped.push(DroppedAttributes {
                    method: method.name.clone(),
                    descriptor: method.descriptor.clone(),
                    attributes: assembled.dropped,
                });
            }
            let position = member
                .attributes
                .iter()
                .position(|attribute| attribute.name_index == code_name);
            let attribute = RawAttribute {
                name_index: code_name,
                info: assembled.info,
            };
            match position {
                Some(index) => member.attributes[index] = attribute,
                None => member.attributes.push(attribute),
            }
        }
        Ok(dropped)
    }

    fn find_attribute<'a>(
        &self,
        attributes: &'a [RawAttribute],
        name: &str,
    ) -> Result<Option<&'a RawAttribute>> {
        for attribute in attributes {
            if self.attribute_name(attribute)? == name {
                return Ok(Some(attribute));
            }
        }
        Ok(None)
    }
}

/// Code attributes removed from one method because its layout changed.
#[derive(Clone, Debug, PartialEq)]
pub struct DroppedAttributes {
    pub method: String,
    pub descriptor: String,
    pub attributes: Vec<String>,
}

fn parse_members(data: &[u8], offset: &mut usize) -> Result<Vec<MemberInfo>> {
    let count = read_u16_class(data, offset)?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        members.push(MemberInfo {
            access_flags: read_u16_class(data, offset)?,
            name_index: read_u16_class(data, offset)?,
            descriptor_index: read_u16_class(data, offset)?,
            attributes: parse_attributes(data, offset)?,
        });
    }
    Ok(members)
}

fn parse_attributes(data: &[u8], offset: &mut usize) -> Result<Vec<RawAttribute>> {
    let count = read_u16_class(data, offset)?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = read_u16_class(data, offset)?;
        let len = read_u32_class(data, offset)? as usize;
        let info = read_bytes_class(data, offset, len)?.to_vec();
        attributes.push(RawAttribute { name_index, info });
    }
    Ok(attributes)
}

fn write_members(out: &mut Vec<u8>, members: &[MemberInfo]) -> Result<()> {
    write_u2(out, u16::try_from(members.len()).context("too many members")?);
    for member in members {
        write_u2(out, member.access_flags);
        write_u2(out, member.name_index);
        write_u2(out, member.descriptor_index);
        write_attributes(out, &member.attributes)?;
    }
    Ok(())
}

pub(crate) fn write_attributes(out: &mut Vec<u8>, attributes: &[RawAttribute]) -> Result<()> {
    write_u2(
        out,
        u16::try_from(attributes.len()).context("too many attributes")?,
    );
    for attribute in attributes {
        write_u2(out, attribute.name_index);
        write_u4(
            out,
            u32::try_from(attribute.info.len()).context("attribute too long")?,
        );
        out.extend_from_slice(&attribute.info);
    }
    Ok(())
}
