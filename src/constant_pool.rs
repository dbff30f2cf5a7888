use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::bytes::{
    read_bytes_class, read_u8_class, read_u16_class, read_u32_class, write_u1, write_u2, write_u4,
};

/// Raw constant pool entry. Floating point values are kept as bit patterns so entries can be
/// hashed for interning.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Constant {
    /// Slot 0 and the second slot of long/double entries.
    Unusable,
    Utf8 {
        bytes: Vec<u8>,
    },
    Integer {
        value: i32,
    },
    Float {
        bits: u32,
    },
    Long {
        value: i64,
    },
    Double {
        bits: u64,
    },
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

impl Constant {
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long { .. } | Constant::Double { .. })
    }
}

/// Resolved field or method reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub interface: bool,
}

/// Constant pool with deduplicating insertion.
///
/// Existing entries are indexed on parse so interning a value that is already present returns
/// its original index; unchanged instructions therefore keep their operands byte-for-byte.
#[derive(Clone, Debug)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    index: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            index: HashMap::new(),
        }
    }

    pub(crate) fn parse(data: &[u8], offset: &mut usize) -> Result<Self> {
        let count = read_u16_class(data, offset)? as usize;
        let mut pool = Self::new();
        let mut slot = 1;
        while slot < count {
            let tag = read_u8_class(data, offset)?;
            let entry = match tag {
                1 => {
                    let len = read_u16_class(data, offset)? as usize;
                    let bytes = read_bytes_class(data, offset, len)?.to_vec();
                    Constant::Utf8 { bytes }
                }
                3 => Constant::Integer {
                    value: read_u32_class(data, offset)? as i32,
                },
                4 => Constant::Float {
                    bits: read_u32_class(data, offset)?,
                },
                5 => {
                    let high = read_u32_class(data, offset)? as u64;
                    let low = read_u32_class(data, offset)? as u64;
                    Constant::Long {
                        value: ((high << 32) | low) as i64,
                    }
                }
                6 => {
                    let high = read_u32_class(data, offset)? as u64;
                    let low = read_u32_class(data, offset)? as u64;
                    Constant::Double {
                        bits: (high << 32) | low,
                    }
                }
                7 => Constant::Class {
                    name_index: read_u16_class(data, offset)?,
                },
                8 => Constant::String {
                    string_index: read_u16_class(data, offset)?,
                },
                9 => Constant::Fieldref {
                    class_index: read_u16_class(data, offset)?,
                    name_and_type_index: read_u16_class(data, offset)?,
                },
                10 => Constant::Methodref {
                    class_index: read_u16_class(data, offset)?,
                    name_and_type_index: read_u16_class(data, offset)?,
                },
                11 => Constant::InterfaceMethodref {
                    class_index: read_u16_class(data, offset)?,
                    name_and_type_index: read_u16_class(data, offset)?,
                },
                12 => Constant::NameAndType {
                    name_index: read_u16_class(data, offset)?,
                    descriptor_index: read_u16_class(data, offset)?,
                },
                15 => Constant::MethodHandle {
                    reference_kind: read_u8_class(data, offset)?,
                    reference_index: read_u16_class(data, offset)?,
                },
                16 => Constant::MethodType {
                    descriptor_index: read_u16_class(data, offset)?,
                },
                17 => Constant::Dynamic {
                    bootstrap_method_attr_index: read_u16_class(data, offset)?,
                    name_and_type_index: read_u16_class(data, offset)?,
                },
                18 => Constant::InvokeDynamic {
                    bootstrap_method_attr_index: read_u16_class(data, offset)?,
                    name_and_type_index: read_u16_class(data, offset)?,
                },
                19 => Constant::Module {
                    name_index: read_u16_class(data, offset)?,
                },
                20 => Constant::Package {
                    name_index: read_u16_class(data, offset)?,
                },
                _ => anyhow::bail!("unknown constant pool tag {} at slot {}", tag, slot),
            };
            slot += if entry.is_wide() { 2 } else { 1 };
            pool.insert_parsed(entry);
        }
        if pool.entries.len() != count {
            anyhow::bail!("constant pool slot count mismatch");
        }
        Ok(pool)
    }

    fn insert_parsed(&mut self, entry: Constant) {
        let index = self.entries.len() as u16;
        self.index.entry(entry.clone()).or_insert(index);
        let wide = entry.is_wide();
        self.entries.push(entry);
        if wide {
            self.entries.push(Constant::Unusable);
        }
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        write_u2(out, self.entries.len() as u16);
        for entry in self.entries.iter().skip(1) {
            match entry {
                Constant::Unusable => {}
                Constant::Utf8 { bytes } => {
                    write_u1(out, 1);
                    write_u2(out, bytes.len() as u16);
                    out.extend_from_slice(bytes);
                }
                Constant::Integer { value } => {
                    write_u1(out, 3);
                    write_u4(out, *value as u32);
                }
                Constant::Float { bits } => {
                    write_u1(out, 4);
                    write_u4(out, *bits);
                }
                Constant::Long { value } => {
                    write_u1(out, 5);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Constant::Double { bits } => {
                    write_u1(out, 6);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Constant::Class { name_index } => {
                    write_u1(out, 7);
                    write_u2(out, *name_index);
                }
                Constant::String { string_index } => {
                    write_u1(out, 8);
                    write_u2(out, *string_index);
                }
                Constant::Fieldref {
                    class_index,
                    name_and_type_index,
                } => {
                    write_u1(out, 9);
                    write_u2(out, *class_index);
                    write_u2(out, *name_and_type_index);
                }
                Constant::Methodref {
                    class_index,
                    name_and_type_index,
                } => {
                    write_u1(out, 10);
                    write_u2(out, *class_index);
                    write_u2(out, *name_and_type_index);
                }
                Constant::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => {
                    write_u1(out, 11);
                    write_u2(out, *class_index);
                    write_u2(out, *name_and_type_index);
                }
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    write_u1(out, 12);
                    write_u2(out, *name_index);
                    write_u2(out, *descriptor_index);
                }
                Constant::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    write_u1(out, 15);
                    write_u1(out, *reference_kind);
                    write_u2(out, *reference_index);
                }
                Constant::MethodType { descriptor_index } => {
                    write_u1(out, 16);
                    write_u2(out, *descriptor_index);
                }
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    write_u1(out, 17);
                    write_u2(out, *bootstrap_method_attr_index);
                    write_u2(out, *name_and_type_index);
                }
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    write_u1(out, 18);
                    write_u2(out, *bootstrap_method_attr_index);
                    write_u2(out, *name_and_type_index);
                }
                Constant::Module { name_index } => {
                    write_u1(out, 19);
                    write_u2(out, *name_index);
                }
                Constant::Package { name_index } => {
                    write_u1(out, 20);
                    write_u2(out, *name_index);
                }
            }
        }
    }

    /// Number of slots, including the unusable slot 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(index as usize) {
            None | Some(Constant::Unusable) => {
                anyhow::bail!("invalid constant pool index {}", index)
            }
            Some(entry) => Ok(entry),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &Constant> {
        self.entries.iter()
    }

    pub fn utf8(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Utf8 { bytes } => decode_modified_utf8(bytes),
            _ => anyhow::bail!("constant {} is not a utf8 entry", index),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => anyhow::bail!("constant {} is not a class entry", index),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => anyhow::bail!("constant {} is not a name and type entry", index),
        }
    }

    /// Resolve a Fieldref, Methodref, or InterfaceMethodref entry.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class_index, name_and_type_index, interface) = match self.get(index)? {
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            }
            | Constant::Methodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, false),
            Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, true),
            _ => anyhow::bail!("constant {} is not a member reference", index),
        };
        let owner = self.class_name(class_index).context("resolve owner")?;
        let (name, descriptor) = self
            .name_and_type(name_and_type_index)
            .context("resolve name and type")?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
            interface,
        })
    }

    fn intern(&mut self, entry: Constant) -> Result<u16> {
        if let Some(index) = self.index.get(&entry) {
            return Ok(*index);
        }
        let slots = if entry.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > u16::MAX as usize {
            anyhow::bail!("constant pool overflow");
        }
        let index = self.entries.len() as u16;
        self.insert_parsed(entry);
        Ok(index)
    }

    pub fn intern_utf8(&mut self, value: &str) -> Result<u16> {
        let bytes = encode_modified_utf8(value);
        if bytes.len() > u16::MAX as usize {
            anyhow::bail!("utf8 constant too long");
        }
        self.intern(Constant::Utf8 { bytes })
    }

    pub fn intern_class(&mut self, name: &str) -> Result<u16> {
        let name_index = self.intern_utf8(name)?;
        self.intern(Constant::Class { name_index })
    }

    pub fn intern_string(&mut self, value: &str) -> Result<u16> {
        let string_index = self.intern_utf8(value)?;
        self.intern(Constant::String { string_index })
    }

    pub fn intern_integer(&mut self, value: i32) -> Result<u16> {
        self.intern(Constant::Integer { value })
    }

    pub fn intern_float(&mut self, bits: u32) -> Result<u16> {
        self.intern(Constant::Float { bits })
    }

    pub fn intern_long(&mut self, value: i64) -> Result<u16> {
        self.intern(Constant::Long { value })
    }

    pub fn intern_double(&mut self, bits: u64) -> Result<u16> {
        self.intern(Constant::Double { bits })
    }

    pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.intern_utf8(name)?;
        let descriptor_index = self.intern_utf8(descriptor)?;
        self.intern(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn intern_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.intern_class(owner)?;
        let name_and_type_index = self.intern_name_and_type(name, descriptor)?;
        self.intern(Constant::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn intern_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16> {
        let class_index = self.intern_class(owner)?;
        let name_and_type_index = self.intern_name_and_type(name, descriptor)?;
        if interface {
            self.intern(Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            })
        } else {
            self.intern(Constant::Methodref {
                class_index,
                name_and_type_index,
            })
        }
    }
}

/// Decode the JVM's modified UTF-8 (two-byte NUL, surrogate pairs encoded separately).
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let first = bytes[index] as u16;
        if first & 0x80 == 0 {
            units.push(first);
            index += 1;
        } else if first & 0xe0 == 0xc0 {
            let second = *bytes.get(index + 1).context("truncated utf8 sequence")? as u16;
            units.push(((first & 0x1f) << 6) | (second & 0x3f));
            index += 2;
        } else if first & 0xf0 == 0xe0 {
            let second = *bytes.get(index + 1).context("truncated utf8 sequence")? as u16;
            let third = *bytes.get(index + 2).context("truncated utf8 sequence")? as u16;
            units.push(((first & 0x0f) << 12) | ((second & 0x3f) << 6) | (third & 0x3f));
            index += 3;
        } else {
            anyhow::bail!("invalid modified utf8 byte 0x{:02x}", first);
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007f => bytes.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                bytes.push(0xc0 | ((unit >> 6) & 0x1f) as u8);
                bytes.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                bytes.push(0xe0 | ((unit >> 12) & 0x0f) as u8);
                bytes.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                bytes.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    bytes
}
