use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::opcodes;

/// Stack category of a descriptor type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Category {
    Void,
    /// boolean, byte, char, short, and int all travel as int on the operand stack.
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl Category {
    fn of(ty: &TypeDescriptor) -> Self {
        match ty {
            TypeDescriptor::Void => Category::Void,
            TypeDescriptor::Boolean
            | TypeDescriptor::Byte
            | TypeDescriptor::Char
            | TypeDescriptor::Short
            | TypeDescriptor::Integer => Category::Int,
            TypeDescriptor::Long => Category::Long,
            TypeDescriptor::Float => Category::Float,
            TypeDescriptor::Double => Category::Double,
            TypeDescriptor::Object(_) | TypeDescriptor::Array(..) => Category::Reference,
        }
    }

    /// Operand stack words occupied by a value of this category.
    pub fn width(self) -> u16 {
        match self {
            Category::Void => 0,
            Category::Long | Category::Double => 2,
            Category::Int | Category::Float | Category::Reference => 1,
        }
    }

    /// Opcode that pops one value of this category.
    pub fn pop_opcode(self) -> Option<u8> {
        match self.width() {
            0 => None,
            1 => Some(opcodes::POP),
            _ => Some(opcodes::POP2),
        }
    }

    /// Opcode that pushes the zero value (or null) of this category.
    pub fn zero_opcode(self) -> Option<u8> {
        match self {
            Category::Void => None,
            Category::Int => Some(opcodes::ICONST_0),
            Category::Long => Some(opcodes::LCONST_0),
            Category::Float => Some(opcodes::FCONST_0),
            Category::Double => Some(opcodes::DCONST_0),
            Category::Reference => Some(opcodes::ACONST_NULL),
        }
    }
}

/// Parsed method descriptor reduced to what stack accounting needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
    arguments: Vec<Category>,
    return_category: Category,
}

impl Descriptor {
    pub fn parse(text: &str) -> Result<Self> {
        let descriptor = MethodDescriptor::from_str(text)
            .with_context(|| format!("malformed method descriptor {text}"))?;
        let arguments = descriptor
            .parameter_types()
            .iter()
            .map(Category::of)
            .collect::<Vec<_>>();
        if arguments.contains(&Category::Void) {
            anyhow::bail!("malformed method descriptor {text}: void parameter");
        }
        Ok(Self {
            arguments,
            return_category: Category::of(descriptor.return_type()),
        })
    }

    pub fn arguments(&self) -> &[Category] {
        &self.arguments
    }

    pub fn return_category(&self) -> Category {
        self.return_category
    }

    /// Total operand stack words consumed by the arguments, excluding any receiver.
    pub fn argument_width(&self) -> u16 {
        self.arguments.iter().map(|arg| arg.width()).sum()
    }
}

impl FromStr for Descriptor {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        Descriptor::parse(text)
    }
}

/// Category of a field descriptor such as `J` or `Ljava/lang/String;`.
pub fn field_category(text: &str) -> Result<Category> {
    let ty = TypeDescriptor::from_str(text)
        .with_context(|| format!("malformed field descriptor {text}"))?;
    match Category::of(&ty) {
        Category::Void => anyhow::bail!("malformed field descriptor {text}: void field"),
        category => Ok(category),
    }
}
