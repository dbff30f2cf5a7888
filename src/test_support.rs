//! Class file construction for unit tests.

use crate::assembler;
use crate::bytes::{write_u2, write_u4};
use crate::classfile::{ClassFile, MemberInfo, RawAttribute};
use crate::constant_pool::ConstantPool;
use crate::ir::{ACC_STATIC, CallKind, Insn, Method, Node};
use crate::opcodes;

pub(crate) struct ClassBuilder {
    pool: ConstantPool,
    this_class: u16,
    super_class: u16,
    methods: Vec<MemberInfo>,
    attributes: Vec<RawAttribute>,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str) -> Self {
        let mut pool = ConstantPool::new();
        let this_class = pool.intern_class(name).expect("this class");
        let super_class = pool.intern_class("java/lang/Object").expect("super class");
        Self {
            pool,
            this_class,
            super_class,
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Method whose body is given as raw bytecode.
    pub(crate) fn method(self, name: &str, descriptor: &str, flags: u16, code: &[u8]) -> Self {
        self.method_with_attributes(name, descriptor, flags, code, &[])
    }

    /// Raw-bytecode method whose `Code` attribute carries the given attributes.
    pub(crate) fn method_with_attributes(
        mut self,
        name: &str,
        descriptor: &str,
        flags: u16,
        code: &[u8],
        attributes: &[(&str, &[u8])],
    ) -> Self {
        let mut info = Vec::new();
        write_u2(&mut info, 8);
        write_u2(&mut info, 8);
        write_u4(&mut info, code.len() as u32);
        info.extend_from_slice(code);
        write_u2(&mut info, 0);
        write_u2(&mut info, attributes.len() as u16);
        for (attribute, body) in attributes {
            write_u2(&mut info, self.pool.intern_utf8(attribute).expect("attribute name"));
            write_u4(&mut info, body.len() as u32);
            info.extend_from_slice(body);
        }
        self.push_method(name, descriptor, flags, Some(info));
        self
    }

    pub(crate) fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.pool
            .intern_method_ref(owner, name, descriptor, false)
            .expect("method ref")
    }

    pub(crate) fn class_attribute(mut self, name: &str, info: &[u8]) -> Self {
        let name_index = self.pool.intern_utf8(name).expect("attribute name");
        self.attributes.push(RawAttribute {
            name_index,
            info: info.to_vec(),
        });
        self
    }

    /// Method assembled from IR, so tests can use symbolic member references.
    pub(crate) fn ir_method(mut self, method: &Method) -> Self {
        let assembled = assembler::assemble(method, &mut self.pool).expect("assemble");
        self.push_method(
            &method.name,
            &method.descriptor,
            method.access_flags,
            Some(assembled.info),
        );
        self
    }

    pub(crate) fn abstract_method(mut self, name: &str, descriptor: &str) -> Self {
        self.push_method(name, descriptor, 0x0401, None);
        self
    }

    fn push_method(&mut self, name: &str, descriptor: &str, flags: u16, code: Option<Vec<u8>>) {
        let name_index = self.pool.intern_utf8(name).expect("name");
        let descriptor_index = self.pool.intern_utf8(descriptor).expect("descriptor");
        let mut attributes = Vec::new();
        if let Some(info) = code {
            attributes.push(RawAttribute {
                name_index: self.pool.intern_utf8("Code").expect("Code"),
                info,
            });
        }
        self.methods.push(MemberInfo {
            access_flags: flags,
            name_index,
            descriptor_index,
            attributes,
        });
    }

    pub(crate) fn build(self) -> Vec<u8> {
        ClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: self.pool,
            access_flags: 0x0021,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: self.methods,
            attributes: self.attributes,
        }
        .to_bytes()
        .expect("write class")
    }
}

/// Class whose `render()I` enables a capability and returns `glGetError()`.
pub(crate) fn gl_caller(name: &str) -> Vec<u8> {
    const GL11: &str = "org/lwjgl/opengl/GL11";
    let mut method = Method::new("render", "()I", ACC_STATIC);
    method.instructions = vec![
        Node::Insn(Insn::Simple(opcodes::ICONST_0)),
        Node::Insn(Insn::invoke(CallKind::Static, GL11, "glEnable", "(I)V")),
        Node::Insn(Insn::invoke(CallKind::Static, GL11, "glGetError", "()I")),
        Node::Insn(Insn::Simple(opcodes::IRETURN)),
    ];
    ClassBuilder::new(name).ir_method(&method).build()
}
