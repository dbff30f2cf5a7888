use crate::opcodes;
use crate::predicate::{
    get_static, init, invoke, load_var, local, member, new_object, opcode, put_static, store_var,
};
use crate::rules::{PatchAction, PatchRule, RuleMetadata};

pub(crate) const SPLASH_PROGRESS: &str = "cpw.mods.fml.client.SplashProgress";
const SHARED_DRAWABLE: &str = "org/lwjgl/opengl/SharedDrawable";

/// The splash screen shares the display's GL context from a second thread; without a GL context
/// that setup throws, so the whole try/catch around it is removed.
pub(crate) fn rules() -> Vec<PatchRule> {
    vec![PatchRule {
        metadata: RuleMetadata {
            id: "SPLASH_NO_SHARED_CONTEXT",
            name: "Drop shared splash context",
            description: "Removes SharedDrawable creation and the context switch in SplashProgress.start",
        },
        class_name: SPLASH_PROGRESS,
        method_name: "start",
        predicates: vec![
            new_object(Some(SHARED_DRAWABLE)),
            opcode(opcodes::DUP),
            invoke(member().name("getDrawable")),
            init(member().owner(SHARED_DRAWABLE)),
            put_static(member().name("d")),
            invoke(member().name("getDrawable")),
            invoke(member().name("releaseContext")),
            get_static(member().name("d")),
            invoke(member().owner("org/lwjgl/opengl/Drawable").name("makeCurrent")),
            opcode(opcodes::GOTO),
            store_var(local().name("e")),
            load_var(local().name("e")),
            invoke(member().name("printStackTrace")),
            new_object(Some("java/lang/RuntimeException")),
            opcode(opcodes::DUP),
            load_var(local().name("e")),
            init(member().owner("java/lang/RuntimeException")),
            opcode(opcodes::ATHROW),
        ],
        action: PatchAction::Remove,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_STATIC, CallKind, Class, HandlerEntry, Insn, LocalVariable, Method, Node};

    const SPLASH: &str = "cpw/mods/fml/client/SplashProgress";
    const DRAWABLE: &str = "org/lwjgl/opengl/Drawable";
    const GET_DRAWABLE: &str = "()Lorg/lwjgl/opengl/Drawable;";

    fn start_method() -> Method {
        let mut method = Method::new("start", "()V", ACC_STATIC);
        let try_start = method.new_label();
        let try_end = method.new_label();
        let handler = method.new_label();
        let e_start = method.new_label();
        let after = method.new_label();
        let call = |kind, owner: &str, name: &str, descriptor: &str| {
            Node::Insn(Insn::invoke(kind, owner, name, descriptor))
        };
        method.instructions = vec![
            Node::Insn(Insn::Simple(opcodes::NOP)),
            Node::Label(try_start),
            Node::Line(250),
            Node::Insn(Insn::Type {
                opcode: opcodes::NEW,
                class_name: SHARED_DRAWABLE.to_string(),
            }),
            Node::Insn(Insn::Simple(opcodes::DUP)),
            call(CallKind::Static, "org/lwjgl/opengl/Display", "getDrawable", GET_DRAWABLE),
            call(CallKind::Special, SHARED_DRAWABLE, "<init>", "(Lorg/lwjgl/opengl/Drawable;)V"),
            Node::Insn(Insn::field(opcodes::PUTSTATIC, SPLASH, "d", "Lorg/lwjgl/opengl/Drawable;")),
            Node::Line(251),
            call(CallKind::Static, "org/lwjgl/opengl/Display", "getDrawable", GET_DRAWABLE),
            call(CallKind::Interface, DRAWABLE, "releaseContext", "()V"),
            Node::Line(252),
            Node::Insn(Insn::field(opcodes::GETSTATIC, SPLASH, "d", "Lorg/lwjgl/opengl/Drawable;")),
            call(CallKind::Interface, DRAWABLE, "makeCurrent", "()V"),
            Node::Label(try_end),
            Node::Insn(Insn::Jump {
                opcode: opcodes::GOTO,
                target: after,
            }),
            Node::Label(handler),
            Node::Insn(Insn::Var {
                opcode: opcodes::ASTORE,
                slot: 0,
            }),
            Node::Label(e_start),
            Node::Insn(Insn::Var {
                opcode: opcodes::ALOAD,
                slot: 0,
            }),
            call(CallKind::Virtual, "org/lwjgl/LWJGLException", "printStackTrace", "()V"),
            Node::Insn(Insn::Type {
                opcode: opcodes::NEW,
                class_name: "java/lang/RuntimeException".to_string(),
            }),
            Node::Insn(Insn::Simple(opcodes::DUP)),
            Node::Insn(Insn::Var {
                opcode: opcodes::ALOAD,
                slot: 0,
            }),
            call(
                CallKind::Special,
                "java/lang/RuntimeException",
                "<init>",
                "(Ljava/lang/Throwable;)V",
            ),
            Node::Insn(Insn::Simple(opcodes::ATHROW)),
            Node::Label(after),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
        ];
        method.handlers.push(HandlerEntry {
            start: try_start,
            end: try_end,
            handler,
            catch_type: Some("org/lwjgl/LWJGLException".to_string()),
        });
        method.local_variables.push(LocalVariable {
            slot: 0,
            name: "e".to_string(),
            descriptor: "Lorg/lwjgl/LWJGLException;".to_string(),
            start: e_start,
            end: after,
        });
        method
    }

    #[test]
    fn shared_context_block_is_removed_with_its_handler() {
        let mut class = Class {
            name: SPLASH.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            methods: vec![start_method()],
        };

        for rule in rules() {
            rule.apply(&mut class).expect("rule applies");
        }

        let method = &class.methods[0];
        assert!(method.handlers.is_empty());
        assert!(method.local_variables.is_empty());
        let insns: Vec<&Insn> = method.instructions.iter().filter_map(Node::insn).collect();
        assert_eq!(
            insns,
            vec![&Insn::Simple(opcodes::NOP), &Insn::Simple(opcodes::RETURN)]
        );
    }

    #[test]
    fn changed_method_shape_is_fatal() {
        let mut method = start_method();
        method.instructions.retain(|node| {
            !matches!(node, Node::Insn(Insn::Method(call)) if call.name == "printStackTrace")
        });
        let mut class = Class {
            name: SPLASH.to_string(),
            super_name: None,
            methods: vec![method],
        };

        let err = rules()[0].apply(&mut class).expect_err("no match");

        assert!(format!("{err}").contains("SPLASH_NO_SHARED_CONTEXT"));
    }
}
