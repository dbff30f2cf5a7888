use crate::ir::{CallKind, Insn, LdcConstant};
use crate::opcodes;
use crate::predicate::{get_static, init, invoke_static, member, new_object, opcode, put_static};
use crate::rules::{PatchAction, PatchRule, RuleMetadata};

pub(crate) const DISPLAY: &str = "org.lwjglx.opengl.Display";
const WINDOW: &str = "org/lwjglx/opengl/Display$Window";
const GLFW: &str = "org/lwjgl/glfw/GLFW";
const DRAWABLE_GL: &str = "org/lwjglx/opengl/DrawableGL";
const BACKEND: &str = "com/recursive_pineapple/mcvk/rendering/MCVKNative";
const GLFW_CLIENT_API: i32 = 0x22001;
const GLFW_NO_API: i32 = 0;

/// Rewrites of `Display.create`: hand the window to the replacement backend instead of making
/// a GL context current, and ask GLFW for a window without a client API.
pub(crate) fn rules() -> Vec<PatchRule> {
    vec![
        PatchRule {
            metadata: RuleMetadata {
                id: "DISPLAY_INIT_BACKEND",
                name: "Initialize backend with the window",
                description: "Passes the GLFW window handle to the native backend where the GL context used to be made current",
            },
            class_name: DISPLAY,
            method_name: "create",
            predicates: make_context_current(),
            action: PatchAction::Inject(Box::new(|| {
                vec![
                    Insn::field(opcodes::GETSTATIC, WINDOW, "handle", "J"),
                    Insn::invoke(CallKind::Static, BACKEND, "init", "(J)V"),
                ]
            })),
        },
        PatchRule {
            metadata: RuleMetadata {
                id: "DISPLAY_NO_CLIENT_API",
                name: "Request a window without client API",
                description: "Sets GLFW_CLIENT_API to GLFW_NO_API after the default window hints",
            },
            class_name: DISPLAY,
            method_name: "create",
            predicates: vec![invoke_static(
                member().owner(GLFW).name("glfwDefaultWindowHints"),
            )],
            action: PatchAction::Inject(Box::new(|| {
                vec![
                    Insn::Ldc(LdcConstant::Integer(GLFW_CLIENT_API)),
                    Insn::Ldc(LdcConstant::Integer(GLFW_NO_API)),
                    Insn::invoke(CallKind::Static, GLFW, "glfwWindowHint", "(II)V"),
                ]
            })),
        },
        PatchRule {
            metadata: RuleMetadata {
                id: "DISPLAY_NO_MAKE_CURRENT",
                name: "Drop context activation",
                description: "Removes glfwMakeContextCurrent on the display window",
            },
            class_name: DISPLAY,
            method_name: "create",
            predicates: make_context_current(),
            action: PatchAction::Remove,
        },
        PatchRule {
            metadata: RuleMetadata {
                id: "DISPLAY_NO_DRAWABLE",
                name: "Drop GL drawable",
                description: "Removes construction of the DrawableGL stored in Display.drawable",
            },
            class_name: DISPLAY,
            method_name: "create",
            predicates: vec![
                new_object(Some(DRAWABLE_GL)),
                opcode(opcodes::DUP),
                init(member().owner(DRAWABLE_GL)),
                put_static(
                    member()
                        .descriptor("Lorg/lwjglx/opengl/DrawableGL;")
                        .name("drawable"),
                ),
            ],
            action: PatchAction::Remove,
        },
        PatchRule {
            metadata: RuleMetadata {
                id: "DISPLAY_NO_CAPABILITIES",
                name: "Drop GL capabilities",
                description: "Removes GL.createCapabilities and the pop of its result",
            },
            class_name: DISPLAY,
            method_name: "create",
            predicates: vec![
                invoke_static(member().owner("org/lwjgl/opengl/GL").name("createCapabilities")),
                opcode(opcodes::POP),
            ],
            action: PatchAction::Remove,
        },
    ]
}

fn make_context_current() -> Vec<crate::predicate::InsnPredicate> {
    vec![
        get_static(member().owner(WINDOW).name("handle")),
        invoke_static(member().owner(GLFW).name("glfwMakeContextCurrent")),
    ]
}
