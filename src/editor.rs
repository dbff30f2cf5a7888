use std::collections::HashSet;

use crate::ir::{Insn, Label, Method, Node};
use crate::matcher::find_matches;
use crate::predicate::InsnPredicate;

/// Splice generated instructions directly after the last node of every match.
///
/// The generator runs once per match, in match order. Returns whether anything matched.
pub fn inject<F>(method: &mut Method, predicates: &[InsnPredicate], mut generator: F) -> bool
where
    F: FnMut() -> Vec<Insn>,
{
    let matches = find_matches(method, predicates);
    if matches.is_empty() {
        return false;
    }
    let generated: Vec<(usize, Vec<Insn>)> = matches
        .iter()
        .map(|found| (found.last, generator()))
        .collect();
    for (last, insns) in generated.into_iter().rev() {
        method
            .instructions
            .splice(last + 1..last + 1, insns.into_iter().map(Node::Insn));
    }
    method.modified = true;
    true
}

/// Delete every node of every match. Returns whether anything matched.
///
/// Handler entries and local variable records that start inside a matched window go with it.
/// Markers trailing a match are deleted too, but labels that something else still refers to
/// stay where they were, so no reference dangles.
pub fn remove(method: &mut Method, predicates: &[InsnPredicate]) -> bool {
    let matches = find_matches(method, predicates);
    if matches.is_empty() {
        return false;
    }
    let mut deleted = vec![false; method.instructions.len()];
    let mut window_labels: HashSet<Label> = HashSet::new();
    for found in &matches {
        for index in &found.nodes {
            deleted[*index] = true;
            if let Node::Label(label) = &method.instructions[*index] {
                if *index <= found.last {
                    window_labels.insert(*label);
                }
            }
        }
    }

    method
        .handlers
        .retain(|handler| !window_labels.contains(&handler.start));
    method
        .local_variables
        .retain(|local| !window_labels.contains(&local.start));
    method
        .local_variable_types
        .retain(|local| !window_labels.contains(&local.start));

    let referenced = referenced_labels(method, &deleted);
    let nodes = std::mem::take(&mut method.instructions);
    method.instructions = nodes
        .into_iter()
        .zip(deleted)
        .filter(|(node, gone)| match node {
            Node::Label(label) => !gone || referenced.contains(label),
            _ => !gone,
        })
        .map(|(node, _)| node)
        .collect();
    method.modified = true;
    true
}

/// Labels referenced by surviving instructions, handlers, and local variable records.
fn referenced_labels(method: &Method, deleted: &[bool]) -> HashSet<Label> {
    let mut labels = HashSet::new();
    for (node, gone) in method.instructions.iter().zip(deleted) {
        if *gone {
            continue;
        }
        match node.insn() {
            Some(Insn::Jump { target, .. }) => {
                labels.insert(*target);
            }
            Some(Insn::TableSwitch {
                default, targets, ..
            }) => {
                labels.insert(*default);
                labels.extend(targets.iter().copied());
            }
            Some(Insn::LookupSwitch { default, pairs }) => {
                labels.insert(*default);
                labels.extend(pairs.iter().map(|(_, target)| *target));
            }
            _ => {}
        }
    }
    for handler in &method.handlers {
        labels.extend([handler.start, handler.end, handler.handler]);
    }
    for local in method
        .local_variables
        .iter()
        .chain(method.local_variable_types.iter())
    {
        labels.extend([local.start, local.end]);
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_STATIC, CallKind, HandlerEntry};
    use crate::opcodes;
    use crate::predicate::{get_static, invoke_static, member, opcode};

    const WINDOW: &str = "org/lwjglx/opengl/Display$Window";
    const GLFW: &str = "org/lwjgl/glfw/GLFW";

    fn pattern() -> Vec<InsnPredicate> {
        vec![
            get_static(member().owner(WINDOW).name("handle")),
            invoke_static(member().owner(GLFW).name("glfwMakeContextCurrent")),
        ]
    }

    fn create_method() -> Method {
        let mut method = Method::new("create", "()V", ACC_STATIC);
        method.instructions = vec![
            Node::Insn(Insn::field(opcodes::GETSTATIC, WINDOW, "handle", "J")),
            Node::Insn(Insn::invoke(
                CallKind::Static,
                GLFW,
                "glfwMakeContextCurrent",
                "(J)V",
            )),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
        ];
        method
    }

    fn backend_init() -> Vec<Insn> {
        vec![
            Insn::field(opcodes::GETSTATIC, WINDOW, "handle", "J"),
            Insn::invoke(
                CallKind::Static,
                "com/recursive_pineapple/mcvk/rendering/MCVKNative",
                "init",
                "(J)V",
            ),
        ]
    }

    #[test]
    fn inject_appends_after_the_match() {
        let mut method = create_method();

        assert!(inject(&mut method, &pattern(), backend_init));

        assert!(method.modified);
        assert_eq!(method.instructions.len(), 5);
        assert_eq!(method.instructions[2], Node::Insn(backend_init()[0].clone()));
        assert_eq!(method.instructions[3], Node::Insn(backend_init()[1].clone()));
        assert_eq!(
            method.instructions[4],
            Node::Insn(Insn::Simple(opcodes::RETURN))
        );
    }

    #[test]
    fn inject_runs_the_generator_once_per_match() {
        let mut method = Method::new("f", "()V", ACC_STATIC);
        method.instructions = vec![
            Node::Insn(Insn::Simple(opcodes::DUP)),
            Node::Insn(Insn::Simple(opcodes::POP)),
            Node::Insn(Insn::Simple(opcodes::DUP)),
            Node::Insn(Insn::Simple(opcodes::POP)),
        ];
        let mut calls = 0;

        let found = inject(&mut method, &[opcode(opcodes::DUP)], || {
            calls += 1;
            vec![Insn::Int {
                opcode: opcodes::BIPUSH,
                value: calls,
            }]
        });

        assert!(found);
        assert_eq!(calls, 2);
        assert_eq!(
            method.instructions[1],
            Node::Insn(Insn::Int {
                opcode: opcodes::BIPUSH,
                value: 1
            })
        );
        assert_eq!(
            method.instructions[4],
            Node::Insn(Insn::Int {
                opcode: opcodes::BIPUSH,
                value: 2
            })
        );
    }

    #[test]
    fn remove_deletes_span_and_rescan_finds_nothing() {
        let mut method = create_method();

        assert!(remove(&mut method, &pattern()));

        assert_eq!(
            method.instructions,
            vec![Node::Insn(Insn::Simple(opcodes::RETURN))]
        );
        assert!(!remove(&mut method, &pattern()));
    }

    #[test]
    fn remove_drops_handlers_starting_in_the_span() {
        let mut method = Method::new("f", "()V", ACC_STATIC);
        let try_start = method.new_label();
        let try_end = method.new_label();
        let handler = method.new_label();
        let other_start = method.new_label();
        method.instructions = vec![
            Node::Label(other_start),
            Node::Insn(Insn::Simple(opcodes::NOP)),
            Node::Label(try_start),
            Node::Insn(Insn::Simple(opcodes::DUP)),
            Node::Insn(Insn::Simple(opcodes::POP)),
            Node::Label(try_end),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
            Node::Label(handler),
            Node::Insn(Insn::Simple(opcodes::ATHROW)),
        ];
        method.handlers = vec![
            HandlerEntry {
                start: try_start,
                end: try_end,
                handler,
                catch_type: None,
            },
            HandlerEntry {
                start: other_start,
                end: try_end,
                handler,
                catch_type: Some("java/lang/Exception".to_string()),
            },
        ];

        assert!(remove(
            &mut method,
            &[opcode(opcodes::DUP), opcode(opcodes::POP)]
        ));

        assert_eq!(method.handlers.len(), 1);
        assert_eq!(method.handlers[0].start, other_start);
        assert!(method.label_position(try_start).is_none());
        assert!(method.label_position(try_end).is_some());
    }

    #[test]
    fn remove_takes_trailing_markers_but_keeps_their_handlers() {
        let mut method = Method::new("f", "()V", ACC_STATIC);
        let try_start = method.new_label();
        let try_end = method.new_label();
        let handler = method.new_label();
        method.instructions = vec![
            Node::Insn(Insn::Simple(opcodes::DUP)),
            Node::Insn(Insn::Simple(opcodes::POP)),
            Node::Line(40),
            Node::Label(try_start),
            Node::Line(41),
            Node::Insn(Insn::Simple(opcodes::NOP)),
            Node::Label(try_end),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
            Node::Label(handler),
            Node::Insn(Insn::Simple(opcodes::ATHROW)),
        ];
        method.handlers = vec![HandlerEntry {
            start: try_start,
            end: try_end,
            handler,
            catch_type: None,
        }];

        assert!(remove(
            &mut method,
            &[opcode(opcodes::DUP), opcode(opcodes::POP)]
        ));

        assert_eq!(method.handlers.len(), 1);
        assert_eq!(
            method.instructions[..2],
            [
                Node::Label(try_start),
                Node::Insn(Insn::Simple(opcodes::NOP)),
            ]
        );
    }

    #[test]
    fn remove_keeps_labels_targeted_from_outside() {
        let mut method = Method::new("f", "()V", ACC_STATIC);
        let target = method.new_label();
        method.instructions = vec![
            Node::Insn(Insn::Jump {
                opcode: opcodes::GOTO,
                target,
            }),
            Node::Label(target),
            Node::Insn(Insn::Simple(opcodes::NOP)),
            Node::Insn(Insn::Simple(opcodes::RETURN)),
        ];

        assert!(remove(&mut method, &[opcode(opcodes::NOP)]));

        assert_eq!(
            method.instructions,
            vec![
                Node::Insn(Insn::Jump {
                    opcode: opcodes::GOTO,
                    target,
                }),
                Node::Label(target),
                Node::Insn(Insn::Simple(opcodes::RETURN)),
            ]
        );
    }
}
