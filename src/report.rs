use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, Location, LogicalLocation, Message, Result as SarifResult, Run, Sarif,
    Tool, ToolComponent, SCHEMA_URL,
};

use crate::classfile::DroppedAttributes;
use crate::redirect::StubbedCall;

pub const UNIMPLEMENTED_CALL: &str = "UNIMPLEMENTED_CALL";
pub const FRAMES_DROPPED: &str = "FRAMES_DROPPED";

/// Result for a call site replaced by a stub because no sandbox method implements it.
pub fn stubbed_call_result(call: &StubbedCall) -> SarifResult {
    let message = result_message(format!(
        "No redirect target for {}.{}{}; call replaced by a stub",
        call.owner, call.name, call.descriptor
    ));
    SarifResult::builder()
        .rule_id(UNIMPLEMENTED_CALL)
        .message(message)
        .locations(vec![method_location(
            &call.class_name,
            &call.method_name,
            &call.method_descriptor,
        )])
        .build()
}

/// Result for a rewritten method whose offset-dependent attributes had to be dropped.
pub fn dropped_frames_result(class_name: &str, dropped: &DroppedAttributes) -> SarifResult {
    let message = result_message(format!(
        "Dropped {} after rewriting; frames must be recomputed",
        dropped.attributes.join(", ")
    ));
    SarifResult::builder()
        .rule_id(FRAMES_DROPPED)
        .message(message)
        .locations(vec![method_location(
            class_name,
            &dropped.method,
            &dropped.descriptor,
        )])
        .build()
}

pub fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

pub fn build_sarif(
    artifacts: Vec<Artifact>,
    results: Vec<SarifResult>,
    invocation: Invocation,
) -> Sarif {
    let driver = ToolComponent::builder()
        .name("gl-redirect")
        .version(env!("CARGO_PKG_VERSION"))
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

fn method_location(class_name: &str, method_name: &str, descriptor: &str) -> Location {
    let logical = LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
