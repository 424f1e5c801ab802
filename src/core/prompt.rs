//! Llama 3 prompt rendering and the tool-instruction preamble.

use chrono::NaiveDate;

use crate::core::message::{Message, Role};
use crate::tools::ToolRegistry;

pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";

fn header(role: Role) -> &'static str {
    match role {
        Role::System => "<|start_header_id|>system<|end_header_id|>\n",
        Role::User => "<|start_header_id|>user<|end_header_id|>\n",
        Role::Assistant => "<|start_header_id|>assistant<|end_header_id|>\n",
    }
}

/// Serialize messages in order, each behind its role header.
///
/// Content is copied verbatim and followed by a single newline.
pub fn render(messages: &[Message]) -> String {
    let capacity = BEGIN_OF_TEXT.len()
        + messages
            .iter()
            .map(|m| header(m.role).len() + m.content.len() + 1)
            .sum::<usize>();
    let mut prompt = String::with_capacity(capacity);
    prompt.push_str(BEGIN_OF_TEXT);
    for message in messages {
        prompt.push_str(header(message.role));
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt
}

/// Like [`render`], with an open assistant header so a raw completion
/// endpoint continues as the assistant.
pub fn render_for_completion(messages: &[Message]) -> String {
    let mut prompt = render(messages);
    prompt.push_str(header(Role::Assistant));
    prompt
}

/// Build the seed system message listing every registered tool.
pub fn tool_system_prompt(registry: &ToolRegistry, today: NaiveDate) -> String {
    let mut prompt = String::new();
    prompt.push_str("Cutting Knowledge Date: December 2023\n");
    prompt.push_str(&format!("Today Date: {}\n\n", today.format("%d %b %Y")));
    prompt.push_str(
        "# Tool Instructions\n\
         - If multiple tools are available ONLY return one tool at a time. The user will return the result\n  \
         of the function call in a multi-turn conversation which will determine the next tool to be used.\n\n\n\
         You have access to the following functions:\n\n",
    );
    for description in registry.describe_all() {
        prompt.push_str(&description);
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "\nIf you choose to call a function ONLY reply in the following format:\n\
         <{start_tag}={function_name}>{parameters}{end_tag}\n\
         where\n\n\
         start_tag => `<function`\n\
         parameters => a JSON dict with the function argument name as key and function argument value as value.\n\
         end_tag => `</function>`\n\n\
         Here is an example,\n\
         <function=example_function_name>{\"example_name\": \"example_value\"}</function>\n\n\
         Reminder:\n\
         - ONLY call functions listed in available functions\n\
         - Function calls MUST follow the specified format\n\
         - Required parameters MUST be specified\n\
         - ONLY call one function at a time\n\
         - Put the entire function call reply on one line\n\
         - Do not explain tool use, only return functions to be executed\n\
         You are a helpful Assistant.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::default_registry;
    use std::path::PathBuf;

    #[test]
    fn renders_each_message_behind_its_header() {
        let messages = vec![
            Message::system("Hello"),
            Message::user("How are you?"),
            Message::assistant("I'm fine, thank you!"),
        ];

        let expected = "<|begin_of_text|>\
            <|start_header_id|>system<|end_header_id|>\nHello\n\
            <|start_header_id|>user<|end_header_id|>\nHow are you?\n\
            <|start_header_id|>assistant<|end_header_id|>\nI'm fine, thank you!\n";

        assert_eq!(render(&messages), expected);
    }

    #[test]
    fn empty_conversation_renders_only_the_leading_marker() {
        assert_eq!(render(&[]), "<|begin_of_text|>");
    }

    #[test]
    fn rendering_is_deterministic_and_verbatim() {
        let messages = vec![
            Message::system("  keep\tspacing  "),
            Message::user("<b>not escaped</b>\n"),
        ];
        let first = render(&messages);
        let second = render(&messages);
        assert_eq!(first, second);
        assert!(first.contains("  keep\tspacing  \n"));
        assert!(first.contains("<b>not escaped</b>\n\n"));
    }

    #[test]
    fn completion_prompt_ends_with_open_assistant_header() {
        let prompt = render_for_completion(&[Message::user("hi")]);
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n"));
    }

    #[test]
    fn tool_prompt_lists_every_tool_and_the_date() {
        let registry = default_registry(PathBuf::from("/tmp/llamaman-test"));
        let today = NaiveDate::from_ymd_opt(2024, 7, 23).unwrap();
        let prompt = tool_system_prompt(&registry, today);

        assert!(prompt.contains("Today Date: 23 Jul 2024"));
        for name in ["add", "multiply", "read_file", "write_file"] {
            assert!(
                prompt.contains(&format!("\"name\":\"{name}\"")),
                "missing {name}"
            );
        }
        assert!(prompt.contains("<function=example_function_name>"));
    }
}
