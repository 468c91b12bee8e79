use pagepilot_tools::ToolCatalog;

use crate::scratchpad::Scratchpad;
use crate::traits::{ExtractedContext, PageSnapshot};

/// Builds the system and user prompts for one think step.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    page_excerpt_chars: usize,
}

impl PromptBuilder {
    pub fn new(page_excerpt_chars: usize) -> Self {
        Self { page_excerpt_chars }
    }

    pub fn build_system_prompt(&self, catalog: &ToolCatalog) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "You are a browser automation agent. You work toward the user's goal one action at a time, \
             observing the page after each action.\n\n",
        );

        prompt.push_str("## Tools\n");
        if catalog.is_empty() {
            prompt.push_str("(no tools available)\n");
        } else {
            prompt.push_str(&catalog.describe_for_prompt());
        }
        prompt.push('\n');

        prompt.push_str("## Response Format\n");
        prompt.push_str("Reply with a single JSON object and nothing else:\n");
        prompt.push_str(
            "{\"thought\": \"what you see and why\", \"action\": {\"name\": \"<tool name>\", \"params\": {...}}, \
             \"description\": \"short label for the action\"}\n",
        );
        prompt.push_str("When the goal is reached, or cannot be reached, reply instead with:\n");
        prompt.push_str(
            "{\"thought\": \"...\", \"complete\": true, \"answer\": \"final answer for the user\", \
             \"status\": \"success\" | \"failed\"}\n\n",
        );

        prompt.push_str("## Guidelines\n");
        prompt.push_str("- Exactly one action per reply.\n");
        prompt.push_str("- Use tool names exactly as listed. External tools keep their mcp_ prefix.\n");
        prompt.push_str("- If an action failed, read the error and try a different approach.\n");
        prompt.push_str("- Do not repeat an action that already succeeded.\n");
        prompt
    }

    pub fn build_user_prompt(
        &self,
        scratchpad: &Scratchpad,
        page: &PageSnapshot,
        context: &ExtractedContext,
        max_steps: u32,
    ) -> String {
        let mut prompt = format!("## Goal\n{}\n\n", scratchpad.goal());

        prompt.push_str("## Current Page\n");
        prompt.push_str(&format!("URL: {}\nTitle: {}\n", page.url, page.title));
        if !context.summary.is_empty() {
            prompt.push_str(&format!("Summary: {}\n", context.summary));
        }
        let body = if context.formatted_text.is_empty() {
            &page.html
        } else {
            &context.formatted_text
        };
        if !body.is_empty() {
            prompt.push('\n');
            prompt.push_str(&trim_text_head_tail(body, self.page_excerpt_chars));
            prompt.push('\n');
        }
        prompt.push('\n');

        prompt.push_str("## History\n");
        prompt.push_str(&scratchpad.format_for_llm());
        prompt.push('\n');

        prompt.push_str(&format!(
            "Step {} of {}. Decide the next action.\n",
            scratchpad.current_step(),
            max_steps
        ));
        prompt
    }
}

/// Keep the head and tail of `s` within `max_chars`, marking the cut.
fn trim_text_head_tail(s: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    let head_chars = (max_chars * 2) / 3;
    let tail_chars = max_chars.saturating_sub(head_chars);

    let head = s.chars().take(head_chars).collect::<String>();
    let tail = s.chars().rev().take(tail_chars).collect::<String>();
    let tail = tail.chars().rev().collect::<String>();

    format!("{}\n...<trimmed {} chars>...\n{}", head, char_count.saturating_sub(max_chars), tail)
}
