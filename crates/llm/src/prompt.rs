//! System prompt assembly
//!
//! Builds the per-request system prompt from the resolved persona, caller
//! role, LMS user context, memory snippet, tool instructions and the
//! session's pronoun rule and anti-repetition hints.

use helmsman_core::{
    Fact, Insight, PronounStyle, Summary, ToolDefinition, UserContext, UserRole,
};
use helmsman_config::Persona;

/// Memory pieces injected into the prompt
#[derive(Debug, Clone, Default)]
pub struct MemorySnippet {
    pub facts: Vec<Fact>,
    pub insights: Vec<Insight>,
    pub summary: Option<Summary>,
}

impl MemorySnippet {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.insights.is_empty() && self.summary.is_none()
    }
}

/// Everything the builder needs for one request
pub struct PromptContext<'a> {
    pub persona: &'a Persona,
    pub role: UserRole,
    pub user_context: Option<&'a UserContext>,
    pub memory: &'a MemorySnippet,
    pub pronoun_style: PronounStyle,
    pub recent_openers: Vec<String>,
    pub tools: &'a [ToolDefinition],
}

/// Assembles system prompts
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
        let user_name = ctx
            .memory
            .facts
            .iter()
            .find(|f| f.fact_type == helmsman_core::FactType::Name)
            .map(|f| f.value.clone())
            .or_else(|| {
                ctx.user_context
                    .and_then(|uc| uc.display_name.clone())
            });

        let mut prompt = ctx.persona.render_system_prompt(user_name.as_deref());
        prompt.push('\n');

        prompt.push_str(&format!("\nVai trò người học: {}.\n", ctx.role.as_str()));

        if let Some(uc) = ctx.user_context {
            let mut parts = Vec::new();
            if let Some(course) = &uc.course_id {
                parts.push(format!("khóa học {}", course));
            }
            if let Some(module) = &uc.module_id {
                parts.push(format!("bài {}", module));
            }
            if let Some(progress) = uc.progress {
                parts.push(format!("tiến độ {:.0}%", progress * 100.0));
            }
            if !parts.is_empty() {
                prompt.push_str(&format!("Bối cảnh LMS: {}.\n", parts.join(", ")));
            }
        }

        if !ctx.memory.is_empty() {
            prompt.push_str("\n## Ghi nhớ về người học\n");
            prompt.push_str(&Self::format_memory_snippet(ctx.memory));
        }

        if !ctx.persona.style_rules.is_empty() {
            prompt.push_str("\n## Quy tắc trình bày\n");
            for rule in &ctx.persona.style_rules {
                prompt.push_str(&format!("- {}\n", rule));
            }
        }

        prompt.push_str(&format!("- {}\n", ctx.pronoun_style.rule()));

        if !ctx.recent_openers.is_empty() {
            prompt.push_str(
                "- Tránh mở đầu câu trả lời giống các lần gần đây: ",
            );
            prompt.push_str(
                &ctx.recent_openers
                    .iter()
                    .map(|o| format!("\"{}\"", o))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            prompt.push('\n');
        }

        if !ctx.tools.is_empty() {
            prompt.push_str("\n## Công cụ\n");
            prompt.push_str(
                "Dùng công cụ khi cần tra cứu điều luật hoặc ghi nhớ của người học; \
                 trả lời trực tiếp khi đã đủ thông tin.\n",
            );
            for tool in ctx.tools {
                prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            }
        }

        prompt
    }

    /// Compact memory rendering: facts first, then insights, then summary
    pub fn format_memory_snippet(memory: &MemorySnippet) -> String {
        let mut out = String::new();

        for fact in &memory.facts {
            out.push_str(&format!("- {}: {}\n", fact.fact_type.as_str(), fact.value));
        }

        for insight in &memory.insights {
            match &insight.sub_topic {
                Some(topic) => out.push_str(&format!(
                    "- [{} / {}] {}\n",
                    insight.category.as_str(),
                    topic,
                    insight.content
                )),
                None => out.push_str(&format!(
                    "- [{}] {}\n",
                    insight.category.as_str(),
                    insight.content
                )),
            }
        }

        if let Some(summary) = &memory.summary {
            out.push_str(&format!("- Tóm tắt phiên trước: {}\n", summary.content));
        }

        out
    }
}
