// src/cli_templates.rs
// Fixed per-tool invocation templates (spec §6 "CLI invocation surface").
// Isolated in one module so a real deployment can swap in a CLI's actual
// bit-exact flags without touching any other component — the templates
// here encode the parameters the spec lists as the obvious flags a
// coding-agent CLI exposes; they are intentionally opaque beyond that
// (the Parser, not the invocation, is authoritative about what a tool
// emits).

use crate::config::ToolExecutables;
use crate::model::{Conversation, PermissionMode, Tool};

pub struct Invocation {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
}

fn permission_flag(mode: PermissionMode) -> &'static str {
    match mode {
        PermissionMode::Default => "default",
        PermissionMode::AcceptEdits => "accept-edits",
        PermissionMode::Bypass => "bypass-permissions",
        PermissionMode::DontAsk => "dont-ask",
    }
}

pub fn build(conversation: &Conversation, tools: &ToolExecutables, resume_token: Option<&str>) -> Invocation {
    match conversation.tool {
        Tool::Claude => {
            let exe = tools.resolve("claude", "claude");
            let mut argv = vec![exe, "--print".to_string(), "--output-format".to_string(), "stream-json".to_string()];
            argv.push("--permission-mode".to_string());
            argv.push(permission_flag(conversation.permission_mode).to_string());
            if let Some(model) = &conversation.model {
                argv.push("--model".to_string());
                argv.push(model.clone());
            }
            if let Some(token) = resume_token.or(conversation.session_id.as_deref()) {
                argv.push("--resume".to_string());
                argv.push(token.to_string());
            }
            Invocation { argv, env: vec![] }
        }
        Tool::CursorAgent => {
            let exe = tools.resolve("cursor-agent", "cursor-agent");
            let mut argv = vec![exe, "--output-format".to_string(), "stream-json".to_string()];
            argv.push("--permission-mode".to_string());
            argv.push(permission_flag(conversation.permission_mode).to_string());
            if let Some(model) = &conversation.model {
                argv.push("--model".to_string());
                argv.push(model.clone());
            }
            if let Some(token) = resume_token.or(conversation.session_id.as_deref()) {
                argv.push("--resume".to_string());
                argv.push(token.to_string());
            }
            Invocation { argv, env: vec![] }
        }
        Tool::Gemini => {
            let exe = tools.resolve("gemini", "gemini");
            let mut argv = vec![exe];
            if conversation.mode == crate::model::Mode::Plan {
                argv.push("--plan".to_string());
            }
            if let Some(model) = &conversation.model {
                argv.push("--model".to_string());
                argv.push(model.clone());
            }
            Invocation { argv, env: vec![] }
        }
        Tool::Custom => Invocation {
            argv: vec![tools.resolve("custom", "true")],
            env: vec![],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConversationStatus, Mode};

    fn conv(tool: Tool) -> Conversation {
        Conversation {
            id: "c1".into(),
            tool,
            topic: "t".into(),
            model: Some("sonnet".into()),
            mode: Mode::Agent,
            permission_mode: PermissionMode::AcceptEdits,
            project_path: "/tmp/p".into(),
            status: ConversationStatus::Active,
            created_at: 0,
            updated_at: 0,
            last_activity: 0,
            session_id: None,
        }
    }

    #[test]
    fn test_claude_invocation_includes_permission_and_model_flags() {
        let tools = ToolExecutables::from_env();
        let c = conv(Tool::Claude);
        let inv = build(&c, &tools, None);
        assert!(inv.argv.contains(&"--permission-mode".to_string()));
        assert!(inv.argv.contains(&"accept-edits".to_string()));
        assert!(inv.argv.contains(&"sonnet".to_string()));
    }
}
