//! Symbolic router: deterministic intent-category scoring, JSON/tool-call
//! validation, and keyword-based tool routing. Never raises — every path
//! returns a best-effort result, falling back to "no tool" when nothing
//! matches.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// High-level intent categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Query,
    Command,
    Create,
    Modify,
    Delete,
    Analyze,
    Debug,
    Workflow,
    Clarify,
    Unknown,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Query => "query",
            IntentCategory::Command => "command",
            IntentCategory::Create => "create",
            IntentCategory::Modify => "modify",
            IntentCategory::Delete => "delete",
            IntentCategory::Analyze => "analyze",
            IntentCategory::Debug => "debug",
            IntentCategory::Workflow => "workflow",
            IntentCategory::Clarify => "clarify",
            IntentCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentClassification {
    pub category: IntentCategory,
    pub confidence: f32,
    pub tool_suggestion: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub requires_confirmation: bool,
    pub safety_level: String,
    pub reasoning: String,
}

struct ToolMapping {
    tool: &'static str,
    category: IntentCategory,
}

fn tool_mappings() -> &'static [(&'static str, ToolMapping)] {
    static MAPPINGS: LazyLock<Vec<(&'static str, ToolMapping)>> = LazyLock::new(|| {
        vec![
            ("health", ToolMapping { tool: "check_health", category: IntentCategory::Query }),
            ("status", ToolMapping { tool: "get_system_status", category: IntentCategory::Query }),
            ("model", ToolMapping { tool: "get_model_status", category: IntentCategory::Query }),
            ("docs", ToolMapping { tool: "get_documentation", category: IntentCategory::Query }),
            ("documentation", ToolMapping { tool: "get_documentation", category: IntentCategory::Query }),
            ("entities", ToolMapping { tool: "list_entities", category: IntentCategory::Query }),
            ("tools", ToolMapping { tool: "list_available_tools", category: IntentCategory::Query }),
            ("activity", ToolMapping { tool: "get_activity_stats", category: IntentCategory::Query }),
            ("roles", ToolMapping { tool: "list_roles", category: IntentCategory::Query }),
            ("role", ToolMapping { tool: "get_role_capabilities", category: IntentCategory::Query }),
            ("permission", ToolMapping { tool: "check_permission", category: IntentCategory::Query }),
            ("debate", ToolMapping { tool: "start_debate", category: IntentCategory::Create }),
            ("workflow", ToolMapping { tool: "create_workflow", category: IntentCategory::Create }),
            ("dag", ToolMapping { tool: "visualize_dag", category: IntentCategory::Query }),
            ("risk", ToolMapping { tool: "evaluate_risk", category: IntentCategory::Analyze }),
            ("approval", ToolMapping { tool: "request_approval", category: IntentCategory::Command }),
            ("metrics", ToolMapping { tool: "get_metrics", category: IntentCategory::Query }),
            ("logs", ToolMapping { tool: "get_recent_logs", category: IntentCategory::Query }),
            ("traces", ToolMapping { tool: "query_traces", category: IntentCategory::Query }),
            ("alerts", ToolMapping { tool: "get_alerts", category: IntentCategory::Query }),
            ("pii", ToolMapping { tool: "check_pii", category: IntentCategory::Analyze }),
            ("audit", ToolMapping { tool: "get_security_audit", category: IntentCategory::Query }),
            ("search", ToolMapping { tool: "semantic_search", category: IntentCategory::Query }),
            ("knowledge", ToolMapping { tool: "add_to_knowledge_base", category: IntentCategory::Create }),
            ("config", ToolMapping { tool: "get_config", category: IntentCategory::Query }),
            ("project", ToolMapping { tool: "get_project_status", category: IntentCategory::Query }),
            ("diagnose", ToolMapping { tool: "diagnose_issue", category: IntentCategory::Debug }),
            ("debug", ToolMapping { tool: "diagnose_issue", category: IntentCategory::Debug }),
        ]
    });
    &MAPPINGS
}

fn tool_safety(tool: &str) -> &'static str {
    match tool {
        "execute_command" | "request_approval" | "execute_workflow" => "caution",
        _ => "safe",
    }
}

macro_rules! re_set {
    ($name:ident, $($pat:expr),+ $(,)?) => {
        static $name: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![$(Regex::new($pat).unwrap()),+]);
    };
}

re_set!(RE_QUERY, r"(?i)\b(what|how|why|when|where|who|show|display|get|list|tell)\b", r"(?i)\b(status|info|information|details|explain)\b");
re_set!(RE_COMMAND, r"(?i)\b(run|execute|start|stop|restart|invoke|call)\b", r"(?i)\b(check|verify|test|validate)\b");
re_set!(RE_CREATE, r"(?i)\b(create|generate|build|make|write|compose)\b", r"(?i)\b(new|add|insert)\b");
re_set!(RE_MODIFY, r"(?i)\b(update|change|modify|edit|fix|patch|set)\b", r"(?i)\b(configure|adjust|tweak)\b");
re_set!(RE_DELETE, r"(?i)\b(delete|remove|drop|clear|purge|destroy)\b");
re_set!(RE_ANALYZE, r"(?i)\b(analyze|examine|inspect|review|audit)\b", r"(?i)\b(compare|measure|evaluate|assess)\b");
re_set!(RE_DEBUG, r"(?i)\b(debug|diagnose|troubleshoot|investigate)\b", r"(?i)\b(error|issue|problem|bug|fail)\b");
re_set!(RE_WORKFLOW, r"(?i)\b(workflow|pipeline|sequence|process)\b", r"(?i)\b(then|after|next|finally)\b");
re_set!(RE_CLARIFY, r"\?$", r"(?i)\b(which|should|could|would)\b");

fn category_patterns() -> Vec<(IntentCategory, &'static [Regex])> {
    vec![
        (IntentCategory::Query, RE_QUERY.as_slice()),
        (IntentCategory::Command, RE_COMMAND.as_slice()),
        (IntentCategory::Create, RE_CREATE.as_slice()),
        (IntentCategory::Modify, RE_MODIFY.as_slice()),
        (IntentCategory::Delete, RE_DELETE.as_slice()),
        (IntentCategory::Analyze, RE_ANALYZE.as_slice()),
        (IntentCategory::Debug, RE_DEBUG.as_slice()),
        (IntentCategory::Workflow, RE_WORKFLOW.as_slice()),
        (IntentCategory::Clarify, RE_CLARIFY.as_slice()),
    ]
}

/// Deterministic router: scores intent categories, validates LLM JSON
/// output, and maps keywords to a fixed tool catalogue.
pub struct SymbolicRouter;

impl SymbolicRouter {
    pub fn new() -> Self {
        Self
    }

    /// Score each intent category by keyword-pattern hit count, pick the
    /// best, then look for a keyword-based tool suggestion.
    pub fn classify_intent(&self, user_input: &str) -> IntentClassification {
        let input_lower = user_input.to_lowercase();

        let mut best_category = IntentCategory::Unknown;
        let mut best_score = 0.0f32;

        for (category, patterns) in category_patterns() {
            let score: f32 = patterns
                .iter()
                .map(|re| re.find_iter(user_input).count() as f32 * 0.25)
                .sum::<f32>()
                .min(1.0);
            if score > best_score {
                best_score = score;
                best_category = category;
            }
        }

        let mut tool_suggestion = None;
        for (keyword, mapping) in tool_mappings() {
            if input_lower.contains(keyword) {
                tool_suggestion = Some(mapping.tool.to_string());
                if best_score < 0.5 {
                    best_category = mapping.category;
                }
                break;
            }
        }

        let safety = if best_category == IntentCategory::Delete {
            "dangerous"
        } else if best_category == IntentCategory::Modify {
            "caution"
        } else if let Some(tool) = &tool_suggestion {
            tool_safety(tool)
        } else {
            "safe"
        };

        IntentClassification {
            category: best_category,
            confidence: if best_score > 0.0 { best_score } else { 0.3 },
            tool_suggestion,
            parameters: HashMap::new(),
            requires_confirmation: matches!(safety, "caution" | "dangerous"),
            safety_level: safety.to_string(),
            reasoning: format!("matched category {} with score {:.2}", best_category.as_str(), best_score),
        }
    }

    /// Extract and parse the first JSON object from fenced/raw LLM output.
    pub fn validate_json(&self, text: &str) -> Option<serde_json::Value> {
        static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```json\s*\n?(.*?)\n?```").unwrap());
        static FENCED_TOOL_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```tool_call\s*\n?(.*?)\n?```").unwrap());
        static BRACED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").unwrap());

        for re in [&*FENCED_JSON, &*FENCED_TOOL_CALL] {
            if let Some(cap) = re.captures(text) {
                if let Ok(v) = serde_json::from_str(cap[1].trim()) {
                    return Some(v);
                }
            }
        }
        for m in BRACED.find_iter(text) {
            if let Ok(v) = serde_json::from_str(m.as_str()) {
                return Some(v);
            }
        }
        serde_json::from_str(text.trim()).ok()
    }

    /// Validate a parsed tool-call JSON object against the available tool
    /// set, attempting a fuzzy substring match when the name doesn't
    /// match exactly.
    pub fn validate_tool_call(
        &self,
        tool_call: &serde_json::Value,
        available_tools: &[String],
    ) -> std::result::Result<(String, serde_json::Value), String> {
        let obj = tool_call.as_object().ok_or("tool call must be a JSON object")?;
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or("missing 'name' field")?;

        if available_tools.iter().any(|t| t == name) {
            let arguments = obj.get("arguments").cloned().unwrap_or(serde_json::json!({}));
            return Ok((name.to_string(), arguments));
        }

        for tool in available_tools {
            if name.to_lowercase().contains(&tool.to_lowercase()) || tool.to_lowercase().contains(&name.to_lowercase()) {
                let arguments = obj.get("arguments").cloned().unwrap_or(serde_json::json!({}));
                return Ok((tool.clone(), arguments));
            }
        }

        Err(format!("unknown tool: {name}"))
    }

    /// Route an already-classified intent to a concrete tool + arguments,
    /// falling back to keyword matching when there's no tool suggestion.
    pub fn route_to_tool(
        &self,
        intent: &IntentClassification,
        user_input: &str,
        available_tools: &[String],
    ) -> Option<(String, HashMap<String, String>)> {
        if let Some(tool) = &intent.tool_suggestion {
            if available_tools.contains(tool) {
                return Some((tool.clone(), self.extract_arguments(user_input, tool)));
            }
        }

        let input_lower = user_input.to_lowercase();
        for (keyword, mapping) in tool_mappings() {
            if input_lower.contains(keyword) && available_tools.iter().any(|t| t == mapping.tool) {
                return Some((mapping.tool.to_string(), self.extract_arguments(user_input, mapping.tool)));
            }
        }
        None
    }

    fn extract_arguments(&self, user_input: &str, tool_name: &str) -> HashMap<String, String> {
        let mut args = HashMap::new();
        let lower = user_input.to_lowercase();

        match tool_name {
            "get_documentation" => {
                for topic in ["command", "emotion", "rank", "github", "workflow", "security"] {
                    if lower.contains(topic) {
                        args.insert("topic".to_string(), topic.to_string());
                        break;
                    }
                }
            }
            "semantic_search" => {
                static RE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
                    vec![
                        Regex::new(r"(?i)search\s+(?:for\s+)?(.+)").unwrap(),
                        Regex::new(r"(?i)find\s+(.+)").unwrap(),
                        Regex::new(r"(?i)query[:\s]+(.+)").unwrap(),
                    ]
                });
                for re in RE.iter() {
                    if let Some(cap) = re.captures(user_input) {
                        args.insert("query".to_string(), cap[1].trim().to_string());
                        break;
                    }
                }
            }
            "diagnose_issue" => {
                args.insert("symptom".to_string(), user_input.to_string());
            }
            "evaluate_risk" => {
                args.insert("operation".to_string(), user_input.to_string());
            }
            "get_recent_logs" => {
                if lower.contains("security") {
                    args.insert("service".to_string(), "security_audit".to_string());
                }
                static LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(?:lines?|entries?)").unwrap());
                if let Some(cap) = LINES.captures(user_input) {
                    args.insert("lines".to_string(), cap[1].to_string());
                }
            }
            _ => {}
        }
        args
    }

    /// Correct and validate LLM output: tries to extract and validate a
    /// tool call first, falls back to intent-based routing, and finally
    /// treats the output as a plain response with no tool call.
    pub fn correct_llm_output(
        &self,
        llm_output: &str,
        intent: &IntentClassification,
        available_tools: &[String],
    ) -> CorrectedOutput {
        let mut corrections = Vec::new();

        if let Some(parsed) = self.validate_json(llm_output) {
            match self.validate_tool_call(&parsed, available_tools) {
                Ok((name, arguments)) => {
                    return CorrectedOutput {
                        valid: true,
                        tool_call: Some(serde_json::json!({"name": name, "arguments": arguments})),
                        response: llm_output.to_string(),
                        corrections_made: corrections,
                    };
                }
                Err(e) => corrections.push(format!("invalid tool call: {e}")),
            }
        }

        if let Some((tool_name, args)) = self.route_to_tool(intent, llm_output, available_tools) {
            corrections.push(format!("routed to tool via intent: {tool_name}"));
            return CorrectedOutput {
                valid: true,
                tool_call: Some(serde_json::json!({"name": tool_name, "arguments": args})),
                response: llm_output.to_string(),
                corrections_made: corrections,
            };
        }

        CorrectedOutput {
            valid: true,
            tool_call: None,
            response: llm_output.to_string(),
            corrections_made: corrections,
        }
    }
}

impl Default for SymbolicRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrectedOutput {
    pub valid: bool,
    pub tool_call: Option<serde_json::Value>,
    pub response: String,
    pub corrections_made: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_query_intent() {
        let router = SymbolicRouter::new();
        let result = router.classify_intent("show me the system status");
        assert_eq!(result.category, IntentCategory::Query);
        assert_eq!(result.tool_suggestion.as_deref(), Some("get_system_status"));
    }

    #[test]
    fn classify_delete_is_dangerous() {
        let router = SymbolicRouter::new();
        let result = router.classify_intent("delete the old logs");
        assert_eq!(result.category, IntentCategory::Delete);
        assert_eq!(result.safety_level, "dangerous");
        assert!(result.requires_confirmation);
    }

    #[test]
    fn validate_json_extracts_fenced_block() {
        let router = SymbolicRouter::new();
        let text = "```json\n{\"name\": \"check_health\", \"arguments\": {}}\n```";
        let v = router.validate_json(text).unwrap();
        assert_eq!(v["name"], "check_health");
    }

    #[test]
    fn validate_tool_call_exact_match() {
        let router = SymbolicRouter::new();
        let call = serde_json::json!({"name": "check_health", "arguments": {}});
        let tools = vec!["check_health".to_string()];
        let (name, _) = router.validate_tool_call(&call, &tools).unwrap();
        assert_eq!(name, "check_health");
    }

    #[test]
    fn validate_tool_call_fuzzy_match() {
        let router = SymbolicRouter::new();
        let call = serde_json::json!({"name": "check_health_v2", "arguments": {}});
        let tools = vec!["check_health".to_string()];
        let result = router.validate_tool_call(&call, &tools);
        assert_eq!(result.unwrap().0, "check_health");
    }

    #[test]
    fn validate_tool_call_unknown_errors() {
        let router = SymbolicRouter::new();
        let call = serde_json::json!({"name": "nonexistent_tool"});
        let tools = vec!["check_health".to_string()];
        assert!(router.validate_tool_call(&call, &tools).is_err());
    }

    #[test]
    fn correct_llm_output_falls_back_to_plain_response() {
        let router = SymbolicRouter::new();
        let intent = router.classify_intent("tell me a joke");
        let corrected = router.correct_llm_output("Why did the chicken cross the road?", &intent, &[]);
        assert!(corrected.valid);
        assert!(corrected.tool_call.is_none());
    }

    #[test]
    fn route_to_tool_uses_keyword_fallback() {
        let router = SymbolicRouter::new();
        let intent = IntentClassification {
            category: IntentCategory::Unknown,
            confidence: 0.3,
            tool_suggestion: None,
            parameters: HashMap::new(),
            requires_confirmation: false,
            safety_level: "safe".into(),
            reasoning: String::new(),
        };
        let tools = vec!["get_metrics".to_string()];
        let routed = router.route_to_tool(&intent, "show me the metrics", &tools);
        assert_eq!(routed.unwrap().0, "get_metrics");
    }
}
