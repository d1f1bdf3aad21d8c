//! MCP prompt templates.
//!
//! Canned prompts that steer an assistant through the budget tools.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// A prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: PromptContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptContent {
    Text { text: String },
}

/// Result of prompts/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    pub prompts: Vec<Prompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of prompts/get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

/// Template text with `{{name}}` placeholders and
/// `{{#if name}}...{{/if}}` sections kept only when `name` is non-empty.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub template: String,
    /// Values used for arguments the caller left out.
    pub defaults: HashMap<String, String>,
}

impl PromptTemplate {
    fn render(&self, arguments: &HashMap<String, String>) -> String {
        let value_of = |key: &str| -> String {
            arguments
                .get(key)
                .or_else(|| self.defaults.get(key))
                .cloned()
                .unwrap_or_default()
        };

        let mut text = self.template.clone();

        // Resolve conditional sections first so their bodies can still
        // contain placeholders.
        while let Some(start) = text.find("{{#if ") {
            let Some(tag_end) = text[start..].find("}}").map(|i| start + i) else {
                break;
            };
            let key = text[start + "{{#if ".len()..tag_end].trim().to_string();
            let Some(close) = text[tag_end..].find("{{/if}}").map(|i| tag_end + i) else {
                break;
            };
            let body = text[tag_end + 2..close].to_string();
            let keep = !value_of(key.as_str()).is_empty();
            text.replace_range(
                start..close + "{{/if}}".len(),
                if keep { body.as_str() } else { "" },
            );
        }

        let mut keys: Vec<&String> = arguments.keys().chain(self.defaults.keys()).collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            text = text.replace(&format!("{{{{{}}}}}", key), &value_of(key.as_str()));
        }
        text
    }
}

/// Prompt registry.
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, (Prompt, PromptTemplate)>,
}

impl PromptRegistry {
    /// Create a new registry with the built-in prompts.
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register_builtin_prompts();
        registry
    }

    fn register_builtin_prompts(&mut self) {
        self.register(
            Prompt {
                name: "financial-insights".to_string(),
                description: "Analyze spending, income and balances over a period and suggest improvements"
                    .to_string(),
                arguments: vec![
                    PromptArgument {
                        name: "startDate".to_string(),
                        description: "Start of the period (YYYY-MM-DD)".to_string(),
                        required: false,
                    },
                    PromptArgument {
                        name: "endDate".to_string(),
                        description: "End of the period (YYYY-MM-DD)".to_string(),
                        required: false,
                    },
                ],
            },
            PromptTemplate {
                template: r#"Please analyze my finances{{#if startDate}} from {{startDate}}{{/if}}{{#if endDate}} through {{endDate}}{{/if}}.

Use the available tools:
1. `get-accounts` and `get-account-balance` for where my money is
2. `spending-by-category` for where it went
3. `monthly-summary` for income against expenses

Then give me:
- The three largest spending categories and whether they look reasonable
- Any month where expenses exceeded income
- Concrete, specific suggestions for saving money"#
                    .to_string(),
                defaults: HashMap::new(),
            },
        );

        self.register(
            Prompt {
                name: "budget-review".to_string(),
                description: "Review budgeted amounts against actual spending for recent months"
                    .to_string(),
                arguments: vec![PromptArgument {
                    name: "months".to_string(),
                    description: "Number of recent months to review (default 3)".to_string(),
                    required: false,
                }],
            },
            PromptTemplate {
                template: r#"Please review my budget for the last {{months}} months.

For each month, call `get-budget-month` and compare budgeted amounts with actual spending per category. Use `get-grouped-categories` to keep categories organized by group.

Report:
- Categories that are consistently over budget
- Categories with large unspent balances that could be reallocated
- Recommended budget adjustments for next month"#
                    .to_string(),
                defaults: HashMap::from([("months".to_string(), "3".to_string())]),
            },
        );
    }

    pub fn register(&mut self, prompt: Prompt, template: PromptTemplate) {
        self.prompts.insert(prompt.name.clone(), (prompt, template));
    }

    /// List all prompts, sorted by name.
    pub fn list(&self) -> Vec<Prompt> {
        self.prompts.values().map(|(p, _)| p.clone()).collect()
    }

    /// Render a prompt with the given arguments.
    pub fn get(&self, name: &str, arguments: &HashMap<String, String>) -> Result<GetPromptResult> {
        let (prompt, template) = self
            .prompts
            .get(name)
            .ok_or_else(|| Error::InvalidToolArguments(format!("Prompt not found: {}", name)))?;

        if let Some(missing) = prompt
            .arguments
            .iter()
            .find(|a| a.required && arguments.get(&a.name).is_none_or(|v| v.is_empty()))
        {
            return Err(Error::InvalidToolArguments(format!(
                "Missing required argument: {}",
                missing.name
            )));
        }

        Ok(GetPromptResult {
            description: Some(prompt.description.clone()),
            messages: vec![PromptMessage {
                role: "user".to_string(),
                content: PromptContent::Text {
                    text: template.render(arguments),
                },
            }],
        })
    }
}
