//! Tool registry: definitions of the external security tools the backend
//! can execute, looked up by slug. Registration happens once at process
//! startup; lookups afterwards are read-only.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One configurable parameter of a tool's command template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: &str, param_type: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            default: None,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Output configuration: wire format plus the parser identifier, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub format: String,
    #[serde(default)]
    pub parser: Option<String>,
}

/// Definition of an external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: String,
    /// Template with `{placeholder}` parameters, e.g. `nmap {flags} {target}`.
    pub command_template: String,
    pub parameters: Vec<ToolParameter>,
    pub output: ToolOutput,
    pub default_timeout: u64,
}

impl ToolDefinition {
    /// Render the command template against the given parameter values.
    ///
    /// Each `{name}` placeholder is replaced by the supplied value, falling
    /// back to the parameter's default, then the empty string. Placeholders
    /// with no matching parameter are dropped and whitespace is collapsed.
    pub fn render_command(&self, params: &Value) -> String {
        let mut command = self.command_template.clone();

        for param in &self.parameters {
            let placeholder = format!("{{{}}}", param.name);
            if !command.contains(&placeholder) {
                continue;
            }
            let value = params
                .get(&param.name)
                .filter(|v| !v.is_null())
                .cloned()
                .or_else(|| param.default.clone())
                .unwrap_or(Value::Null);
            let rendered = match value {
                Value::Null => String::new(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            command = command.replace(&placeholder, &rendered);
        }

        // Drop placeholders nothing resolved, then collapse whitespace.
        let leftover = Regex::new(r"\{[^}]+\}").unwrap();
        let command = leftover.replace_all(&command, "");
        command.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Read-only lookup of tool definitions by slug.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in tool set.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for tool in builtin_tools() {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.slug.clone(), tool);
    }

    pub fn get(&self, slug: &str) -> Option<&ToolDefinition> {
        self.tools.get(slug)
    }

    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.tools.values().collect()
    }
}

fn tool(
    slug: &str,
    name: &str,
    category: &str,
    command_template: &str,
    parameters: Vec<ToolParameter>,
    format: &str,
    parser: Option<&str>,
) -> ToolDefinition {
    ToolDefinition {
        slug: slug.to_string(),
        name: name.to_string(),
        description: format!("{name} scanner"),
        category: category.to_string(),
        command_template: command_template.to_string(),
        parameters,
        output: ToolOutput {
            format: format.to_string(),
            parser: parser.map(str::to_string),
        },
        default_timeout: 3600,
    }
}

fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "nmap",
            "Nmap",
            "reconnaissance",
            "nmap {flags} -oX - {target}",
            vec![
                ToolParameter::new("target", "target").required(),
                ToolParameter::new("flags", "string").with_default("-sV -T4"),
            ],
            "xml",
            Some("nmap_parser"),
        ),
        tool(
            "masscan",
            "Masscan",
            "reconnaissance",
            "masscan {target} -p {ports} --rate {rate} -oJ -",
            vec![
                ToolParameter::new("target", "target").required(),
                ToolParameter::new("ports", "port_range").with_default("1-65535"),
                ToolParameter::new("rate", "integer").with_default(1000),
            ],
            "json",
            Some("masscan_parser"),
        ),
        tool(
            "nuclei",
            "Nuclei",
            "vulnerability_scanning",
            "nuclei -u {target} -jsonl {flags}",
            vec![
                ToolParameter::new("target", "target").required(),
                ToolParameter::new("flags", "string"),
            ],
            "jsonl",
            Some("nuclei_parser"),
        ),
        tool(
            "subfinder",
            "Subfinder",
            "reconnaissance",
            "subfinder -d {domain} -oJ -silent",
            vec![ToolParameter::new("domain", "target").required()],
            "jsonl",
            Some("subfinder_parser"),
        ),
        tool(
            "amass",
            "Amass",
            "reconnaissance",
            "amass enum -d {domain} -json /dev/stdout",
            vec![ToolParameter::new("domain", "target").required()],
            "jsonl",
            Some("amass_parser"),
        ),
        tool(
            "httpx",
            "HTTPx",
            "reconnaissance",
            "httpx -u {target} -json {flags}",
            vec![
                ToolParameter::new("target", "target").required(),
                ToolParameter::new("flags", "string").with_default("-title -tech-detect -status-code"),
            ],
            "jsonl",
            Some("httpx_parser"),
        ),
        tool(
            "gobuster",
            "Gobuster",
            "web_application",
            "gobuster dir -u {url} -w {wordlist} {flags}",
            vec![
                ToolParameter::new("url", "target").required(),
                ToolParameter::new("wordlist", "wordlist")
                    .with_default("/usr/share/wordlists/dirb/common.txt"),
                ToolParameter::new("flags", "string"),
            ],
            "text",
            Some("gobuster_parser"),
        ),
        tool(
            "ffuf",
            "FFUF",
            "web_application",
            "ffuf -u {url} -w {wordlist} -of json -o /dev/stdout {flags}",
            vec![
                ToolParameter::new("url", "target").required(),
                ToolParameter::new("wordlist", "wordlist")
                    .with_default("/usr/share/wordlists/dirb/common.txt"),
                ToolParameter::new("flags", "string"),
            ],
            "json",
            Some("ffuf_parser"),
        ),
        tool(
            "nikto",
            "Nikto",
            "web_application",
            "nikto -h {target} -Format json -output -",
            vec![ToolParameter::new("target", "target").required()],
            "json",
            Some("nikto_parser"),
        ),
        tool(
            "sqlmap",
            "SQLMap",
            "web_application",
            "sqlmap -u {target} --batch {flags}",
            vec![
                ToolParameter::new("target", "target").required(),
                ToolParameter::new("flags", "string"),
            ],
            "text",
            Some("sqlmap_parser"),
        ),
        tool(
            "wpscan",
            "WPScan",
            "web_application",
            "wpscan --url {target} --format json {flags}",
            vec![
                ToolParameter::new("target", "target").required(),
                ToolParameter::new("flags", "string"),
            ],
            "json",
            Some("wpscan_parser"),
        ),
        tool(
            "hydra",
            "Hydra",
            "password_attacks",
            "hydra -L {userlist} -P {passlist} {target} {service}",
            vec![
                ToolParameter::new("target", "target").required(),
                ToolParameter::new("service", "string").required(),
                ToolParameter::new("userlist", "wordlist")
                    .with_default("/usr/share/wordlists/metasploit/unix_users.txt"),
                ToolParameter::new("passlist", "wordlist")
                    .with_default("/usr/share/wordlists/rockyou.txt"),
            ],
            "text",
            Some("hydra_parser"),
        ),
        tool(
            "john",
            "John the Ripper",
            "password_attacks",
            "john {flags} {hashfile} && john --show {hashfile}",
            vec![
                ToolParameter::new("hashfile", "file").required(),
                ToolParameter::new("flags", "string"),
            ],
            "text",
            Some("john_parser"),
        ),
        tool(
            "hashcat",
            "Hashcat",
            "password_attacks",
            "hashcat -m {mode} {hashfile} {wordlist} --potfile-disable --outfile /dev/stdout",
            vec![
                ToolParameter::new("hashfile", "file").required(),
                ToolParameter::new("mode", "integer").with_default(0),
                ToolParameter::new("wordlist", "wordlist")
                    .with_default("/usr/share/wordlists/rockyou.txt"),
            ],
            "text",
            Some("hashcat_parser"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_registry_lookup() {
        let registry = ToolRegistry::builtin();
        assert!(registry.get("nmap").is_some());
        assert!(registry.get("hydra").is_some());
        assert!(registry.get("metasploit").is_none());
        assert_eq!(
            registry.get("nmap").unwrap().output.parser.as_deref(),
            Some("nmap_parser")
        );
    }

    #[test]
    fn test_render_command_substitutes_parameters() {
        let registry = ToolRegistry::builtin();
        let nmap = registry.get("nmap").unwrap();
        let cmd = nmap.render_command(&json!({"target": "192.168.1.0/24", "flags": "-sS"}));
        assert_eq!(cmd, "nmap -sS -oX - 192.168.1.0/24");
    }

    #[test]
    fn test_render_command_uses_defaults() {
        let registry = ToolRegistry::builtin();
        let nmap = registry.get("nmap").unwrap();
        let cmd = nmap.render_command(&json!({"target": "10.0.0.1"}));
        assert_eq!(cmd, "nmap -sV -T4 -oX - 10.0.0.1");
    }

    #[test]
    fn test_render_command_drops_unresolved_placeholders() {
        let def = ToolDefinition {
            slug: "x".into(),
            name: "X".into(),
            description: String::new(),
            category: "utility".into(),
            command_template: "x {a} {mystery} {b}".into(),
            parameters: vec![
                ToolParameter::new("a", "string"),
                ToolParameter::new("b", "string"),
            ],
            output: ToolOutput {
                format: "text".into(),
                parser: None,
            },
            default_timeout: 60,
        };
        let cmd = def.render_command(&json!({"a": "1", "b": "2"}));
        assert_eq!(cmd, "x 1 2");
    }

    #[test]
    fn test_render_command_null_value_falls_back_to_default() {
        let registry = ToolRegistry::builtin();
        let gobuster = registry.get("gobuster").unwrap();
        let cmd = gobuster.render_command(&json!({"url": "http://x", "wordlist": null}));
        assert!(cmd.contains("/usr/share/wordlists/dirb/common.txt"));
    }
}
