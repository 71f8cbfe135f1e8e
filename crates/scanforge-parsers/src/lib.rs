//! Tool output parsers
//!
//! Each parser turns the concatenated stdout of a completed job into a
//! [`ParseOutput`] aggregate of assets, vulnerabilities, credentials and
//! raw results. Parsers are tolerant by contract: recoverable format
//! deviations are recorded in `ParseOutput::errors`, never raised.
//!
//! The [`ParserRegistry`] maps parser identifiers (as named by tool
//! definitions) to implementations. Registration happens once at process
//! startup; lookup is read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use scanforge_core::model::Job;

pub mod output;
pub mod util;

mod amass;
mod burp;
mod ffuf;
mod gobuster;
mod hashcat;
mod httpx;
mod hydra;
mod john;
mod masscan;
mod nessus;
mod nikto;
mod nmap;
mod nuclei;
mod sqlmap;
mod subfinder;
mod wpscan;

pub use amass::AmassParser;
pub use burp::BurpParser;
pub use ffuf::FfufParser;
pub use gobuster::GobusterParser;
pub use hashcat::HashcatParser;
pub use httpx::HttpxParser;
pub use hydra::HydraParser;
pub use john::JohnParser;
pub use masscan::MasscanParser;
pub use nessus::NessusParser;
pub use nikto::NiktoParser;
pub use nmap::NmapParser;
pub use nuclei::NucleiParser;
pub use output::{
    ParseOutput, ParsedAsset, ParsedCredential, ParsedFinding, ParsedVulnerability,
};
pub use sqlmap::SqlmapParser;
pub use subfinder::SubfinderParser;
pub use wpscan::WpscanParser;

/// A format-specific tool output parser.
///
/// Parsing never mutates storage; only the upsert layer does.
pub trait Parser: Send + Sync {
    /// Tool name recorded on entities this parser discovers.
    fn tool_name(&self) -> &'static str;

    /// Parse raw output in the context of the owning job.
    fn parse(&self, output: &str, job: &Job) -> ParseOutput;
}

/// Read-only map from parser identifier to implementation.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in parser.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("nmap_parser", Arc::new(NmapParser));
        registry.register("masscan_parser", Arc::new(MasscanParser));
        registry.register("nuclei_parser", Arc::new(NucleiParser));
        registry.register("subfinder_parser", Arc::new(SubfinderParser));
        registry.register("amass_parser", Arc::new(AmassParser));
        registry.register("httpx_parser", Arc::new(HttpxParser));
        registry.register("gobuster_parser", Arc::new(GobusterParser));
        registry.register("ffuf_parser", Arc::new(FfufParser));
        registry.register("nikto_parser", Arc::new(NiktoParser));
        registry.register("sqlmap_parser", Arc::new(SqlmapParser));
        registry.register("wpscan_parser", Arc::new(WpscanParser));
        registry.register("hydra_parser", Arc::new(HydraParser));
        registry.register("john_parser", Arc::new(JohnParser));
        registry.register("hashcat_parser", Arc::new(HashcatParser));
        registry.register("nessus_parser", Arc::new(NessusParser));
        registry.register("burp_parser", Arc::new(BurpParser));
        registry
    }

    pub fn register(&mut self, name: &str, parser: Arc<dyn Parser>) {
        self.parsers.insert(name.to_string(), parser);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Parser>> {
        self.parsers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.parsers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_covers_all_formats() {
        let registry = ParserRegistry::builtin();
        for name in [
            "nmap_parser",
            "masscan_parser",
            "nuclei_parser",
            "subfinder_parser",
            "amass_parser",
            "httpx_parser",
            "gobuster_parser",
            "ffuf_parser",
            "nikto_parser",
            "sqlmap_parser",
            "wpscan_parser",
            "hydra_parser",
            "john_parser",
            "hashcat_parser",
            "nessus_parser",
            "burp_parser",
        ] {
            assert!(registry.get(name).is_some(), "missing parser: {name}");
        }
        assert!(registry.get("zap_parser").is_none());
    }
}
