use crate::config::clamp_subagent_iterations;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Agent definition parsed from an `AGENT.md` document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    /// Markdown body after the front-matter.
    pub instructions: String,
    /// Tool whitelist; empty means the agent gets no tools.
    pub allowed_tools: Vec<String>,
    pub max_iterations: u32,
    /// Unrecognized front-matter keys.
    pub metadata: HashMap<String, String>,
    pub path: String,
    pub agent_dir: String,
}

pub const DEFAULT_AGENT_MAX_ITERATIONS: u32 = 20;

/// Discovers and holds agent definitions. Embedded definitions are seeded
/// first and can never be shadowed by disk entries of the same name.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentDefinition>,
    embedded: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an agent name: 1-64 chars of lowercase letters, digits, and
    /// single interior hyphens.
    pub fn validate_name(name: &str) -> bool {
        if name.is_empty() || name.len() > 64 {
            return false;
        }
        if name.starts_with('-') || name.ends_with('-') {
            return false;
        }
        let mut prev_hyphen = false;
        for c in name.chars() {
            match c {
                '-' => {
                    if prev_hyphen {
                        return false;
                    }
                    prev_hyphen = true;
                }
                'a'..='z' | '0'..='9' => prev_hyphen = false,
                _ => return false,
            }
        }
        true
    }

    /// Seed the compiled-in planning and explorer agents. Call before
    /// `discover`.
    pub fn register_embedded(&mut self) {
        for (name, source) in [
            ("planning-agent", super::embedded::PLANNING_AGENT_MD),
            ("explorer-agent", super::embedded::EXPLORER_AGENT_MD),
        ] {
            if let Some(mut definition) =
                parse_front_matter(source, &format!("<embedded>/{name}"))
            {
                definition.agent_dir = "<embedded>".to_string();
                self.embedded.insert(definition.name.clone(), definition);
            }
        }
    }

    /// Discover agents from `search_paths`, ordered highest priority first.
    /// Later-loaded entries overwrite earlier ones, so paths are walked in
    /// reverse; a disk agent named like an embedded one is silently skipped.
    /// Returns the total number of registered agents.
    pub fn discover(&mut self, search_paths: &[PathBuf]) -> usize {
        let mut by_name: HashMap<String, AgentDefinition> = HashMap::new();

        for search_path in search_paths.iter().rev() {
            let Ok(entries) = std::fs::read_dir(search_path) else {
                continue;
            };
            for entry in entries.flatten() {
                if !entry.path().is_dir() {
                    continue;
                }
                let Some(definition) = parse_agent_dir(&entry.path()) else {
                    continue;
                };
                if self.embedded.contains_key(&definition.name) {
                    continue;
                }
                by_name.insert(definition.name.clone(), definition);
            }
        }

        for (name, definition) in &self.embedded {
            by_name.insert(name.clone(), definition.clone());
        }

        self.agents = by_name.into_values().collect();
        self.agents.sort_by(|a, b| a.name.cmp(&b.name));
        self.agents.len()
    }

    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|agent| agent.name == name)
    }

    pub fn agents(&self) -> &[AgentDefinition] {
        &self.agents
    }

    /// `<available_agents>` XML section for the main system prompt.
    pub fn generate_prompt_section(&self) -> String {
        if self.agents.is_empty() {
            return String::new();
        }

        let mut section = String::from("<available_agents>\n");
        for agent in &self.agents {
            section.push_str("<agent>\n");
            section.push_str(&format!("  <name>{}</name>\n", escape_xml(&agent.name)));
            section.push_str(&format!(
                "  <description>{}</description>\n",
                escape_xml(&agent.description)
            ));
            if !agent.allowed_tools.is_empty() {
                section.push_str(&format!(
                    "  <tools>{}</tools>\n",
                    agent.allowed_tools.join(" ")
                ));
            }
            section.push_str("</agent>\n");
        }
        section.push_str("</available_agents>\n");
        section
    }
}

fn parse_agent_dir(agent_dir: &Path) -> Option<AgentDefinition> {
    let agent_md = agent_dir.join("AGENT.md");
    let content = std::fs::read_to_string(&agent_md).ok()?;
    let mut definition = parse_front_matter(&content, &agent_md.display().to_string())?;
    definition.agent_dir = agent_dir.display().to_string();
    Some(definition)
}

/// Parse a `---` front-matter document. Recognized keys: `name`,
/// `description`, `allowed-tools` (whitespace-separated), `max-iterations`
/// (clamped to the subagent range); everything else lands in metadata.
/// Documents without a valid name or a description are rejected.
pub fn parse_front_matter(content: &str, path: &str) -> Option<AgentDefinition> {
    let rest = content.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("\n---")?;
    let front_matter = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n');

    let mut definition = AgentDefinition {
        instructions: body.to_string(),
        max_iterations: DEFAULT_AGENT_MAX_ITERATIONS,
        path: path.to_string(),
        ..AgentDefinition::default()
    };

    for line in front_matter.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "name" => definition.name = value.to_string(),
            "description" => definition.description = value.to_string(),
            "allowed-tools" => {
                definition.allowed_tools =
                    value.split_whitespace().map(str::to_string).collect();
            }
            "max-iterations" => {
                if let Ok(parsed) = value.parse::<u32>() {
                    definition.max_iterations = clamp_subagent_iterations(parsed);
                }
            }
            _ => {
                definition
                    .metadata
                    .insert(key.to_string(), value.to_string());
            }
        }
    }

    if !AgentRegistry::validate_name(&definition.name) || definition.description.is_empty() {
        return None;
    }
    Some(definition)
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_accepts_and_rejects_per_rules() {
        for valid in ["a", "a-b", "a1-b2", "explorer-agent"] {
            assert!(AgentRegistry::validate_name(valid), "{valid} should pass");
        }
        let too_long = "a".repeat(65);
        for invalid in ["", "-a", "a-", "a--b", "A", "a_b", too_long.as_str()] {
            assert!(
                !AgentRegistry::validate_name(invalid),
                "{invalid:?} should fail"
            );
        }
    }

    #[test]
    fn front_matter_parses_known_keys_and_metadata() {
        let doc = "---\nname: review-agent\ndescription: Reviews code.\nallowed-tools: read glob\nmax-iterations: 400\ncolor: blue\n---\n\nBe thorough.\n";
        let definition = parse_front_matter(doc, "test/AGENT.md").expect("document should parse");
        assert_eq!(definition.name, "review-agent");
        assert_eq!(definition.description, "Reviews code.");
        assert_eq!(definition.allowed_tools, vec!["read", "glob"]);
        assert_eq!(definition.max_iterations, 100);
        assert_eq!(definition.metadata.get("color").map(String::as_str), Some("blue"));
        assert_eq!(definition.instructions, "Be thorough.\n");
    }

    #[test]
    fn documents_without_front_matter_or_required_keys_are_rejected() {
        assert_eq!(parse_front_matter("no front matter", "p"), None);
        assert_eq!(
            parse_front_matter("---\ndescription: no name\n---\nbody", "p"),
            None
        );
        assert_eq!(
            parse_front_matter("---\nname: valid-name\n---\nbody", "p"),
            None
        );
        assert_eq!(
            parse_front_matter("---\nname: Bad_Name\ndescription: d\n---\nbody", "p"),
            None
        );
    }

    #[test]
    fn embedded_agents_register_and_win_over_disk() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let shadow_dir = tmp.path().join("planning-agent");
        std::fs::create_dir_all(&shadow_dir).expect("dir should be created");
        std::fs::write(
            shadow_dir.join("AGENT.md"),
            "---\nname: planning-agent\ndescription: impostor\n---\nbody",
        )
        .expect("shadow agent should write");

        let mut registry = AgentRegistry::new();
        registry.register_embedded();
        registry.discover(&[tmp.path().to_path_buf()]);

        let planning = registry.get("planning-agent").expect("agent should exist");
        assert_eq!(planning.agent_dir, "<embedded>");
        assert_ne!(planning.description, "impostor");
        assert!(registry.get("explorer-agent").is_some());
    }

    #[test]
    fn discover_applies_precedence_lowest_to_highest() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let global = tmp.path().join("global");
        let project = tmp.path().join("project");
        for (root, description) in [(&global, "from global"), (&project, "from project")] {
            let dir = root.join("helper");
            std::fs::create_dir_all(&dir).expect("dir should be created");
            std::fs::write(
                dir.join("AGENT.md"),
                format!("---\nname: helper\ndescription: {description}\n---\nbody"),
            )
            .expect("agent should write");
        }

        let mut registry = AgentRegistry::new();
        // Highest priority first: project-local over user-global.
        registry.discover(&[project.clone(), global.clone()]);
        assert_eq!(
            registry.get("helper").expect("agent should exist").description,
            "from project"
        );
    }

    #[test]
    fn prompt_section_escapes_xml() {
        let mut registry = AgentRegistry::new();
        registry.embedded.insert(
            "quoter".to_string(),
            AgentDefinition {
                name: "quoter".to_string(),
                description: "Handles <angle> & \"quotes\"".to_string(),
                max_iterations: 10,
                ..AgentDefinition::default()
            },
        );
        registry.discover(&[]);

        let section = registry.generate_prompt_section();
        assert!(section.contains("&lt;angle&gt; &amp; &quot;quotes&quot;"));
    }
}
