//! Persona loading
//!
//! Personas are YAML files with single inheritance via `extends`. Chains
//! are flattened at load time into resolved [`Persona`] values; nothing is
//! resolved at request time beyond `{{user_name}}` substitution.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersonaError {
    #[error("failed to read persona file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse persona file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("persona {0} extends unknown persona {1}")]
    UnknownParent(String, String),

    #[error("inheritance cycle involving persona {0}")]
    Cycle(String),

    #[error("persona not found: {0}")]
    NotFound(String),
}

/// Raw persona file shape
#[derive(Debug, Clone, Deserialize)]
struct PersonaFile {
    name: String,
    #[serde(default)]
    extends: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    style_rules: Vec<String>,
    #[serde(default)]
    greeting: Option<String>,
}

/// Fully resolved persona
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub system_prompt: String,
    pub style_rules: Vec<String>,
    pub greeting: Option<String>,
}

impl Persona {
    /// Substitute `{{user_name}}` in the system prompt. A missing name
    /// degrades to the neutral Vietnamese form of address.
    pub fn render_system_prompt(&self, user_name: Option<&str>) -> String {
        self.system_prompt
            .replace("{{user_name}}", user_name.unwrap_or("bạn"))
    }
}

/// Loaded and flattened persona set
pub struct PersonaLibrary {
    personas: HashMap<String, Persona>,
}

impl PersonaLibrary {
    /// Load every `*.yaml`/`*.yml` file in a directory and flatten
    /// inheritance chains.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, PersonaError> {
        let dir = dir.as_ref();
        let mut files: HashMap<String, PersonaFile> = HashMap::new();

        let entries = std::fs::read_dir(dir).map_err(|source| PersonaError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }

            let raw = std::fs::read_to_string(&path).map_err(|source| PersonaError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let file: PersonaFile =
                serde_yaml::from_str(&raw).map_err(|source| PersonaError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            files.insert(file.name.clone(), file);
        }

        Self::from_files(files)
    }

    fn from_files(files: HashMap<String, PersonaFile>) -> Result<Self, PersonaError> {
        let mut personas = HashMap::new();

        for name in files.keys() {
            let resolved = Self::resolve(name, &files)?;
            personas.insert(name.clone(), resolved);
        }

        tracing::info!(count = personas.len(), "Loaded persona library");
        Ok(Self { personas })
    }

    /// Walk the `extends` chain child-first, accumulating parents
    fn resolve(
        name: &str,
        files: &HashMap<String, PersonaFile>,
    ) -> Result<Persona, PersonaError> {
        let mut chain: Vec<&PersonaFile> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut current = name.to_string();

        loop {
            if seen.contains(&current) {
                return Err(PersonaError::Cycle(current));
            }
            seen.push(current.clone());

            let file = files
                .get(&current)
                .ok_or_else(|| match chain.last() {
                    Some(child) => {
                        PersonaError::UnknownParent(child.name.clone(), current.clone())
                    }
                    None => PersonaError::NotFound(current.clone()),
                })?;
            chain.push(file);

            match &file.extends {
                Some(parent) => current = parent.clone(),
                None => break,
            }
        }

        // Apply root-first so children override parents
        let mut system_prompt = String::new();
        let mut style_rules: Vec<String> = Vec::new();
        let mut greeting = None;

        for file in chain.iter().rev() {
            if let Some(prompt) = &file.system_prompt {
                system_prompt = prompt.clone();
            }
            for rule in &file.style_rules {
                if !style_rules.contains(rule) {
                    style_rules.push(rule.clone());
                }
            }
            if file.greeting.is_some() {
                greeting = file.greeting.clone();
            }
        }

        Ok(Persona {
            name: name.to_string(),
            system_prompt,
            style_rules,
            greeting,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Persona> {
        self.personas.get(name)
    }

    /// Persona for a role, falling back to the base persona
    pub fn for_role(&self, role: &str) -> Option<&Persona> {
        self.personas.get(role).or_else(|| self.personas.get("base"))
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Built-in fallback used when no persona directory is present
    pub fn builtin() -> Self {
        let mut personas = HashMap::new();
        personas.insert(
            "base".to_string(),
            Persona {
                name: "base".to_string(),
                system_prompt: "Bạn là trợ giảng hàng hải của {{user_name}}, trả lời chính xác \
                                và luôn trích dẫn điều luật liên quan."
                    .to_string(),
                style_rules: vec![
                    "Trả lời ngắn gọn, có trích dẫn.".to_string(),
                    "Không lặp lại câu mở đầu gần đây.".to_string(),
                ],
                greeting: None,
            },
        );
        Self { personas }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, extends: Option<&str>, prompt: Option<&str>, rules: &[&str]) -> PersonaFile {
        PersonaFile {
            name: name.to_string(),
            extends: extends.map(String::from),
            system_prompt: prompt.map(String::from),
            style_rules: rules.iter().map(|s| s.to_string()).collect(),
            greeting: None,
        }
    }

    #[test]
    fn test_extends_flattening() {
        let mut files = HashMap::new();
        files.insert(
            "base".into(),
            file("base", None, Some("base prompt {{user_name}}"), &["a"]),
        );
        files.insert("student".into(), file("student", Some("base"), None, &["b"]));

        let lib = PersonaLibrary::from_files(files).unwrap();
        let student = lib.get("student").unwrap();
        // Child inherits prompt, merges rules root-first
        assert_eq!(student.system_prompt, "base prompt {{user_name}}");
        assert_eq!(student.style_rules, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_child_overrides_prompt() {
        let mut files = HashMap::new();
        files.insert("base".into(), file("base", None, Some("base"), &[]));
        files.insert(
            "teacher".into(),
            file("teacher", Some("base"), Some("teacher prompt"), &[]),
        );

        let lib = PersonaLibrary::from_files(files).unwrap();
        assert_eq!(lib.get("teacher").unwrap().system_prompt, "teacher prompt");
    }

    #[test]
    fn test_cycle_detected() {
        let mut files = HashMap::new();
        files.insert("a".into(), file("a", Some("b"), None, &[]));
        files.insert("b".into(), file("b", Some("a"), None, &[]));

        assert!(matches!(
            PersonaLibrary::from_files(files),
            Err(PersonaError::Cycle(_))
        ));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut files = HashMap::new();
        files.insert("a".into(), file("a", Some("ghost"), None, &[]));

        assert!(matches!(
            PersonaLibrary::from_files(files),
            Err(PersonaError::UnknownParent(_, _))
        ));
    }

    #[test]
    fn test_user_name_substitution() {
        let lib = PersonaLibrary::builtin();
        let rendered = lib.get("base").unwrap().render_system_prompt(Some("Minh"));
        assert!(rendered.contains("Minh"));
        assert!(!rendered.contains("{{user_name}}"));

        let neutral = lib.get("base").unwrap().render_system_prompt(None);
        assert!(neutral.contains("bạn"));
    }
}
