use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use dealgate_core::Vendor;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Who counts as an admin, which role each salesperson holds, and who the
/// fallback team is when no vendor data can be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRoster {
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub roles: BTreeMap<String, String>,
    #[serde(default)]
    pub defaults: Vec<String>,
    #[serde(default = "default_role")]
    pub default_role: String,
}

fn default_role() -> String {
    "Salesperson".to_string()
}

impl Default for VendorRoster {
    fn default() -> Self {
        let roles = [
            ("Tomás", "CEO/Head of Sales"),
            ("Jordi", "Sales Manager"),
            ("Matheus", "Account Executive"),
        ]
        .into_iter()
        .map(|(name, role)| (name.to_string(), role.to_string()))
        .collect();

        Self {
            admins: vec!["Tomás".to_string()],
            roles,
            defaults: ["Tomás", "Jordi", "Matheus", "Carlos", "Paulo"]
                .into_iter()
                .map(ToString::to_string)
                .collect(),
            default_role: default_role(),
        }
    }
}

impl VendorRoster {
    /// Reads a roster file; a missing file yields the built-in roster.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no roster file; using built-in roster");
            return Ok(Self::default());
        }
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading roster file {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("parsing roster file {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn is_admin(&self, name: &str) -> bool {
        self.admins.iter().any(|admin| admin == name)
    }

    pub fn role_for(&self, name: &str) -> &str {
        self.roles
            .get(name)
            .map(String::as_str)
            .unwrap_or(&self.default_role)
    }

    pub fn vendor(&self, name: &str) -> Vendor {
        Vendor {
            name: name.to_string(),
            email: None,
            role: Some(self.role_for(name).to_string()),
            is_admin: self.is_admin(name),
        }
    }

    pub fn default_vendors(&self) -> Vec<Vendor> {
        self.defaults.iter().map(|name| self.vendor(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn built_in_roster_has_one_admin() {
        let roster = VendorRoster::default();
        assert!(roster.is_admin("Tomás"));
        assert!(!roster.is_admin("Jordi"));
        assert_eq!(roster.role_for("Matheus"), "Account Executive");
        assert_eq!(roster.role_for("Paulo"), "Salesperson");
        assert_eq!(roster.default_vendors().len(), 5);
    }

    #[test]
    fn yaml_roster_overrides_defaults() {
        let roster = VendorRoster::from_yaml(
            r#"
admins: [Ana, Bruno]
roles:
  Ana: Director
defaults: [Ana, Bruno, Carla]
"#,
        )
        .expect("parse roster");
        assert!(roster.is_admin("Bruno"));
        assert_eq!(roster.role_for("Ana"), "Director");
        assert_eq!(roster.role_for("Carla"), "Salesperson");
        let names: Vec<String> = roster.default_vendors().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["Ana", "Bruno", "Carla"]);
    }

    #[test]
    fn missing_file_falls_back_to_built_in() {
        let dir = tempdir().expect("tempdir");
        let roster = VendorRoster::load(&dir.path().join("vendors.yaml")).expect("load");
        assert_eq!(roster, VendorRoster::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("vendors.yaml");
        std::fs::write(&path, "admins: {not: [a list").expect("write");
        assert!(VendorRoster::load(&path).is_err());
    }
}
