use std::collections::HashSet;
use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::facts::SopRoleFact;

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid regex"));

/// Plain-text context describing every procedure of one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDocument {
    pub role_name: String,
    pub text: String,
}

impl RoleDocument {
    pub fn file_name(&self) -> String {
        format!("{}.txt", sanitize_file_name(&self.role_name))
    }
}

/// One document per role, roles in order of first appearance.
pub fn role_documents(facts: &[SopRoleFact]) -> Vec<RoleDocument> {
    let mut roles: Vec<(&str, Vec<&SopRoleFact>)> = Vec::new();
    for fact in facts {
        match roles.iter_mut().find(|(name, _)| *name == fact.role_name) {
            Some((_, list)) => list.push(fact),
            None => roles.push((fact.role_name.as_str(), vec![fact])),
        }
    }
    roles
        .into_iter()
        .map(|(role, facts)| {
            let mut text = format!("SOPs for {role}:\n\n");
            for fact in facts {
                let _ = writeln!(
                    text,
                    "- Business Unit: {} | SOP Type: {} | Number: {} | Title: {} | Group: {}",
                    fact.business_unit, fact.sop_type, fact.sop_id, fact.sop_title, fact.group_name
                );
            }
            RoleDocument {
                role_name: role.to_string(),
                text,
            }
        })
        .collect()
}

pub fn sanitize_file_name(name: &str) -> String {
    UNSAFE_FILE_CHARS.replace_all(name, "_").into_owned()
}

/// File name per document, parallel to `docs`. Roles that sanitize to the same
/// name (compared case-insensitively) get `_2`, `_3`, ... suffixes.
pub fn unique_file_names(docs: &[RoleDocument]) -> Vec<String> {
    let mut used = HashSet::new();
    docs.iter()
        .map(|doc| {
            let stem = sanitize_file_name(&doc.role_name);
            let mut name = format!("{stem}.txt");
            let mut n = 1;
            while !used.insert(name.to_lowercase()) {
                n += 1;
                name = format!("{stem}_{n}.txt");
            }
            name
        })
        .collect()
}
