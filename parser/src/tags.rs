//! Typed views over scanned tag attributes.
//!
//! Each recognized tag resolves to a closed set of fields. A tag missing a
//! required field or carrying an unknown action type does not resolve and is
//! treated as literal text by the session.

use smithy_types::ActionKind;

pub(crate) type Attributes<'a> = [(&'a str, &'a str)];

fn lookup<'a>(attrs: &Attributes<'a>, key: &str) -> Option<&'a str> {
    // First occurrence wins.
    attrs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArtifactTag<'a> {
    pub id: &'a str,
    pub title: &'a str,
}

impl<'a> ArtifactTag<'a> {
    pub fn resolve(attrs: &Attributes<'a>) -> Option<Self> {
        let id = lookup(attrs, "id").filter(|id| !id.is_empty())?;
        Some(Self {
            id,
            title: lookup(attrs, "title").unwrap_or(""),
        })
    }
}

pub(crate) fn resolve_action(attrs: &Attributes<'_>) -> Option<ActionKind> {
    match lookup(attrs, "type")? {
        "file" => {
            let path = lookup(attrs, "filePath").filter(|p| !p.is_empty())?;
            Some(ActionKind::File {
                path: path.to_string(),
            })
        }
        "shell" => Some(ActionKind::Shell),
        _ => None,
    }
}
