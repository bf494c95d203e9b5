use serde::{Deserialize, Serialize};

/// Semantic annotation attached to packages, entity types and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub label: String,
    pub relation_iri: String,
    pub object_iri: String,
    pub code_system: Option<String>,
}

impl Tag {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        relation_iri: impl Into<String>,
        object_iri: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            relation_iri: relation_iri.into(),
            object_iri: object_iri.into(),
            code_system: None,
        }
    }

    #[must_use]
    pub fn with_code_system(mut self, code_system: impl Into<String>) -> Self {
        self.code_system = Some(code_system.into());
        self
    }
}
