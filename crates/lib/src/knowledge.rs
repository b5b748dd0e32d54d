//! Knowledge libraries shown in the side panel. Presentation data only: nothing is indexed or
//! sent to the model; the collection is simply persisted and listed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Md,
    Txt,
    Pdf,
    Doc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Success,
    Error,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeDocument {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub typ: DocumentType,
    pub status: DocumentStatus,
    /// Display size, e.g. "2.3KB".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub is_selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeLibrary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub documents: Vec<KnowledgeDocument>,
}

impl KnowledgeLibrary {
    pub fn selected_documents(&self) -> impl Iterator<Item = &KnowledgeDocument> {
        self.documents.iter().filter(|d| d.is_selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_panel_shape() {
        let json = r#"{
            "id": "default",
            "name": "Default",
            "documents": [
                {"id":"1","name":"api.md","type":"md","status":"success","size":"2.3KB","lastModified":"2025-08-01T00:00:00Z","isSelected":true},
                {"id":"2","name":"big.txt","type":"txt","status":"error","isSelected":false}
            ]
        }"#;
        let lib: KnowledgeLibrary = serde_json::from_str(json).unwrap();
        assert_eq!(lib.documents.len(), 2);
        assert_eq!(lib.documents[0].typ, DocumentType::Md);
        assert_eq!(lib.documents[1].status, DocumentStatus::Error);
        assert!(lib.documents[1].last_modified.is_none());
        let selected: Vec<_> = lib.selected_documents().map(|d| d.id.as_str()).collect();
        assert_eq!(selected, vec!["1"]);
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let json = r#"{"id":"1","name":"x","type":"exe","status":"success","isSelected":false}"#;
        assert!(serde_json::from_str::<KnowledgeDocument>(json).is_err());
    }
}
