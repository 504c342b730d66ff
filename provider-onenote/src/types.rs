//! Microsoft Graph OneNote response types
//!
//! Data structures for deserializing `/me/onenote` responses.

use serde::Deserialize;

/// Graph collection envelope
///
/// See: https://learn.microsoft.com/graph/paging
#[derive(Debug, Deserialize)]
pub struct ODataCollection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,

    /// Absolute URL of the next page
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// OneNote notebook resource
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNotebook {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// OneNote section resource
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSection {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// OneNote page resource (metadata only)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphPage {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,

    /// RFC 3339
    pub created_date_time: Option<String>,

    /// RFC 3339
    pub last_modified_date_time: Option<String>,

    pub created_by: Option<IdentitySet>,
    pub links: Option<PageLinks>,
    pub parent_section: Option<ParentRef>,
    pub parent_notebook: Option<ParentRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySet {
    pub user: Option<Identity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLinks {
    pub one_note_web_url: Option<ExternalLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalLink {
    pub href: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParentRef {
    pub id: String,
}

/// Graph error envelope
#[derive(Debug, Deserialize)]
pub struct GraphErrorBody {
    pub error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct GraphErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
