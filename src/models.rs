use serde::{Deserialize, Serialize};
use std::fmt;

/// The dump tables the pipeline reads, in the order they are ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Page,
    Redirect,
    LinkTarget,
    PageLinks,
}

impl TableKind {
    /// Table name as it appears in dump file names.
    pub fn dump_name(self) -> &'static str {
        match self {
            TableKind::Page => "page",
            TableKind::Redirect => "redirect",
            TableKind::LinkTarget => "linktarget",
            TableKind::PageLinks => "pagelinks",
        }
    }

    pub fn from_dump_name(name: &str) -> Option<Self> {
        match name {
            "page" => Some(TableKind::Page),
            "redirect" => Some(TableKind::Redirect),
            "linktarget" => Some(TableKind::LinkTarget),
            "pagelinks" => Some(TableKind::PageLinks),
            _ => None,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dump_name())
    }
}

/// A page node handed to the sink during the page pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub id: u32,
    pub title: String,
    pub is_redirect: bool,
}

/// A resolved edge. `to` is always a terminal (non-redirect) page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: u32,
    pub to: u32,
}

/// A redirect whose target was itself a redirect when first seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRedirect {
    pub from_id: u32,
    pub to_title: String,
}
