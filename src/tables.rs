//! Per-table column projections and row parsers.
//!
//! Each [`TableStrategy`] pairs the columns to project out of a dump with a
//! plain function turning the projected tuple into a typed row. The resolver
//! drives every table through the same generic reader.

use crate::models::TableKind;
use crate::tokenizer::Tuple;

/// Why a tuple did not become a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Outside the configured namespace
    Namespace,
    /// A numeric field failed to parse
    Malformed,
    /// Redirect into another wiki
    Interwiki,
}

pub struct TableStrategy<T> {
    pub kind: TableKind,
    pub columns: &'static [&'static str],
    pub parse: fn(Tuple, i32) -> Result<T, Skip>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRow {
    pub id: u32,
    pub title: String,
    pub is_redirect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRow {
    pub from: u32,
    pub to_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTargetRow {
    pub id: u64,
    pub title: String,
}

/// Where a link points before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Title(String),
    Id(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    pub from: u32,
    pub target: LinkTarget,
}

pub static PAGES: TableStrategy<PageRow> = TableStrategy {
    kind: TableKind::Page,
    columns: &["page_id", "page_namespace", "page_title", "page_is_redirect"],
    parse: parse_page,
};

pub static REDIRECTS: TableStrategy<RedirectRow> = TableStrategy {
    kind: TableKind::Redirect,
    columns: &["rd_from", "rd_namespace", "rd_title", "rd_interwiki"],
    parse: parse_redirect,
};

pub static LINK_TARGETS: TableStrategy<LinkTargetRow> = TableStrategy {
    kind: TableKind::LinkTarget,
    columns: &["lt_id", "lt_namespace", "lt_title"],
    parse: parse_link_target,
};

/// Current `pagelinks` layout, targets referenced by `linktarget` id.
pub static PAGE_LINKS: TableStrategy<LinkRow> = TableStrategy {
    kind: TableKind::PageLinks,
    columns: &["pl_from", "pl_from_namespace", "pl_target_id"],
    parse: parse_link,
};

/// Pre-2024 `pagelinks` layout with inline target titles.
pub static LEGACY_PAGE_LINKS: TableStrategy<LinkRow> = TableStrategy {
    kind: TableKind::PageLinks,
    columns: &["pl_from", "pl_namespace", "pl_title", "pl_from_namespace"],
    parse: parse_legacy_link,
};

fn number<N: std::str::FromStr>(field: &str) -> Result<N, Skip> {
    field.trim().parse().map_err(|_| Skip::Malformed)
}

fn check_namespace(field: &str, namespace: i32) -> Result<(), Skip> {
    if number::<i32>(field)? == namespace {
        Ok(())
    } else {
        Err(Skip::Namespace)
    }
}

fn parse_page(tuple: Tuple, namespace: i32) -> Result<PageRow, Skip> {
    let [id, ns, title, is_redirect]: [String; 4] =
        tuple.try_into().map_err(|_| Skip::Malformed)?;
    check_namespace(&ns, namespace)?;
    Ok(PageRow {
        id: number(&id)?,
        title,
        is_redirect: number::<u8>(&is_redirect)? != 0,
    })
}

fn parse_redirect(tuple: Tuple, namespace: i32) -> Result<RedirectRow, Skip> {
    let [from, ns, title, interwiki]: [String; 4] =
        tuple.try_into().map_err(|_| Skip::Malformed)?;
    check_namespace(&ns, namespace)?;
    // Unquoted NULL marks a local redirect in older dumps
    if !interwiki.is_empty() && interwiki != "NULL" {
        return Err(Skip::Interwiki);
    }
    Ok(RedirectRow {
        from: number(&from)?,
        to_title: title,
    })
}

fn parse_link_target(tuple: Tuple, namespace: i32) -> Result<LinkTargetRow, Skip> {
    let [id, ns, title]: [String; 3] = tuple.try_into().map_err(|_| Skip::Malformed)?;
    check_namespace(&ns, namespace)?;
    Ok(LinkTargetRow {
        id: number(&id)?,
        title,
    })
}

fn parse_link(tuple: Tuple, namespace: i32) -> Result<LinkRow, Skip> {
    let [from, from_ns, target]: [String; 3] = tuple.try_into().map_err(|_| Skip::Malformed)?;
    check_namespace(&from_ns, namespace)?;
    Ok(LinkRow {
        from: number(&from)?,
        target: LinkTarget::Id(number(&target)?),
    })
}

fn parse_legacy_link(tuple: Tuple, namespace: i32) -> Result<LinkRow, Skip> {
    let [from, ns, title, from_ns]: [String; 4] =
        tuple.try_into().map_err(|_| Skip::Malformed)?;
    check_namespace(&from_ns, namespace)?;
    check_namespace(&ns, namespace)?;
    Ok(LinkRow {
        from: number(&from)?,
        target: LinkTarget::Title(title),
    })
}
