use rustc_hash::FxHashMap;
use tracing::trace;

/// What the page pass knows about a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub id: u32,
    pub is_redirect: bool,
}

/// Title to page lookup, complete once the page pass has drained.
#[derive(Debug, Default)]
pub struct PageIndex {
    by_title: FxHashMap<String, PageEntry>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: String, id: u32, is_redirect: bool) {
        self.by_title.insert(title, PageEntry { id, is_redirect });
    }

    pub fn get(&self, title: &str) -> Option<PageEntry> {
        self.by_title.get(title).copied()
    }

    pub fn len(&self) -> usize {
        self.by_title.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_title.is_empty()
    }
}

/// Redirecting page id to the title of its single-hop successor.
#[derive(Debug, Default)]
pub struct RedirectIndex {
    next: FxHashMap<u32, String>,
}

impl RedirectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: u32, to_title: String) {
        self.next.insert(from, to_title);
    }

    pub fn get(&self, from: u32) -> Option<&str> {
        self.next.get(&from).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }
}

/// `linktarget` id to title.
#[derive(Debug, Default)]
pub struct LinkTargetIndex {
    titles: FxHashMap<u64, String>,
}

impl LinkTargetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u64, title: String) {
        self.titles.insert(id, title);
    }

    pub fn get(&self, id: u64) -> Option<&str> {
        self.titles.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

/// Why a title could not be resolved to a terminal page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// The starting title is not a known page
    UnknownTitle,
    /// A redirect in the chain has no recorded successor, or points to an unknown title
    Dangling,
    /// The chain is longer than the hop limit (includes cycles)
    TooDeep,
}

/// Walks redirect chains over the page and redirect indexes.
pub struct RedirectResolver<'a> {
    pages: &'a PageIndex,
    redirects: &'a RedirectIndex,
    max_hops: u32,
}

impl<'a> RedirectResolver<'a> {
    pub fn new(pages: &'a PageIndex, redirects: &'a RedirectIndex, max_hops: u32) -> Self {
        Self {
            pages,
            redirects,
            max_hops,
        }
    }

    /// Resolves `title` to a terminal page id.
    ///
    /// `hops_taken` counts hops already followed before reaching `title`; the
    /// walk fails once the total would exceed `max_hops`.
    pub fn resolve(&self, title: &str, hops_taken: u32) -> Result<u32, Unresolved> {
        let mut current = title;
        let mut hops = hops_taken;

        loop {
            let entry = match self.pages.get(current) {
                Some(entry) => entry,
                None if hops == hops_taken => return Err(Unresolved::UnknownTitle),
                None => return Err(Unresolved::Dangling),
            };
            if !entry.is_redirect {
                return Ok(entry.id);
            }
            if hops >= self.max_hops {
                trace!(title, hops, "Redirect chain too deep");
                return Err(Unresolved::TooDeep);
            }
            let Some(next) = self.redirects.get(entry.id) else {
                return Err(Unresolved::Dangling);
            };
            trace!(from = current, to = next, "Following redirect");
            current = next;
            hops += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::REDIRECT_MAX_DEPTH;

    /// Terminal pages get ids from `articles`; every redirect source gets id 1000 + position.
    fn make_indexes(articles: Vec<(&str, u32)>, redirects: Vec<(&str, &str)>) -> (PageIndex, RedirectIndex) {
        let mut pages = PageIndex::new();
        let mut next = RedirectIndex::new();
        for (title, id) in articles {
            pages.insert(title.to_string(), id, false);
        }
        for (i, (from, to)) in redirects.into_iter().enumerate() {
            let id = 1000 + i as u32;
            pages.insert(from.to_string(), id, true);
            next.insert(id, to.to_string());
        }
        (pages, next)
    }

    fn chain(len: u32) -> (PageIndex, RedirectIndex) {
        let names: Vec<String> = (0..=len).map(|i| format!("R{i}")).collect();
        let redirects: Vec<(&str, &str)> = names
            .windows(2)
            .map(|w| (w[0].as_str(), w[1].as_str()))
            .collect();
        make_indexes(vec![(names[len as usize].as_str(), 1)], redirects)
    }

    #[test]
    fn resolve_direct_title() {
        let (pages, redirects) = make_indexes(vec![("Rust", 1), ("Python", 2)], vec![]);
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("Rust", 0), Ok(1));
        assert_eq!(resolver.resolve("Python", 0), Ok(2));
    }

    #[test]
    fn resolve_single_redirect() {
        let (pages, redirects) = make_indexes(
            vec![("Rust_(programming_language)", 1)],
            vec![("Rust", "Rust_(programming_language)")],
        );
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("Rust", 0), Ok(1));
    }

    #[test]
    fn resolve_redirect_chain() {
        let (pages, redirects) = make_indexes(vec![("C", 1)], vec![("A", "B"), ("B", "C")]);
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("A", 0), Ok(1));
    }

    #[test]
    fn resolve_redirect_at_max_depth() {
        let (pages, redirects) = chain(REDIRECT_MAX_DEPTH);
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("R0", 0), Ok(1));
    }

    #[test]
    fn resolve_redirect_exceeds_max_depth() {
        let (pages, redirects) = chain(REDIRECT_MAX_DEPTH + 1);
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("R0", 0), Err(Unresolved::TooDeep));
        // Starting one hop in leaves room for the remaining chain
        assert_eq!(resolver.resolve("R1", 0), Ok(1));
        assert_eq!(resolver.resolve("R1", 1), Err(Unresolved::TooDeep));
    }

    #[test]
    fn resolve_circular_redirect() {
        let (pages, redirects) = make_indexes(vec![], vec![("A", "B"), ("B", "C"), ("C", "A")]);
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("A", 0), Err(Unresolved::TooDeep));
    }

    #[test]
    fn resolve_self_redirect() {
        let (pages, redirects) = make_indexes(vec![], vec![("A", "A")]);
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("A", 0), Err(Unresolved::TooDeep));
    }

    #[test]
    fn resolve_nonexistent_title() {
        let (pages, redirects) = make_indexes(vec![("Rust", 1)], vec![]);
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("Python", 0), Err(Unresolved::UnknownTitle));
    }

    #[test]
    fn resolve_redirect_to_nonexistent() {
        let (pages, redirects) = make_indexes(vec![], vec![("A", "B")]);
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("A", 0), Err(Unresolved::Dangling));
    }

    #[test]
    fn redirect_page_without_redirect_row_is_dangling() {
        let mut pages = PageIndex::new();
        pages.insert("Orphan".to_string(), 5, true);
        let redirects = RedirectIndex::new();
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("Orphan", 0), Err(Unresolved::Dangling));
    }

    #[test]
    fn resolve_case_sensitive() {
        let (pages, redirects) = make_indexes(vec![("Rust", 1)], vec![]);
        let resolver = RedirectResolver::new(&pages, &redirects, REDIRECT_MAX_DEPTH);
        assert_eq!(resolver.resolve("Rust", 0), Ok(1));
        assert_eq!(resolver.resolve("rust", 0), Err(Unresolved::UnknownTitle));
        assert_eq!(resolver.resolve("RUST", 0), Err(Unresolved::UnknownTitle));
    }

    #[test]
    fn link_target_lookup() {
        let mut targets = LinkTargetIndex::new();
        targets.insert(42, "Rust".to_string());
        assert_eq!(targets.get(42), Some("Rust"));
        assert_eq!(targets.get(43), None);
        assert_eq!(targets.len(), 1);
    }
}
