use std::collections::HashMap;

use serde::Serialize;

use crate::config::MAX_PAGE_LIMIT;

/// Parse query parameters from a URI string
///
/// Handles URL decoding and returns a HashMap of parameter key-value pairs.
/// Multiple values for the same key are not supported (only the last is kept).
///
/// # Example
/// ```
/// use socialgraph::core::query_params::parse_query_params;
///
/// let params = parse_query_params("/path?user=john&page=2");
/// assert_eq!(params.get("user"), Some(&"john".to_string()));
/// assert_eq!(params.get("page"), Some(&"2".to_string()));
/// ```
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    if let Some(query_start) = uri.find('?') {
        let query = &uri[query_start + 1..];
        for param in query.split('&').filter(|p| !p.is_empty()) {
            if let Some(eq_idx) = param.find('=') {
                let key = &param[..eq_idx];
                let encoded_value = &param[eq_idx + 1..].replace('+', " ");
                let decoded = urlencoding::decode(encoded_value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| encoded_value.to_string());
                params.insert(key.to_string(), decoded);
            } else {
                // Flag parameter without value
                params.insert(param.to_string(), String::new());
            }
        }
    }

    params
}

/// Get a string parameter, treating empty values as absent
pub fn get_string(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params.get(key).filter(|s| !s.trim().is_empty()).cloned()
}

/// Get an integer parameter with validation and default
pub fn get_int(params: &HashMap<String, String>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
        .max(1)
}

/// `page` / `limit` pair taken from the query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub current_page: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub total: usize,
}

impl Pagination {
    pub fn from_params(params: &HashMap<String, String>, default_limit: usize) -> Self {
        Self {
            page: get_int(params, "page", 1),
            limit: get_int(params, "limit", default_limit).min(MAX_PAGE_LIMIT),
        }
    }

    pub fn from_uri(uri: &str, default_limit: usize) -> Self {
        Self::from_params(&parse_query_params(uri), default_limit)
    }

    /// Items before this page; saturates so a huge `page` lands past the end.
    pub fn skip(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    /// Cut one page out of an already-ordered collection.
    pub fn apply<T>(&self, items: Vec<T>) -> (Vec<T>, PageMeta) {
        let total = items.len();
        let meta = PageMeta {
            current_page: self.page,
            total_pages: total.div_ceil(self.limit),
            has_next_page: self.page.saturating_mul(self.limit) < total,
            total,
        };
        let page = items.into_iter().skip(self.skip()).take(self.limit).collect();
        (page, meta)
    }
}

/// `{ <field>: [...], currentPage, totalPages, hasNextPage }`
pub fn paged_json<T: Serialize>(field: &str, items: &[T], meta: &PageMeta) -> serde_json::Value {
    let mut body = serde_json::json!({
        "currentPage": meta.current_page,
        "totalPages": meta.total_pages,
        "hasNextPage": meta.has_next_page,
        "total": meta.total,
    });
    body[field] = serde_json::json!(items);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_decodes() {
        let params = parse_query_params("/api/users/search?q=ann%20lee&flag&page=2");
        assert_eq!(params.get("q").unwrap(), "ann lee");
        assert_eq!(params.get("flag").unwrap(), "");
        assert_eq!(get_int(&params, "page", 1), 2);
        assert_eq!(get_int(&params, "missing", 7), 7);
    }

    #[test]
    fn pagination_clamps_and_slices() {
        let p = Pagination::from_uri("/x?page=0&limit=5000", 10);
        assert_eq!(p, Pagination { page: 1, limit: MAX_PAGE_LIMIT });

        let p = Pagination::from_uri("/x?page=2&limit=2", 10);
        let (items, meta) = p.apply(vec![1, 2, 3, 4, 5]);
        assert_eq!(items, vec![3, 4]);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next_page);

        let p = Pagination::from_uri("/x?page=3&limit=2", 10);
        let (items, meta) = p.apply(vec![1, 2, 3, 4, 5]);
        assert_eq!(items, vec![5]);
        assert!(!meta.has_next_page);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let p = Pagination::from_uri("/x?page=18446744073709551615", 10);
        assert_eq!(p.page, usize::MAX);
        let (items, meta) = p.apply(vec![1, 2, 3]);
        assert!(items.is_empty());
        assert!(!meta.has_next_page);
        assert_eq!(meta.total, 3);

        let (items, meta) = Pagination::from_uri("/x?page=9", 2).apply(vec![1, 2, 3]);
        assert!(items.is_empty());
        assert!(!meta.has_next_page);
    }
}
