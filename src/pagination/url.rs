//! Page URL construction

use std::fmt;
use std::sync::Arc;

/// Placeholder substituted by [`PageUrl::Template`]
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Custom page URL builder, given the base URL and a 1-based page number
pub type UrlBuilderFn = Arc<dyn Fn(&str, u32) -> String + Send + Sync>;

/// How the URL of page `n` is derived from the base listing URL
#[derive(Clone)]
pub enum PageUrl {
    /// Page number as a query parameter, e.g. `https://site/cars?page=2`
    Query {
        param: String,
        /// Used before the first parameter when the base URL has no query yet
        separator: String,
        /// Static parameters added to every page, page 1 included
        extra_params: Vec<(String, String)>,
    },

    /// Full URL with a `{page}` placeholder, e.g. `https://site/cars/page/{page}`
    Template(String),

    /// Caller-supplied builder
    Custom(UrlBuilderFn),
}

impl PageUrl {
    /// Query-parameter paging with the conventional `?` separator
    pub fn query(param: impl Into<String>) -> Self {
        Self::Query {
            param: param.into(),
            separator: "?".to_string(),
            extra_params: Vec::new(),
        }
    }

    pub fn custom<F>(builder: F) -> Self
    where
        F: Fn(&str, u32) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(builder))
    }

    /// Resolves the URL of `page` (1-based) relative to `base_url`
    pub fn build(&self, base_url: &str, page: u32) -> String {
        match self {
            Self::Query {
                param,
                separator,
                extra_params,
            } => {
                let mut query = url::form_urlencoded::Serializer::new(String::new());
                for (key, value) in extra_params {
                    query.append_pair(key, value);
                }
                if page > 1 {
                    query.append_pair(param, &page.to_string());
                }
                let query = query.finish();

                if query.is_empty() {
                    return base_url.to_string();
                }

                let joiner = if base_url.contains('?') {
                    "&"
                } else {
                    separator.as_str()
                };
                format!("{}{}{}", base_url, joiner, query)
            }
            Self::Template(template) => template.replace(PAGE_PLACEHOLDER, &page.to_string()),
            Self::Custom(builder) => builder(base_url, page),
        }
    }
}

impl Default for PageUrl {
    fn default() -> Self {
        Self::query("page")
    }
}

impl fmt::Debug for PageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query {
                param,
                separator,
                extra_params,
            } => f
                .debug_struct("Query")
                .field("param", param)
                .field("separator", separator)
                .field("extra_params", extra_params)
                .finish(),
            Self::Template(template) => f.debug_tuple("Template").field(template).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_page_is_base_url() {
        let paging = PageUrl::query("page");
        assert_eq!(paging.build("https://ads.test/cars", 1), "https://ads.test/cars");
    }

    #[test]
    fn test_later_pages_append_param() {
        let paging = PageUrl::query("page");
        assert_eq!(
            paging.build("https://ads.test/cars", 3),
            "https://ads.test/cars?page=3"
        );
    }

    #[test]
    fn test_existing_query_uses_ampersand() {
        let paging = PageUrl::Query {
            param: "p".to_string(),
            separator: "?".to_string(),
            extra_params: Vec::new(),
        };
        assert_eq!(
            paging.build("https://ads.test/search?make=bmw", 2),
            "https://ads.test/search?make=bmw&p=2"
        );
    }

    #[test]
    fn test_custom_separator() {
        let paging = PageUrl::Query {
            param: "page".to_string(),
            separator: "#".to_string(),
            extra_params: Vec::new(),
        };
        assert_eq!(paging.build("https://ads.test/list", 2), "https://ads.test/list#page=2");
    }

    #[test]
    fn test_extra_params_on_every_page() {
        let paging = PageUrl::Query {
            param: "page".to_string(),
            separator: "?".to_string(),
            extra_params: vec![("sort".to_string(), "newest first".to_string())],
        };
        assert_eq!(
            paging.build("https://ads.test/cars", 1),
            "https://ads.test/cars?sort=newest+first"
        );
        assert_eq!(
            paging.build("https://ads.test/cars", 2),
            "https://ads.test/cars?sort=newest+first&page=2"
        );
    }

    #[test]
    fn test_template_substitutes_every_page() {
        let paging = PageUrl::Template("https://ads.test/cars/page/{page}".to_string());
        assert_eq!(paging.build("ignored", 1), "https://ads.test/cars/page/1");
        assert_eq!(paging.build("ignored", 7), "https://ads.test/cars/page/7");
    }

    #[test]
    fn test_custom_builder() {
        let paging = PageUrl::custom(|base, page| format!("{}/p{}.html", base, page));
        assert_eq!(paging.build("https://ads.test", 4), "https://ads.test/p4.html");
    }
}
