use std::str::FromStr;

use reqwest::{header::HeaderMap, Method, StatusCode};
use url::Url;

const TOTAL: &str = "x-total";
const TOTAL_PAGES: &str = "x-total-pages";
const PER_PAGE: &str = "x-per-page";
const PAGE: &str = "x-page";
const NEXT_PAGE: &str = "x-next-page";
const PREV_PAGE: &str = "x-prev-page";

/// Metadata of a received response, returned on success and carried by
/// status errors.
#[derive(Clone, Debug)]
pub struct Response {
    pub method: Method,
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub page: PageInfo,
}

impl Response {
    pub(crate) fn new(method: Method, url: Url, status: StatusCode, headers: HeaderMap) -> Self {
        let page = PageInfo::from_headers(&headers);
        Self {
            method,
            url,
            status,
            headers,
            page,
        }
    }

    /// Returns a header value if it is present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub total_items: Option<u64>,
    pub total_pages: Option<u32>,
    pub per_page: Option<u32>,
    pub current_page: Option<u32>,
    pub next_page: Option<u32>,
    pub previous_page: Option<u32>,
    pub first_link: Option<Url>,
    pub prev_link: Option<Url>,
    pub next_link: Option<Url>,
    pub last_link: Option<Url>,
}

impl PageInfo {
    /// Reads the `X-*` pagination headers and the `Link` header.
    ///
    /// Missing or malformed values are left as `None`; GitLab omits
    /// `X-Total` on very large collections and leaves `X-Next-Page` empty
    /// on the last page.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut info = Self {
            total_items: header_number(headers, TOTAL),
            total_pages: header_number(headers, TOTAL_PAGES),
            per_page: header_number(headers, PER_PAGE),
            current_page: header_number(headers, PAGE),
            next_page: header_number(headers, NEXT_PAGE),
            previous_page: header_number(headers, PREV_PAGE),
            ..Self::default()
        };

        for value in headers.get_all(reqwest::header::LINK) {
            if let Ok(value) = value.to_str() {
                info.apply_link_header(value);
            }
        }

        info
    }

    /// Parses a `Link` header value such as
    /// `<https://gitlab.example.com/api/v4/projects?page=2>; rel="next", <...>; rel="last"`.
    fn apply_link_header(&mut self, link_header: &str) {
        for part in link_header.split(',') {
            let mut url = None;
            let mut rel = None;

            for segment in part.split(';') {
                let segment = segment.trim();
                if segment.starts_with('<') && segment.ends_with('>') {
                    url = Some(&segment[1..segment.len() - 1]);
                } else if let Some(value) = segment.strip_prefix("rel=") {
                    rel = Some(value.trim_matches('"'));
                }
            }

            let (Some(url), Some(rel)) = (url, rel) else {
                continue;
            };
            let Ok(url) = Url::parse(url) else {
                continue;
            };

            match rel {
                "first" => self.first_link = Some(url),
                "prev" => self.prev_link = Some(url),
                "next" => self.next_link = Some(url),
                "last" => self.last_link = Some(url),
                _ => {}
            }
        }
    }
}

fn header_number<N: FromStr>(headers: &HeaderMap, name: &str) -> Option<N> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
