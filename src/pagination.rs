//! Lazy page cursors over list endpoints.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    decode::decode_into, params::Payload, Endpoint, GitlabClient, GitlabError, RequestOption,
    Response, Result,
};

const DEFAULT_PER_PAGE: u32 = 20;

/// How a cursor addresses the next page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageMode {
    /// Numeric `page`/`per_page` parameters.
    Offset,
    /// Opaque continuation taken from the `Link: rel="next"` header.
    Keyset,
}

/// One fetched page.
#[derive(Clone, Debug)]
pub struct Page<T> {
    /// Offset page number, or the 1-based position in keyset mode.
    pub number: u32,
    pub items: Vec<T>,
    pub response: Response,
}

#[derive(Clone, Debug)]
struct CursorState {
    next_number: u32,
    next_link: Option<Url>,
    fetched: u64,
    started: bool,
    exhausted: bool,
}

/// Sequential page iteration over a list endpoint.
///
/// Each [`next_page`](Self::next_page) call performs exactly one executor
/// call. A failed fetch leaves the cursor where it was, so the same page
/// can be requested again. Once exhausted, the cursor yields nothing more.
#[derive(Debug)]
pub struct PageCursor<'a, T> {
    client: &'a GitlabClient,
    endpoint: Endpoint,
    payload: Payload,
    options: Vec<RequestOption>,
    mode: PageMode,
    per_page: u32,
    state: CursorState,
    _items: PhantomData<fn() -> T>,
}

impl<'a, T> PageCursor<'a, T>
where
    T: DeserializeOwned,
{
    pub(crate) fn new(
        client: &'a GitlabClient,
        endpoint: Endpoint,
        payload: Payload,
        options: Vec<RequestOption>,
    ) -> Self {
        let per_page = positive_param(&payload, "per_page").unwrap_or(DEFAULT_PER_PAGE);
        let first_page = positive_param(&payload, "page").unwrap_or(1);
        Self {
            client,
            endpoint,
            payload,
            options,
            mode: PageMode::Offset,
            per_page,
            state: CursorState {
                next_number: first_page,
                next_link: None,
                fetched: 0,
                started: false,
                exhausted: false,
            },
            _items: PhantomData,
        }
    }

    /// Overrides the page size hint taken from `per_page` in the call's
    /// parameters. Zero is treated as one.
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Switches to keyset (link-header) pagination.
    pub fn keyset(mut self) -> Self {
        self.mode = PageMode::Keyset;
        self.state.next_number = 1;
        self
    }

    pub fn mode(&self) -> PageMode {
        self.mode
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.exhausted
    }

    /// Fetches the next page, or returns `None` once the listing is done.
    pub async fn next_page(&mut self) -> Result<Option<Page<T>>> {
        if self.state.exhausted {
            return Ok(None);
        }

        let mut options = self.options.clone();
        options.extend(self.addressing()?);

        let (body, response) = self
            .client
            .execute(&self.endpoint, &self.payload, &options)
            .await?;
        let mut items: Vec<T> = Vec::new();
        decode_into(&body, &response, &mut items)?;

        let number = self.state.next_number;
        let mut next = self.state.clone();
        next.next_number += 1;
        next.fetched += items.len() as u64;
        next.started = true;
        next.next_link = response.page.next_link.clone();
        next.exhausted = self.is_last(&items, &response, &next);
        self.state = next;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            page = number,
            items = items.len(),
            exhausted = self.state.exhausted,
            "fetched page"
        );

        if items.is_empty() {
            self.state.exhausted = true;
            return Ok(None);
        }

        Ok(Some(Page {
            number,
            items,
            response,
        }))
    }

    /// Drains the remaining pages into one list.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page.items);
        }
        Ok(all)
    }

    fn addressing(&self) -> Result<Vec<RequestOption>> {
        match self.mode {
            PageMode::Offset => Ok(vec![RequestOption::page(
                self.state.next_number,
                self.per_page,
            )]),
            PageMode::Keyset => {
                let mut options = vec![
                    RequestOption::query("pagination", "keyset"),
                    RequestOption::query("per_page", self.per_page.to_string()),
                ];
                match &self.state.next_link {
                    Some(link) => options.push(RequestOption::keyset_from_link(link.as_str())),
                    None if self.state.started => {
                        return Err(GitlabError::invalid(
                            "keyset cursor has no continuation link",
                        ))
                    }
                    None => {}
                }
                Ok(options)
            }
        }
    }

    fn is_last(&self, items: &[T], response: &Response, next: &CursorState) -> bool {
        let page = &response.page;
        match self.mode {
            PageMode::Keyset => page.next_link.is_none(),
            PageMode::Offset => {
                if items.len() < self.per_page as usize {
                    return true;
                }
                if let Some(total) = page.total_items {
                    if next.fetched >= total {
                        return true;
                    }
                }
                if let (Some(current), Some(total_pages)) = (page.current_page, page.total_pages) {
                    if current >= total_pages {
                        return true;
                    }
                }
                response
                    .header("x-next-page")
                    .is_some_and(|value| value.trim().is_empty())
            }
        }
    }
}

fn positive_param(payload: &Payload, key: &str) -> Option<u32> {
    payload
        .query_value(key)
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
}
