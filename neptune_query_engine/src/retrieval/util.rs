// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Paging primitives shared by the retrieval adapters.

use std::future::Future;

use futures::stream;
use futures::Stream;

use crate::Result;

/// One finite, ordered chunk of results from a paginated endpoint.
///
/// Continuation tokens are handled by the adapter that produced the page and
/// are never exposed to the consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Drives a paginated endpoint lazily: fetch a page from the current
/// parameters, decode it, then derive the parameters of the next page or
/// finish.
///
/// `next_page_params` receives the parameters just used plus the decoded
/// response, and returns `None` when the pagination is exhausted.
pub(crate) fn fetch_pages<T, Params, Data, Fetch, Fut, Process, Next>(
    initial: Params,
    fetch_page: Fetch,
    process_page: Process,
    next_page_params: Next,
) -> impl Stream<Item = Result<Page<T>>>
where
    Params: Clone,
    Fetch: Fn(Params) -> Fut,
    Fut: Future<Output = Result<Data>>,
    Process: Fn(&Data) -> Result<Page<T>>,
    Next: Fn(Params, &Data) -> Option<Params>,
{
    stream::try_unfold(
        (fetch_page, process_page, next_page_params, Some(initial)),
        |(fetch_page, process_page, next_page_params, params)| async move {
            let Some(params) = params else {
                return Ok(None);
            };
            let data = fetch_page(params.clone()).await?;
            let page = process_page(&data)?;
            let next = next_page_params(params, &data);
            Ok(Some((page, (fetch_page, process_page, next_page_params, next))))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn fetch_pages_follows_continuations_until_exhausted() {
        // Parameters are the page start; three pages of two items each.
        let pages = fetch_pages(
            0u32,
            |start| async move { Ok(vec![start, start + 1]) },
            |data: &Vec<u32>| Ok(Page::new(data.clone())),
            |start, _data| if start < 4 { Some(start + 2) } else { None },
        );
        let collected: Vec<_> = pages.collect().await;
        let items: Vec<u32> = collected
            .into_iter()
            .flat_map(|page| page.unwrap().items)
            .collect();
        assert_eq!(items, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn fetch_pages_surfaces_fetch_errors() {
        let pages = fetch_pages(
            0u32,
            |start| async move {
                if start == 2 {
                    Err(crate::ErrorKind::InternalError.with_message("page fetch failed"))
                } else {
                    Ok(vec![start])
                }
            },
            |data: &Vec<u32>| Ok(Page::new(data.clone())),
            |start, _data| Some(start + 2),
        );
        let collected: Vec<_> = pages.take(3).collect().await;
        assert!(collected[0].is_ok());
        assert!(collected[1].is_err());
    }
}
