//! Static page routes are backed by configured source URLs: the page is
//! fetched on demand and its status and body are forwarded to the client.

use std::io;

pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

pub async fn fetch_page(url: &str) -> io::Result<FetchedPage> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| io::Error::other(format!("page fetch failed: {e}")))?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| io::Error::other(format!("page fetch failed: {e}")))?;
    Ok(FetchedPage { status, body })
}
